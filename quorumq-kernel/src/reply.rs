//! The direct reply half of `apply`'s result: either
//! `{state', reply, effects}` or `{state', reply}`.
//!
//! Distinct from [`crate::effects::Effect`]: a `Reply` always goes straight
//! back to the command's caller, while effects are asynchronous requests to
//! the substrate (which may itself carry a later reply, e.g. the v2 credit
//! protocol's `CreditReply` effect sent after delivery).

use quorumq_types::{ConsumerKey, LogIndex};

use crate::header::Header;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequeueOutcome {
    pub index: LogIndex,
    pub header: Header,
    pub messages_remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub key: ConsumerKey,
    pub messages_ready: u64,
    pub priority: i32,
}

/// Everything a command can reply with directly to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    OutOfSequence,
    Duplicate,
    ConsumerAttached {
        consumer: ConsumerKey,
        messages_ready: u64,
    },
    Dequeue(DequeueOutcome),
    SendCreditReply {
        consumer: ConsumerKey,
        messages_ready: u64,
    },
    PurgeCount(u64),
    Error(crate::errors::DispatchError),
}
