//! Caller-recoverable errors.
//!
//! None of these abort the state machine: they're returned as the `reply`
//! half of `apply`'s result, with the state left unchanged (or changed only
//! as far as the command's own documented semantics say it should be — e.g.
//! an out-of-sequence enqueue still registers an unknown publisher).
//! Internal invariant violations are programming errors and use
//! `assert!`/`debug_assert!` instead, terminating the replica.

use quorumq_types::ConsumerKey;
use thiserror::Error;

use crate::command::ConsumerRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("consumer ref {0:?} is not registered and does not resolve via (tag, pid)")]
    InvalidConsumerKey(ConsumerRef),

    #[error("no registered consumer with key {0}")]
    ConsumerNotFound(ConsumerKey),

    #[error("single_active_consumer queues do not support basic.get-style dequeue")]
    UnsupportedSingleActiveDequeue,

    #[error("publisher sequence number is ahead of the queue's expectation")]
    NotEnqueued,

    #[error("no message at position {0}")]
    NoMessageAtPos(u64),

    #[error("queue is empty")]
    DequeueEmpty,
}
