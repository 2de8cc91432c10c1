//! Effects produced by the kernel.
//!
//! The kernel is pure: it never performs I/O, sends a message, or starts a
//! timer itself. Every side effect is described by a value here and handed
//! to the replication substrate to execute after the command has committed.

use bytes::Bytes;
use quorumq_types::{ConsumerKey, LogIndex, NodeId, Pid};
use serde::{Deserialize, Serialize};

use crate::dlx::DlxReason;
use crate::state::DehydratedState;

/// Whether a `send_msg` effect should be delivered as a consensus-ordered
/// `ra_event` or a best-effort local message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryChannel {
    RaEvent,
    Local,
}

/// What queue-status a blocked/unblocked publisher is being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    RejectPublish,
    Go,
}

/// Payload of a `send_msg` effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendMsgContent {
    /// A batch of deliveries to one consumer. `inline_body` is set only
    /// when `msg_cache` satisfied a single-message batch, sparing the
    /// substrate a log read.
    Delivery {
        consumer: ConsumerKey,
        indexes: Vec<LogIndex>,
        inline_body: Option<Bytes>,
    },
    QueueStatus(QueueStatus),
    /// v1 `drain=true` companion reply. The primary `send_credit_reply` is
    /// a direct [`crate::reply::Reply`], not an effect — it always answers
    /// the same `credit` command, unlike `send_drained` which the checkout
    /// engine may emit after further draining has happened.
    SendDrained {
        consumer: ConsumerKey,
        credit_drained: u32,
    },
    /// v2 credit protocol reply, sent *after* delivery effects so FLOW
    /// follows TRANSFER on the wire.
    CreditReply {
        consumer: ConsumerKey,
        delivery_count: u32,
        credit: u32,
        available: u64,
        drain: bool,
    },
}

/// What's being monitored: a single process, or every process on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorTarget {
    Process(Pid),
    Node(NodeId),
}

/// A named timer the substrate should (re)arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerName {
    ExpireMsgs,
}

/// Leader-only housekeeping requests, routed to the auxiliary handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuxRequest {
    SpawnDeleter,
    EmitUsageStats,
}

/// Payload of a `mod_call` effect: an opaque callback request to the
/// embedding host. The only shape the core itself produces today is the
/// single-active handoff notification; anything else a host registers is
/// out of scope for the kernel to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModCallArgs {
    /// Single-active consumer `key` just became (or stopped being) the
    /// active consumer for this queue.
    UpdateConsumerHandler { consumer: ConsumerKey, active: bool },
}

/// An effect the substrate must execute after the command that produced it
/// has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    SendMsg {
        pid: Pid,
        content: SendMsgContent,
        channel: DeliveryChannel,
    },
    Monitor(MonitorTarget),
    /// Asks the substrate to fetch the raw committed commands at `indexes`
    /// and re-enter with them so the delivery can be completed
    /// -> effects)`).
    LogRead {
        indexes: Vec<LogIndex>,
        consumer: ConsumerKey,
    },
    /// A dead-letter hand-off the substrate's sidecar must pick up.
    DeadLetter {
        index: LogIndex,
        reason: DlxReason,
    },
    ReleaseCursor {
        index: LogIndex,
        dehydrated: Box<DehydratedState>,
    },
    Timer {
        name: TimerName,
        delay_ms: u64,
    },
    ModCall {
        module: String,
        function: String,
        args: ModCallArgs,
    },
    Aux(AuxRequest),
}
