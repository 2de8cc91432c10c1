//! The tagged command set the dispatcher accepts.
//!
//! Every command carries only the fields its handler actually reads; wire
//! encoding (and therefore command *versioning* in the on-the-wire sense)
//! is the replication substrate's concern. [`MachineVersion`] is the one
//! command the core itself interprets as a version marker, because it
//! rewrites the in-memory `State` shape (see `version.rs`).

use std::collections::BTreeMap;

use bytes::Bytes;
use quorumq_types::{ConsumerKey, ConsumerTag, LogIndex, NodeId, Pid, Timestamp};
use serde::{Deserialize, Serialize};

use crate::config::ConfigUpdate;

/// Metadata the replication substrate attaches to every committed command.
///
/// This is the *only* channel through which time, ordering, and caller
/// identity reach the kernel — see invariant 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub index: LogIndex,
    pub system_time: Timestamp,
    pub from: Option<Pid>,
    pub reply_mode: ReplyMode,
}

impl Meta {
    pub fn new(index: LogIndex, system_time: Timestamp) -> Self {
        Self {
            index,
            system_time,
            from: None,
            reply_mode: ReplyMode::Silent,
        }
    }

    pub fn with_from(mut self, from: Pid) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_reply_mode(mut self, mode: ReplyMode) -> Self {
        self.reply_mode = mode;
        self
    }
}

/// How (and to whom) the caller expects a reply.
///
/// `enqueue_v2`'s compact wire form carries the publisher's `Pid` here
/// instead of repeating it in the command body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyMode {
    Silent,
    Reply(Pid),
}

impl ReplyMode {
    pub fn publisher(self) -> Option<Pid> {
        match self {
            ReplyMode::Reply(pid) => Some(pid),
            ReplyMode::Silent => None,
        }
    }
}

/// Resolves to a canonical [`ConsumerKey`] by the dispatcher; accepted in
/// either the v4 bare-integer form or the legacy `(tag, pid)` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerRef {
    Key(ConsumerKey),
    Legacy(ConsumerTag, Pid),
}

/// Consumer lifetime: `once` consumers are removed as soon as their single
/// delivery is settled; `auto` consumers persist until cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifetime {
    Once,
    Auto,
}

/// Flow-control protocol a consumer negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditMode {
    /// v1: credit auto-replenishes up to `max` on settle/return/requeue.
    SimplePrefetch { max: u32 },
    /// v2: credit is driven by the AMQP-style delivery-count protocol.
    Credited { initial_delivery_count: u32 },
}

/// `basic.get`-style settlement requested for a synchronous dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DequeueSettlement {
    AutoSettle,
    ManualAck,
}

/// What kind of checkout is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutSpec {
    /// A standing consumer, fed by the checkout engine as credit allows.
    Standing,
    /// A single synchronous dequeue (`basic.get`); illegal under
    /// `single_active`.
    Dequeue { settlement: DequeueSettlement },
}

/// Parameters for attaching (or re-attaching) a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerAttach {
    pub tag: ConsumerTag,
    pub pid: Pid,
    pub lifetime: Lifetime,
    pub credit_mode: CreditMode,
    pub priority: i32,
    pub meta: BTreeMap<String, String>,
}

/// Why a process is reported down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownReason {
    NoConnection,
    Other,
}

/// Commands folded back through the dispatcher on behalf of the dead-letter
/// sidecar, so its own acknowledgements are part of the
/// same deterministic log as everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlxCommand {
    /// The sidecar has durably delivered (or exhausted retries for) the
    /// dead-lettered message at this index; drop our bookkeeping for it.
    Ack { index: LogIndex },
}

/// The tagged command union the dispatcher routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Enqueue {
        publisher: Option<Pid>,
        seqno: Option<u64>,
        body: Bytes,
        ttl_ms: Option<u64>,
    },
    /// Compact form: the publisher pid travels in `meta.reply_mode`.
    EnqueueV2 {
        seqno: u64,
        body: Bytes,
        ttl_ms: Option<u64>,
    },
    RegisterEnqueuer {
        pid: Pid,
    },
    Checkout {
        spec: CheckoutSpec,
        consumer: ConsumerAttach,
    },
    Settle {
        consumer: ConsumerRef,
        msg_ids: Vec<quorumq_types::MsgId>,
    },
    Return {
        consumer: ConsumerRef,
        msg_ids: Vec<quorumq_types::MsgId>,
    },
    Discard {
        consumer: ConsumerRef,
        msg_ids: Vec<quorumq_types::MsgId>,
    },
    Defer {
        consumer: ConsumerRef,
        msg_ids: Vec<quorumq_types::MsgId>,
    },
    Credit {
        consumer: ConsumerRef,
        credit: u32,
        drain: bool,
        /// v2 only: the receiver's observed `delivery_count`, used to
        /// compute `link_credit_snd`.
        receiver_delivery_count: Option<u32>,
    },
    /// Internal: produced by a client library whose consumer was cancelled
    /// without delivery-limit accounting.
    Requeue {
        msg_id: quorumq_types::MsgId,
        consumer: ConsumerRef,
    },
    /// Graceful cancel: the consumer stays registered with
    /// `status=cancelled` until its last checked-out message settles.
    Cancel {
        consumer: ConsumerRef,
    },
    /// Abrupt removal: checked-out messages are returned immediately and
    /// the consumer is erased from the registry.
    Remove {
        consumer: ConsumerRef,
    },
    Purge,
    PurgeNodes {
        nodes: Vec<NodeId>,
    },
    UpdateConfig(ConfigUpdate),
    GarbageCollection,
    EvalConsumerTimeouts {
        keys: Vec<ConsumerRef>,
    },
    /// Periodic tick delivering `system_time` for expiry/TTL accounting.
    Timeout,
    Down {
        pid: Pid,
        reason: DownReason,
    },
    NodeUp {
        node: NodeId,
    },
    NodeDown {
        node: NodeId,
    },
    MachineVersion {
        from: u8,
        to: u8,
    },
    Dlx(DlxCommand),
}
