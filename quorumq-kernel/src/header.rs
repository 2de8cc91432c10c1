//! The on-log reference to a message: everything the kernel needs to know
//! about a message without holding its body.
//!
//! The body itself lives in the replicated log (see [`crate::runtime::Log`]);
//! the kernel only ever carries `(log_index, header)` pairs, which is what
//! keeps the in-memory state small enough to snapshot in a release cursor.

use quorumq_types::{LogIndex, Timestamp};
use serde::{Deserialize, Serialize};

/// Per-message metadata the kernel tracks alongside its log index.
///
/// Mirrors a compact three-shape wire encoding:
/// a bare size when nothing else is set, a size+expiry pair once a TTL is
/// stamped, and the full map once the message has been returned at least
/// once (`delivery_count` present). Rust doesn't need the shape-switching
/// trick the wire format uses to stay small — `Option` already elides the
/// unset fields in `serde_json`, and a binary codec can flatten this the
/// same way the substrate flattens `Command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub size_bytes: u32,
    pub expiry_ts: Option<Timestamp>,
    pub delivery_count: u32,
}

impl Header {
    pub fn new(size_bytes: u32) -> Self {
        Self {
            size_bytes,
            expiry_ts: None,
            delivery_count: 0,
        }
    }

    pub fn with_expiry(mut self, expiry_ts: Timestamp) -> Self {
        self.expiry_ts = Some(expiry_ts);
        self
    }

    #[must_use]
    pub fn incremented_delivery(mut self) -> Self {
        self.delivery_count += 1;
        self
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expiry_ts.is_some_and(|e| e <= now)
    }
}

/// `(log_index, header)` — the kernel's reference to a message whose body
/// lives in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRef {
    pub index: LogIndex,
    pub header: Header,
}

impl MsgRef {
    pub fn new(index: LogIndex, header: Header) -> Self {
        Self { index, header }
    }
}

/// A message delivered to a consumer but not yet settled, returned, or
/// discarded.
///
/// `deadline_ts` is the system time of the delivery (or of the most recent
/// `defer`); the consumer-lock timer in `eval_consumer_timeouts` compares
/// this against `consumer_lock_ms` to detect a stuck consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckedMsg {
    pub deadline_ts: Timestamp,
    pub msg_ref: MsgRef,
}

impl CheckedMsg {
    pub fn new(deadline_ts: Timestamp, msg_ref: MsgRef) -> Self {
        Self {
            deadline_ts,
            msg_ref,
        }
    }
}
