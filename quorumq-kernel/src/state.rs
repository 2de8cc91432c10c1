//! Kernel state.
//!
//! `State` is the single in-memory struct every replica of the queue
//! carries. It is cheap to dehydrate (see [`DehydratedState`]) because the
//! bulk of it — message bodies — never lives here; only `(log_index,
//! header)` pairs do (see `header.rs`).

use std::collections::BTreeMap;

use quorumq_types::{ConsumerKey, ConsumerTag, LogIndex, NodeId, Pid, Timestamp};
use serde::{Deserialize, Serialize};

use crate::command::{CreditMode, Lifetime};
use crate::config::QueueConfig;
use crate::dlx::{DlxState, DlxSummary};
use crate::index::{MessageQueue, RaIndexSet};
use crate::registry::ServiceQueue;

/// Status of a tracked publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnqueuerStatus {
    Up,
    SuspectedDown,
}

/// A tracked publisher: per-publisher sequence tracking for duplicate
/// detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enqueuer {
    pub next_seqno: u64,
    pub status: EnqueuerStatus,
    pub blocked_at: Option<LogIndex>,
}

impl Enqueuer {
    pub fn new() -> Self {
        Self {
            next_seqno: 0,
            status: EnqueuerStatus::Up,
            blocked_at: None,
        }
    }
}

impl Default for Enqueuer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle status of a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerStatus {
    Up,
    SuspectedDown,
    Cancelled,
    /// Single-active only: being preempted, draining outstanding
    /// checked-out messages before moving to `waiting_consumers`.
    Fading,
    TimedOut,
}

/// The static parameters a consumer attached with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerCfg {
    pub tag: ConsumerTag,
    pub pid: Pid,
    pub lifetime: Lifetime,
    pub credit_mode: CreditMode,
    pub meta: BTreeMap<String, String>,
}

/// A registered consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    pub cfg: ConsumerCfg,
    pub credit: u32,
    /// Wraps modulo 2^32 under the v2 protocol.
    pub delivery_count: u32,
    pub next_msg_id: quorumq_types::MsgId,
    pub checked_out: BTreeMap<quorumq_types::MsgId, crate::header::CheckedMsg>,
    pub status: ConsumerStatus,
    pub priority: i32,
}

impl Consumer {
    pub fn new(cfg: ConsumerCfg, priority: i32) -> Self {
        let delivery_count = match cfg.credit_mode {
            CreditMode::Credited {
                initial_delivery_count,
            } => initial_delivery_count,
            CreditMode::SimplePrefetch { .. } => 0,
        };
        Self {
            cfg,
            credit: 0,
            delivery_count,
            next_msg_id: quorumq_types::MsgId::ZERO,
            checked_out: BTreeMap::new(),
            status: ConsumerStatus::Up,
            priority,
        }
    }

    pub fn is_eligible_for_service(&self) -> bool {
        matches!(self.status, ConsumerStatus::Up) && self.credit > 0
    }

    pub fn checked_out_bytes(&self) -> u64 {
        self.checked_out
            .values()
            .map(|c| u64::from(c.msg_ref.header.size_bytes))
            .sum()
    }
}

/// The FIFO queue's full in-memory state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub cfg: QueueConfig,
    pub queue: MessageQueue,
    pub ra_indexes: RaIndexSet,
    pub messages_total: u64,
    pub msg_bytes_enqueue: u64,
    pub msg_bytes_checkout: u64,
    pub enqueue_count: u64,
    pub enqueuers: BTreeMap<Pid, Enqueuer>,
    pub consumers: BTreeMap<ConsumerKey, Consumer>,
    /// Resolves legacy `(tag, pid)` references to their canonical key.
    pub consumer_index: BTreeMap<(ConsumerTag, Pid), ConsumerKey>,
    pub service_queue: ServiceQueue,
    /// Single-active only: consumers waiting to become active, sorted by
    /// `(priority desc, credit desc, key asc)`.
    pub waiting_consumers: Vec<ConsumerKey>,
    /// Single-active only: the currently active (or fading) consumer.
    pub active_consumer: Option<ConsumerKey>,
    pub release_cursors: std::collections::VecDeque<(LogIndex, Box<DehydratedState>)>,
    pub dlx: DlxState,
    pub last_active: Timestamp,
    /// Last enqueued `(index, body)`, kept only when a consumer was ready
    /// and the queue was otherwise empty.
    #[serde(skip)]
    pub msg_cache: Option<(LogIndex, bytes::Bytes)>,
}

impl State {
    pub fn new(cfg: QueueConfig) -> Self {
        Self {
            cfg,
            queue: MessageQueue::new(),
            ra_indexes: RaIndexSet::new(),
            messages_total: 0,
            msg_bytes_enqueue: 0,
            msg_bytes_checkout: 0,
            enqueue_count: 0,
            enqueuers: BTreeMap::new(),
            consumers: BTreeMap::new(),
            consumer_index: BTreeMap::new(),
            service_queue: ServiceQueue::default(),
            waiting_consumers: Vec::new(),
            active_consumer: None,
            release_cursors: std::collections::VecDeque::new(),
            dlx: DlxState::new(),
            last_active: Timestamp::ZERO,
            msg_cache: None,
        }
    }

    pub fn messages_ready(&self) -> u64 {
        self.queue.len() as u64
    }

    pub fn resolve_legacy(&self, tag: &ConsumerTag, pid: &Pid) -> Option<ConsumerKey> {
        self.consumer_index.get(&(tag.clone(), pid.clone())).copied()
    }

    /// Dehydrates this state for embedding in a release cursor
    ///: clears everything that is either large or would
    /// be actively wrong to reuse verbatim (a stale `msg_cache`), while the
    /// rest round-trips.
    pub fn dehydrate(&self) -> DehydratedState {
        DehydratedState {
            cfg: self.cfg.clone(),
            queue: self.queue.clone(),
            messages_total: self.messages_total,
            msg_bytes_enqueue: self.msg_bytes_enqueue,
            msg_bytes_checkout: self.msg_bytes_checkout,
            enqueuers: self.enqueuers.clone(),
            consumers: self.consumers.clone(),
            consumer_index: self.consumer_index.clone(),
            service_queue: self.service_queue.clone(),
            waiting_consumers: self.waiting_consumers.clone(),
            active_consumer: self.active_consumer,
            dlx_summary: self.dlx.dehydrate(),
            last_active: self.last_active,
        }
    }
}

/// The persisted, snapshottable form of [`State`].
///
/// Omits `ra_indexes`, `release_cursors`, `enqueue_count`, and `msg_cache`;
/// everything else round-trips. The live `dlx` state is
/// summarized to counts (see [`DlxSummary`]) since its per-message detail
/// is redundant with what the dead-letter sidecar itself durably owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DehydratedState {
    pub cfg: QueueConfig,
    pub queue: MessageQueue,
    pub messages_total: u64,
    pub msg_bytes_enqueue: u64,
    pub msg_bytes_checkout: u64,
    pub enqueuers: BTreeMap<Pid, Enqueuer>,
    pub consumers: BTreeMap<ConsumerKey, Consumer>,
    pub consumer_index: BTreeMap<(ConsumerTag, Pid), ConsumerKey>,
    pub service_queue: ServiceQueue,
    pub waiting_consumers: Vec<ConsumerKey>,
    pub active_consumer: Option<ConsumerKey>,
    pub dlx_summary: DlxSummary,
    pub last_active: Timestamp,
}

impl DehydratedState {
    /// Rehydrates into a live `State`. `ra_indexes` is rebuilt from the
    /// queue and checked-out sets (everything still live); `dlx` starts
    /// empty of per-message detail but keeps the summary count so
    /// invariant 1 (`messages_total`) still holds until the sidecar's own
    /// log catches the replica up on the detail.
    pub fn rehydrate(self) -> State {
        let mut ra_indexes = RaIndexSet::new();
        for msg_ref in self.queue.iter() {
            ra_indexes.append(msg_ref.index);
        }
        for consumer in self.consumers.values() {
            for checked in consumer.checked_out.values() {
                ra_indexes.append(checked.msg_ref.index);
            }
        }

        State {
            cfg: self.cfg,
            queue: self.queue,
            ra_indexes,
            messages_total: self.messages_total,
            msg_bytes_enqueue: self.msg_bytes_enqueue,
            msg_bytes_checkout: self.msg_bytes_checkout,
            enqueue_count: 0,
            enqueuers: self.enqueuers,
            consumers: self.consumers,
            consumer_index: self.consumer_index,
            service_queue: self.service_queue,
            waiting_consumers: self.waiting_consumers,
            active_consumer: self.active_consumer,
            release_cursors: std::collections::VecDeque::new(),
            dlx: DlxState::new(),
            last_active: self.last_active,
            msg_cache: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dehydrate_then_rehydrate_preserves_counts() {
        let mut state = State::new(QueueConfig::new("q", "rid"));
        state.messages_total = 5;
        state.msg_bytes_enqueue = 100;

        let dehydrated = state.dehydrate();
        let rehydrated = dehydrated.rehydrate();

        assert_eq!(rehydrated.messages_total, 5);
        assert_eq!(rehydrated.msg_bytes_enqueue, 100);
        assert_eq!(rehydrated.enqueue_count, 0);
        assert!(rehydrated.release_cursors.is_empty());
        assert!(rehydrated.msg_cache.is_none());
    }
}
