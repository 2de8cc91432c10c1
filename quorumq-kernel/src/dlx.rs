//! The dead-letter side-queue.
//!
//! The real dispatcher lives outside this crate as an external collaborator;
//! what the core owns is the bookkeeping needed to (a) keep `messages_total`
//! and the byte counters correct and (b) hand dehydrated state to a release
//! cursor. A `dlx(...)` command lets the sidecar's own acknowledgements flow
//! through the same deterministic log as everything else.

use std::collections::VecDeque;

use quorumq_types::LogIndex;
use serde::{Deserialize, Serialize};

use crate::header::{Header, MsgRef};

/// Why a message was handed to the dead-letter sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlxReason {
    Expired,
    Maxlen,
    DeliveryLimit,
    Rejected,
}

/// One dead-lettered message, retained until the sidecar acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLettered {
    pub msg_ref: MsgRef,
    pub reason: DlxReason,
}

/// In-memory state of the dead-letter sidecar.
///
/// Ordering matters for `discard`: messages discarded by a client in one
/// batch must reach the sidecar in the order the client listed them, so
/// `hand_off` preserves caller order rather than re-sorting by index the
/// way [`crate::index::MessageQueue`] does for returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DlxState {
    entries: VecDeque<DeadLettered>,
    bytes: u64,
}

impl DlxState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands a message to the sidecar. Returns the header so the caller can
    /// unwind byte/length accounting for the source it came from.
    pub fn hand_off(&mut self, msg_ref: MsgRef, reason: DlxReason) {
        self.bytes += u64::from(msg_ref.header.size_bytes);
        self.entries.push_back(DeadLettered { msg_ref, reason });
    }

    /// Acknowledges (removes) a dead-lettered entry by its original log
    /// index, as driven by the `dlx(...)` command.
    pub fn ack(&mut self, index: LogIndex) -> Option<DeadLettered> {
        let pos = self.entries.iter().position(|e| e.msg_ref.index == index)?;
        let entry = self.entries.remove(pos)?;
        self.bytes = self.bytes.saturating_sub(u64::from(entry.msg_ref.header.size_bytes));
        Some(entry)
    }

    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn indexes(&self) -> impl Iterator<Item = LogIndex> + '_ {
        self.entries.iter().map(|e| e.msg_ref.index)
    }

    /// Dehydrates the sidecar's own state for inclusion in a release
    /// cursor: retains counts (needed to keep invariant 1 true when the
    /// dehydrated `State` is later rehydrated) but drops per-message
    /// headers, mirroring the outer `State::dehydrate` in `state.rs`.
    pub fn dehydrate(&self) -> DlxSummary {
        DlxSummary {
            count: self.count(),
            bytes: self.bytes,
        }
    }

    /// Removes every dead-lettered entry (used by `purge_nodes` cleanup
    /// paths is intentionally *not* wired here: `purge` only touches ready
    /// messages). Exposed for completeness / testing.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    pub fn header_for(&self, index: LogIndex) -> Option<Header> {
        self.entries
            .iter()
            .find(|e| e.msg_ref.index == index)
            .map(|e| e.msg_ref.header)
    }
}

/// Dehydrated, counts-only summary of the sidecar, embedded in a release
/// cursor's dehydrated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DlxSummary {
    pub count: u64,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mref(i: u64, size: u32) -> MsgRef {
        MsgRef::new(LogIndex::new(i), Header::new(size))
    }

    #[test]
    fn hand_off_tracks_count_and_bytes() {
        let mut dlx = DlxState::new();
        dlx.hand_off(mref(1, 10), DlxReason::Expired);
        dlx.hand_off(mref(2, 20), DlxReason::Maxlen);
        assert_eq!(dlx.count(), 2);
        assert_eq!(dlx.bytes(), 30);
    }

    #[test]
    fn ack_removes_by_index_and_unwinds_bytes() {
        let mut dlx = DlxState::new();
        dlx.hand_off(mref(1, 10), DlxReason::Rejected);
        dlx.hand_off(mref(2, 20), DlxReason::Rejected);

        let acked = dlx.ack(LogIndex::new(1)).unwrap();
        assert_eq!(acked.reason, DlxReason::Rejected);
        assert_eq!(dlx.count(), 1);
        assert_eq!(dlx.bytes(), 20);
    }

    #[test]
    fn discard_order_is_preserved_not_sorted() {
        let mut dlx = DlxState::new();
        dlx.hand_off(mref(5, 1), DlxReason::Rejected);
        dlx.hand_off(mref(1, 1), DlxReason::Rejected);
        let order: Vec<u64> = dlx.indexes().map(LogIndex::as_u64).collect();
        assert_eq!(order, vec![5, 1]);
    }
}
