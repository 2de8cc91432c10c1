//! The live-index set and the FIFO message queue.
//!
//! `RaIndexSet` tracks every log index currently referenced by the queue
//! (in `messages`, `returns`, or any consumer's `checked_out`), supporting
//! the append/delete/smallest operations the release-cursor manager and
//! the invariant checks need. `MessageQueue` implements strict FIFO order:
//! returns drain before fresh messages, so a message returned by one
//! consumer reaches the next consumer before anything enqueued afterwards.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use quorumq_types::LogIndex;
use serde::{Deserialize, Serialize};

use crate::header::MsgRef;

/// The set of log indexes currently live in the queue: present in
/// `messages`, `returns`, or some consumer's `checked_out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RaIndexSet(BTreeSet<LogIndex>);

impl RaIndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `index` as live. Idempotent: appending an already-live index
    /// (e.g. a message that was taken from `returns`, which is already
    /// indexed) is a no-op.
    pub fn append(&mut self, index: LogIndex) {
        self.0.insert(index);
    }

    /// Removes `index` from the live set. Returns whether it was present.
    pub fn delete(&mut self, index: LogIndex) -> bool {
        self.0.remove(&index)
    }

    pub fn contains(&self, index: LogIndex) -> bool {
        self.0.contains(&index)
    }

    /// The smallest live index, or `None` if the queue holds nothing.
    ///
    /// Used by the release-cursor manager: once this advances past a
    /// pending cursor's index, the log can be truncated up to it.
    pub fn smallest(&self) -> Option<LogIndex> {
        self.0.iter().next().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LogIndex> + '_ {
        self.0.iter().copied()
    }
}

/// The FIFO body of the queue: messages returned by consumers (served
/// first) followed by messages that have never been delivered.
///
/// `returns` is keyed by [`LogIndex`] rather than push order: returned
/// messages must drain in sorted index order (the order
/// they were originally enqueued), not the order consumers happened to
/// return them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MessageQueue {
    returns: BTreeMap<LogIndex, MsgRef>,
    messages: VecDeque<MsgRef>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a freshly enqueued message to the tail.
    pub fn push_message(&mut self, msg_ref: MsgRef) {
        self.messages.push_back(msg_ref);
    }

    /// Re-inserts a returned message; it is served ahead of `messages` the
    /// next time a consumer is ready.
    pub fn push_return(&mut self, msg_ref: MsgRef) {
        self.returns.insert(msg_ref.index, msg_ref);
    }

    /// Takes the next message in FIFO order: the lowest-indexed return, or
    /// else the head of `messages`.
    pub fn take_next(&mut self) -> Option<MsgRef> {
        if let Some((&index, _)) = self.returns.iter().next() {
            return self.returns.remove(&index);
        }
        self.messages.pop_front()
    }

    /// Peeks the next message without removing it, for expiry checks.
    pub fn peek_next(&self) -> Option<&MsgRef> {
        self.returns
            .values()
            .next()
            .or_else(|| self.messages.front())
    }

    /// Drops the head message (used by `take_next`'s expiry counterpart and
    /// by drop-head overflow handling). Returns the dropped ref.
    pub fn pop_head(&mut self) -> Option<MsgRef> {
        self.take_next()
    }

    pub fn len(&self) -> usize {
        self.returns.len() + self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty() && self.messages.is_empty()
    }

    pub fn returns_len(&self) -> usize {
        self.returns.len()
    }

    pub fn messages_len(&self) -> usize {
        self.messages.len()
    }

    /// Removes every ready message (used by `purge`), returning them for
    /// byte-accounting at the call site.
    pub fn drain_all(&mut self) -> Vec<MsgRef> {
        let mut drained: Vec<MsgRef> = self.returns.values().copied().collect();
        drained.extend(self.messages.drain(..));
        self.returns.clear();
        drained
    }

    pub fn iter(&self) -> impl Iterator<Item = &MsgRef> {
        self.returns.values().chain(self.messages.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    fn mref(i: u64) -> MsgRef {
        MsgRef::new(LogIndex::new(i), Header::new(10))
    }

    #[test]
    fn ra_index_smallest_tracks_minimum() {
        let mut set = RaIndexSet::new();
        set.append(LogIndex::new(5));
        set.append(LogIndex::new(2));
        set.append(LogIndex::new(8));
        assert_eq!(set.smallest(), Some(LogIndex::new(2)));
        set.delete(LogIndex::new(2));
        assert_eq!(set.smallest(), Some(LogIndex::new(5)));
    }

    #[test]
    fn returns_drain_before_messages() {
        let mut q = MessageQueue::new();
        q.push_message(mref(1));
        q.push_message(mref(2));
        q.push_return(mref(10));

        assert_eq!(q.take_next().unwrap().index, LogIndex::new(10));
        assert_eq!(q.take_next().unwrap().index, LogIndex::new(1));
        assert_eq!(q.take_next().unwrap().index, LogIndex::new(2));
        assert!(q.take_next().is_none());
    }

    #[test]
    fn returns_drain_in_sorted_index_order() {
        let mut q = MessageQueue::new();
        q.push_return(mref(5));
        q.push_return(mref(1));
        q.push_return(mref(3));

        assert_eq!(q.take_next().unwrap().index, LogIndex::new(1));
        assert_eq!(q.take_next().unwrap().index, LogIndex::new(3));
        assert_eq!(q.take_next().unwrap().index, LogIndex::new(5));
    }
}
