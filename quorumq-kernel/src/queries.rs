//! Read-only queries over [`State`].
//!
//! None of these go through `apply`: they're plain accessors a management
//! UI or CLI calls against a replica's local state, the same way
//! `rabbit_fifo`'s `query_*` functions are consulted outside the Raft log.
//! Nothing here mutates or produces an effect.

use quorumq_types::{ConsumerKey, LogIndex, Pid};

use crate::dlx::DlxSummary;
use crate::header::MsgRef;
use crate::state::State;

pub fn messages_ready(state: &State) -> u64 {
    state.messages_ready()
}

pub fn messages_total(state: &State) -> u64 {
    state.messages_total
}

/// Number of messages a specific consumer currently holds unsettled.
pub fn checked_out_count(state: &State, consumer: ConsumerKey) -> u64 {
    state
        .consumers
        .get(&consumer)
        .map_or(0, |c| c.checked_out.len() as u64)
}

/// Every publisher pid currently tracked, in the arbitrary but stable
/// order a `BTreeMap` iterates in.
pub fn enqueuer_pids(state: &State) -> Vec<Pid> {
    state.enqueuers.keys().copied().collect()
}

pub fn consumer_pids(state: &State) -> Vec<Pid> {
    state.consumers.values().map(|c| c.cfg.pid).collect()
}

pub fn waiting_consumers(state: &State) -> Vec<ConsumerKey> {
    state.waiting_consumers.clone()
}

/// The currently active consumer under `single_active_consumer`; `None`
/// both when the queue is `competing` and when nobody has attached yet.
pub fn single_active_consumer(state: &State) -> Option<ConsumerKey> {
    state.active_consumer
}

/// Peeks the message at 0-indexed ready position `pos` (returns first,
/// then fresh messages — the same order the checkout engine would
/// deliver in) without removing it.
pub fn peek(state: &State, pos: u64) -> Option<MsgRef> {
    state.queue.iter().nth(usize::try_from(pos).ok()?).copied()
}

pub fn smallest_live_index(state: &State) -> Option<LogIndex> {
    state.ra_indexes.smallest()
}

pub fn dlx_stats(state: &State) -> DlxSummary {
    state.dlx.dehydrate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::header::Header;

    #[test]
    fn peek_returns_in_ready_order() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        state.queue.push_message(MsgRef::new(LogIndex::new(1), Header::new(1)));
        state.queue.push_message(MsgRef::new(LogIndex::new(2), Header::new(1)));
        assert_eq!(peek(&state, 0).unwrap().index, LogIndex::new(1));
        assert_eq!(peek(&state, 1).unwrap().index, LogIndex::new(2));
        assert!(peek(&state, 2).is_none());
    }

    #[test]
    fn checked_out_count_reflects_consumer_state() {
        let state = State::new(QueueConfig::new("q", "r"));
        assert_eq!(checked_out_count(&state, ConsumerKey::new(1)), 0);
    }
}
