//! Explicit consumer lifecycle: `cancel` and `remove`.
//!
//! `cancel` is graceful — the consumer stays in the registry with
//! `status=cancelled` and keeps delivering nothing new until its last
//! checked-out message settles, at which point [`finish_cancel_if_drained`]
//! (called from every settlement path) erases it. `remove` is abrupt: it
//! returns everything outstanding right away and erases the registration in
//! the same step, reusing the same reclaim path `down(other)` uses.

use quorumq_types::ConsumerKey;

use crate::command::Meta;
use crate::config::ConsumerStrategy;
use crate::effects::Effect;
use crate::errors::DispatchError;
use crate::reply::Reply;
use crate::state::{ConsumerStatus, State};

/// `cancel`: stops feeding the consumer and marks it `cancelled`, but
/// leaves its checked-out messages alone until the caller settles them.
pub fn handle_cancel(mut state: State, meta: &Meta, key: ConsumerKey) -> (State, Reply, Vec<Effect>) {
    if !state.consumers.contains_key(&key) {
        return (state, Reply::Error(DispatchError::ConsumerNotFound(key)), Vec::new());
    }

    state.service_queue.remove_anywhere(key);
    if matches!(state.cfg.consumer_strategy, ConsumerStrategy::SingleActive) {
        crate::single_active::remove(&mut state, key);
    }
    if let Some(c) = state.consumers.get_mut(&key) {
        c.status = ConsumerStatus::Cancelled;
    }
    finish_cancel_if_drained(&mut state, key);

    let (state, effects) = crate::checkout::run_checkout_engine(state, meta);
    (state, Reply::Ok, effects)
}

/// Settlement-path hook: once a cancelled consumer's `checked_out` empties,
/// finish erasing it from the registry.
pub(crate) fn finish_cancel_if_drained(state: &mut State, key: ConsumerKey) {
    let done = state
        .consumers
        .get(&key)
        .is_some_and(|c| matches!(c.status, ConsumerStatus::Cancelled) && c.checked_out.is_empty());
    if !done {
        return;
    }
    if let Some(c) = state.consumers.remove(&key) {
        state.consumer_index.remove(&(c.cfg.tag, c.cfg.pid));
    }
}

/// `remove`: returns every outstanding checked-out message immediately and
/// erases the consumer's registration in the same step.
pub fn handle_remove(mut state: State, meta: &Meta, key: ConsumerKey) -> (State, Reply, Vec<Effect>) {
    if !state.consumers.contains_key(&key) {
        return (state, Reply::Error(DispatchError::ConsumerNotFound(key)), Vec::new());
    }

    let effects = crate::liveness::reclaim_consumer(&mut state, key);
    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    let mut effects = effects;
    effects.extend(checkout_effects);
    (state, Reply::Ok, effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CreditMode, Lifetime};
    use crate::config::QueueConfig;
    use crate::header::{CheckedMsg, Header, MsgRef};
    use crate::state::{Consumer, ConsumerCfg};
    use quorumq_types::{ConsumerTag, LogIndex, NodeId, Pid, Timestamp};

    fn attach(state: &mut State, key: ConsumerKey) {
        let cfg = ConsumerCfg {
            tag: ConsumerTag::new("c"),
            pid: Pid::new(NodeId::new(1), 1),
            lifetime: Lifetime::Auto,
            credit_mode: CreditMode::SimplePrefetch { max: 5 },
            meta: Default::default(),
        };
        state.consumers.insert(key, Consumer::new(cfg, 0));
        state
            .consumer_index
            .insert((ConsumerTag::new("c"), Pid::new(NodeId::new(1), 1)), key);
    }

    #[test]
    fn cancel_unknown_consumer_errors() {
        let state = State::new(QueueConfig::new("q", "r"));
        let meta = Meta::new(LogIndex::new(1), Timestamp::ZERO);
        let (_, reply, _) = handle_cancel(state, &meta, ConsumerKey::new(99));
        assert_eq!(reply, Reply::Error(DispatchError::ConsumerNotFound(ConsumerKey::new(99))));
    }

    #[test]
    fn cancel_with_nothing_checked_out_removes_immediately() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        let key = ConsumerKey::new(1);
        attach(&mut state, key);

        let meta = Meta::new(LogIndex::new(2), Timestamp::ZERO);
        let (state, reply, _) = handle_cancel(state, &meta, key);
        assert_eq!(reply, Reply::Ok);
        assert!(!state.consumers.contains_key(&key));
    }

    #[test]
    fn cancel_with_checked_out_waits_for_settlement() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        let key = ConsumerKey::new(1);
        attach(&mut state, key);
        state.consumers.get_mut(&key).unwrap().checked_out.insert(
            quorumq_types::MsgId::ZERO,
            CheckedMsg::new(Timestamp::ZERO, MsgRef::new(LogIndex::new(1), Header::new(5))),
        );

        let meta = Meta::new(LogIndex::new(2), Timestamp::ZERO);
        let (state, _, _) = handle_cancel(state, &meta, key);
        assert_eq!(state.consumers[&key].status, ConsumerStatus::Cancelled);

        let (state, _, _) = crate::settlement::handle_settle(state, &meta, key, vec![quorumq_types::MsgId::ZERO]);
        assert!(!state.consumers.contains_key(&key));
    }

    #[test]
    fn remove_returns_checked_out_immediately() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        let key = ConsumerKey::new(1);
        attach(&mut state, key);
        state.consumers.get_mut(&key).unwrap().checked_out.insert(
            quorumq_types::MsgId::ZERO,
            CheckedMsg::new(Timestamp::ZERO, MsgRef::new(LogIndex::new(1), Header::new(5))),
        );

        let meta = Meta::new(LogIndex::new(2), Timestamp::ZERO);
        let (state, reply, _) = handle_remove(state, &meta, key);
        assert_eq!(reply, Reply::Ok);
        assert!(!state.consumers.contains_key(&key));
        assert_eq!(state.queue.returns_len(), 1);
    }
}
