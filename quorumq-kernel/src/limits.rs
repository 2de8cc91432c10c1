//! Queue length/byte limits, overflow handling, queue expiry, and the
//! consumer-lock timeout sweep.

use quorumq_types::{Pid, Timestamp};

use crate::command::ConsumerRef;
use crate::config::OverflowStrategy;
use crate::dlx::DlxReason;
use crate::effects::{AuxRequest, DeliveryChannel, Effect, QueueStatus, SendMsgContent};
use crate::state::State;

/// Would enqueuing `additional_bytes` push the queue past `max_length` or
/// `max_bytes`? Used by `reject_publish` to decide *before* committing the
/// message, since that strategy refuses the publish rather than accepting
/// then evicting.
pub fn would_overflow(state: &State, additional_bytes: u32) -> bool {
    let over_length = state
        .cfg
        .max_length
        .is_some_and(|max| state.messages_ready() + 1 > max);
    let over_bytes = state
        .cfg
        .max_bytes
        .is_some_and(|max| state.msg_bytes_enqueue + u64::from(additional_bytes) > max);
    over_length || over_bytes
}

/// `reject_publish`: tells the publisher to stop sending and remembers it
/// as blocked so a later drain below the watermark can release it.
pub fn reject_publish(state: &mut State, pid: Pid, meta: &crate::command::Meta) -> Vec<Effect> {
    if let Some(enqueuer) = state.enqueuers.get_mut(&pid) {
        enqueuer.blocked_at = Some(meta.index);
    }
    vec![Effect::SendMsg {
        pid,
        content: SendMsgContent::QueueStatus(QueueStatus::RejectPublish),
        channel: DeliveryChannel::Local,
    }]
}

/// `drop_head`: after an enqueue lands, evict ready messages from the head
/// (returns first, then fresh messages, i.e. whatever `take_next` would
/// hand out next) until both limits are satisfied again.
pub fn enforce_overflow(state: &mut State) -> Vec<Effect> {
    if !matches!(state.cfg.overflow_strategy, OverflowStrategy::DropHead) {
        return Vec::new();
    }

    let mut effects = Vec::new();
    loop {
        let over_length = state.cfg.max_length.is_some_and(|max| state.messages_ready() > max);
        let over_bytes = state.cfg.max_bytes.is_some_and(|max| state.msg_bytes_enqueue > max);
        if !(over_length || over_bytes) {
            break;
        }
        let Some(msg_ref) = state.queue.take_next() else {
            break;
        };
        state.msg_bytes_enqueue = state
            .msg_bytes_enqueue
            .saturating_sub(u64::from(msg_ref.header.size_bytes));
        state.messages_total = state.messages_total.saturating_sub(1);
        state.ra_indexes.delete(msg_ref.index);
        state.dlx.hand_off(msg_ref, DlxReason::Maxlen);
        effects.push(Effect::DeadLetter {
            index: msg_ref.index,
            reason: DlxReason::Maxlen,
        });
    }
    effects
}

/// Once the queue has drained back under `overflow_release_watermark` of
/// its configured limits, releases every `reject_publish`-blocked
/// enqueuer with a `Go` status. Called after every command that can free
/// space (settle/discard/purge/drop-head eviction).
pub fn maybe_unblock_enqueuers(state: &mut State) -> Vec<Effect> {
    let watermark = state.cfg.overflow_release_watermark;
    let under_length = state
        .cfg
        .max_length
        .map_or(true, |max| (state.messages_ready() as f64) <= max as f64 * watermark);
    let under_bytes = state
        .cfg
        .max_bytes
        .map_or(true, |max| (state.msg_bytes_enqueue as f64) <= max as f64 * watermark);
    if !(under_length && under_bytes) {
        return Vec::new();
    }

    let mut effects = Vec::new();
    for (&pid, enqueuer) in &mut state.enqueuers {
        if enqueuer.blocked_at.take().is_some() {
            effects.push(Effect::SendMsg {
                pid,
                content: SendMsgContent::QueueStatus(QueueStatus::Go),
                channel: DeliveryChannel::Local,
            });
        }
    }
    effects
}

/// Whether the queue is past its `expires` idle deadline (no publish,
/// consume, or other activity since `last_active`) with nobody consuming
/// it. The substrate is expected to ask a leader to spawn a deleter
/// process rather than the kernel deleting itself.
pub fn queue_expired(state: &State, now: Timestamp) -> bool {
    state
        .cfg
        .expires
        .is_some_and(|expires| now.saturating_sub(state.last_active) >= expires)
        && state.consumers.is_empty()
}

/// Periodic tick (`Command::Timeout`): expires stale heads, checks for
/// queue-idle expiry, and re-arms whatever timers the checkout engine
/// still needs.
pub fn handle_timeout(mut state: State, meta: &crate::command::Meta) -> (State, Vec<Effect>) {
    let mut effects = crate::checkout::expire_heads(&mut state, meta.system_time);
    effects.extend(enforce_overflow(&mut state));
    effects.extend(maybe_unblock_enqueuers(&mut state));
    if queue_expired(&state, meta.system_time) {
        effects.push(Effect::Aux(AuxRequest::SpawnDeleter));
    }
    (state, effects)
}

/// `eval_consumer_timeouts`: reclaims checked-out messages whose
/// `deadline_ts` has exceeded `consumer_lock_ms`. An empty `keys` list
/// means "check every standing consumer".
pub fn handle_eval_consumer_timeouts(
    mut state: State,
    meta: &crate::command::Meta,
    keys: Vec<ConsumerRef>,
) -> (State, Vec<Effect>) {
    let targets: Vec<_> = if keys.is_empty() {
        state.consumers.keys().copied().collect()
    } else {
        keys.into_iter()
            .filter_map(|r| resolve_consumer_ref(&state, r))
            .collect()
    };

    let mut effects = Vec::new();
    for key in targets {
        effects.extend(crate::settlement::reclaim_timed_out(&mut state, meta.system_time, key));
    }
    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    effects.extend(maybe_unblock_enqueuers(&mut state));
    (state, effects)
}

pub(crate) fn resolve_consumer_ref(state: &State, r: ConsumerRef) -> Option<quorumq_types::ConsumerKey> {
    match r {
        ConsumerRef::Key(key) => Some(key),
        ConsumerRef::Legacy(tag, pid) => state.resolve_legacy(&tag, &pid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::header::{Header, MsgRef};
    use quorumq_types::LogIndex;

    fn push(state: &mut State, index: u64, size: u32) {
        let msg_ref = MsgRef::new(LogIndex::new(index), Header::new(size));
        state.queue.push_message(msg_ref);
        state.ra_indexes.append(msg_ref.index);
        state.messages_total += 1;
        state.msg_bytes_enqueue += u64::from(size);
    }

    #[test]
    fn drop_head_evicts_until_under_max_length() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        state.cfg.max_length = Some(2);
        push(&mut state, 1, 10);
        push(&mut state, 2, 10);
        push(&mut state, 3, 10);

        let effects = enforce_overflow(&mut state);
        assert_eq!(state.messages_ready(), 2);
        assert_eq!(state.dlx.count(), 1);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn would_overflow_checks_projected_length() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        state.cfg.max_length = Some(1);
        push(&mut state, 1, 10);
        assert!(would_overflow(&state, 5));
    }

    #[test]
    fn queue_expired_requires_no_consumers_and_elapsed_idle() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        state.cfg.expires = Some(1000);
        state.last_active = Timestamp::from_millis(0);
        assert!(queue_expired(&state, Timestamp::from_millis(1000)));
        assert!(!queue_expired(&state, Timestamp::from_millis(500)));
    }

    /// A `reject_publish` consumer blocked at the limit is sent `Go` again
    /// once the queue drains back under the release watermark, and stays
    /// blocked while the queue is still above it.
    #[test]
    fn reject_publish_blocked_enqueuer_resumes_once_under_watermark() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        state.cfg.max_length = Some(10);
        state.cfg.overflow_release_watermark = 0.8;
        let pid = Pid::new(quorumq_types::NodeId::new(1), 1);
        state.enqueuers.insert(pid, crate::state::Enqueuer::new());
        let meta = crate::command::Meta::new(LogIndex::new(1), Timestamp::ZERO);
        let reject_effects = reject_publish(&mut state, pid, &meta);
        assert!(!reject_effects.is_empty());
        assert!(state.enqueuers[&pid].blocked_at.is_some());

        for i in 1..=9 {
            push(&mut state, i, 1);
        }
        let effects = maybe_unblock_enqueuers(&mut state);
        assert!(effects.is_empty(), "still above the 0.8 watermark at 9/10");
        assert!(state.enqueuers[&pid].blocked_at.is_some());

        state.messages_total -= 2;
        state.msg_bytes_enqueue -= 2;
        for _ in 0..2 {
            state.queue.take_next();
        }
        let effects = maybe_unblock_enqueuers(&mut state);
        assert_eq!(effects.len(), 1);
        assert!(state.enqueuers[&pid].blocked_at.is_none());
    }
}
