//! Settlement pipeline: `settle`, `return`, `discard`, `defer`, `requeue`.
//!
//! All five share the same shape — look up a checked-out message by
//! `(consumer, msg_id)`, remove it from `checked_out`, then route the
//! freed message somewhere (gone, back on the queue, or to the dead-letter
//! sidecar) — so the per-message step lives in [`take_checked_out`] and
//! each public handler differs only in what it does with the result.

use quorumq_types::{ConsumerKey, MsgId};

use crate::command::Meta;
use crate::credit;
use crate::dlx::DlxReason;
use crate::effects::Effect;
use crate::header::MsgRef;
use crate::reply::Reply;
use crate::state::State;

/// Removes one checked-out message from `consumer`, unwinding its byte
/// accounting. Returns `None` if the consumer or the message id isn't
/// live — a double-settle or a stale id from a cancelled consumer, both
/// of which are silently ignored rather than erroring, matching how a
/// best-effort client ack stream behaves.
pub(crate) fn take_checked_out(state: &mut State, consumer: ConsumerKey, msg_id: MsgId) -> Option<MsgRef> {
    let c = state.consumers.get_mut(&consumer)?;
    let checked = c.checked_out.remove(&msg_id)?;
    state.msg_bytes_checkout = state
        .msg_bytes_checkout
        .saturating_sub(u64::from(checked.msg_ref.header.size_bytes));
    Some(checked.msg_ref)
}

/// Run once per command, after every message in the batch has already
/// been individually replenished via [`credit::replenish_on_settle`] —
/// this only settles the consumer's own lifecycle, not its credit.
fn after_settlement(state: &mut State, consumer: ConsumerKey) {
    crate::single_active::maybe_finish_fade(state, consumer);
    crate::lifecycle::finish_cancel_if_drained(state, consumer);
}

/// `settle`: the message was processed successfully and is gone for good.
pub fn handle_settle(
    mut state: State,
    meta: &Meta,
    consumer: ConsumerKey,
    msg_ids: Vec<MsgId>,
) -> (State, Reply, Vec<Effect>) {
    for msg_id in msg_ids {
        let Some(msg_ref) = take_checked_out(&mut state, consumer, msg_id) else {
            continue;
        };
        state.ra_indexes.delete(msg_ref.index);
        state.messages_total = state.messages_total.saturating_sub(1);
        if let Some(c) = state.consumers.get_mut(&consumer) {
            credit::replenish_on_settle(c);
        }
    }
    after_settlement(&mut state, consumer);
    let (state, effects) = crate::checkout::run_checkout_engine(state, meta);
    (state, Reply::Ok, effects)
}

/// `return`: the consumer couldn't process the message; it goes back on
/// the queue ahead of fresh messages unless its delivery limit is now
/// exceeded, in which case it is dead-lettered instead.
pub fn handle_return(
    mut state: State,
    meta: &Meta,
    consumer: ConsumerKey,
    msg_ids: Vec<MsgId>,
) -> (State, Reply, Vec<Effect>) {
    let mut effects = Vec::new();
    for msg_id in msg_ids {
        let Some(msg_ref) = take_checked_out(&mut state, consumer, msg_id) else {
            continue;
        };
        requeue_or_dlx(&mut state, &mut effects, msg_ref);
        if let Some(c) = state.consumers.get_mut(&consumer) {
            credit::replenish_on_settle(c);
        }
    }
    after_settlement(&mut state, consumer);
    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    (state, Reply::Ok, effects)
}

/// `discard`: the consumer gave up on the message outright (e.g. a
/// `basic.reject` with `requeue=false`); it always goes to the dead-letter
/// sidecar, never back on the queue.
pub fn handle_discard(
    mut state: State,
    meta: &Meta,
    consumer: ConsumerKey,
    msg_ids: Vec<MsgId>,
) -> (State, Reply, Vec<Effect>) {
    let mut effects = Vec::new();
    for msg_id in msg_ids {
        let Some(msg_ref) = take_checked_out(&mut state, consumer, msg_id) else {
            continue;
        };
        state.dlx.hand_off(msg_ref, DlxReason::Rejected);
        effects.push(Effect::DeadLetter {
            index: msg_ref.index,
            reason: DlxReason::Rejected,
        });
    }
    after_settlement(&mut state, consumer);
    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    (state, Reply::Ok, effects)
}

/// `defer`: the consumer wants to keep the message checked out but push
/// back the consumer-lock deadline (e.g. it's still actively working the
/// message). Unlike the others this doesn't remove the checkout; it just
/// re-stamps `deadline_ts`.
pub fn handle_defer(
    mut state: State,
    meta: &Meta,
    consumer: ConsumerKey,
    msg_ids: Vec<MsgId>,
) -> (State, Reply, Vec<Effect>) {
    if let Some(c) = state.consumers.get_mut(&consumer) {
        for msg_id in &msg_ids {
            if let Some(checked) = c.checked_out.get_mut(msg_id) {
                checked.deadline_ts = meta.system_time;
            }
        }
    }
    let (state, effects) = crate::checkout::run_checkout_engine(state, meta);
    (state, Reply::Ok, effects)
}

/// `requeue`: a client library's own consumer was cancelled without
/// delivery-limit accounting; re-inserts the message as a return without
/// touching any consumer's `checked_out` (there may no longer be one).
pub fn handle_requeue(
    mut state: State,
    meta: &Meta,
    msg_id: MsgId,
    consumer: ConsumerKey,
) -> (State, Reply, Vec<Effect>) {
    let mut effects = Vec::new();
    if let Some(msg_ref) = take_checked_out(&mut state, consumer, msg_id) {
        requeue_or_dlx(&mut state, &mut effects, msg_ref);
        if let Some(c) = state.consumers.get_mut(&consumer) {
            credit::replenish_on_settle(c);
        }
    }
    after_settlement(&mut state, consumer);
    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    (state, Reply::Ok, effects)
}

/// Shared by `return` and `requeue`: bumps `delivery_count`, and routes to
/// the dead-letter sidecar instead of back onto the queue once the
/// configured `delivery_limit` is exceeded.
pub(crate) fn requeue_or_dlx(state: &mut State, effects: &mut Vec<Effect>, msg_ref: MsgRef) {
    let header = msg_ref.header.incremented_delivery();
    let over_limit = state
        .cfg
        .delivery_limit
        .is_some_and(|limit| header.delivery_count > limit);
    let msg_ref = MsgRef::new(msg_ref.index, header);
    if over_limit {
        state.dlx.hand_off(msg_ref, DlxReason::DeliveryLimit);
        effects.push(Effect::DeadLetter {
            index: msg_ref.index,
            reason: DlxReason::DeliveryLimit,
        });
    } else {
        state.ra_indexes.append(msg_ref.index);
        state.queue.push_return(msg_ref);
        state.msg_bytes_enqueue += u64::from(msg_ref.header.size_bytes);
    }
}

/// Reclaims a standing consumer's checked-out messages whose
/// `deadline_ts` is older than `consumer_lock_ms` — driven by
/// `eval_consumer_timeouts` (see `limits.rs`).
pub fn reclaim_timed_out(state: &mut State, now: quorumq_types::Timestamp, consumer: ConsumerKey) -> Vec<Effect> {
    let lock_ms = state.cfg.consumer_lock_ms;
    let Some(c) = state.consumers.get(&consumer) else {
        return Vec::new();
    };
    let stale: Vec<MsgId> = c
        .checked_out
        .iter()
        .filter(|(_, checked)| now.saturating_sub(checked.deadline_ts) >= lock_ms)
        .map(|(&id, _)| id)
        .collect();

    let mut effects = Vec::new();
    for msg_id in stale {
        if let Some(msg_ref) = take_checked_out(state, consumer, msg_id) {
            requeue_or_dlx(state, &mut effects, msg_ref);
            if let Some(c) = state.consumers.get_mut(&consumer) {
                credit::replenish_on_settle(c);
            }
        }
    }
    after_settlement(state, consumer);
    effects
}
