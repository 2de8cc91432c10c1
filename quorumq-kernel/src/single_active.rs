//! Single-active-consumer controller.
//!
//! Only one consumer is ever active at a time; everyone else sits on
//! `waiting_consumers`, sorted so the next activation is always whoever is
//! at the front. Attaching never promotes directly — it only places the
//! consumer on the waiting list — so [`evaluate_activation`] is the single
//! place the promotion ladder runs, the same way after every mutating
//! command. Losing the active consumer doesn't hand off immediately either:
//! it `Fading` until its checked-out messages are settled or reclaimed, so
//! in-flight deliveries can't be redelivered to two consumers at once.

use quorumq_types::ConsumerKey;

use crate::effects::{Effect, ModCallArgs};
use crate::state::{ConsumerStatus, State};

/// Orders waiting consumers by `(priority desc, credit desc, key asc)`.
fn waiting_order(state: &State, key: ConsumerKey) -> (std::cmp::Reverse<i32>, std::cmp::Reverse<u32>, ConsumerKey) {
    let consumer = state.consumers.get(&key);
    let priority = consumer.map_or(0, |c| c.priority);
    let credit = consumer.map_or(0, |c| c.credit);
    (std::cmp::Reverse(priority), std::cmp::Reverse(credit), key)
}

fn insert_waiting(state: &mut State, key: ConsumerKey) {
    if state.waiting_consumers.contains(&key) {
        return;
    }
    state.waiting_consumers.push(key);
    state.waiting_consumers.sort_by_key(|&k| waiting_order(state, k));
}

/// Called when `checkout` attaches (or re-attaches) a consumer under
/// `single_active`. Never promotes directly: it only queues the consumer
/// behind whoever wins the waiting-list ordering, leaving promotion to the
/// next [`evaluate_activation`] pass. A re-attach of the already-active
/// consumer is a no-op.
pub fn on_attach(state: &mut State, key: ConsumerKey) {
    if state.active_consumer == Some(key) {
        return;
    }
    insert_waiting(state, key);
}

/// Promotes `key` to active, clearing it from the waiting list and
/// handing it to the service queue so the checkout engine can find it
/// (the service queue is the only thing the delivery loop ever pops from,
/// `competing` or not).
fn activate(state: &mut State, key: ConsumerKey) {
    state.waiting_consumers.retain(|&k| k != key);
    state.active_consumer = Some(key);
    if let Some(consumer) = state.consumers.get_mut(&key) {
        consumer.status = ConsumerStatus::Up;
    }
    if let Some(consumer) = state.consumers.get(&key) {
        if consumer.is_eligible_for_service() {
            state.service_queue.push(key, consumer.priority);
        }
    }
}

fn update_consumer_handler_effect(consumer: ConsumerKey, active: bool) -> Effect {
    Effect::ModCall {
        module: "single_active_consumer".to_string(),
        function: "update_consumer_handler".to_string(),
        args: ModCallArgs::UpdateConsumerHandler { consumer, active },
    }
}

/// The activation ladder, run after every mutating command under
/// `single_active`:
///
/// 1. Nobody active and somebody waiting → promote the head of the list.
/// 2. The waiting head strictly outranks the active consumer and the
///    active consumer has nothing checked out → demote it back to waiting
///    and promote the newcomer.
/// 3. The waiting head outranks the active consumer but it still has
///    messages checked out → mark it `fading`; it keeps draining but
///    receives nothing new until [`maybe_finish_fade`] completes the
///    handoff.
pub fn evaluate_activation(state: &mut State) -> Vec<Effect> {
    let mut effects = Vec::new();

    // Only a consumer the registry still considers `Up` is a legal
    // promotion target; a `suspected_down` or `cancelled` one simply sits
    // in the list until liveness clears it.
    let next_up_candidate = |state: &State| {
        state.waiting_consumers.iter().copied().find(|&k| {
            state
                .consumers
                .get(&k)
                .is_some_and(|c| matches!(c.status, ConsumerStatus::Up))
        })
    };

    let Some(active_key) = state.active_consumer else {
        if let Some(next) = next_up_candidate(state) {
            activate(state, next);
            effects.push(update_consumer_handler_effect(next, true));
        }
        return effects;
    };

    let Some(head) = next_up_candidate(state) else {
        return effects;
    };

    let active_priority = state.consumers.get(&active_key).map_or(i32::MIN, |c| c.priority);
    let head_priority = state.consumers.get(&head).map_or(i32::MIN, |c| c.priority);
    if head_priority <= active_priority {
        return effects;
    }

    let active_idle = state
        .consumers
        .get(&active_key)
        .is_some_and(|c| c.checked_out.is_empty());

    if active_idle {
        state.active_consumer = None;
        insert_waiting(state, active_key);
        activate(state, head);
        effects.push(update_consumer_handler_effect(active_key, false));
        effects.push(update_consumer_handler_effect(head, true));
    } else if let Some(c) = state.consumers.get_mut(&active_key) {
        if matches!(c.status, ConsumerStatus::Up) {
            c.status = ConsumerStatus::Fading;
        }
    }

    effects
}

/// Removes `key` from single-active bookkeeping (cancel, timeout, or
/// confirmed-down reclaim). If it was active and has nothing checked out,
/// it simply steps down; the next [`evaluate_activation`] pass promotes
/// whoever is waiting. If it still has checked-out messages it starts
/// fading instead, same as losing out to a higher-priority newcomer.
pub fn remove(state: &mut State, key: ConsumerKey) {
    state.waiting_consumers.retain(|&k| k != key);
    if state.active_consumer != Some(key) {
        return;
    }
    let still_checked_out = state
        .consumers
        .get(&key)
        .is_some_and(|c| !c.checked_out.is_empty());
    if still_checked_out {
        if let Some(consumer) = state.consumers.get_mut(&key) {
            consumer.status = ConsumerStatus::Fading;
        }
        return;
    }
    state.active_consumer = None;
}

/// Settlement-path hook: once a fading consumer drains its last
/// checked-out message, finish the handoff it was waiting on. The actual
/// promotion of whoever's next happens on the following
/// [`evaluate_activation`] pass.
pub fn maybe_finish_fade(state: &mut State, key: ConsumerKey) {
    let is_fading = state
        .consumers
        .get(&key)
        .is_some_and(|c| matches!(c.status, ConsumerStatus::Fading));
    if !is_fading {
        return;
    }
    let drained = state
        .consumers
        .get(&key)
        .is_some_and(|c| c.checked_out.is_empty());
    if !drained {
        return;
    }
    if state.active_consumer == Some(key) {
        state.active_consumer = None;
    }
    state.consumers.remove(&key);
    state.consumer_index.retain(|_, v| *v != key);
}
