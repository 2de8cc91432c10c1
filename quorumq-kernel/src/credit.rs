//! Credit-based flow control: the v1 simple-prefetch protocol and the v2
//! AMQP-style delivery-count/credited protocol.
//!
//! Both protocols converge on the same field (`Consumer::credit`) — the
//! checkout engine only ever asks "is this consumer's credit > 0", so the
//! two flavors differ only in how credit is granted and replenished, not
//! in how it's spent.

use quorumq_types::ConsumerKey;

use crate::command::{CreditMode, Meta};
use crate::config::ConsumerStrategy;
use crate::effects::{DeliveryChannel, Effect, SendMsgContent};
use crate::reply::Reply;
use crate::state::{Consumer, State};

/// v1: credit auto-replenishes up to `max` whenever a checked-out message
/// is settled, returned, or discarded — this is what keeps a standing
/// consumer continuously fed without an explicit `credit` command.
pub fn replenish_on_settle(consumer: &mut Consumer) {
    if let CreditMode::SimplePrefetch { max } = consumer.cfg.credit_mode {
        consumer.credit = consumer.credit.saturating_add(1).min(max);
    }
}

/// Handles a `credit` command. The two protocols diverge completely here:
///
/// - v1 (`SimplePrefetch`): `credit` sets the consumer's prefetch window
///   outright. `drain=true` additionally reports back how much of that
///   credit went unused once the queue ran dry, via `SendDrained`.
/// - v2 (`Credited`): `credit` grants additional `link_credit_snd` on top
///   of whatever the consumer already holds, tracked against the peer's
///   reported `delivery_count` so a `drain` request can compute exactly
///   how much credit to zero out.
pub fn handle_credit(
    mut state: State,
    meta: &Meta,
    consumer: ConsumerKey,
    credit: u32,
    drain: bool,
    receiver_delivery_count: Option<u32>,
) -> (State, Reply, Vec<Effect>) {
    let Some(credit_mode) = state.consumers.get(&consumer).map(|c| c.cfg.credit_mode) else {
        return (state, Reply::Ok, Vec::new());
    };

    let mut effects = Vec::new();
    match credit_mode {
        CreditMode::SimplePrefetch { .. } => {
            if let Some(c) = state.consumers.get_mut(&consumer) {
                c.credit = credit;
            }
            requeue_if_eligible(&mut state, consumer);

            let (next_state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
            state = next_state;
            effects.extend(checkout_effects);

            if drain {
                let drained = state.consumers.get_mut(&consumer).map_or(0, |c| {
                    let drained = c.credit;
                    c.delivery_count = c.delivery_count.wrapping_add(drained);
                    c.credit = 0;
                    drained
                });
                if let Some(pid) = state.consumers.get(&consumer).map(|c| c.cfg.pid) {
                    effects.push(Effect::SendMsg {
                        pid,
                        content: SendMsgContent::SendDrained {
                            consumer,
                            credit_drained: drained,
                        },
                        channel: DeliveryChannel::Local,
                    });
                }
            }

            return (
                state,
                Reply::SendCreditReply {
                    consumer,
                    messages_ready: state.messages_ready(),
                },
                effects,
            );
        }
        CreditMode::Credited { .. } => {
            // link_credit_snd = credit granted - deliveries the receiver has
            // observed since the grant that set the current delivery_count.
            let delivery_count = state.consumers.get(&consumer).map_or(0, |c| c.delivery_count);
            let observed = receiver_delivery_count.unwrap_or(delivery_count);
            let consumed = delivery_count.wrapping_sub(observed);
            if let Some(c) = state.consumers.get_mut(&consumer) {
                c.credit = credit.saturating_sub(consumed.min(credit));
            }
            requeue_if_eligible(&mut state, consumer);

            let (next_state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
            state = next_state;
            effects.extend(checkout_effects);

            if drain {
                if let Some(c) = state.consumers.get_mut(&consumer) {
                    let residual = c.credit;
                    c.delivery_count = c.delivery_count.wrapping_add(residual);
                    c.credit = 0;
                }
            }

            // v2's flow reply always trails delivery effects so FLOW follows
            // TRANSFER on the wire, matching the AMQP ordering requirement.
            if let Some(c) = state.consumers.get(&consumer) {
                effects.push(Effect::SendMsg {
                    pid: c.cfg.pid,
                    content: SendMsgContent::CreditReply {
                        consumer,
                        delivery_count: c.delivery_count,
                        credit: c.credit,
                        available: state.messages_ready(),
                        drain,
                    },
                    channel: DeliveryChannel::Local,
                });
            }
        }
    }

    (state, Reply::Ok, effects)
}

/// Pushes `consumer` back onto the competing-mode service queue once it
/// regains credit, either from a `credit` command or from
/// [`replenish_on_settle`]. Under `single_active` the service queue isn't
/// used at all for ready-to-receive bookkeeping — delivery is instead
/// gated on `state.active_consumer` in the checkout engine — so this is a
/// no-op unless `consumer` is the single active one.
pub(crate) fn requeue_if_eligible(state: &mut State, consumer: ConsumerKey) {
    let Some((priority, eligible)) = state
        .consumers
        .get(&consumer)
        .map(|c| (c.priority, c.is_eligible_for_service()))
    else {
        return;
    };
    if !eligible {
        return;
    }
    match state.cfg.consumer_strategy {
        ConsumerStrategy::Competing => {
            state.service_queue.push(consumer, priority);
        }
        ConsumerStrategy::SingleActive => {
            if state.active_consumer == Some(consumer) {
                state.service_queue.push(consumer, priority);
            }
        }
    }
}
