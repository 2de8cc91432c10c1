//! The checkout engine: consumer attachment plus the main
//! delivery loop that runs after every mutating command.

use std::collections::BTreeMap;

use bytes::Bytes;
use quorumq_types::{ConsumerKey, LogIndex, Timestamp};

use crate::command::{CheckoutSpec, ConsumerAttach, DequeueSettlement, Meta};
use crate::config::ConsumerStrategy;
use crate::dlx::DlxReason;
use crate::effects::{DeliveryChannel, Effect, SendMsgContent, TimerName};
use crate::errors::DispatchError;
use crate::header::{CheckedMsg, Header, MsgRef};
use crate::reply::{DequeueOutcome, Reply};
use crate::state::{Consumer, ConsumerCfg, ConsumerStatus, State};

/// Cap on bytes carried in a single delivery effect.
const DELIVERY_CHUNK_BYTES: u64 = 128 * 1024;

/// Handles a `checkout` command: registers or merges a consumer, then runs
/// the checkout engine.
pub fn handle_checkout(
    mut state: State,
    meta: &Meta,
    spec: CheckoutSpec,
    attach: ConsumerAttach,
) -> (State, Reply, Vec<Effect>) {
    match spec {
        CheckoutSpec::Dequeue { settlement } => {
            if matches!(state.cfg.consumer_strategy, ConsumerStrategy::SingleActive) {
                return (
                    state,
                    Reply::Error(DispatchError::UnsupportedSingleActiveDequeue),
                    Vec::new(),
                );
            }
            handle_dequeue(state, meta, settlement, attach)
        }
        CheckoutSpec::Standing => {
            let key = attach_standing(&mut state, meta, attach);
            let (state, effects) = run_checkout_engine(state, meta);
            let messages_ready = state.messages_ready();
            (
                state,
                Reply::ConsumerAttached {
                    consumer: key,
                    messages_ready,
                },
                effects,
            )
        }
    }
}

/// `SimplePrefetch`'s `max` *is* the consumer's credit window — there is no
/// separate "grant" step on the wire, so attaching (or re-attaching) must
/// seed `credit` itself or a standing consumer would sit in
/// `service_queue`-ineligible limbo until an explicit `credit` command
/// arrived. `Credited` consumers stay at zero until the peer actually
/// sends one, per the v2 protocol.
fn grant_initial_credit(consumer: &mut Consumer) {
    if let crate::command::CreditMode::SimplePrefetch { max } = consumer.cfg.credit_mode {
        consumer.credit = max;
    }
}

/// Registers a new consumer or merges re-attachment of a known one,
/// wiring it into the service queue (competing) or the single-active
/// waiting list, as appropriate. Returns the canonical key.
fn attach_standing(state: &mut State, meta: &Meta, attach: ConsumerAttach) -> ConsumerKey {
    let legacy = (attach.tag.clone(), attach.pid);
    let key = state
        .resolve_legacy(&attach.tag, &attach.pid)
        .unwrap_or_else(|| ConsumerKey::from_log_index(meta.index));

    let cfg = ConsumerCfg {
        tag: attach.tag,
        pid: attach.pid,
        lifetime: attach.lifetime,
        credit_mode: attach.credit_mode,
        meta: attach.meta,
    };

    state.consumer_index.insert(legacy, key);

    state
        .consumers
        .entry(key)
        .and_modify(|c| {
            c.cfg = cfg.clone();
            c.priority = attach.priority;
            c.status = ConsumerStatus::Up;
            grant_initial_credit(c);
        })
        .or_insert_with(|| {
            let mut consumer = Consumer::new(cfg, attach.priority);
            grant_initial_credit(&mut consumer);
            consumer
        });

    match state.cfg.consumer_strategy {
        ConsumerStrategy::Competing => {
            if state
                .consumers
                .get(&key)
                .is_some_and(Consumer::is_eligible_for_service)
            {
                state.service_queue.push(key, attach.priority);
            }
        }
        ConsumerStrategy::SingleActive => {
            crate::single_active::on_attach(state, key);
        }
    }

    key
}

/// `basic.get`-style synchronous dequeue. `ManualAck` registers a
/// single-shot (`lifetime: Once`) consumer so the message has a proper
/// `checked_out` home the caller can later `settle`/`discard` by
/// `(consumer, msg_id)`, keeping invariant 1 intact;
/// `AutoSettle` completes the settlement inline.
fn handle_dequeue(
    mut state: State,
    meta: &Meta,
    settlement: DequeueSettlement,
    attach: ConsumerAttach,
) -> (State, Reply, Vec<Effect>) {
    let Some(msg_ref) = state.queue.take_next() else {
        return (state, Reply::Error(DispatchError::DequeueEmpty), Vec::new());
    };

    state.ra_indexes.append(msg_ref.index);
    state.msg_bytes_enqueue = state
        .msg_bytes_enqueue
        .saturating_sub(u64::from(msg_ref.header.size_bytes));

    match settlement {
        DequeueSettlement::AutoSettle => {
            state.ra_indexes.delete(msg_ref.index);
            state.messages_total = state.messages_total.saturating_sub(1);
        }
        DequeueSettlement::ManualAck => {
            let key = attach_standing(
                &mut state,
                meta,
                ConsumerAttach {
                    lifetime: crate::command::Lifetime::Once,
                    credit_mode: crate::command::CreditMode::SimplePrefetch { max: 1 },
                    ..attach
                },
            );
            state.msg_bytes_checkout += u64::from(msg_ref.header.size_bytes);
            let consumer = state.consumers.get_mut(&key).expect("just attached");
            let msg_id = consumer.next_msg_id;
            consumer.next_msg_id = consumer.next_msg_id.next();
            consumer
                .checked_out
                .insert(msg_id, CheckedMsg::new(meta.system_time, msg_ref));
            consumer.credit -= 1;
            consumer.delivery_count = consumer.delivery_count.wrapping_add(1);
            // This delivery bypassed the checkout engine's own loop, which is
            // what normally spends the credit `attach_standing` just granted;
            // pull the now-exhausted one-shot consumer back out of
            // `service_queue` so it isn't handed a second message.
            state.service_queue.remove_anywhere(key);
        }
    }

    let remaining = state.messages_ready();
    (
        state,
        Reply::Dequeue(DequeueOutcome {
            index: msg_ref.index,
            header: msg_ref.header,
            messages_remaining: remaining,
        }),
        Vec::new(),
    )
}

/// The checkout engine's main loop: expire stale heads,
/// then drain ready messages to ready consumers, chunking deliveries by
/// byte size and emitting one effect per consumer.
pub fn run_checkout_engine(mut state: State, meta: &Meta) -> (State, Vec<Effect>) {
    let mut effects = Vec::new();
    if matches!(state.cfg.consumer_strategy, ConsumerStrategy::SingleActive) {
        effects.extend(crate::single_active::evaluate_activation(&mut state));
    }
    effects.extend(expire_heads(&mut state, meta.system_time));

    let mut batches: BTreeMap<ConsumerKey, Vec<LogIndex>> = BTreeMap::new();

    loop {
        if state.queue.peek_next().is_none() {
            break;
        }
        let Some(key) = state.service_queue.pop() else {
            break;
        };

        let Some(consumer) = state.consumers.get(&key) else {
            continue; // consumer vanished since being queued; drop and recurse
        };
        if !consumer.is_eligible_for_service() {
            continue;
        }
        if matches!(
            state.active_consumer,
            Some(active) if matches!(state.cfg.consumer_strategy, ConsumerStrategy::SingleActive) && active != key
        ) {
            // Single-active: only the active consumer may receive.
            continue;
        }

        let Some(msg_ref) = state.queue.take_next() else {
            // No message after all; consumer re-queues for next time.
            let priority = consumer.priority;
            state.service_queue.push(key, priority);
            break;
        };
        state.ra_indexes.append(msg_ref.index);
        state.msg_bytes_enqueue = state
            .msg_bytes_enqueue
            .saturating_sub(u64::from(msg_ref.header.size_bytes));
        state.msg_bytes_checkout += u64::from(msg_ref.header.size_bytes);

        let consumer = state.consumers.get_mut(&key).expect("checked above");
        let msg_id = consumer.next_msg_id;
        consumer.next_msg_id = consumer.next_msg_id.next();
        consumer
            .checked_out
            .insert(msg_id, CheckedMsg::new(meta.system_time, msg_ref));
        consumer.credit -= 1;
        consumer.delivery_count = consumer.delivery_count.wrapping_add(1);

        let priority = consumer.priority;
        if consumer.is_eligible_for_service() {
            state.service_queue.push(key, priority);
        }

        batches.entry(key).or_default().push(msg_ref.index);
    }

    for (key, indexes) in batches {
        effects.extend(delivery_effects(&state, key, indexes));
    }

    (state, effects)
}

/// Splits one consumer's batch into delivery effects capped at
/// `DELIVERY_CHUNK_BYTES`, inlining the body when `msg_cache` covers a
/// single-message batch.
fn delivery_effects(state: &State, consumer: ConsumerKey, indexes: Vec<LogIndex>) -> Vec<Effect> {
    let Some(pid) = state.consumers.get(&consumer).map(|c| c.cfg.pid) else {
        return Vec::new();
    };

    if indexes.len() == 1 {
        if let Some((cached_index, body)) = &state.msg_cache {
            if *cached_index == indexes[0] {
                return vec![Effect::SendMsg {
                    pid,
                    content: SendMsgContent::Delivery {
                        consumer,
                        indexes,
                        inline_body: Some(body.clone()),
                    },
                    channel: DeliveryChannel::RaEvent,
                }];
            }
        }
    }

    let mut effects = Vec::new();
    let mut chunk: Vec<LogIndex> = Vec::new();
    let mut chunk_bytes: u64 = 0;
    for index in indexes {
        let size = size_of_checked_out(state, &consumer, index);
        if !chunk.is_empty() && chunk_bytes + size > DELIVERY_CHUNK_BYTES {
            effects.extend(log_read_effect(pid, consumer, std::mem::take(&mut chunk)));
            chunk_bytes = 0;
        }
        chunk_bytes += size;
        chunk.push(index);
    }
    if !chunk.is_empty() {
        effects.extend(log_read_effect(pid, consumer, chunk));
    }
    effects
}

fn size_of_checked_out(state: &State, consumer: &ConsumerKey, index: LogIndex) -> u64 {
    state
        .consumers
        .get(consumer)
        .and_then(|c| {
            c.checked_out
                .values()
                .find(|checked| checked.msg_ref.index == index)
        })
        .map(|checked| u64::from(checked.msg_ref.header.size_bytes))
        .unwrap_or(0)
}

/// A multi-message batch can't be satisfied from `msg_cache`; the substrate
/// must fetch the bodies from the log before delivering
/// (`log(indexes, fn(cmds) -> effects)`), so a chunk produces both a
/// `LogRead` request and the `SendMsg` that consumes its result.
fn log_read_effect(pid: quorumq_types::Pid, consumer: ConsumerKey, indexes: Vec<LogIndex>) -> Vec<Effect> {
    vec![
        Effect::LogRead {
            indexes: indexes.clone(),
            consumer,
        },
        Effect::SendMsg {
            pid,
            content: SendMsgContent::Delivery {
                consumer,
                indexes,
                inline_body: None,
            },
            channel: DeliveryChannel::RaEvent,
        },
    ]
}

/// Drops any head message (across `returns` then `messages`) whose expiry
/// has passed, handing each to DLX with reason `expired`, then arms a timer
/// for the soonest remaining head expiry.
pub fn expire_heads(state: &mut State, now: Timestamp) -> Vec<Effect> {
    let mut effects = Vec::new();
    while let Some(msg_ref) = state.queue.peek_next().copied() {
        if !msg_ref.header.is_expired_at(now) {
            break;
        }
        state.queue.take_next();
        state.dlx.hand_off(msg_ref, DlxReason::Expired);
        state.msg_bytes_enqueue = state
            .msg_bytes_enqueue
            .saturating_sub(u64::from(msg_ref.header.size_bytes));
        effects.push(Effect::DeadLetter {
            index: msg_ref.index,
            reason: DlxReason::Expired,
        });
    }

    let delay_ms = state
        .queue
        .peek_next()
        .and_then(|m| m.header.expiry_ts)
        .map(|expiry| expiry.saturating_sub(now))
        .unwrap_or(u64::MAX);
    if delay_ms != u64::MAX {
        effects.push(Effect::Timer {
            name: TimerName::ExpireMsgs,
            delay_ms,
        });
    }

    effects
}

/// Builds the raw body used for `msg_cache`: only set when a consumer with
/// ready credit is waiting and the queue was otherwise empty before this
/// enqueue.
pub fn immediate_delivery_candidate(state: &State) -> bool {
    !state.service_queue.is_empty() && state.queue.is_empty()
}

pub fn cache_body(state: &mut State, index: LogIndex, body: Bytes) {
    state.msg_cache = Some((index, body));
}

pub fn clear_cache_if_stale(state: &mut State, consumed: LogIndex) {
    if state.msg_cache.as_ref().is_some_and(|(i, _)| *i == consumed) {
        state.msg_cache = None;
    }
}
