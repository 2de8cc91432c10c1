//! Tests for invariants promoted from `debug_assert!()` in the checkout and
//! settlement paths.
//!
//! These exercise the state machine end to end through [`crate::kernel::apply`]
//! rather than calling module internals directly, so a regression in any
//! handler's bookkeeping shows up here even if the handler's own unit tests
//! don't happen to cover the interaction.

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::command::{
        CheckoutSpec, Command, ConsumerAttach, ConsumerRef, CreditMode, Lifetime, Meta,
    };
    use crate::config::QueueConfig;
    use crate::kernel::apply;
    use crate::reply::Reply;
    use crate::state::State;
    use quorumq_types::{ConsumerTag, LogIndex, NodeId, Pid, Timestamp};

    fn attach(tag: &str) -> ConsumerAttach {
        ConsumerAttach {
            tag: ConsumerTag::new(tag),
            pid: Pid::new(NodeId::new(1), 1),
            lifetime: Lifetime::Auto,
            credit_mode: CreditMode::SimplePrefetch { max: 10 },
            priority: 0,
            meta: Default::default(),
        }
    }

    fn enqueue(state: State, index: u64, body: &'static str) -> State {
        let meta = Meta::new(LogIndex::new(index), Timestamp::from_millis(index));
        let (state, reply, _) = apply(
            state,
            meta,
            Command::Enqueue {
                publisher: None,
                seqno: None,
                body: Bytes::from_static(body.as_bytes()),
                ttl_ms: None,
            },
        );
        assert_eq!(reply, Reply::Ok);
        state
    }

    /// Invariant 1: `messages_total` equals the sum of ready, returned,
    /// checked-out, and dead-lettered message counts.
    #[test]
    fn messages_total_matches_component_counts() {
        let state = State::new(QueueConfig::new("q", "r"));
        let state = enqueue(state, 1, "a");
        let state = enqueue(state, 2, "b");

        let checked_out: u64 = state.consumers.values().map(|c| c.checked_out.len() as u64).sum();
        let component_total = state.queue.len() as u64 + checked_out + state.dlx.count();
        assert_eq!(state.messages_total, component_total);

        let meta = Meta::new(LogIndex::new(3), Timestamp::from_millis(3));
        let (state, _, _) = apply(
            state,
            meta,
            Command::Checkout {
                spec: CheckoutSpec::Standing,
                consumer: attach("c1"),
            },
        );
        let checked_out: u64 = state.consumers.values().map(|c| c.checked_out.len() as u64).sum();
        let component_total = state.queue.len() as u64 + checked_out + state.dlx.count();
        assert_eq!(state.messages_total, component_total);
    }

    /// Invariant 2: every index referenced by `messages`/`returns`/
    /// `checked_out` is present in `ra_indexes`, and nothing else is.
    #[test]
    fn ra_indexes_tracks_exactly_the_live_set() {
        let state = State::new(QueueConfig::new("q", "r"));
        let state = enqueue(state, 1, "a");
        let meta = Meta::new(LogIndex::new(2), Timestamp::from_millis(2));
        let (state, _, _) = apply(
            state,
            meta,
            Command::Checkout {
                spec: CheckoutSpec::Standing,
                consumer: attach("c1"),
            },
        );

        let live_from_queue = state.queue.iter().map(|m| m.index);
        let live_from_checked_out = state
            .consumers
            .values()
            .flat_map(|c| c.checked_out.values().map(|checked| checked.msg_ref.index));
        let expected: std::collections::BTreeSet<_> = live_from_queue.chain(live_from_checked_out).collect();
        let actual: std::collections::BTreeSet<_> = state.ra_indexes.iter().collect();
        assert_eq!(actual, expected);
    }

    /// Invariant 5: redelivering a message to the same consumer without an
    /// intervening return always assigns a strictly greater `msg_id`.
    #[test]
    fn redelivery_without_return_gets_increasing_msg_ids() {
        let state = State::new(QueueConfig::new("q", "r"));
        let state = enqueue(state, 1, "a");
        let state = enqueue(state, 2, "b");

        let meta = Meta::new(LogIndex::new(3), Timestamp::from_millis(3));
        let (state, _, _) = apply(
            state,
            meta,
            Command::Checkout {
                spec: CheckoutSpec::Standing,
                consumer: attach("c1"),
            },
        );

        let consumer = *state.consumers.keys().next().unwrap();
        let mut msg_ids: Vec<_> = state.consumers[&consumer].checked_out.keys().copied().collect();
        msg_ids.sort();
        assert_eq!(msg_ids.len(), 2);
        assert!(msg_ids[0] < msg_ids[1]);
    }

    /// Invariant 6: `delivery_count` equals the number of returns suffered by
    /// a message, until it exceeds `delivery_limit` and is dead-lettered.
    #[test]
    fn delivery_count_tracks_return_count_until_dlx() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        state.cfg.delivery_limit = Some(2);
        let state = enqueue(state, 1, "x");

        let meta = Meta::new(LogIndex::new(2), Timestamp::from_millis(2));
        let (mut state, _, _) = apply(
            state,
            meta,
            Command::Checkout {
                spec: CheckoutSpec::Standing,
                consumer: attach("c1"),
            },
        );
        let consumer = *state.consumers.keys().next().unwrap();

        for index in 3..=6 {
            let msg_id = *state.consumers[&consumer].checked_out.keys().next().unwrap();
            let meta = Meta::new(LogIndex::new(index), Timestamp::from_millis(index));
            let (next_state, _, _) = apply(
                state,
                meta,
                Command::Return {
                    consumer: ConsumerRef::Key(consumer),
                    msg_ids: vec![msg_id],
                },
            );
            state = next_state;
            if state.dlx.count() > 0 {
                break;
            }
        }

        assert_eq!(state.dlx.count(), 1, "message must be dead-lettered once delivery_limit is exceeded");
        assert_eq!(state.messages_ready(), 0);
    }

    /// Invariant 8: applying `settle` twice with the same ids is a no-op the
    /// second time (idempotent).
    #[test]
    fn settle_is_idempotent() {
        let state = State::new(QueueConfig::new("q", "r"));
        let state = enqueue(state, 1, "a");
        let meta = Meta::new(LogIndex::new(2), Timestamp::from_millis(2));
        let (state, _, _) = apply(
            state,
            meta,
            Command::Checkout {
                spec: CheckoutSpec::Standing,
                consumer: attach("c1"),
            },
        );
        let consumer = *state.consumers.keys().next().unwrap();
        let msg_id = *state.consumers[&consumer].checked_out.keys().next().unwrap();

        let meta = Meta::new(LogIndex::new(3), Timestamp::from_millis(3));
        let (state, reply1, _) = apply(
            state,
            meta,
            Command::Settle {
                consumer: ConsumerRef::Key(consumer),
                msg_ids: vec![msg_id],
            },
        );
        assert_eq!(reply1, Reply::Ok);
        let after_first = state.clone();

        let meta = Meta::new(LogIndex::new(4), Timestamp::from_millis(4));
        let (state, reply2, _) = apply(
            state,
            meta,
            Command::Settle {
                consumer: ConsumerRef::Key(consumer),
                msg_ids: vec![msg_id],
            },
        );
        assert_eq!(reply2, Reply::Ok);
        assert_eq!(state.messages_total, after_first.messages_total);
        assert_eq!(state.msg_bytes_checkout, after_first.msg_bytes_checkout);
    }

    /// Invariant 9: `apply` is a pure function — replaying the same command
    /// log against two independent copies of the initial state produces
    /// identical successor states (see also `state_hash`).
    #[test]
    fn apply_is_deterministic_across_independent_replicas() {
        let commands = |state: State| -> State {
            let state = enqueue(state, 1, "a");
            let state = enqueue(state, 2, "b");
            let meta = Meta::new(LogIndex::new(3), Timestamp::from_millis(3));
            let (state, _, _) = apply(
                state,
                meta,
                Command::Checkout {
                    spec: CheckoutSpec::Standing,
                    consumer: attach("c1"),
                },
            );
            state
        };

        let replica_a = commands(State::new(QueueConfig::new("q", "r")));
        let replica_b = commands(State::new(QueueConfig::new("q", "r")));
        assert_eq!(crate::state_hash::hash_state(&replica_a), crate::state_hash::hash_state(&replica_b));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod proptests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use crate::command::{CheckoutSpec, Command, ConsumerAttach, ConsumerRef, CreditMode, Lifetime, Meta};
    use crate::config::QueueConfig;
    use crate::kernel::apply;
    use crate::state::State;
    use quorumq_types::{ConsumerTag, LogIndex, NodeId, Pid, Timestamp};

    fn attach(tag: &str) -> ConsumerAttach {
        ConsumerAttach {
            tag: ConsumerTag::new(tag),
            pid: Pid::new(NodeId::new(1), 1),
            lifetime: Lifetime::Auto,
            credit_mode: CreditMode::SimplePrefetch { max: 1000 },
            priority: 0,
            meta: Default::default(),
        }
    }

    fn step_index(i: usize) -> LogIndex {
        LogIndex::new(i as u64 + 1)
    }

    proptest! {
        /// Invariant 1: after any number of plain enqueues, `messages_total`
        /// equals the count of messages sitting ready in the queue (nothing
        /// has been checked out yet, so there's nowhere else for them to be).
        #[test]
        fn messages_total_matches_ready_count_with_no_consumers(batch_sizes in prop::collection::vec(1u64..20, 1..10)) {
            let mut state = State::new(QueueConfig::new("q", "r"));
            let mut index = 0usize;
            for size in batch_sizes {
                for _ in 0..size {
                    let meta = Meta::new(step_index(index), Timestamp::from_millis(index as u64));
                    let (next_state, _, _) = apply(
                        state,
                        meta,
                        Command::Enqueue {
                            publisher: None,
                            seqno: None,
                            body: Bytes::from_static(b"x"),
                            ttl_ms: None,
                        },
                    );
                    state = next_state;
                    index += 1;
                }
            }
            prop_assert_eq!(state.messages_total, state.queue.len() as u64);
            prop_assert_eq!(state.messages_total, state.messages_ready());
        }

        /// Invariant 2: after an arbitrary interleaving of enqueues and a
        /// single standing checkout's drain, every live index is accounted
        /// for in exactly one of "ready" or "checked out", and `ra_indexes`
        /// agrees with that live set exactly.
        #[test]
        fn ra_indexes_matches_live_set_after_checkout(enqueue_count in 1usize..15) {
            let mut state = State::new(QueueConfig::new("q", "r"));
            let mut index = 0usize;
            for _ in 0..enqueue_count {
                let meta = Meta::new(step_index(index), Timestamp::from_millis(index as u64));
                let (next_state, _, _) = apply(
                    state,
                    meta,
                    Command::Enqueue {
                        publisher: None,
                        seqno: None,
                        body: Bytes::from_static(b"x"),
                        ttl_ms: None,
                    },
                );
                state = next_state;
                index += 1;
            }
            let meta = Meta::new(step_index(index), Timestamp::from_millis(index as u64));
            let (state, _, _) = apply(
                state,
                meta,
                Command::Checkout {
                    spec: CheckoutSpec::Standing,
                    consumer: attach("c1"),
                },
            );

            let live_from_queue = state.queue.iter().map(|m| m.index);
            let live_from_checked_out = state
                .consumers
                .values()
                .flat_map(|c| c.checked_out.values().map(|checked| checked.msg_ref.index));
            let expected: std::collections::BTreeSet<_> = live_from_queue.chain(live_from_checked_out).collect();
            let actual: std::collections::BTreeSet<_> = state.ra_indexes.iter().collect();
            prop_assert_eq!(actual, expected);
        }

        /// Invariant 9 (determinism): replaying the same randomly generated
        /// sequence of enqueue/settle commands against two independent
        /// initial states always produces identical final states.
        #[test]
        fn replay_determinism(ops in prop::collection::vec(0u8..3, 1..20)) {
            let run = |ops: &[u8]| -> State {
                let mut state = State::new(QueueConfig::new("q", "r"));
                let meta = Meta::new(LogIndex::new(1), Timestamp::ZERO);
                let (next_state, _, _) = apply(
                    state,
                    meta,
                    Command::Checkout {
                        spec: CheckoutSpec::Standing,
                        consumer: attach("c1"),
                    },
                );
                state = next_state;

                for (i, op) in ops.iter().enumerate() {
                    let index = step_index(i + 1);
                    let meta = Meta::new(index, Timestamp::from_millis(i as u64 + 1));
                    state = match op {
                        0 => {
                            let (s, _, _) = apply(
                                state,
                                meta,
                                Command::Enqueue {
                                    publisher: None,
                                    seqno: None,
                                    body: Bytes::from_static(b"x"),
                                    ttl_ms: None,
                                },
                            );
                            s
                        }
                        1 => {
                            let Some(&consumer) = state.consumers.keys().next() else { continue };
                            let Some(&msg_id) = state.consumers[&consumer].checked_out.keys().next() else { continue };
                            let (s, _, _) = apply(
                                state,
                                meta,
                                Command::Settle { consumer: ConsumerRef::Key(consumer), msg_ids: vec![msg_id] },
                            );
                            s
                        }
                        _ => {
                            let Some(&consumer) = state.consumers.keys().next() else { continue };
                            let Some(&msg_id) = state.consumers[&consumer].checked_out.keys().next() else { continue };
                            let (s, _, _) = apply(
                                state,
                                meta,
                                Command::Return { consumer: ConsumerRef::Key(consumer), msg_ids: vec![msg_id] },
                            );
                            s
                        }
                    };
                }
                state
            };

            let replica_a = run(&ops);
            let replica_b = run(&ops);
            prop_assert_eq!(crate::state_hash::hash_state(&replica_a), crate::state_hash::hash_state(&replica_b));
        }
    }
}
