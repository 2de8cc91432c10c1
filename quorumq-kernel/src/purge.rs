//! `purge`, `purge_nodes`, `garbage_collection`, and the `dlx(...)`
//! sidecar pass-through.
//!
//! None of these touch in-flight (`checked_out`) messages: `purge` only
//! drops what's still ready to be delivered, and `purge_nodes` only tears
//! down registrations for processes that are gone for good, distinct from
//! the transient suspicion `down`/`nodeup` model.

use quorumq_types::NodeId;

use crate::command::{DlxCommand, Meta};
use crate::effects::Effect;
use crate::reply::Reply;
use crate::state::State;

/// `purge`: discards every ready message (`returns` and `messages`) with no
/// DLX hand-off, matching AMQP `queue.purge` — the messages are simply
/// gone, not dead-lettered. Checked-out messages are untouched.
pub fn handle_purge(mut state: State) -> (State, Reply, Vec<Effect>) {
    let drained = state.queue.drain_all();
    let count = drained.len() as u64;
    for msg_ref in &drained {
        state.ra_indexes.delete(msg_ref.index);
        state.msg_bytes_enqueue = state
            .msg_bytes_enqueue
            .saturating_sub(u64::from(msg_ref.header.size_bytes));
    }
    state.messages_total = state.messages_total.saturating_sub(count);
    (state, Reply::PurgeCount(count), Vec::new())
}

/// `purge_nodes`: tears down every enqueuer and consumer whose pid belongs
/// to one of `nodes`, after the node has been permanently decommissioned.
/// Unlike `down`, this never returns checked-out messages to the
/// queue — a decommissioned node's in-flight work is gone with it, the same
/// way `purge` discards ready messages rather than dead-lettering them.
pub fn handle_purge_nodes(mut state: State, meta: &Meta, nodes: Vec<NodeId>) -> (State, Reply, Vec<Effect>) {
    let dead_enqueuers: Vec<_> = state
        .enqueuers
        .keys()
        .copied()
        .filter(|pid| nodes.contains(&pid.node()))
        .collect();
    for pid in dead_enqueuers {
        state.enqueuers.remove(&pid);
    }

    let dead_consumers: Vec<_> = state
        .consumers
        .iter()
        .filter(|(_, c)| nodes.contains(&c.cfg.pid.node()))
        .map(|(&key, _)| key)
        .collect();
    for key in dead_consumers {
        state.service_queue.remove_anywhere(key);
        state.waiting_consumers.retain(|&k| k != key);
        if state.active_consumer == Some(key) {
            state.active_consumer = None;
        }
        if let Some(c) = state.consumers.remove(&key) {
            state.consumer_index.remove(&(c.cfg.tag, c.cfg.pid));
            for checked in c.checked_out.values() {
                state.ra_indexes.delete(checked.msg_ref.index);
            }
        }
    }

    let (state, effects) = crate::checkout::run_checkout_engine(state, meta);
    (state, Reply::Ok, effects)
}

/// `garbage_collection`: a no-enqueue tick that only drives the
/// release-cursor manager and the queue-expiry check, so an idle queue
/// still lets the substrate reclaim log space.
pub fn handle_garbage_collection(mut state: State, meta: &Meta) -> (State, Reply, Vec<Effect>) {
    let mut effects = Vec::new();
    crate::release_cursor::maybe_dehydrate(&mut state, meta);
    effects.extend(crate::release_cursor::drain_ready(&mut state));
    if crate::limits::queue_expired(&state, meta.system_time) {
        effects.push(Effect::Aux(crate::effects::AuxRequest::SpawnDeleter));
    }
    (state, Reply::Ok, effects)
}

/// `dlx(...)`: folds the dead-letter sidecar's own acknowledgements back
/// through the same deterministic log.
pub fn handle_dlx(mut state: State, command: DlxCommand) -> (State, Reply, Vec<Effect>) {
    match command {
        DlxCommand::Ack { index } => {
            state.dlx.ack(index);
            (state, Reply::Ok, Vec::new())
        }
    }
}
