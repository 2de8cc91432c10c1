//! Process and node liveness: `down`, `nodeup`, `nodedown`.
//!
//! `noconnection` is presumed recoverable (a network partition, not a
//! crash): every process at the affected node is marked `suspected_down`
//! and its checked-out messages are returned to the queue so they aren't
//! stranded for the partition's duration. Anything else is treated as
//! confirmed death and reclaims the dead pid's consumers outright. `nodeup`
//! lifts the suspicion and re-evaluates activation but does not eagerly
//! redeliver what was already returned — if the process really did die and
//! simply hadn't been detected yet, the monitor fires `down` again.

use quorumq_types::{ConsumerKey, NodeId, Pid};

use crate::command::{DownReason, Meta};
use crate::effects::{Effect, MonitorTarget};
use crate::state::{Consumer, ConsumerStatus, EnqueuerStatus, State};

fn consumers_for_pid(state: &State, pid: Pid) -> Vec<ConsumerKey> {
    state
        .consumers
        .iter()
        .filter(|(_, c)| c.cfg.pid == pid)
        .map(|(&key, _)| key)
        .collect()
}

fn consumers_for_node(state: &State, node: NodeId) -> Vec<ConsumerKey> {
    state
        .consumers
        .iter()
        .filter(|(_, c)| c.cfg.pid.node() == node)
        .map(|(&key, _)| key)
        .collect()
}

/// `down(pid, noconnection)`: a partition, not a crash — every process at
/// `node(pid)` (not just `pid` itself; a dropped connection takes the whole
/// node with it) becomes `suspected_down`, and every one of their
/// checked-out messages is returned to the queue so it isn't stranded for
/// the duration of the partition. `single_active` consumers additionally
/// move to the waiting list rather than staying active-but-unreachable.
fn mark_suspected_node(mut state: State, meta: &Meta, node: NodeId) -> (State, Vec<Effect>) {
    let mut effects = vec![Effect::Monitor(MonitorTarget::Node(node))];

    let enqueuer_pids: Vec<Pid> = state.enqueuers.keys().copied().filter(|pid| pid.node() == node).collect();
    for pid in enqueuer_pids {
        if let Some(enqueuer) = state.enqueuers.get_mut(&pid) {
            enqueuer.status = EnqueuerStatus::SuspectedDown;
        }
    }

    for key in consumers_for_node(&state, node) {
        let msg_ids: Vec<_> = state
            .consumers
            .get(&key)
            .map(|c| c.checked_out.keys().copied().collect())
            .unwrap_or_default();
        for msg_id in msg_ids {
            if let Some(msg_ref) = crate::settlement::take_checked_out(&mut state, key, msg_id) {
                crate::settlement::requeue_or_dlx(&mut state, &mut effects, msg_ref);
            }
        }
        state.service_queue.remove_anywhere(key);
        if let Some(c) = state.consumers.get_mut(&key) {
            c.status = ConsumerStatus::SuspectedDown;
        }
        if matches!(state.cfg.consumer_strategy, crate::config::ConsumerStrategy::SingleActive) {
            crate::single_active::remove(&mut state, key);
        }
    }

    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    (state, effects)
}

/// Confirmed death: requeues every message the pid's consumers had
/// checked out, tears down their registration entirely, and stops
/// tracking the pid as an enqueuer.
fn reclaim_dead(mut state: State, meta: &Meta, pid: Pid) -> (State, Vec<Effect>) {
    state.enqueuers.remove(&pid);

    let mut effects = Vec::new();
    for key in consumers_for_pid(&state, pid) {
        effects.extend(reclaim_consumer(&mut state, key));
    }
    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    (state, effects)
}

pub(crate) fn reclaim_consumer(state: &mut State, key: ConsumerKey) -> Vec<Effect> {
    let Some(c) = state.consumers.get(&key) else {
        return Vec::new();
    };
    let msg_ids: Vec<_> = c.checked_out.keys().copied().collect();

    let mut effects = Vec::new();
    for msg_id in msg_ids {
        if let Some(msg_ref) = crate::settlement::take_checked_out(state, key, msg_id) {
            crate::settlement::requeue_or_dlx(state, &mut effects, msg_ref);
        }
    }
    state.service_queue.remove_anywhere(key);
    crate::single_active::remove(state, key);
    if let Some(c) = state.consumers.remove(&key) {
        state.consumer_index.remove(&(c.cfg.tag, c.cfg.pid));
    }
    effects
}

/// `down`: dispatches to suspicion or reclaim depending on `reason`.
pub fn handle_down(state: State, meta: &Meta, pid: Pid, reason: DownReason) -> (State, Vec<Effect>) {
    match reason {
        DownReason::NoConnection => mark_suspected_node(state, meta, pid.node()),
        DownReason::Other => reclaim_dead(state, meta, pid),
    }
}

/// `nodeup`: lifts suspicion on every process on `node`, re-arms monitors,
/// and re-evaluates activation — but does not eagerly redeliver; their
/// in-flight messages stay returned from the earlier `noconnection`.
pub fn handle_node_up(mut state: State, meta: &Meta, node: NodeId) -> (State, Vec<Effect>) {
    let mut effects = Vec::new();

    let pids: Vec<Pid> = state
        .enqueuers
        .iter()
        .filter(|(pid, e)| pid.node() == node && matches!(e.status, EnqueuerStatus::SuspectedDown))
        .map(|(&pid, _)| pid)
        .collect();
    for pid in pids {
        if let Some(e) = state.enqueuers.get_mut(&pid) {
            e.status = EnqueuerStatus::Up;
        }
        effects.push(Effect::Monitor(MonitorTarget::Process(pid)));
    }

    for key in consumers_for_node(&state, node) {
        let revived = state.consumers.get_mut(&key).and_then(|c| {
            if !matches!(c.status, ConsumerStatus::SuspectedDown) {
                return None;
            }
            c.status = ConsumerStatus::Up;
            Some((c.cfg.pid, c.is_eligible_for_service()))
        });
        let Some((pid, eligible)) = revived else {
            continue;
        };
        match state.cfg.consumer_strategy {
            crate::config::ConsumerStrategy::Competing => {
                if eligible {
                    let priority = state.consumers.get(&key).map_or(0, |c| c.priority);
                    state.service_queue.push(key, priority);
                }
            }
            crate::config::ConsumerStrategy::SingleActive => {
                crate::single_active::on_attach(&mut state, key);
            }
        }
        effects.push(Effect::Monitor(MonitorTarget::Process(pid)));
    }

    let (state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    (state, effects)
}

/// `nodedown`: every process on `node` is immediately treated as
/// confirmed dead, since the node itself (not just one connection) is
/// gone.
pub fn handle_node_down(mut state: State, meta: &Meta, node: NodeId) -> (State, Vec<Effect>) {
    let pids: Vec<Pid> = state
        .enqueuers
        .keys()
        .copied()
        .filter(|pid| pid.node() == node)
        .chain(
            consumers_for_node(&state, node)
                .into_iter()
                .filter_map(|key| state.consumers.get(&key).map(|c| c.cfg.pid)),
        )
        .collect();

    let mut effects = Vec::new();
    for pid in pids {
        let (next_state, pid_effects) = reclaim_dead(state, meta, pid);
        state = next_state;
        effects.extend(pid_effects);
    }
    (state, effects)
}
