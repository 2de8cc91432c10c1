//! The kernel - pure functional core of the queue.
//!
//! [`apply`] is the single entry point: it takes ownership of `State` and a
//! tagged [`Command`], and returns the successor state, a direct [`Reply`]
//! to the caller, and the list of [`Effect`]s for the substrate to execute.
//! Every handler lives in its own module (`enqueue`, `checkout`,
//! `settlement`, ...); this file only resolves `ConsumerRef`s to their
//! canonical key and routes to them, matching the substrate's contract that
//! an unknown or malformed command never panics — it reports
//! [`DispatchError`] through `reply` instead.
//!
//! # Example
//!
//! ```ignore
//! let state = State::new(QueueConfig::new("orders", "orders-rid"));
//! let meta = Meta::new(LogIndex::new(1), Timestamp::from_millis(1));
//! let (state, reply, effects) = apply(state, meta, Command::RegisterEnqueuer { pid });
//! ```

use quorumq_types::ConsumerKey;

use crate::command::{Command, ConsumerRef, Meta};
pub use crate::errors::DispatchError;
use crate::effects::Effect;
use crate::reply::Reply;
use crate::state::State;

/// Resolves a [`ConsumerRef`] to its canonical key, reporting
/// [`DispatchError::InvalidConsumerKey`] when neither the bare key nor the
/// legacy `(tag, pid)` pair names a registered consumer.
fn resolve(state: &State, r: ConsumerRef) -> Result<ConsumerKey, DispatchError> {
    crate::limits::resolve_consumer_ref(state, r.clone()).ok_or(DispatchError::InvalidConsumerKey(r))
}

/// Applies a committed command to the state, producing the successor
/// state, a direct reply, and a list of effects.
///
/// Takes ownership of state, returns the new one — no cloning of `State`
/// on the happy path. Unknown or malformed `ConsumerRef`s never panic: they
/// report `Reply::Error` and leave the state untouched.
#[allow(clippy::too_many_lines)]
pub fn apply(state: State, meta: Meta, command: Command) -> (State, Reply, Vec<Effect>) {
    match command {
        Command::Enqueue {
            publisher,
            seqno,
            body,
            ttl_ms,
        } => crate::enqueue::handle_enqueue(state, &meta, publisher, seqno, body, ttl_ms),

        Command::EnqueueV2 { seqno, body, ttl_ms } => {
            let publisher = meta.reply_mode.publisher();
            crate::enqueue::handle_enqueue(state, &meta, publisher, Some(seqno), body, ttl_ms)
        }

        Command::RegisterEnqueuer { pid } => crate::enqueue::handle_register_enqueuer(state, pid),

        Command::Checkout { spec, consumer } => crate::checkout::handle_checkout(state, &meta, spec, consumer),

        Command::Settle { consumer, msg_ids } => match resolve(&state, consumer) {
            Ok(key) => crate::settlement::handle_settle(state, &meta, key, msg_ids),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Return { consumer, msg_ids } => match resolve(&state, consumer) {
            Ok(key) => crate::settlement::handle_return(state, &meta, key, msg_ids),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Discard { consumer, msg_ids } => match resolve(&state, consumer) {
            Ok(key) => crate::settlement::handle_discard(state, &meta, key, msg_ids),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Defer { consumer, msg_ids } => match resolve(&state, consumer) {
            Ok(key) => crate::settlement::handle_defer(state, &meta, key, msg_ids),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Credit {
            consumer,
            credit,
            drain,
            receiver_delivery_count,
        } => match resolve(&state, consumer) {
            Ok(key) => crate::credit::handle_credit(state, &meta, key, credit, drain, receiver_delivery_count),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Requeue { msg_id, consumer } => match resolve(&state, consumer) {
            Ok(key) => crate::settlement::handle_requeue(state, &meta, msg_id, key),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Cancel { consumer } => match resolve(&state, consumer) {
            Ok(key) => crate::lifecycle::handle_cancel(state, &meta, key),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Remove { consumer } => match resolve(&state, consumer) {
            Ok(key) => crate::lifecycle::handle_remove(state, &meta, key),
            Err(err) => (state, Reply::Error(err), Vec::new()),
        },

        Command::Purge => crate::purge::handle_purge(state),

        Command::PurgeNodes { nodes } => crate::purge::handle_purge_nodes(state, &meta, nodes),

        Command::UpdateConfig(update) => {
            let mut state = state;
            state.cfg.apply_update(update);
            let (state, effects) = crate::checkout::run_checkout_engine(state, &meta);
            (state, Reply::Ok, effects)
        }

        Command::GarbageCollection => crate::purge::handle_garbage_collection(state, &meta),

        Command::EvalConsumerTimeouts { keys } => {
            let (state, effects) = crate::limits::handle_eval_consumer_timeouts(state, &meta, keys);
            (state, Reply::Ok, effects)
        }

        Command::Timeout => {
            let (state, effects) = crate::limits::handle_timeout(state, &meta);
            (state, Reply::Ok, effects)
        }

        Command::Down { pid, reason } => {
            let (state, effects) = crate::liveness::handle_down(state, &meta, pid, reason);
            (state, Reply::Ok, effects)
        }

        Command::NodeUp { node } => {
            let (state, effects) = crate::liveness::handle_node_up(state, &meta, node);
            (state, Reply::Ok, effects)
        }

        Command::NodeDown { node } => {
            let (state, effects) = crate::liveness::handle_node_down(state, &meta, node);
            (state, Reply::Ok, effects)
        }

        Command::MachineVersion { from, to } => crate::version::handle_machine_version(state, &meta, from, to),

        Command::Dlx(cmd) => crate::purge::handle_dlx(state, cmd),
    }
}
