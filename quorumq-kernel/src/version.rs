//! Machine-version upgrades: in-memory `State` shape migrations triggered
//! by a `machine_version` command as the cluster rolls forward.

use crate::command::Meta;
use crate::effects::Effect;
use crate::reply::Reply;
use crate::state::State;

/// v3 → v4 introduced per-checkout deadlines for the consumer-lock timer;
/// replicas upgrading from v3 stamp every already-checked-out message with
/// the current time so `eval_consumer_timeouts` has something sane to
/// compare against instead of a zero-value deadline that would look
/// instantly stale.
pub fn handle_machine_version(mut state: State, meta: &Meta, from: u8, to: u8) -> (State, Reply, Vec<Effect>) {
    if from < 4 && to >= 4 {
        for consumer in state.consumers.values_mut() {
            for checked in consumer.checked_out.values_mut() {
                checked.deadline_ts = meta.system_time;
            }
        }
    }
    (state, Reply::Ok, Vec::new())
}
