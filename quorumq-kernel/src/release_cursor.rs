//! The release-cursor manager: periodic state snapshots that let the
//! replication substrate truncate its log.
//!
//! A cursor is only useful once nothing before it is still live — the
//! gate in [`drain_ready`] — so dehydrating is cheap and frequent while
//! actually emitting the `ReleaseCursor` effect (which the substrate must
//! durably persist) only happens once the cutoff has actually moved.

use quorumq_types::LogIndex;

use crate::command::Meta;
use crate::effects::Effect;
use crate::state::State;

/// Dehydrates and queues a new pending cursor once `enqueue_count` has
/// caught up to the adaptive interval, or immediately whenever the queue
/// has drained to nothing (so an idle queue always has a cursor sitting
/// near the log tip rather than stalling behind its last burst of
/// traffic).
pub fn maybe_dehydrate(state: &mut State, meta: &Meta) {
    let due = state.enqueue_count >= state.cfg.release_cursor_interval.current;
    let idle = state.messages_total == 0;
    if !(due || idle) {
        return;
    }

    let dehydrated = state.dehydrate();
    state.release_cursors.push_back((meta.index, Box::new(dehydrated)));
    state.enqueue_count = 0;

    let messages_total = state.messages_total;
    let every_max = state.cfg.release_cursor_every_max;
    state.cfg.release_cursor_interval.adapt(messages_total, every_max);
}

/// Pops every pending cursor whose index is now older than the smallest
/// still-live index, keeping only the newest as a `ReleaseCursor` effect
/// (older ones are superseded: releasing the newest implies everything
/// before it is also safe to drop).
pub fn drain_ready(state: &mut State) -> Vec<Effect> {
    let cutoff = state.ra_indexes.smallest();
    let mut newest: Option<(LogIndex, Box<crate::state::DehydratedState>)> = None;

    loop {
        let ready = match (state.release_cursors.front(), cutoff) {
            (Some((index, _)), Some(smallest)) => *index < smallest,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !ready {
            break;
        }
        newest = state.release_cursors.pop_front();
    }

    match newest {
        Some((index, dehydrated)) => vec![Effect::ReleaseCursor { index, dehydrated }],
        None => Vec::new(),
    }
}
