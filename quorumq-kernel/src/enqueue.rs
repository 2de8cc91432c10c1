//! The enqueue pipeline: publisher sequence tracking, append, overflow,
//! and kicking off the checkout engine for any consumer now ready.

use bytes::Bytes;
use quorumq_types::Pid;

use crate::command::Meta;
use crate::effects::{Effect, MonitorTarget};
use crate::header::{Header, MsgRef};
use crate::reply::Reply;
use crate::state::{Enqueuer, EnqueuerStatus, State};

/// A zero-millisecond TTL still expires one tick in the future rather than
/// immediately, so a message published with `ttl=0` is at minimum
/// observable as "ready" before a subsequent `expire_heads` pass drops it.
fn effective_ttl(ttl_ms: u64) -> u64 {
    ttl_ms.max(1)
}

/// Per spec: if either a per-message TTL or the queue's configured
/// `msg_ttl` is set, the effective TTL is the smaller of the two — a
/// per-message TTL can only tighten the queue's ceiling, never loosen it.
fn stamp_expiry(state: &State, meta: &Meta, ttl_ms: Option<u64>) -> Option<quorumq_types::Timestamp> {
    let ttl = match (ttl_ms, state.cfg.msg_ttl) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }?;
    Some(meta.system_time.saturating_add_millis(effective_ttl(ttl)))
}

fn append_message(state: &mut State, meta: &Meta, body: Bytes, ttl_ms: Option<u64>) -> MsgRef {
    let size_bytes = body.len() as u32;
    let mut header = Header::new(size_bytes);
    if let Some(expiry) = stamp_expiry(state, meta, ttl_ms) {
        header = header.with_expiry(expiry);
    }
    let msg_ref = MsgRef::new(meta.index, header);

    let immediate = crate::checkout::immediate_delivery_candidate(state);
    state.queue.push_message(msg_ref);
    state.ra_indexes.append(meta.index);
    state.messages_total += 1;
    state.msg_bytes_enqueue += u64::from(size_bytes);
    state.enqueue_count += 1;
    state.last_active = meta.system_time;
    if immediate {
        crate::checkout::cache_body(state, meta.index, body);
    }
    msg_ref
}

/// Registers `pid` as a known publisher if it isn't already, returning a
/// `Monitor` effect the first time (the substrate must watch the process
/// so a `down` can reach the kernel).
fn ensure_enqueuer(state: &mut State, pid: Pid) -> Vec<Effect> {
    if state.enqueuers.contains_key(&pid) {
        return Vec::new();
    }
    state.enqueuers.insert(pid, Enqueuer::new());
    vec![Effect::Monitor(MonitorTarget::Process(pid))]
}

/// Handles `enqueue`/`enqueue_v2`. `publisher` is `None` for anonymous,
/// unordered publishing (no duplicate/out-of-sequence tracking is
/// possible without an identity to key it on).
pub fn handle_enqueue(
    mut state: State,
    meta: &Meta,
    publisher: Option<Pid>,
    seqno: Option<u64>,
    body: Bytes,
    ttl_ms: Option<u64>,
) -> (State, Reply, Vec<Effect>) {
    let mut effects = Vec::new();

    let Some(pid) = publisher else {
        append_message(&mut state, meta, body, ttl_ms);
        effects.extend(crate::limits::enforce_overflow(&mut state));
        let (mut state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
        effects.extend(checkout_effects);
        crate::release_cursor::maybe_dehydrate(&mut state, meta);
        effects.extend(crate::release_cursor::drain_ready(&mut state));
        return (state, Reply::Ok, effects);
    };

    effects.extend(ensure_enqueuer(&mut state, pid));

    let reply = if let Some(seq) = seqno {
        let next_expected = state.enqueuers[&pid].next_seqno;
        match seq.cmp(&next_expected) {
            std::cmp::Ordering::Less => Some(Reply::Duplicate),
            std::cmp::Ordering::Greater => Some(Reply::OutOfSequence),
            std::cmp::Ordering::Equal => {
                let enqueuer = state.enqueuers.get_mut(&pid).expect("just ensured");
                enqueuer.next_seqno = seq + 1;
                enqueuer.status = EnqueuerStatus::Up;
                None
            }
        }
    } else {
        None
    };

    if let Some(reply) = reply {
        return (state, reply, effects);
    }

    if matches!(
        state.cfg.overflow_strategy,
        crate::config::OverflowStrategy::RejectPublish
    ) && crate::limits::would_overflow(&state, body.len() as u32)
    {
        effects.extend(crate::limits::reject_publish(&mut state, pid, meta));
        return (state, Reply::Ok, effects);
    }

    append_message(&mut state, meta, body, ttl_ms);
    effects.extend(crate::limits::enforce_overflow(&mut state));
    let (mut state, checkout_effects) = crate::checkout::run_checkout_engine(state, meta);
    effects.extend(checkout_effects);
    crate::release_cursor::maybe_dehydrate(&mut state, meta);
    effects.extend(crate::release_cursor::drain_ready(&mut state));
    (state, Reply::Ok, effects)
}

/// Handles a bare `register_enqueuer` command: the pre-0.1 publisher
/// confirms handshake some clients issue before their first `enqueue`.
pub fn handle_register_enqueuer(mut state: State, pid: Pid) -> (State, Reply, Vec<Effect>) {
    let effects = ensure_enqueuer(&mut state, pid);
    (state, Reply::Ok, effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use quorumq_types::{LogIndex, NodeId, Timestamp};

    #[test]
    fn anonymous_enqueue_appends_without_tracking() {
        let state = State::new(QueueConfig::new("q", "r"));
        let meta = Meta::new(LogIndex::new(1), Timestamp::ZERO);
        let (state, reply, _) = handle_enqueue(state, &meta, None, None, Bytes::from_static(b"hi"), None);
        assert_eq!(reply, Reply::Ok);
        assert_eq!(state.messages_total, 1);
    }

    #[test]
    fn duplicate_seqno_is_rejected_without_state_change() {
        let state = State::new(QueueConfig::new("q", "r"));
        let pid = Pid::new(NodeId::new(1), 1);
        let meta1 = Meta::new(LogIndex::new(1), Timestamp::ZERO);
        let (state, _, _) = handle_enqueue(state, &meta1, Some(pid), Some(0), Bytes::from_static(b"a"), None);
        assert_eq!(state.messages_total, 1);

        let meta2 = Meta::new(LogIndex::new(2), Timestamp::ZERO);
        let (state, reply, _) = handle_enqueue(state, &meta2, Some(pid), Some(0), Bytes::from_static(b"b"), None);
        assert_eq!(reply, Reply::Duplicate);
        assert_eq!(state.messages_total, 1);
    }

    #[test]
    fn out_of_sequence_still_registers_publisher() {
        let state = State::new(QueueConfig::new("q", "r"));
        let pid = Pid::new(NodeId::new(1), 1);
        let meta = Meta::new(LogIndex::new(1), Timestamp::ZERO);
        let (state, reply, effects) = handle_enqueue(state, &meta, Some(pid), Some(5), Bytes::from_static(b"a"), None);
        assert_eq!(reply, Reply::OutOfSequence);
        assert_eq!(state.messages_total, 0);
        assert!(state.enqueuers.contains_key(&pid));
        assert!(effects.iter().any(|e| matches!(e, Effect::Monitor(_))));
    }

    #[test]
    fn expiry_is_the_lesser_of_per_message_and_queue_ttl() {
        let mut state = State::new(QueueConfig::new("q", "r"));
        state.cfg.msg_ttl = Some(500);
        let meta = Meta::new(LogIndex::new(1), Timestamp::from_millis(100));
        let (state, _, _) = handle_enqueue(state, &meta, None, None, Bytes::from_static(b"a"), Some(50));
        let msg_ref = state.queue.iter().next().unwrap();
        assert_eq!(msg_ref.header.expiry_ts, Some(Timestamp::from_millis(150)));
    }

    #[test]
    fn zero_ttl_still_expires_one_tick_later_not_immediately() {
        let state = State::new(QueueConfig::new("q", "r"));
        let meta = Meta::new(LogIndex::new(1), Timestamp::from_millis(100));
        let (state, _, _) = handle_enqueue(state, &meta, None, None, Bytes::from_static(b"a"), Some(0));
        let msg_ref = state.queue.iter().next().unwrap();
        assert_eq!(msg_ref.header.expiry_ts, Some(Timestamp::from_millis(101)));
    }
}
