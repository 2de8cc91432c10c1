//! Deterministic state hashing, used by replicas to detect divergence
//! without comparing the full `State` byte-for-byte over the wire.
//!
//! Hashing goes through `serde_json` rather than a field-by-field walk:
//! every collection in `State` is a `BTreeMap`/`BTreeSet`/sorted `Vec`, so
//! JSON's key order is already canonical and two replicas that applied the
//! same command sequence serialize identically.

use serde::Serialize;

use crate::state::State;

/// A 32-byte BLAKE3 digest of `state`'s canonical JSON encoding.
///
/// Returns `None` only if serialization itself fails, which would mean a
/// type in `State` doesn't round-trip through `serde_json` — a
/// programming error, not a runtime condition callers need to handle.
#[must_use]
pub fn hash_state(state: &State) -> Option<[u8; 32]> {
    let bytes = serde_json::to_vec(state).ok()?;
    Some(*blake3::hash(&bytes).as_bytes())
}

/// Hashes any serializable value the same way; used by tests and by
/// `DehydratedState` comparisons in release-cursor property checks.
pub fn hash_value<T: Serialize>(value: &T) -> Option<[u8; 32]> {
    let bytes = serde_json::to_vec(value).ok()?;
    Some(*blake3::hash(&bytes).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;

    #[test]
    fn identical_states_hash_identically() {
        let a = State::new(QueueConfig::new("q", "r"));
        let b = State::new(QueueConfig::new("q", "r"));
        assert_eq!(hash_state(&a), hash_state(&b));
    }

    #[test]
    fn differing_states_hash_differently() {
        let a = State::new(QueueConfig::new("q", "r"));
        let mut b = State::new(QueueConfig::new("q", "r"));
        b.messages_total = 1;
        assert_ne!(hash_state(&a), hash_state(&b));
    }
}
