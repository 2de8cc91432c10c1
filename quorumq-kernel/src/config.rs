//! Static-per-version queue configuration.
//!
//! `QueueConfig` is cheap to clone and carried whole in every dehydrated
//! snapshot. `update_config` is a pure fold over a typed [`ConfigUpdate`]:
//! every field it can set is a named `Option<T>`, so unrecognized keys
//! simply don't exist as a concern — they fall out of the type rather than
//! needing a runtime check.

use serde::{Deserialize, Serialize};

/// What happens to new messages once the queue is at its length/byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowStrategy {
    DropHead,
    RejectPublish,
}

/// Which consumer discipline this queue enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerStrategy {
    Competing,
    SingleActive,
}

/// Opaque reference to a dead-letter handler (the actual dispatch target
/// is an external collaborator; the core only needs to know
/// whether one is configured and pass its identity through effects).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterHandler {
    pub exchange: String,
    pub routing_key: Option<String>,
}

/// The release-cursor interval, which adapts between a floor and a ceiling
/// as `messages_total` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCursorInterval {
    pub base: u64,
    pub current: u64,
}

impl ReleaseCursorInterval {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            current: base,
        }
    }

    /// Re-derives `current` from `messages_total`, clamped to
    /// `[base, release_cursor_every_max]`.
    pub fn adapt(&mut self, messages_total: u64, every_max: u64) {
        self.current = messages_total.clamp(self.base, every_max.max(self.base));
    }
}

/// Static-per-version queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub resource_id: String,
    pub max_length: Option<u64>,
    pub max_bytes: Option<u64>,
    pub delivery_limit: Option<u32>,
    pub msg_ttl: Option<u64>,
    pub expires: Option<u64>,
    pub release_cursor_interval: ReleaseCursorInterval,
    pub release_cursor_every_max: u64,
    pub overflow_strategy: OverflowStrategy,
    pub consumer_strategy: ConsumerStrategy,
    pub dlh: Option<DeadLetterHandler>,
    pub become_leader_handler: Option<String>,
    /// Fraction of `max_length`/`max_bytes` that must be cleared before a
    /// `reject_publish`-blocked enqueuer is unblocked.
    pub overflow_release_watermark: f64,
    /// How long a checked-out message may go un-settled before
    /// `eval_consumer_timeouts` reclaims it.
    pub consumer_lock_ms: u64,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_id: resource_id.into(),
            max_length: None,
            max_bytes: None,
            delivery_limit: None,
            msg_ttl: None,
            expires: None,
            release_cursor_interval: ReleaseCursorInterval::new(256),
            release_cursor_every_max: 4096,
            overflow_strategy: OverflowStrategy::DropHead,
            consumer_strategy: ConsumerStrategy::Competing,
            dlh: None,
            become_leader_handler: None,
            overflow_release_watermark: 0.8,
            consumer_lock_ms: 30_000,
        }
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(dlh) = update.dead_letter_handler {
            self.dlh = dlh;
        }
        if let Some(handler) = update.become_leader_handler {
            self.become_leader_handler = handler;
        }
        if let Some(interval) = update.release_cursor_interval {
            self.release_cursor_interval = ReleaseCursorInterval::new(interval);
        }
        if let Some(strategy) = update.overflow_strategy {
            self.overflow_strategy = strategy;
        }
        if let Some(max_length) = update.max_length {
            self.max_length = max_length;
        }
        if let Some(max_bytes) = update.max_bytes {
            self.max_bytes = max_bytes;
        }
        if let Some(delivery_limit) = update.delivery_limit {
            self.delivery_limit = delivery_limit;
        }
        if let Some(expires) = update.expires {
            self.expires = expires;
        }
        if let Some(msg_ttl) = update.msg_ttl {
            self.msg_ttl = msg_ttl;
        }
        // single_active_consumer_on only takes effect for a queue created
        // without consumers yet; changing it on a live queue with an active
        // consumer is a caller error the substrate is expected to reject
        // before submission, so the core applies it unconditionally.
        if let Some(single_active) = update.single_active_consumer_on {
            self.consumer_strategy = if single_active {
                ConsumerStrategy::SingleActive
            } else {
                ConsumerStrategy::Competing
            };
        }
    }
}

/// Recognized `update_config` fields. Every field is optional; an update
/// that sets none of them is a legal no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub dead_letter_handler: Option<Option<DeadLetterHandler>>,
    pub become_leader_handler: Option<Option<String>>,
    pub release_cursor_interval: Option<u64>,
    pub overflow_strategy: Option<OverflowStrategy>,
    pub max_length: Option<Option<u64>>,
    pub max_bytes: Option<Option<u64>>,
    pub delivery_limit: Option<Option<u32>>,
    pub expires: Option<Option<u64>>,
    pub msg_ttl: Option<Option<u64>>,
    pub single_active_consumer_on: Option<bool>,
}
