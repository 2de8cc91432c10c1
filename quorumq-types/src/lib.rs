//! # quorumq-types: shared identifiers for the quorumq core
//!
//! Small `Copy` newtypes used across the queue state machine:
//! - [`LogIndex`]: position of a committed command in the replicated log
//! - [`Timestamp`]: milliseconds since the Unix epoch, supplied by command metadata
//! - [`NodeId`] / [`Pid`]: opaque process identity used by enqueuers and consumers
//! - [`ConsumerKey`]: canonical integer identity of a registered consumer
//! - [`MsgId`]: per-consumer sequence number assigned to each delivered message
//!
//! None of these types read the clock or any other ambient state; every
//! value is constructed from data the caller already has.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Position of a committed command within the replicated log.
///
/// Every [`LogIndex`] the kernel is asked to reason about arrives via
/// command metadata; the kernel itself never allocates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The next index, used when a message is re-appended by `requeue`.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for LogIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LogIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LogIndex> for u64 {
    fn from(index: LogIndex) -> Self {
        index.0
    }
}

/// Wall-clock milliseconds since the Unix epoch.
///
/// Always supplied by the caller as part of command metadata — the kernel
/// never reads `SystemTime::now()`. This is what makes `apply` reproducible
/// byte-for-byte across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_add_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    pub fn saturating_sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// Identifier for a cluster member (an Erlang-style distributed node, in
/// spirit): the unit of failure that `down`/`nodeup` events describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Opaque process identity: an enqueuer or a consumer's connection process.
///
/// Carries its owning [`NodeId`] so liveness transitions (`down`, `nodeup`)
/// can be scoped to "every process on this node" without a separate lookup
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid {
    node: NodeId,
    serial: u64,
}

impl Pid {
    pub const fn new(node: NodeId, serial: u64) -> Self {
        Self { node, serial }
    }

    pub const fn node(self) -> NodeId {
        self.node
    }

    pub const fn serial(self) -> u64 {
        self.serial
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}.{}>", self.node.as_u64(), self.serial)
    }
}

/// Legacy consumer tag, used together with a [`Pid`] to resolve a
/// [`ConsumerKey`] for clients that have not upgraded to the v4 wire
/// format's bare integer key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConsumerTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical integer identity of a registered consumer.
///
/// In the v4 wire format this is the consumer's attach-time [`LogIndex`];
/// legacy `(tag, pid)` pairs are resolved to one of these by the registry
/// the first time they are seen (see `quorumq_kernel::registry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsumerKey(u64);

impl ConsumerKey {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn from_log_index(index: LogIndex) -> Self {
        Self(index.as_u64())
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ConsumerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-consumer sequence number assigned to each delivered message.
///
/// Strictly increasing per consumer for the lifetime of its registration;
/// a message redelivered to the same consumer without an intervening
/// return always receives a strictly greater id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct MsgId(u64);

impl MsgId {
    pub const ZERO: MsgId = MsgId(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for MsgId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The queue this state machine instance is the log for.
///
/// Carries a namespace (vhost-equivalent) alongside the bare name so two
/// queues of the same name in different namespaces never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueResource {
    pub namespace: String,
    pub name: String,
}

impl QueueResource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for QueueResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_index_next_increments() {
        assert_eq!(LogIndex::new(5).next(), LogIndex::new(6));
    }

    #[test]
    fn timestamp_saturating_add_does_not_overflow() {
        let ts = Timestamp::from_millis(u64::MAX - 1);
        assert_eq!(ts.saturating_add_millis(10).as_millis(), u64::MAX);
    }

    #[test]
    fn consumer_key_from_log_index_round_trips() {
        let idx = LogIndex::new(42);
        assert_eq!(ConsumerKey::from_log_index(idx).as_u64(), 42);
    }

    #[test]
    fn pid_display_includes_node() {
        let pid = Pid::new(NodeId::new(3), 7);
        assert_eq!(format!("{pid}"), "<3.7>");
    }
}
