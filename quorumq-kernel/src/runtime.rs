//! Runtime layer that executes kernel effects.
//!
//! The kernel is pure and only produces [`Effect`] values; this module is
//! where those effects actually happen, via pluggable `Clock`/`Log`/
//! `Network` traits. Production code wires in real implementations; tests
//! wire in the in-memory ones below.

use quorumq_types::{LogIndex, Pid};

use crate::effects::{DeliveryChannel, Effect, MonitorTarget, SendMsgContent, TimerName};
use crate::state::DehydratedState;

/// Supplies `system_time` to the substrate loop that builds each command's
/// `Meta` before calling `apply` — never read by the kernel itself.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

/// Fetches committed command bodies by log index, and persists/truncates
/// against a released cursor.
pub trait Log {
    fn fetch(&self, indexes: &[LogIndex]) -> Result<Vec<bytes::Bytes>, LogError>;

    /// Durably records `dehydrated` as the snapshot at `index`, after which
    /// the log may drop everything at or before `index`.
    fn truncate_before(&mut self, index: LogIndex, dehydrated: DehydratedState) -> Result<(), LogError>;
}

/// Delivers messages to consumers/publishers and arms timers/monitors.
pub trait Network {
    fn send(&mut self, pid: Pid, content: SendMsgContent, channel: DeliveryChannel) -> Result<(), NetworkError>;
    fn monitor(&mut self, target: MonitorTarget) -> Result<(), NetworkError>;
    fn arm_timer(&mut self, name: TimerName, delay_ms: u64) -> Result<(), NetworkError>;
    fn stats(&self) -> NetworkStats;
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("no committed command at index {0}")]
    NotFound(LogIndex),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("send to {0} failed: {1}")]
    SendFailed(Pid, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub messages_sent: u64,
    pub monitors_armed: u64,
}

/// Executes effects produced by `apply` using pluggable `Clock`, `Log`, and
/// `Network` implementations. Generic so a simulation harness can swap in
/// deterministic fakes without touching the kernel.
pub struct Runtime<C, L, N>
where
    C: Clock,
    L: Log,
    N: Network,
{
    pub clock: C,
    pub log: L,
    pub network: N,
}

impl<C, L, N> Runtime<C, L, N>
where
    C: Clock,
    L: Log,
    N: Network,
{
    pub fn new(clock: C, log: L, network: N) -> Self {
        Self { clock, log, network }
    }

    /// Executes a single effect. `LogRead` only prefetches the bodies the
    /// matching `SendMsg` delivery will need; the kernel always emits the
    /// two back to back, so callers that iterate effects in order get the
    /// right result without needing a closure-based re-entry.
    pub fn execute_effect(&mut self, effect: Effect) -> Result<(), RuntimeError> {
        match effect {
            Effect::SendMsg { pid, content, channel } => {
                self.network.send(pid, content, channel).map_err(RuntimeError::Network)?;
            }
            Effect::Monitor(target) => {
                self.network.monitor(target).map_err(RuntimeError::Network)?;
            }
            Effect::LogRead { indexes, consumer } => {
                let bodies = self.log.fetch(&indexes).map_err(RuntimeError::Log)?;
                tracing::trace!(?consumer, fetched = bodies.len(), "prefetched delivery bodies");
            }
            Effect::DeadLetter { index, reason } => {
                tracing::debug!(?index, ?reason, "message dead-lettered");
            }
            Effect::ReleaseCursor { index, dehydrated } => {
                self.log.truncate_before(index, *dehydrated).map_err(RuntimeError::Log)?;
            }
            Effect::Timer { name, delay_ms } => {
                self.network.arm_timer(name, delay_ms).map_err(RuntimeError::Network)?;
            }
            Effect::ModCall { module, function, args } => {
                tracing::debug!(%module, %function, ?args, "opaque mod_call effect not handled by this runtime");
            }
            Effect::Aux(request) => {
                tracing::debug!(?request, "auxiliary housekeeping requested");
            }
        }
        Ok(())
    }

    pub fn execute_effects(&mut self, effects: Vec<Effect>) -> Result<(), RuntimeError> {
        for effect in effects {
            self.execute_effect(effect)?;
        }
        Ok(())
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn network(&self) -> &N {
        &self.network
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("log error: {0}")]
    Log(#[from] LogError),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
}

// ============================================================================
// In-memory implementations for tests and local development.
// ============================================================================

/// A clock driven by an explicit millisecond counter rather than wall time,
/// so simulation tests stay deterministic.
pub struct SimClock {
    millis: u64,
}

impl SimClock {
    pub fn new(start_millis: u64) -> Self {
        Self { millis: start_millis }
    }

    pub fn advance(&mut self, delta_ms: u64) {
        self.millis = self.millis.saturating_add(delta_ms);
    }
}

impl Clock for SimClock {
    fn now_millis(&self) -> u64 {
        self.millis
    }
}

/// Keeps every committed command body in memory, keyed by log index; a
/// `truncate_before` just records the cutoff rather than actually freeing
/// anything, which is enough to exercise the runtime's contract in tests.
#[derive(Default)]
pub struct InMemoryLog {
    bodies: std::collections::BTreeMap<LogIndex, bytes::Bytes>,
    truncated_before: Option<LogIndex>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, index: LogIndex, body: bytes::Bytes) {
        self.bodies.insert(index, body);
    }

    pub fn truncated_before(&self) -> Option<LogIndex> {
        self.truncated_before
    }
}

impl Log for InMemoryLog {
    fn fetch(&self, indexes: &[LogIndex]) -> Result<Vec<bytes::Bytes>, LogError> {
        indexes
            .iter()
            .map(|index| self.bodies.get(index).cloned().ok_or(LogError::NotFound(*index)))
            .collect()
    }

    fn truncate_before(&mut self, index: LogIndex, _dehydrated: DehydratedState) -> Result<(), LogError> {
        self.truncated_before = Some(index);
        Ok(())
    }
}

/// Records every send/monitor/timer call instead of performing it, for
/// assertions in tests.
#[derive(Default)]
pub struct RecordingNetwork {
    pub sent: Vec<(Pid, SendMsgContent, DeliveryChannel)>,
    pub monitored: Vec<MonitorTarget>,
    pub timers: Vec<(TimerName, u64)>,
    stats: NetworkStats,
}

impl RecordingNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Network for RecordingNetwork {
    fn send(&mut self, pid: Pid, content: SendMsgContent, channel: DeliveryChannel) -> Result<(), NetworkError> {
        self.stats.messages_sent += 1;
        self.sent.push((pid, content, channel));
        Ok(())
    }

    fn monitor(&mut self, target: MonitorTarget) -> Result<(), NetworkError> {
        self.stats.monitors_armed += 1;
        self.monitored.push(target);
        Ok(())
    }

    fn arm_timer(&mut self, name: TimerName, delay_ms: u64) -> Result<(), NetworkError> {
        self.timers.push((name, delay_ms));
        Ok(())
    }

    fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlx::DlxReason;
    use quorumq_types::NodeId;

    #[test]
    fn sim_clock_advances_by_delta() {
        let mut clock = SimClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
    }

    #[test]
    fn in_memory_log_fetches_appended_bodies() {
        let mut log = InMemoryLog::new();
        log.append(LogIndex::new(1), bytes::Bytes::from_static(b"a"));
        log.append(LogIndex::new(2), bytes::Bytes::from_static(b"b"));
        let bodies = log.fetch(&[LogIndex::new(2), LogIndex::new(1)]).unwrap();
        assert_eq!(bodies, vec![bytes::Bytes::from_static(b"b"), bytes::Bytes::from_static(b"a")]);
    }

    #[test]
    fn in_memory_log_fetch_missing_index_errors() {
        let log = InMemoryLog::new();
        assert!(matches!(
            log.fetch(&[LogIndex::new(1)]),
            Err(LogError::NotFound(index)) if index == LogIndex::new(1)
        ));
    }

    #[test]
    fn runtime_executes_monitor_and_dead_letter_effects() {
        let clock = SimClock::new(0);
        let log = InMemoryLog::new();
        let network = RecordingNetwork::new();
        let mut runtime = Runtime::new(clock, log, network);

        let pid = Pid::new(NodeId::new(1), 1);
        runtime.execute_effect(Effect::Monitor(MonitorTarget::Process(pid))).unwrap();
        runtime
            .execute_effect(Effect::DeadLetter {
                index: LogIndex::new(1),
                reason: DlxReason::Expired,
            })
            .unwrap();

        assert_eq!(runtime.network.monitored.len(), 1);
        assert_eq!(runtime.network.stats().monitors_armed, 1);
    }

    #[test]
    fn runtime_release_cursor_truncates_log() {
        let clock = SimClock::new(0);
        let log = InMemoryLog::new();
        let network = RecordingNetwork::new();
        let mut runtime = Runtime::new(clock, log, network);

        let dehydrated = crate::state::State::new(crate::config::QueueConfig::new("q", "r")).dehydrate();
        runtime
            .execute_effect(Effect::ReleaseCursor {
                index: LogIndex::new(42),
                dehydrated: Box::new(dehydrated),
            })
            .unwrap();

        assert_eq!(runtime.log.truncated_before(), Some(LogIndex::new(42)));
    }
}
