//! Diagnostics engine
//!
//! The engine owns the lock table and the wait-for graph. Channels and
//! workers only report events into it (lock wait, release, process start and
//! termination); every mutation happens under the engine's state lock, which
//! also gives cycle detection a stable snapshot.
//!
//! Detection runs either right after each lock event or from a background
//! monitor, depending on [`Cadence`](crate::Cadence). Results are kept as the
//! current alert list and the frozen process set, and transitions are
//! published to subscribers as [`DiagnosticsEvent`]s.

mod forced;
mod lifecycle;
mod locks;
mod monitor;

pub use forced::drill_lock;
pub use locks::LockGuard;
pub use monitor::Monitor;

use crate::core::config::{Cadence, DiagnosticsConfig};
use crate::core::error::GraphInconsistency;
use crate::core::graph::{CycleDetector, WaitForGraph, WaitForGraphBuilder};
use crate::core::logger::EventLogger;
use crate::core::telemetry::Telemetry;
use crate::core::timeline::{Timeline, TimelineKind};
use crate::core::types::{DeadlockAlert, LockId, ProcessId, ProcessState};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use fxhash::FxHashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

/// Notification pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticsEvent {
    /// The alert list went from empty to non-empty
    AlertRaised(Vec<DeadlockAlert>),
    /// The last alert went away
    AlertCleared,
    /// Detection was paused after an internal inconsistency
    Degraded(String),
}

/// Mutable engine state, guarded by a single mutex
#[derive(Debug)]
struct EngineState {
    builder: WaitForGraphBuilder,
    detector: CycleDetector,
    alerts: Vec<DeadlockAlert>,
    frozen: BTreeSet<ProcessId>,
    degraded: Option<GraphInconsistency>,
    /// Last channel activity per live process
    last_access: FxHashMap<ProcessId, Instant>,
    /// Set by shutdown; pending lock waits resolve to `Cancelled`
    stopped: bool,
    alerts_raised: u64,
}

/// Owner of the wait-for graph, the alert state and the telemetry
pub struct DiagnosticsEngine {
    config: DiagnosticsConfig,
    state: Mutex<EngineState>,
    /// Signalled on every lock handoff, cancellation and shutdown
    granted: Condvar,
    telemetry: Arc<Telemetry>,
    timeline: Timeline,
    subscribers: Mutex<Vec<Sender<DiagnosticsEvent>>>,
    force_deadlock: AtomicBool,
}

impl DiagnosticsEngine {
    /// Create an engine with an in-memory timeline
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self::with_timeline(config, Timeline::new())
    }

    /// Create an engine whose timeline is also written to `logger`
    pub fn with_logger(config: DiagnosticsConfig, logger: EventLogger) -> Self {
        Self::with_timeline(config, Timeline::with_logger(logger))
    }

    fn with_timeline(config: DiagnosticsConfig, timeline: Timeline) -> Self {
        DiagnosticsEngine {
            telemetry: Arc::new(Telemetry::new(config.telemetry_window())),
            config,
            state: Mutex::new(EngineState {
                builder: WaitForGraphBuilder::new(),
                detector: CycleDetector::new(),
                alerts: Vec::new(),
                frozen: BTreeSet::new(),
                degraded: None,
                last_access: FxHashMap::default(),
                stopped: false,
                alerts_raised: 0,
            }),
            granted: Condvar::new(),
            timeline,
            subscribers: Mutex::new(Vec::new()),
            force_deadlock: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// Messages per second over the telemetry window
    pub fn throughput(&self) -> f64 {
        self.telemetry.throughput()
    }

    /// Average transfer latency over the telemetry window
    pub fn latency(&self) -> Duration {
        self.telemetry.latency()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Active deadlock alerts, ordered by their lowest process id
    pub fn current_alerts(&self) -> Vec<DeadlockAlert> {
        self.state.lock().alerts.clone()
    }

    /// Every process taking part in an active cycle
    pub fn frozen_processes(&self) -> BTreeSet<ProcessId> {
        self.state.lock().frozen.clone()
    }

    /// Number of distinct alerts raised since the engine was created
    pub fn alerts_raised(&self) -> u64 {
        self.state.lock().alerts_raised
    }

    pub fn is_degraded(&self) -> bool {
        self.state.lock().degraded.is_some()
    }

    /// The inconsistency that paused detection, if any
    pub fn degraded_reason(&self) -> Option<GraphInconsistency> {
        self.state.lock().degraded.clone()
    }

    /// Register for alert and degraded-mode notifications
    ///
    /// Receivers that are dropped are pruned on the next publish.
    pub fn subscribe(&self) -> Receiver<DiagnosticsEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// State of one process, `None` if it is not registered
    pub fn process_state(&self, process: ProcessId) -> Option<ProcessState> {
        let state = self.state.lock();
        Self::state_of(&state, process)
    }

    /// State of every registered process
    pub fn process_states(&self) -> BTreeMap<ProcessId, ProcessState> {
        let state = self.state.lock();
        state
            .builder
            .graph()
            .node_ids()
            .filter_map(|p| Self::state_of(&state, p).map(|s| (p, s)))
            .collect()
    }

    fn state_of(state: &EngineState, process: ProcessId) -> Option<ProcessState> {
        if !state.builder.contains_process(process) {
            return None;
        }
        Some(if state.frozen.contains(&process) {
            ProcessState::Frozen
        } else if state.builder.waiting_on(process).is_some() {
            ProcessState::Blocked
        } else {
            ProcessState::Running
        })
    }

    /// Copy of the current wait-for graph
    pub fn graph_snapshot(&self) -> WaitForGraph {
        self.state.lock().builder.graph().clone()
    }

    /// Current holder of `lock`
    pub fn holder(&self, lock: &LockId) -> Option<ProcessId> {
        self.state.lock().builder.holder(lock)
    }

    /// Lock `process` is queued on, if any
    pub fn waiting_on(&self, process: ProcessId) -> Option<LockId> {
        self.state.lock().builder.waiting_on(process).cloned()
    }

    /// Mark channel activity for `process`
    pub fn record_access(&self, process: ProcessId) {
        self.state.lock().last_access.insert(process, Instant::now());
    }

    /// Registered processes with no channel activity for longer than the
    /// idle threshold, in ascending order
    pub fn idle_processes(&self) -> Vec<ProcessId> {
        self.idle_processes_at(Instant::now())
    }

    pub(crate) fn idle_processes_at(&self, now: Instant) -> Vec<ProcessId> {
        let threshold = self.config.idle_threshold();
        let state = self.state.lock();
        let mut idle: Vec<ProcessId> = state
            .last_access
            .iter()
            .filter(|&(&p, &last)| {
                state.builder.contains_process(p) && now.saturating_duration_since(last) > threshold
            })
            .map(|(&p, _)| p)
            .collect();
        idle.sort_unstable();
        idle
    }

    /// One-line bottleneck report, e.g. `Idle: P1, P3`
    pub fn bottleneck_summary(&self) -> String {
        let idle = self.idle_processes();
        if idle.is_empty() {
            "No bottlenecks".to_string()
        } else {
            let names: Vec<String> = idle.iter().map(|p| format!("P{p}")).collect();
            format!("Idle: {}", names.join(", "))
        }
    }

    /// Append a free-form line to the timeline
    pub fn note(&self, process: Option<ProcessId>, text: impl Into<String>) {
        self.timeline.push(process, TimelineKind::Info, text);
    }

    /// Run cycle detection now and reconcile the alert list
    ///
    /// # Returns
    /// The active alerts after this run
    pub fn evaluate(&self) -> Vec<DeadlockAlert> {
        let mut state = self.state.lock();
        self.evaluate_locked(&mut state);
        state.alerts.clone()
    }

    /// Evaluate right away when configured for on-event detection
    fn after_lock_event(&self, state: &mut EngineState) {
        if self.config.cadence == Cadence::OnEvent {
            self.evaluate_locked(state);
        }
    }

    /// Detect cycles and update alerts, frozen set and subscribers
    ///
    /// An alert whose cycle is still present is kept as is, so its
    /// detection time does not move. Skipped entirely in degraded mode.
    fn evaluate_locked(&self, state: &mut EngineState) {
        if state.degraded.is_some() {
            return;
        }
        let cycles = match state.detector.detect(state.builder.graph()) {
            Ok(cycles) => cycles,
            Err(e) => {
                self.degrade_locked(state, e);
                return;
            }
        };

        let had_alerts = !state.alerts.is_empty();
        let mut next = Vec::with_capacity(cycles.len());
        let mut fresh = 0;
        for cycle in cycles {
            if let Some(existing) = state.alerts.iter().find(|a| a.cycle == cycle) {
                next.push(existing.clone());
                continue;
            }
            let waiting_for = cycle
                .iter()
                .filter_map(|&p| state.builder.waiting_on(p).map(|lock| (p, lock.clone())))
                .collect();
            let alert = DeadlockAlert {
                cycle,
                waiting_for,
                detected_at: Utc::now(),
            };
            self.timeline
                .push(None, TimelineKind::AlertRaised, alert.to_string());
            next.push(alert);
            fresh += 1;
        }

        state.alerts_raised += fresh;
        state.frozen = next
            .iter()
            .flat_map(|a| a.cycle.iter().copied())
            .collect();
        state.alerts = next;

        match (had_alerts, state.alerts.is_empty()) {
            (false, false) => self.publish(DiagnosticsEvent::AlertRaised(state.alerts.clone())),
            (true, true) => {
                self.timeline
                    .push(None, TimelineKind::AlertCleared, "Deadlock cleared");
                self.publish(DiagnosticsEvent::AlertCleared);
            }
            _ => {}
        }
    }

    /// Pause detection after an inconsistency; the last alerts stay
    fn degrade_locked(&self, state: &mut EngineState, error: GraphInconsistency) {
        if state.degraded.is_some() {
            return;
        }
        let reason = error.to_string();
        self.timeline.push(
            None,
            TimelineKind::Degraded,
            format!("Diagnostics degraded: {reason}"),
        );
        state.degraded = Some(error);
        self.publish(DiagnosticsEvent::Degraded(reason));
    }

    fn publish(&self, event: DiagnosticsEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_event_engine(processes: usize) -> DiagnosticsEngine {
        let config = DiagnosticsConfig {
            cadence: Cadence::OnEvent,
            ..DiagnosticsConfig::default()
        };
        let engine = DiagnosticsEngine::new(config);
        for p in 0..processes {
            engine.on_process_started(p);
        }
        engine
    }

    #[test]
    fn test_fresh_engine_is_quiet() {
        let engine = on_event_engine(3);
        assert!(engine.evaluate().is_empty());
        assert!(engine.frozen_processes().is_empty());
        assert_eq!(engine.process_state(1), Some(ProcessState::Running));
        assert_eq!(engine.process_state(9), None);
        assert!(!engine.is_degraded());
    }

    #[test]
    fn test_idle_processes_and_summary() {
        let config = DiagnosticsConfig {
            idle_threshold_ms: 50,
            ..DiagnosticsConfig::default()
        };
        let engine = DiagnosticsEngine::new(config);
        for p in 0..4 {
            engine.on_process_started(p);
        }
        assert!(engine.idle_processes().is_empty());
        assert_eq!(engine.bottleneck_summary(), "No bottlenecks");

        let later = Instant::now() + Duration::from_millis(100);
        assert_eq!(engine.idle_processes_at(later), vec![0, 1, 2, 3]);

        std::thread::sleep(Duration::from_millis(60));
        engine.record_access(0);
        engine.record_access(2);
        assert_eq!(engine.idle_processes(), vec![1, 3]);
        assert_eq!(engine.bottleneck_summary(), "Idle: P1, P3");
    }

    #[test]
    fn test_subscribers_see_raise_and_clear_once() {
        let engine = on_event_engine(2);
        let events = engine.subscribe();

        let a = engine.acquire(0, "a").unwrap();
        let b = engine.acquire(1, "b").unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                let _ = engine.acquire_timeout(0, "b", Some(Duration::from_millis(300)));
            });
            s.spawn(|| {
                let _ = engine.acquire_timeout(1, "a", Some(Duration::from_millis(300)));
            });

            let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
            match event {
                DiagnosticsEvent::AlertRaised(alerts) => {
                    assert_eq!(alerts.len(), 1);
                    assert_eq!(alerts[0].cycle, vec![0, 1]);
                }
                other => panic!("unexpected event {other:?}"),
            }
            assert_eq!(engine.frozen_processes(), BTreeSet::from([0, 1]));
            assert_eq!(engine.process_state(0), Some(ProcessState::Frozen));
        });

        // Both waits timed out, which removed the edges
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)),
            Ok(DiagnosticsEvent::AlertCleared)
        );
        assert!(events.try_recv().is_err());
        assert_eq!(engine.alerts_raised(), 1);
        drop(a);
        drop(b);
    }

    #[test]
    fn test_degraded_mode_keeps_last_alerts() {
        let engine = on_event_engine(2);
        let events = engine.subscribe();

        assert!(engine.release(0, &LockId::new("never-held")).is_err());
        assert!(engine.is_degraded());
        assert!(matches!(
            engine.degraded_reason(),
            Some(GraphInconsistency::NotHolder { process: 0, .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(DiagnosticsEvent::Degraded(_))
        ));
        assert!(engine.evaluate().is_empty());
    }
}
