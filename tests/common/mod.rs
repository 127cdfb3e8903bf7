use ipcsync::{
    Cadence, DeadlockAlert, DiagnosticsConfig, DiagnosticsEngine, ProcessId, RangeMs,
    WorkerConfig,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[allow(dead_code)]
pub const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(3);
#[allow(dead_code)]
pub const NO_DEADLOCK_TIMEOUT: Duration = Duration::from_millis(500);
/// Upper bound for a blocked call to return after being released
#[allow(dead_code)]
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine with `processes` registered and the given detection cadence
#[allow(dead_code)]
pub fn start_engine(processes: usize, cadence: Cadence) -> Arc<DiagnosticsEngine> {
    let engine = Arc::new(DiagnosticsEngine::new(DiagnosticsConfig {
        cadence,
        ..DiagnosticsConfig::default()
    }));
    for p in 0..processes {
        engine.on_process_started(p);
    }
    engine
}

#[allow(dead_code)]
pub fn on_event_engine(processes: usize) -> Arc<DiagnosticsEngine> {
    start_engine(processes, Cadence::OnEvent)
}

/// Poll `cond` until it holds or `timeout` passes
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Block until `process` is queued on some lock
#[allow(dead_code)]
pub fn wait_until_queued(engine: &DiagnosticsEngine, process: ProcessId) {
    assert!(
        wait_until(PROMPT_TIMEOUT, || engine.waiting_on(process).is_some()),
        "P{process} never started waiting"
    );
}

#[allow(dead_code)]
pub fn expect_alerts(engine: &DiagnosticsEngine, timeout: Duration) -> Vec<DeadlockAlert> {
    if wait_until(timeout, || !engine.current_alerts().is_empty()) {
        engine.current_alerts()
    } else {
        panic!("No deadlock detected within {timeout:?}");
    }
}

#[allow(dead_code)]
pub fn assert_no_alerts(engine: &DiagnosticsEngine, timeout: Duration) {
    let raised = wait_until(timeout, || engine.alerts_raised() > 0);
    assert!(!raised, "Unexpected deadlock detected");
    assert!(engine.current_alerts().is_empty());
    assert!(engine.frozen_processes().is_empty());
}

/// Worker timing tight enough for sub-second runs
#[allow(dead_code)]
pub fn fast_worker() -> WorkerConfig {
    WorkerConfig {
        send_interval_ms: RangeMs::new(5, 25),
        work_delay_ms: RangeMs::new(0, 3),
        recv_poll_ms: 5,
    }
}
