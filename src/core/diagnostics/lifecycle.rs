use crate::core::diagnostics::DiagnosticsEngine;
use crate::core::timeline::TimelineKind;
use crate::core::types::ProcessId;
use std::time::Instant;

impl DiagnosticsEngine {
    /// Register a process so it can take part in lock traffic
    pub fn on_process_started(&self, process: ProcessId) {
        let mut state = self.state.lock();
        state.builder.add_process(process);
        state.last_access.insert(process, Instant::now());
        self.timeline.push(
            Some(process),
            TimelineKind::ProcessStarted,
            format!("P{process} started"),
        );
    }

    /// Remove a process
    ///
    /// Its pending wait is cancelled and every lock it holds is handed to the
    /// next waiter, so any cycle through it is broken. Detection runs right
    /// away so the alert goes without waiting for the next poll.
    pub fn on_process_terminated(&self, process: ProcessId) {
        let mut state = self.state.lock();
        if !state.builder.contains_process(process) {
            return;
        }

        let handoffs = state.builder.remove_process(process);
        state.last_access.remove(&process);
        for handoff in &handoffs {
            self.log_handoff(handoff.from, &handoff.lock, handoff.to);
        }
        self.timeline.push(
            Some(process),
            TimelineKind::ProcessTerminated,
            format!("P{process} terminated"),
        );

        self.granted.notify_all();
        self.evaluate_locked(&mut state);
    }

    /// Stop the engine: every pending and future lock wait is cancelled
    ///
    /// Queued waits are withdrawn on the spot, so a lock released during
    /// teardown goes back to free instead of being handed to a waiter that is
    /// about to see `Cancelled`. Releases still go through, so guards dropped
    /// during teardown keep the lock table consistent.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        state.builder.cancel_all_waits();
        self.granted.notify_all();
        self.timeline
            .push(None, TimelineKind::Info, "Diagnostics stopped");
        self.after_lock_event(&mut state);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::DiagnosticsConfig;
    use crate::core::diagnostics::DiagnosticsEngine;
    use crate::core::error::LockError;
    use crate::core::types::LockId;
    use crate::core::timeline::TimelineKind;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_termination_hands_locks_to_waiters() {
        let engine = Arc::new(DiagnosticsEngine::new(DiagnosticsConfig::default()));
        engine.on_process_started(0);
        engine.on_process_started(1);

        let held = engine.acquire(0, "a").unwrap();
        let e = Arc::clone(&engine);
        let handle = thread::spawn(move || e.acquire(1, "a").map(|g| g.process()));
        while engine.waiting_on(1).is_none() {
            thread::sleep(Duration::from_millis(1));
        }

        engine.on_process_terminated(0);
        assert_eq!(handle.join().unwrap(), Ok(1));
        assert_eq!(engine.process_state(0), None);
        drop(held);
        assert_eq!(engine.holder(&LockId::new("a")), None);
    }

    #[test]
    fn test_terminated_waiter_is_cancelled() {
        let engine = Arc::new(DiagnosticsEngine::new(DiagnosticsConfig::default()));
        engine.on_process_started(0);
        engine.on_process_started(1);

        let _held = engine.acquire(0, "a").unwrap();
        let e = Arc::clone(&engine);
        let handle = thread::spawn(move || e.acquire(1, "a").map(|_| ()));
        while engine.waiting_on(1).is_none() {
            thread::sleep(Duration::from_millis(1));
        }

        engine.on_process_terminated(1);
        assert_eq!(handle.join().unwrap(), Err(LockError::Cancelled));
        assert_eq!(engine.graph_snapshot().edge_count(), 0);
    }

    #[test]
    fn test_shutdown_releases_never_reach_cancelled_waiters() {
        let engine = Arc::new(DiagnosticsEngine::new(DiagnosticsConfig::default()));
        engine.on_process_started(0);
        engine.on_process_started(1);
        let barrier = Arc::new(Barrier::new(2));

        // Classic two-lock cycle; both sides must come back Cancelled
        let handles: Vec<_> = [(0, "a", "b"), (1, "b", "a")]
            .into_iter()
            .map(|(p, first, second)| {
                let e = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let _first = e.acquire(p, first)?;
                    barrier.wait();
                    let _second = e.acquire(p, second)?;
                    Ok::<(), LockError>(())
                })
            })
            .collect();
        while engine.waiting_on(0).is_none() || engine.waiting_on(1).is_none() {
            thread::sleep(Duration::from_millis(1));
        }

        engine.shutdown();
        assert_eq!(engine.graph_snapshot().edge_count(), 0);
        for h in handles {
            assert_eq!(h.join().unwrap(), Err(LockError::Cancelled));
        }
        assert_eq!(engine.holder(&LockId::new("a")), None);
        assert_eq!(engine.holder(&LockId::new("b")), None);

        // Nothing was granted after the stop line
        let events = engine.timeline().snapshot();
        let stopped = events
            .iter()
            .position(|e| e.text == "Diagnostics stopped")
            .unwrap();
        assert!(
            events[stopped..]
                .iter()
                .all(|e| e.kind != TimelineKind::LockGrant)
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = DiagnosticsEngine::new(DiagnosticsConfig::default());
        engine.shutdown();
        engine.shutdown();
        assert!(engine.is_stopped());
    }
}
