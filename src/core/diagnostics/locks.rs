use crate::core::diagnostics::{DiagnosticsEngine, EngineState};
use crate::core::error::{GraphInconsistency, LockError};
use crate::core::graph::WaitOutcome;
use crate::core::timeline::TimelineKind;
use crate::core::types::{LockId, ProcessId};
use std::time::{Duration, Instant};

/// Ownership of a tracked lock, released when dropped
///
/// Dropping the guard reports the release to the engine, which hands the
/// lock to the next queued waiter. If the grant the guard stands for is gone
/// (manual release, process termination, even when the same process has
/// since re-acquired the lock) the drop does nothing.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    engine: &'a DiagnosticsEngine,
    process: ProcessId,
    lock: LockId,
    generation: u64,
}

impl LockGuard<'_> {
    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.engine
            .release_quiet(self.process, &self.lock, self.generation);
    }
}

impl DiagnosticsEngine {
    /// Acquire `lock` for `process`, waiting at most the configured lock
    /// timeout
    ///
    /// # Errors
    /// See [`DiagnosticsEngine::acquire_timeout`].
    pub fn acquire(
        &self,
        process: ProcessId,
        lock: impl Into<LockId>,
    ) -> Result<LockGuard<'_>, LockError> {
        self.acquire_timeout(process, lock, self.config.lock_timeout())
    }

    /// Acquire `lock` for `process`
    ///
    /// A free lock is granted immediately. Otherwise the process is queued
    /// behind the holder (adding a wait-for edge) and blocks until the lock
    /// is handed to it. Waiters are served strictly first come, first served.
    ///
    /// # Arguments
    /// * `process` - Registered process asking for the lock
    /// * `lock` - Lock name; locks are created on first use
    /// * `timeout` - Maximum wait, `None` to wait until granted or cancelled
    ///
    /// # Errors
    /// * [`LockError::Timeout`] when `timeout` expires first; the give-up is
    ///   written to the timeline
    /// * [`LockError::Cancelled`] when the engine shuts down or the process
    ///   is terminated while waiting
    /// * [`LockError::Inconsistent`] for an unregistered process or a process
    ///   that is already waiting; the engine enters degraded mode
    pub fn acquire_timeout(
        &self,
        process: ProcessId,
        lock: impl Into<LockId>,
        timeout: Option<Duration>,
    ) -> Result<LockGuard<'_>, LockError> {
        let lock = lock.into();
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);

        match self.acquire_until(process, lock.clone(), deadline)? {
            Some(guard) => Ok(guard),
            None => {
                let waited = started.elapsed();
                self.timeline.push(
                    Some(process),
                    TimelineKind::LockTimeout,
                    format!("P{process} gave up on {lock} after {waited:?}"),
                );
                Err(LockError::Timeout {
                    process,
                    lock,
                    waited,
                })
            }
        }
    }

    /// Acquire `lock` unless `deadline` passes first
    ///
    /// Used by callers polling with their own deadline: when it passes, the
    /// wait is withdrawn without being reported as a lock timeout.
    ///
    /// # Returns
    /// `Ok(None)` if the deadline passed before the lock was handed over
    ///
    /// # Errors
    /// Same as [`DiagnosticsEngine::acquire_timeout`], minus the timeout.
    pub(crate) fn acquire_until(
        &self,
        process: ProcessId,
        lock: LockId,
        deadline: Option<Instant>,
    ) -> Result<Option<LockGuard<'_>>, LockError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(LockError::Cancelled);
        }

        match state.builder.on_lock_wait(process, &lock) {
            Ok(WaitOutcome::Granted) => {
                self.timeline.push(
                    Some(process),
                    TimelineKind::LockGrant,
                    format!("P{process} acquired {lock}"),
                );
                self.granted.notify_all();
                return Ok(Some(self.guard(&state, process, lock)));
            }
            Ok(WaitOutcome::Queued { holder }) => {
                self.timeline.push(
                    Some(process),
                    TimelineKind::LockWait,
                    format!("P{process} waiting for {lock} held by P{holder}"),
                );
                self.after_lock_event(&mut state);
            }
            Err(e) => {
                self.degrade_locked(&mut state, e.clone());
                return Err(e.into());
            }
        }

        loop {
            // Shutdown withdraws every queued wait, so a grant seen here
            // was handed over before the engine stopped
            if state.builder.holder(&lock) == Some(process)
                && state.builder.waiting_on(process).is_none()
            {
                return Ok(Some(self.guard(&state, process, lock)));
            }

            if state.stopped || !state.builder.contains_process(process) {
                state.builder.cancel_wait(process);
                self.after_lock_event(&mut state);
                return Err(LockError::Cancelled);
            }

            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    state.builder.cancel_wait(process);
                    self.after_lock_event(&mut state);
                    return Ok(None);
                }
                Some(deadline) => {
                    self.granted.wait_until(&mut state, deadline);
                }
                None => self.granted.wait(&mut state),
            }
        }
    }

    /// Release `lock` on behalf of `process`
    ///
    /// Used for external intervention: the lock goes to the next waiter even
    /// though the holder's guard is still alive. The guard's own drop then
    /// becomes a no-op.
    ///
    /// # Errors
    /// [`LockError::Inconsistent`] if `process` does not hold `lock`. The
    /// engine enters degraded mode.
    pub fn release(&self, process: ProcessId, lock: &LockId) -> Result<(), LockError> {
        let mut state = self.state.lock();
        match self.release_locked(&mut state, process, lock) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.degrade_locked(&mut state, e.clone());
                Err(e.into())
            }
        }
    }

    /// Release from a guard drop; skipped unless the guard's grant is still
    /// the current one
    fn release_quiet(&self, process: ProcessId, lock: &LockId, generation: u64) {
        let mut state = self.state.lock();
        if state.builder.grant(lock) != Some((process, generation)) {
            return;
        }
        if let Err(e) = self.release_locked(&mut state, process, lock) {
            self.degrade_locked(&mut state, e);
        }
    }

    fn release_locked(
        &self,
        state: &mut EngineState,
        process: ProcessId,
        lock: &LockId,
    ) -> Result<(), GraphInconsistency> {
        let next = state.builder.on_lock_release(process, lock)?;
        self.log_handoff(process, lock, next);
        self.granted.notify_all();
        self.after_lock_event(state);
        Ok(())
    }

    pub(super) fn log_handoff(&self, from: ProcessId, lock: &LockId, to: Option<ProcessId>) {
        self.timeline.push(
            Some(from),
            TimelineKind::LockRelease,
            format!("P{from} released {lock}"),
        );
        if let Some(to) = to {
            self.timeline.push(
                Some(to),
                TimelineKind::LockGrant,
                format!("P{to} acquired {lock}"),
            );
        }
    }

    fn guard(&self, state: &EngineState, process: ProcessId, lock: LockId) -> LockGuard<'_> {
        // Generations start at 1, so 0 never matches a live grant
        let generation = state.builder.grant(&lock).map_or(0, |(_, g)| g);
        LockGuard {
            engine: self,
            process,
            lock,
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::{Cadence, DiagnosticsConfig};
    use crate::core::diagnostics::DiagnosticsEngine;
    use crate::core::error::LockError;
    use crate::core::timeline::TimelineKind;
    use crate::core::types::{LockId, ProcessState};
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn engine(processes: usize) -> Arc<DiagnosticsEngine> {
        let engine = Arc::new(DiagnosticsEngine::new(DiagnosticsConfig {
            cadence: Cadence::OnEvent,
            ..DiagnosticsConfig::default()
        }));
        for p in 0..processes {
            engine.on_process_started(p);
        }
        engine
    }

    #[test]
    fn test_guard_drop_releases() {
        let engine = engine(1);
        let lock = LockId::new("a");
        {
            let guard = engine.acquire(0, lock.clone()).unwrap();
            assert_eq!(guard.process(), 0);
            assert_eq!(engine.holder(&lock), Some(0));
        }
        assert_eq!(engine.holder(&lock), None);
    }

    #[test]
    fn test_waiters_are_granted_in_arrival_order() {
        let engine = engine(4);
        let first = engine.acquire(0, "a").unwrap();

        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for p in 1..4 {
            let e = Arc::clone(&engine);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let _guard = e.acquire(p, "a").unwrap();
                tx.send(p).unwrap();
            }));
            // Queue each waiter before starting the next
            while engine.waiting_on(p).is_none() {
                thread::sleep(Duration::from_millis(1));
            }
        }

        assert_eq!(engine.process_state(2), Some(ProcessState::Blocked));
        drop(first);
        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_timeout_withdraws_the_wait() {
        let engine = engine(2);
        let _held = engine.acquire(0, "a").unwrap();

        let result = engine.acquire_timeout(1, "a", Some(Duration::from_millis(30)));
        assert!(matches!(
            result,
            Err(LockError::Timeout { process: 1, .. })
        ));
        assert_eq!(engine.waiting_on(1), None);
        assert_eq!(engine.graph_snapshot().edge_count(), 0);
    }

    #[test]
    fn test_shutdown_cancels_waiters() {
        let engine = engine(2);
        let _held = engine.acquire(0, "a").unwrap();

        let e = Arc::clone(&engine);
        let handle = thread::spawn(move || e.acquire(1, "a").map(|_| ()));
        while engine.waiting_on(1).is_none() {
            thread::sleep(Duration::from_millis(1));
        }

        engine.shutdown();
        assert_eq!(handle.join().unwrap(), Err(LockError::Cancelled));
        assert!(matches!(engine.acquire(0, "b"), Err(LockError::Cancelled)));
    }

    #[test]
    fn test_manual_release_hands_lock_over() {
        let engine = engine(2);
        let held = engine.acquire(0, "a").unwrap();

        let e = Arc::clone(&engine);
        let handle = thread::spawn(move || e.acquire(1, "a").map(|g| g.process()));
        while engine.waiting_on(1).is_none() {
            thread::sleep(Duration::from_millis(1));
        }

        engine.release(0, &LockId::new("a")).unwrap();
        assert_eq!(handle.join().unwrap(), Ok(1));
        // Holder's guard no longer owns the lock
        drop(held);
        assert!(!engine.is_degraded());
    }

    #[test]
    fn test_stale_guard_leaves_reacquired_lock_alone() {
        let engine = engine(1);
        let lock = LockId::new("a");

        let stale = engine.acquire(0, lock.clone()).unwrap();
        engine.release(0, &lock).unwrap();
        let fresh = engine.acquire(0, lock.clone()).unwrap();

        drop(stale);
        assert_eq!(engine.holder(&lock), Some(0));
        drop(fresh);
        assert_eq!(engine.holder(&lock), None);
        assert!(!engine.is_degraded());
    }

    #[test]
    fn test_deadline_withdraws_quietly() {
        let engine = engine(2);
        let _held = engine.acquire(0, "a").unwrap();

        let deadline = Instant::now() + Duration::from_millis(20);
        let got = engine.acquire_until(1, LockId::new("a"), Some(deadline));
        assert!(matches!(got, Ok(None)));
        assert_eq!(engine.waiting_on(1), None);
        assert_eq!(engine.timeline().count(TimelineKind::LockTimeout), 0);

        let timed = engine.acquire_timeout(1, "a", Some(Duration::from_millis(20)));
        assert!(matches!(timed, Err(LockError::Timeout { process: 1, .. })));
        assert_eq!(engine.timeline().count(TimelineKind::LockTimeout), 1);
    }
}
