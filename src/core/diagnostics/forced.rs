use crate::core::diagnostics::DiagnosticsEngine;
use crate::core::error::LockError;
use crate::core::timeline::TimelineKind;
use crate::core::types::{LockId, ProcessId};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Name of the `index`-th lock used by the forced-deadlock drill
pub fn drill_lock(index: usize) -> LockId {
    LockId::new(format!("drill-{index}"))
}

impl DiagnosticsEngine {
    /// Toggle the forced-deadlock demonstration mode
    pub fn force_deadlock(&self, enabled: bool) {
        let previous = self.force_deadlock.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            let text = if enabled {
                "Deadlock mode ON"
            } else {
                "Deadlock mode OFF"
            };
            self.timeline.push(None, TimelineKind::ForceDeadlock, text);
        }
    }

    pub fn is_force_deadlock(&self) -> bool {
        self.force_deadlock.load(Ordering::SeqCst)
    }

    /// Play `process`'s part in a guaranteed lock-ordering deadlock
    ///
    /// Participant `i` of `k` takes `drill-i`, waits until every participant
    /// holds its own drill lock, then asks for `drill-(i+1 mod k)`. Once all
    /// participants are queued the wait-for graph holds exactly one cycle
    /// through all of them. The call then blocks like any deadlocked process:
    /// until the engine shuts down, the process is terminated, a lock is
    /// released by hand, or the configured lock timeout expires.
    ///
    /// Does nothing if `process` is not among `participants` or there are
    /// fewer than two participants.
    ///
    /// # Errors
    /// Whatever [`DiagnosticsEngine::acquire`] returns for either lock, and
    /// [`LockError::Cancelled`] if the engine stops while the participants
    /// are lining up.
    pub fn drive_forced_deadlock(
        &self,
        process: ProcessId,
        participants: &[ProcessId],
    ) -> Result<(), LockError> {
        let k = participants.len();
        let Some(index) = participants.iter().position(|&p| p == process) else {
            return Ok(());
        };
        if k < 2 {
            return Ok(());
        }

        let own = drill_lock(index);
        let next = drill_lock((index + 1) % k);
        let _first = self.acquire(process, own.clone())?;

        {
            let mut state = self.state.lock();
            loop {
                if state.stopped || !state.builder.contains_process(process) {
                    return Err(LockError::Cancelled);
                }
                let lined_up = participants
                    .iter()
                    .enumerate()
                    .all(|(j, &p)| state.builder.holder(&drill_lock(j)) == Some(p));
                if lined_up {
                    break;
                }
                self.granted.wait_for(&mut state, Duration::from_millis(50));
            }
        }

        self.timeline.push(
            Some(process),
            TimelineKind::ForceDeadlock,
            format!("P{process} holds {own}, requesting {next}"),
        );
        let _second = self.acquire(process, next)?;
        Ok(())
    }
}
