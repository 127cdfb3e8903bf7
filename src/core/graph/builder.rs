//! Lock table that keeps the wait-for graph in step with lock ownership
//!
//! The builder is the only writer of the [`WaitForGraph`]. It holds, per lock,
//! the current holder and a FIFO queue of waiters, and derives the edge set
//! from them: every queued waiter has exactly one edge to the lock's holder.
//! Edges are added and removed in the same call that changes ownership, so the
//! graph never holds a stale edge.

use crate::core::error::GraphInconsistency;
use crate::core::graph::WaitForGraph;
use crate::core::types::{LockId, ProcessId};
use fxhash::FxHashMap;
use std::collections::VecDeque;

#[derive(Debug, Default, Clone)]
struct LockState {
    holder: Option<ProcessId>,
    waiters: VecDeque<ProcessId>,
    /// Bumped on every grant, starting at 1
    generation: u64,
}

/// Result of [`WaitForGraphBuilder::on_lock_wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The lock was free and now belongs to the caller
    Granted,
    /// The caller was queued behind the current holder
    Queued { holder: ProcessId },
}

/// A lock handed from one process to the next in its wait queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub lock: LockId,
    pub from: ProcessId,
    pub to: Option<ProcessId>,
}

#[derive(Debug, Default)]
pub struct WaitForGraphBuilder {
    graph: WaitForGraph,
    /// Locks are created on first use and kept for the builder's lifetime
    locks: FxHashMap<LockId, LockState>,
    /// The single lock each blocked process is queued on
    waiting_on: FxHashMap<ProcessId, LockId>,
    /// Locks held per process, in acquisition order
    holds: FxHashMap<ProcessId, Vec<LockId>>,
}

impl WaitForGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &WaitForGraph {
        &self.graph
    }

    pub fn add_process(&mut self, process: ProcessId) {
        self.graph.add_node(process);
    }

    pub fn contains_process(&self, process: ProcessId) -> bool {
        self.graph.contains(process)
    }

    pub fn holder(&self, lock: &LockId) -> Option<ProcessId> {
        self.locks.get(lock).and_then(|state| state.holder)
    }

    /// Current holder of `lock` together with the generation of its grant
    ///
    /// Every grant, immediate or handed over, gets a new generation, so a
    /// holder that released and re-acquired a lock can tell the two grants
    /// apart.
    pub fn grant(&self, lock: &LockId) -> Option<(ProcessId, u64)> {
        let state = self.locks.get(lock)?;
        state.holder.map(|holder| (holder, state.generation))
    }

    pub fn waiting_on(&self, process: ProcessId) -> Option<&LockId> {
        self.waiting_on.get(&process)
    }

    pub fn held_by(&self, process: ProcessId) -> &[LockId] {
        self.holds.get(&process).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Queued waiters of a lock, oldest first
    pub fn waiters(&self, lock: &LockId) -> Vec<ProcessId> {
        self.locks
            .get(lock)
            .map(|state| state.waiters.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Register that `process` wants `lock`
    ///
    /// A free lock is granted on the spot. A held lock queues the caller and
    /// adds the edge `process -> holder`. Asking for a lock the caller
    /// already holds queues it behind itself, which shows up as a self-loop.
    ///
    /// # Errors
    /// Fails for unregistered processes and for processes that are already
    /// queued on another lock.
    pub fn on_lock_wait(
        &mut self,
        process: ProcessId,
        lock: &LockId,
    ) -> Result<WaitOutcome, GraphInconsistency> {
        if !self.graph.contains(process) {
            return Err(GraphInconsistency::UnknownProcess(process));
        }
        if let Some(current) = self.waiting_on.get(&process) {
            return Err(GraphInconsistency::AlreadyWaiting {
                process,
                waiting_on: current.clone(),
                requested: lock.clone(),
            });
        }

        let state = self.locks.entry(lock.clone()).or_default();
        match state.holder {
            None => {
                state.holder = Some(process);
                state.generation += 1;
                self.holds.entry(process).or_default().push(lock.clone());
                Ok(WaitOutcome::Granted)
            }
            Some(holder) => {
                self.graph.add_edge(process, holder)?;
                state.waiters.push_back(process);
                self.waiting_on.insert(process, lock.clone());
                Ok(WaitOutcome::Queued { holder })
            }
        }
    }

    /// Register that `process` gave up `lock`
    ///
    /// Drops the edges the lock's waiters had towards `process`. If anyone is
    /// queued, the lock goes to the oldest waiter and the remaining waiters
    /// are re-pointed at the new holder.
    ///
    /// # Returns
    /// The process that now holds the lock, if any
    ///
    /// # Errors
    /// Fails if `process` does not hold `lock`.
    pub fn on_lock_release(
        &mut self,
        process: ProcessId,
        lock: &LockId,
    ) -> Result<Option<ProcessId>, GraphInconsistency> {
        let state = match self.locks.get_mut(lock) {
            Some(state) if state.holder == Some(process) => state,
            _ => {
                return Err(GraphInconsistency::NotHolder {
                    process,
                    lock: lock.clone(),
                });
            }
        };

        if let Some(held) = self.holds.get_mut(&process) {
            held.retain(|l| l != lock);
            if held.is_empty() {
                self.holds.remove(&process);
            }
        }

        for &waiter in &state.waiters {
            self.graph.remove_edge(waiter, process);
        }

        let next = state.waiters.pop_front();
        state.holder = next;
        if let Some(next) = next {
            state.generation += 1;
            self.waiting_on.remove(&next);
            self.holds.entry(next).or_default().push(lock.clone());
            for &waiter in &state.waiters {
                self.graph.add_edge(waiter, next)?;
            }
        }
        Ok(next)
    }

    /// Withdraw a queued wait (timeout or cancellation)
    ///
    /// # Returns
    /// The lock the process was queued on, if it was waiting at all
    pub fn cancel_wait(&mut self, process: ProcessId) -> Option<LockId> {
        let lock = self.waiting_on.remove(&process)?;
        if let Some(state) = self.locks.get_mut(&lock) {
            state.waiters.retain(|&w| w != process);
        }
        self.graph.clear_wait_edges(process);
        Some(lock)
    }

    /// Withdraw every queued wait at once
    ///
    /// Leaves holders in place. Afterwards the graph has no edges and a
    /// release can no longer hand a lock to anyone.
    ///
    /// # Returns
    /// The processes whose waits were withdrawn, in ascending order
    pub fn cancel_all_waits(&mut self) -> Vec<ProcessId> {
        let mut waiting: Vec<ProcessId> = self.waiting_on.keys().copied().collect();
        waiting.sort_unstable();
        for &process in &waiting {
            self.cancel_wait(process);
        }
        waiting
    }

    /// Remove a terminated process
    ///
    /// Cancels its wait and releases every lock it held, handing each one to
    /// the next waiter in line.
    pub fn remove_process(&mut self, process: ProcessId) -> Vec<Handoff> {
        self.cancel_wait(process);

        let held = self.holds.get(&process).cloned().unwrap_or_default();
        let mut handoffs = Vec::with_capacity(held.len());
        for lock in held {
            if let Ok(to) = self.on_lock_release(process, &lock) {
                handoffs.push(Handoff {
                    lock,
                    from: process,
                    to,
                });
            }
        }

        self.graph.remove_node(process);
        handoffs
    }

    /// Verify that the edge set matches lock ownership exactly
    ///
    /// # Errors
    /// Returns the first mismatch found.
    pub fn check_invariants(&self) -> Result<(), GraphInconsistency> {
        let mut expected = Vec::new();
        for (&waiter, lock) in &self.waiting_on {
            let holder = self.holder(lock).ok_or(GraphInconsistency::DanglingEdge {
                from: waiter,
                to: waiter,
            })?;
            expected.push((waiter, holder));
        }
        expected.sort_unstable();
        expected.dedup();

        let actual = self.graph.edges();
        if let Some(&(from, to)) = actual.iter().find(|edge| !expected.contains(edge)) {
            return Err(GraphInconsistency::DanglingEdge { from, to });
        }
        if let Some(&(from, to)) = expected.iter().find(|edge| !actual.contains(edge)) {
            return Err(GraphInconsistency::DanglingEdge { from, to });
        }
        Ok(())
    }
}
