//! Graph module for deadlock detection
//!
//! - Wait-for graph: which processes are blocked on which other processes
//! - Builder: the lock table that owns and updates the wait-for graph
//! - Cycle detector: finds the circular waits that make up a deadlock

pub(crate) mod builder;
pub(crate) mod cycle;
pub(crate) mod wait_for_graph;

pub use builder::{Handoff, WaitForGraphBuilder, WaitOutcome};
pub use cycle::CycleDetector;
pub use wait_for_graph::WaitForGraph;
