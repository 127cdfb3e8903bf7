//! # ipcsync
//!
//! An inter-process communication simulator with live deadlock diagnostics.
//!
//! Simulated processes exchange messages over one of three channel
//! transports and contend for named locks. A diagnostics engine keeps a
//! wait-for graph in step with lock ownership, finds cycles in it, and
//! reports them as deadlock alerts.
//!
//! ## Features
//!
//! - [`Pipe`], [`Queue`] and [`SharedBuffer`] channels with one contract
//! - FIFO lock grants tracked as wait-for edges
//! - Cycle detection on every lock event or on a polling interval
//! - Rolling throughput and latency telemetry
//! - Append-only timeline, optionally streamed to a JSON-lines file
//! - Forced-deadlock drill for demonstrations
//! - Headless [`sim::Simulation`] harness and `ipcsync` CLI
//!
//! ## Example
//!
//! ```rust
//! use ipcsync::{DiagnosticsConfig, DiagnosticsEngine};
//!
//! let engine = DiagnosticsEngine::new(DiagnosticsConfig::default());
//! engine.on_process_started(0);
//! engine.on_process_started(1);
//!
//! let guard = engine.acquire(0, "printer").unwrap();
//! assert_eq!(engine.holder(&"printer".into()), Some(0));
//! drop(guard);
//! assert!(engine.evaluate().is_empty());
//! ```

mod core;
pub use crate::core::{
    Cadence, Channel, ChannelError, ChannelKind, ConfigError, DeadlockAlert, DiagnosticsConfig,
    DiagnosticsEngine, DiagnosticsEvent, EventLogger, GraphInconsistency, LockError, LockGuard,
    LockId, Message, Monitor, ProcessId, ProcessState, RangeMs, SimulationConfig, Telemetry,
    TelemetrySample, TelemetrySnapshot, Timeline, TimelineCursor, TimelineEvent, TimelineKind,
    WorkerConfig, open_channel,
};
pub use crate::core::channel::{Instrumented, Pipe, Queue, SharedBuffer};
pub use crate::core::diagnostics::drill_lock;
pub use crate::core::graph::{CycleDetector, Handoff, WaitForGraph, WaitForGraphBuilder, WaitOutcome};

pub mod sim;
