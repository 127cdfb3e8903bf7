//! Error kinds surfaced by channels, the lock table and the diagnostics engine

use crate::core::types::{LockId, ProcessId};
use std::time::Duration;
use thiserror::Error;

/// Failure of a channel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel was torn down before or during the operation.
    /// Callers treat this as end-of-stream.
    #[error("channel closed")]
    Closed,
}

/// Failure of a lock acquisition or release
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The configured maximum wait was exceeded. Not a deadlock by itself.
    #[error("P{process} gave up on lock {lock} after {waited:?}")]
    Timeout {
        process: ProcessId,
        lock: LockId,
        waited: Duration,
    },

    /// The wait was interrupted by a simulation stop or process termination
    #[error("lock wait cancelled")]
    Cancelled,

    #[error(transparent)]
    Inconsistent(#[from] GraphInconsistency),
}

/// Internal invariant violation in the wait-for bookkeeping
///
/// Should never occur while the lock table invariants hold. When it does,
/// the diagnostics engine enters degraded mode instead of crashing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphInconsistency {
    #[error("event references unknown process P{0}")]
    UnknownProcess(ProcessId),

    #[error("P{process} released lock {lock} it does not hold")]
    NotHolder { process: ProcessId, lock: LockId },

    #[error("P{process} is already waiting on lock {waiting_on}, cannot wait on {requested}")]
    AlreadyWaiting {
        process: ProcessId,
        waiting_on: LockId,
        requested: LockId,
    },

    #[error("wait-for edge P{from} -> P{to} references a node outside the graph")]
    DanglingEdge { from: ProcessId, to: ProcessId },
}

/// Rejected simulation configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("a simulation needs at least one process")]
    NoProcesses,

    #[error("shared buffer needs at least one slot")]
    NoBufferSlots,

    #[error("forced deadlock needs at least two participants, got {0}")]
    TooFewParticipants(usize),

    #[error("participant P{process} is outside the simulation (0..{processes})")]
    ParticipantOutOfRange { process: ProcessId, processes: usize },

    #[error("duplicate participant P{0}")]
    DuplicateParticipant(ProcessId),

    #[error("{field}: minimum {min} exceeds maximum {max}")]
    InvertedRange {
        field: &'static str,
        min: u64,
        max: u64,
    },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}
