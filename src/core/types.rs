use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Process identifier type
///
/// Identifies a simulated worker. Ids are stable integers in `[0, N)` for a
/// simulation of `N` processes.
pub type ProcessId = usize;

/// Lock identifier
///
/// Locks are named exclusive resources. The name is shared behind an `Arc`
/// so ids are cheap to clone into wait queues and timeline entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(Arc<str>);

impl LockId {
    pub fn new(name: impl AsRef<str>) -> Self {
        LockId(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockId {
    fn from(name: &str) -> Self {
        LockId::new(name)
    }
}

impl From<String> for LockId {
    fn from(name: String) -> Self {
        LockId(Arc::from(name))
    }
}

/// A message carried by a channel
///
/// Created by the channel at enqueue time, which stamps the per-channel
/// sequence number and the send instant. Fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    seq: u64,
    sender: ProcessId,
    payload: Vec<u8>,
    sent_at: Instant,
}

impl Message {
    pub(crate) fn new(seq: u64, sender: ProcessId, payload: Vec<u8>) -> Self {
        Message {
            seq,
            sender,
            payload,
            sent_at: Instant::now(),
        }
    }

    /// Per-channel sequence number, starting at 1
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Process that sent this message
    pub fn sender(&self) -> ProcessId {
        self.sender
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload rendered as UTF-8 (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }
}

/// Observable state of a simulated process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Not waiting on any lock
    Running,
    /// Waiting on a lock held by another process
    Blocked,
    /// Member of at least one detected wait-for cycle
    Frozen,
}

/// Record of a detected deadlock
///
/// Alerts are never mutated. When the underlying cycle changes the engine
/// drops the alert and raises a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockAlert {
    /// Processes forming the cycle, in wait-for order, lowest id first
    ///
    /// For `[1, 4]` process 1 waits on process 4 and process 4 waits on
    /// process 1.
    pub cycle: Vec<ProcessId>,

    /// Lock each cycle member is waiting for, aligned with `cycle`
    pub waiting_for: Vec<(ProcessId, LockId)>,

    /// When the cycle was first observed
    pub detected_at: DateTime<Utc>,
}

impl DeadlockAlert {
    pub fn involves(&self, process: ProcessId) -> bool {
        self.cycle.contains(&process)
    }
}

impl fmt::Display for DeadlockAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DEADLOCK: ")?;
        for p in &self.cycle {
            write!(f, "P{p} → ")?;
        }
        match self.cycle.first() {
            Some(first) => write!(f, "P{first}"),
            None => Ok(()),
        }
    }
}
