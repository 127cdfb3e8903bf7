//! Append-only timeline of human-readable simulation events
//!
//! Every significant transition (channel send/recv, lock wait/grant/release,
//! alert raised/cleared, ...) becomes one [`TimelineEvent`]. Events are never
//! edited after being appended. Readers walk the timeline with a
//! [`TimelineCursor`], which can be rewound to re-render from the start.

use crate::core::logger::EventLogger;
use crate::core::types::ProcessId;
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Category of a timeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimelineKind {
    ProcessStarted,
    ProcessTerminated,
    Send,
    Recv,
    LockWait,
    LockGrant,
    LockRelease,
    LockTimeout,
    AlertRaised,
    AlertCleared,
    Degraded,
    ForceDeadlock,
    Info,
}

/// One timeline line
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    /// Position in the timeline, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Process the event is about, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessId>,
    pub kind: TimelineKind,
    pub text: String,
}

impl fmt::Display for TimelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.timestamp.format("%H:%M:%S%.3f"))?;
        if let Some(p) = self.process {
            write!(f, "[P{p}] ")?;
        }
        f.write_str(&self.text)
    }
}

struct Inner {
    events: RwLock<Vec<TimelineEvent>>,
    logger: Option<EventLogger>,
}

/// Shared handle to the timeline; clones see the same events
#[derive(Clone)]
pub struct Timeline {
    inner: Arc<Inner>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("len", &self.len())
            .field("logging", &self.inner.logger.is_some())
            .finish()
    }
}

impl Timeline {
    /// In-memory timeline without a file sink
    pub fn new() -> Self {
        Timeline {
            inner: Arc::new(Inner {
                events: RwLock::new(Vec::new()),
                logger: None,
            }),
        }
    }

    /// Timeline that also streams every event to `logger`
    pub fn with_logger(logger: EventLogger) -> Self {
        Timeline {
            inner: Arc::new(Inner {
                events: RwLock::new(Vec::new()),
                logger: Some(logger),
            }),
        }
    }

    /// Append an event and return its sequence number
    pub fn push(
        &self,
        process: Option<ProcessId>,
        kind: TimelineKind,
        text: impl Into<String>,
    ) -> u64 {
        let mut events = self.inner.events.write();
        let event = TimelineEvent {
            seq: events.len() as u64,
            timestamp: Utc::now(),
            process,
            kind,
            text: text.into(),
        };
        if let Some(logger) = &self.inner.logger {
            logger.log(&event);
        }
        let seq = event.seq;
        events.push(event);
        seq
    }

    pub fn len(&self) -> usize {
        self.inner.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, seq: u64) -> Option<TimelineEvent> {
        self.inner.events.read().get(seq as usize).cloned()
    }

    /// Lazy reader starting at the first event
    pub fn cursor(&self) -> TimelineCursor {
        TimelineCursor {
            timeline: self.clone(),
            next: 0,
        }
    }

    /// Copy of every event appended so far
    pub fn snapshot(&self) -> Vec<TimelineEvent> {
        self.inner.events.read().clone()
    }

    /// Rendered lines, as a log export would write them
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .events
            .read()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Count of events of one kind
    pub fn count(&self, kind: TimelineKind) -> usize {
        self.inner
            .events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// File the timeline is streamed to, if any
    pub fn log_path(&self) -> Option<&Path> {
        self.inner.logger.as_ref().map(EventLogger::path)
    }

    /// Flush the file sink, if one is attached
    ///
    /// # Errors
    /// Returns an error if the logger flush fails
    pub fn flush(&self) -> Result<()> {
        match &self.inner.logger {
            Some(logger) => logger.flush(),
            None => Ok(()),
        }
    }
}

/// Restartable reader over a [`Timeline`]
///
/// Yields events appended up to the moment each `next` is called, so a cursor
/// that reached the end picks up newer events on the next call.
#[derive(Debug, Clone)]
pub struct TimelineCursor {
    timeline: Timeline,
    next: usize,
}

impl TimelineCursor {
    /// Start over from the first event
    pub fn rewind(&mut self) {
        self.next = 0;
    }

    pub fn position(&self) -> usize {
        self.next
    }
}

impl Iterator for TimelineCursor {
    type Item = TimelineEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.timeline.get(self.next as u64)?;
        self.next += 1;
        Some(event)
    }
}
