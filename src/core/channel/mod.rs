//! Channel abstraction shared by the three transports
//!
//! [`Pipe`], [`Queue`] and [`SharedBuffer`] all satisfy the same [`Channel`]
//! contract: FIFO delivery per channel instance, blocking receive, and
//! [`ChannelError::Closed`] once the channel is torn down. They differ only in
//! how senders are held back:
//!
//! | variant        | sender blocks when            | explicit lock |
//! |----------------|-------------------------------|---------------|
//! | `Pipe`         | the single slot is occupied   | no            |
//! | `Queue`        | never                         | no            |
//! | `SharedBuffer` | lock busy or all slots in use | yes           |

mod instrumented;
mod pipe;
mod queue;
mod shared_buffer;

pub use instrumented::Instrumented;
pub use pipe::Pipe;
pub use queue::Queue;
pub use shared_buffer::SharedBuffer;

use crate::core::diagnostics::DiagnosticsEngine;
use crate::core::error::ChannelError;
use crate::core::types::{Message, ProcessId};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Which transport a channel uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Pipe,
    Queue,
    SharedBuffer,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::Pipe,
        ChannelKind::Queue,
        ChannelKind::SharedBuffer,
    ];

    /// Short display name
    pub fn type_name(self) -> &'static str {
        match self {
            ChannelKind::Pipe => "Pipe",
            ChannelKind::Queue => "MsgQueue",
            ChannelKind::SharedBuffer => "SharedBuffer",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Uniform message channel between simulated processes
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Enqueue a message from `sender`
    ///
    /// # Returns
    /// The sequence number stamped on the message
    ///
    /// # Errors
    /// [`ChannelError::Closed`] if the channel is, or becomes, closed.
    fn send(&self, payload: Vec<u8>, sender: ProcessId) -> Result<u64, ChannelError> {
        self.send_observed(payload, sender, &|_| {})
    }

    /// Like [`Channel::send`], calling `on_enqueued` with the sequence number
    /// once the message is in the channel
    ///
    /// No receive of the message returns before `on_enqueued` has, so
    /// anything it records is ordered before the receiver's own records.
    /// It is not called if the send fails.
    fn send_observed(
        &self,
        payload: Vec<u8>,
        sender: ProcessId,
        on_enqueued: &dyn Fn(u64),
    ) -> Result<u64, ChannelError>;

    /// Take the oldest message, blocking until one arrives
    ///
    /// # Errors
    /// [`ChannelError::Closed`] if the channel is, or becomes, closed.
    fn recv(&self, receiver: ProcessId) -> Result<Message, ChannelError>;

    /// Like [`Channel::recv`] but gives up after `timeout`
    ///
    /// # Returns
    /// `Ok(None)` if no message arrived in time
    fn recv_timeout(
        &self,
        receiver: ProcessId,
        timeout: Duration,
    ) -> Result<Option<Message>, ChannelError>;

    /// Tear the channel down and wake every blocked caller
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Messages currently buffered
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One-line status for a dashboard, e.g. `Queue: 3 msg(s)`
    fn status(&self) -> String;
}

/// Build an instrumented channel of the requested kind
///
/// The shared buffer registers its lock with `engine`; every variant reports
/// telemetry and timeline events to it.
pub fn open_channel(
    kind: ChannelKind,
    engine: &Arc<DiagnosticsEngine>,
    buffer_slots: usize,
) -> Arc<dyn Channel> {
    match kind {
        ChannelKind::Pipe => Arc::new(Instrumented::new(Pipe::new(), Arc::clone(engine))),
        ChannelKind::Queue => Arc::new(Instrumented::new(Queue::new(), Arc::clone(engine))),
        ChannelKind::SharedBuffer => Arc::new(Instrumented::new(
            SharedBuffer::new(buffer_slots, Arc::clone(engine)),
            Arc::clone(engine),
        )),
    }
}

/// Close flag plus a broadcast wake-up for `select!`-based transports
///
/// Closing drops the only `Sender<()>`, which disconnects the receiver and
/// makes every pending `select!` arm on it ready at once.
#[derive(Debug)]
pub(crate) struct CloseSignal {
    closed: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        CloseSignal {
            closed: AtomicBool::new(false),
            trigger: Mutex::new(Some(tx)),
            signal: rx,
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.trigger.lock().take();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.signal
    }

    pub(crate) fn check(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }
}
