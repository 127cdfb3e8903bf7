use crate::core::diagnostics::DiagnosticsEngine;
use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Background thread running cycle detection on a fixed interval
///
/// The thread holds only a weak reference to the engine and exits when the
/// engine is gone or the monitor is stopped or dropped.
pub struct Monitor {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Stop the thread and wait for it to finish
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        // Disconnecting the channel wakes the thread
        self.stop.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            eprintln!("Diagnostics monitor thread panicked");
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.halt();
    }
}

impl DiagnosticsEngine {
    /// Start the polling monitor
    ///
    /// # Returns
    /// `None` when the cadence is on-event and no monitor is needed
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned
    pub fn spawn_monitor(self: &Arc<Self>) -> Result<Option<Monitor>> {
        let Some(interval) = self.config.poll_interval() else {
            return Ok(None);
        };

        let engine = Arc::downgrade(self);
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("ipcsync-monitor".into())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => match engine.upgrade() {
                            Some(engine) => {
                                engine.evaluate();
                            }
                            None => break,
                        },
                        _ => break,
                    }
                }
            })
            .context("Failed to spawn diagnostics monitor")?;

        Ok(Some(Monitor {
            stop: Some(tx),
            handle: Some(handle),
        }))
    }
}
