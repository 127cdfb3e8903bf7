//! Behaviour of one simulated process

use crate::core::channel::Channel;
use crate::core::config::{RangeMs, WorkerConfig};
use crate::core::diagnostics::DiagnosticsEngine;
use crate::core::error::{ChannelError, LockError};
use crate::core::types::ProcessId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Why a worker loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkerExit {
    /// The simulation asked it to stop
    Stopped,
    /// The channel was closed under it
    ChannelClosed,
    /// A lock wait was cancelled by shutdown or termination
    LockCancelled,
    Error(String),
}

/// What one worker did during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub process: ProcessId,
    pub sent: u64,
    pub received: u64,
    pub exit: WorkerExit,
}

pub(crate) struct WorkerContext {
    pub process: ProcessId,
    pub channel: Arc<dyn Channel>,
    pub engine: Arc<DiagnosticsEngine>,
    pub config: WorkerConfig,
    /// Processes driven into the forced deadlock
    pub participants: Vec<ProcessId>,
    pub stop: Arc<AtomicBool>,
    pub seed: u64,
}

fn pick(rng: &mut StdRng, range: RangeMs) -> Duration {
    Duration::from_millis(rng.random_range(range.min..=range.max))
}

/// Worker loop: receive, simulate work, send now and then
///
/// A designated process runs the forced-deadlock drill once each time the
/// mode is switched on.
pub(crate) fn run(ctx: WorkerContext) -> WorkerReport {
    let WorkerContext {
        process,
        channel,
        engine,
        config,
        participants,
        stop,
        seed,
    } = ctx;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut sent = 0;
    let mut received = 0;
    let mut drilled = false;
    let mut next_send = Instant::now() + pick(&mut rng, config.send_interval_ms);

    engine.note(Some(process), "Started.");

    let exit = loop {
        if stop.load(Ordering::SeqCst) {
            break WorkerExit::Stopped;
        }

        if !engine.is_force_deadlock() {
            drilled = false;
        } else if !drilled && participants.contains(&process) {
            drilled = true;
            match engine.drive_forced_deadlock(process, &participants) {
                Ok(()) => {}
                Err(LockError::Timeout { .. }) => {
                    engine.note(Some(process), "Gave up on forced deadlock.");
                }
                Err(LockError::Cancelled) => break WorkerExit::LockCancelled,
                Err(e) => break WorkerExit::Error(e.to_string()),
            }
            continue;
        }

        match channel.recv_timeout(process, config.recv_poll()) {
            Ok(Some(_)) => {
                received += 1;
                thread::sleep(pick(&mut rng, config.work_delay_ms));
            }
            Ok(None) => {}
            Err(ChannelError::Closed) => break WorkerExit::ChannelClosed,
        }

        if Instant::now() >= next_send {
            match channel.send(format!("Hello from P{process}").into_bytes(), process) {
                Ok(_) => sent += 1,
                Err(ChannelError::Closed) => break WorkerExit::ChannelClosed,
            }
            next_send = Instant::now() + pick(&mut rng, config.send_interval_ms);
        }
    };

    if exit == WorkerExit::ChannelClosed {
        engine.note(Some(process), "Channel closed. Exiting.");
    }

    WorkerReport {
        process,
        sent,
        received,
        exit,
    }
}
