//! Headless simulation harness
//!
//! Spawns one thread per simulated process, all talking over a single
//! instrumented channel and reporting to one [`DiagnosticsEngine`].
//!
//! # Example
//!
//! ```rust,no_run
//! use ipcsync::sim::Simulation;
//! use ipcsync::{ChannelKind, SimulationConfig};
//! use std::time::Duration;
//!
//! let config = SimulationConfig::new()
//!     .with_processes(4)
//!     .with_channel(ChannelKind::Queue);
//! let sim = Simulation::start(config).unwrap();
//! std::thread::sleep(Duration::from_secs(2));
//! let summary = sim.stop();
//! println!("{} messages", summary.telemetry.completed);
//! ```

mod worker;

pub use worker::{WorkerExit, WorkerReport};

use crate::core::channel::{Channel, ChannelKind, open_channel};
use crate::core::config::SimulationConfig;
use crate::core::diagnostics::{DiagnosticsEngine, Monitor};
use crate::core::logger::EventLogger;
use crate::core::telemetry::TelemetrySnapshot;
use crate::core::types::DeadlockAlert;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use worker::WorkerContext;

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub channel: ChannelKind,
    pub processes: usize,
    pub duration_ms: u64,
    pub telemetry: TelemetrySnapshot,
    /// Alerts raised over the whole run
    pub alerts_raised: u64,
    /// Alerts still active when the run was stopped
    pub active_alerts: Vec<DeadlockAlert>,
    pub timeline_events: usize,
    pub workers: Vec<WorkerReport>,
}

/// A running simulation
///
/// Dropping it without calling [`Simulation::stop`] stops it as well.
pub struct Simulation {
    config: SimulationConfig,
    engine: Arc<DiagnosticsEngine>,
    channel: Arc<dyn Channel>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<WorkerReport>>,
    monitor: Option<Monitor>,
    started: Instant,
    finished: bool,
}

impl Simulation {
    /// Validate `config` and start every worker
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the event log
    /// cannot be created, or a thread cannot be spawned.
    pub fn start(config: SimulationConfig) -> Result<Self> {
        config
            .validate()
            .context("Invalid simulation configuration")?;

        let engine = match &config.log_path {
            Some(path) => {
                let logger =
                    EventLogger::with_file(path).context("Failed to initialize event logger")?;
                DiagnosticsEngine::with_logger(config.diagnostics.clone(), logger)
            }
            None => DiagnosticsEngine::new(config.diagnostics.clone()),
        };
        let engine = Arc::new(engine);
        engine.force_deadlock(config.force_deadlock);

        let channel = open_channel(config.channel, &engine, config.buffer_slots);
        engine.note(
            None,
            format!(
                "--- Starting simulation with {} processes using {} ---",
                config.processes, config.channel
            ),
        );
        for process in 0..config.processes {
            engine.on_process_started(process);
        }

        let mut sim = Simulation {
            monitor: engine.spawn_monitor()?,
            engine,
            channel,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(config.processes),
            started: Instant::now(),
            finished: false,
            config,
        };

        let base_seed = sim.config.seed.unwrap_or_else(rand::random);
        let participants = sim.config.participants();
        for process in 0..sim.config.processes {
            let ctx = WorkerContext {
                process,
                channel: Arc::clone(&sim.channel),
                engine: Arc::clone(&sim.engine),
                config: sim.config.worker.clone(),
                participants: participants.clone(),
                stop: Arc::clone(&sim.stop),
                seed: base_seed.wrapping_add(process as u64),
            };
            let handle = thread::Builder::new()
                .name(format!("P{process}"))
                .spawn(move || worker::run(ctx))
                .with_context(|| format!("Failed to spawn worker P{process}"))?;
            sim.workers.push(handle);
        }

        Ok(sim)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<DiagnosticsEngine> {
        &self.engine
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Toggle forced-deadlock mode while running
    pub fn force_deadlock(&self, enabled: bool) {
        self.engine.force_deadlock(enabled);
    }

    /// Stop the run and collect its summary
    ///
    /// Closes the channel, cancels every lock wait, joins the workers and
    /// then terminates all processes.
    pub fn stop(mut self) -> RunSummary {
        self.halt()
    }

    fn halt(&mut self) -> RunSummary {
        self.finished = true;
        let active_alerts = self.engine.current_alerts();

        self.stop.store(true, Ordering::SeqCst);
        self.channel.close();
        self.engine.shutdown();

        let workers = self
            .workers
            .drain(..)
            .enumerate()
            .map(|(process, handle)| {
                handle.join().unwrap_or_else(|_| WorkerReport {
                    process,
                    sent: 0,
                    received: 0,
                    exit: WorkerExit::Error("worker panicked".to_string()),
                })
            })
            .collect();

        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        for process in 0..self.config.processes {
            self.engine.on_process_terminated(process);
        }
        self.engine.note(None, "--- Simulation stopped ---");

        if let Err(e) = self.engine.timeline().flush() {
            eprintln!("Warning: Failed to flush timeline: {e:?}");
        }

        RunSummary {
            channel: self.config.channel,
            processes: self.config.processes,
            duration_ms: self.started.elapsed().as_millis() as u64,
            telemetry: self.engine.telemetry().snapshot(),
            alerts_raised: self.engine.alerts_raised(),
            active_alerts,
            timeline_events: self.engine.timeline().len(),
            workers,
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if !self.finished {
            self.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{RangeMs, WorkerConfig};
    use std::time::Duration;

    fn fast_worker() -> WorkerConfig {
        WorkerConfig {
            send_interval_ms: RangeMs::new(5, 20),
            work_delay_ms: RangeMs::new(0, 2),
            recv_poll_ms: 5,
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Simulation::start(SimulationConfig::new().with_processes(0))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid simulation configuration"));
    }

    #[test]
    fn test_every_channel_kind_runs_and_stops() {
        for kind in ChannelKind::ALL {
            let config = SimulationConfig::new()
                .with_processes(3)
                .with_channel(kind)
                .with_seed(7)
                .with_worker(fast_worker());
            let sim = Simulation::start(config).unwrap();
            thread::sleep(Duration::from_millis(150));
            let summary = sim.stop();

            assert_eq!(summary.channel, kind);
            assert_eq!(summary.workers.len(), 3);
            assert!(summary.workers.iter().map(|w| w.sent).sum::<u64>() > 0);
            assert_eq!(summary.alerts_raised, 0);
            assert!(summary.timeline_events > 0);
        }
    }
}
