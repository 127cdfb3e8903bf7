//! Simulation configuration
//!
//! All settings have defaults, so a JSON config file only needs the fields it
//! overrides. Durations are stored as milliseconds to keep the file format
//! plain.

use crate::core::channel::ChannelKind;
use crate::core::error::ConfigError;
use crate::core::types::ProcessId;
use anyhow::{Context, Result};
use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// When the diagnostics engine runs cycle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Cadence {
    /// Right after every lock wait, grant, release or timeout
    OnEvent,
    /// From a background monitor thread on a fixed interval
    Polling { interval_ms: u64 },
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::Polling { interval_ms: 100 }
    }
}

/// Inclusive millisecond range used for randomized worker timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMs {
    pub min: u64,
    pub max: u64,
}

impl RangeMs {
    pub const fn new(min: u64, max: u64) -> Self {
        RangeMs { min, max }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::InvertedRange {
                field,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Settings for the diagnostics engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub cadence: Cadence,
    /// Maximum time a process waits for a lock before giving up.
    /// `None` waits forever, which is what lets real deadlocks persist.
    pub lock_timeout_ms: Option<u64>,
    /// Sliding window for throughput and average latency
    pub telemetry_window_ms: u64,
    /// A process with no channel activity for this long counts as idle
    pub idle_threshold_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            cadence: Cadence::default(),
            lock_timeout_ms: None,
            telemetry_window_ms: 5_000,
            idle_threshold_ms: 2_000,
        }
    }
}

impl DiagnosticsConfig {
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    pub fn telemetry_window(&self) -> Duration {
        Duration::from_millis(self.telemetry_window_ms)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    /// Poll interval when the cadence is `Polling`
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.cadence {
            Cadence::Polling { interval_ms } => Some(Duration::from_millis(interval_ms)),
            Cadence::OnEvent => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Cadence::Polling { interval_ms: 0 } = self.cadence {
            return Err(ConfigError::ZeroDuration("cadence.interval_ms"));
        }
        if self.telemetry_window_ms == 0 {
            return Err(ConfigError::ZeroDuration("telemetry_window_ms"));
        }
        Ok(())
    }
}

/// Timing of the simulated worker loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between two sends of the same worker
    pub send_interval_ms: RangeMs,
    /// Simulated processing time after each received message
    pub work_delay_ms: RangeMs,
    /// How long a single receive attempt blocks before the worker
    /// checks whether it should send or stop
    pub recv_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            send_interval_ms: RangeMs::new(500, 2_000),
            work_delay_ms: RangeMs::new(50, 200),
            recv_poll_ms: 10,
        }
    }
}

impl WorkerConfig {
    pub fn recv_poll(&self) -> Duration {
        Duration::from_millis(self.recv_poll_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.send_interval_ms.validate("worker.send_interval_ms")?;
        self.work_delay_ms.validate("worker.work_delay_ms")?;
        if self.recv_poll_ms == 0 {
            return Err(ConfigError::ZeroDuration("worker.recv_poll_ms"));
        }
        Ok(())
    }
}

/// Top-level simulation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of simulated processes, ids `0..processes`
    pub processes: usize,
    pub channel: ChannelKind,
    /// Slot count of the shared buffer variant
    pub buffer_slots: usize,
    /// Seed for worker timing jitter; random when absent
    pub seed: Option<u64>,
    /// JSON-lines event log. `{timestamp}` in the path is expanded.
    pub log_path: Option<PathBuf>,
    /// Start with the forced-deadlock drill enabled
    pub force_deadlock: bool,
    /// Processes driven into the forced deadlock; the two lowest ids when empty
    pub deadlock_participants: Vec<ProcessId>,
    pub diagnostics: DiagnosticsConfig,
    pub worker: WorkerConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            processes: 3,
            channel: ChannelKind::default(),
            buffer_slots: 8,
            seed: None,
            log_path: None,
            force_deadlock: false,
            deadlock_participants: Vec::new(),
            diagnostics: DiagnosticsConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: SimulationConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn with_processes(mut self, processes: usize) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_buffer_slots(mut self, slots: usize) -> Self {
        self.buffer_slots = slots;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_log<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_force_deadlock(mut self, enabled: bool) -> Self {
        self.force_deadlock = enabled;
        self
    }

    pub fn with_deadlock_participants(mut self, participants: Vec<ProcessId>) -> Self {
        self.deadlock_participants = participants;
        self
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.diagnostics.cadence = cadence;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.diagnostics.lock_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    /// Processes that take part in the forced-deadlock drill
    pub fn participants(&self) -> Vec<ProcessId> {
        if self.deadlock_participants.is_empty() {
            (0..self.processes.min(2)).collect()
        } else {
            self.deadlock_participants.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processes == 0 {
            return Err(ConfigError::NoProcesses);
        }
        if self.buffer_slots == 0 {
            return Err(ConfigError::NoBufferSlots);
        }

        let mut seen = FxHashSet::default();
        for &p in &self.deadlock_participants {
            if p >= self.processes {
                return Err(ConfigError::ParticipantOutOfRange {
                    process: p,
                    processes: self.processes,
                });
            }
            if !seen.insert(p) {
                return Err(ConfigError::DuplicateParticipant(p));
            }
        }
        if self.force_deadlock && self.participants().len() < 2 {
            return Err(ConfigError::TooFewParticipants(self.participants().len()));
        }

        self.diagnostics.validate()?;
        self.worker.validate()
    }
}
