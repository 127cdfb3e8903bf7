//! Rolling latency / throughput telemetry
//!
//! One [`TelemetrySample`] is recorded per completed receive. Throughput and
//! average latency are computed over a sliding window; samples older than the
//! window are pruned lazily on every read and write.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Latency of one completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySample {
    pub latency: Duration,
    pub timestamp: Instant,
}

/// Point-in-time view of the telemetry counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Messages per second over the window
    pub throughput: f64,
    /// Average latency over the window, in milliseconds
    pub latency_ms: f64,
    /// Messages received since the telemetry was created
    pub completed: u64,
}

#[derive(Debug, Default)]
struct Samples {
    window: VecDeque<TelemetrySample>,
    completed: u64,
}

#[derive(Debug)]
pub struct Telemetry {
    window: Duration,
    started: Instant,
    samples: Mutex<Samples>,
}

impl Telemetry {
    pub fn new(window: Duration) -> Self {
        Telemetry {
            window,
            started: Instant::now(),
            samples: Mutex::new(Samples::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a transfer that completed just now
    pub fn record(&self, latency: Duration) {
        self.record_sample(TelemetrySample {
            latency,
            timestamp: Instant::now(),
        });
    }

    pub fn record_sample(&self, sample: TelemetrySample) {
        let mut samples = self.samples.lock();
        samples.completed += 1;
        samples.window.push_back(sample);
        Self::prune(&mut samples.window, sample.timestamp, self.window);
    }

    fn prune(window: &mut VecDeque<TelemetrySample>, now: Instant, span: Duration) {
        while let Some(front) = window.front() {
            if now.saturating_duration_since(front.timestamp) > span {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Messages per second over the sliding window
    pub fn throughput(&self) -> f64 {
        self.throughput_at(Instant::now())
    }

    /// Throughput as seen at `now`
    ///
    /// Until a full window has elapsed since creation, the rate is taken over
    /// the elapsed time instead so early readings are not diluted.
    pub fn throughput_at(&self, now: Instant) -> f64 {
        let mut samples = self.samples.lock();
        Self::prune(&mut samples.window, now, self.window);

        let span = now
            .saturating_duration_since(self.started)
            .min(self.window)
            .max(Duration::from_millis(1));
        samples.window.len() as f64 / span.as_secs_f64()
    }

    /// Average latency over the sliding window, zero when empty
    pub fn latency(&self) -> Duration {
        self.latency_at(Instant::now())
    }

    pub fn latency_at(&self, now: Instant) -> Duration {
        let mut samples = self.samples.lock();
        Self::prune(&mut samples.window, now, self.window);

        let count = samples.window.len() as u32;
        if count == 0 {
            return Duration::ZERO;
        }
        let total: Duration = samples.window.iter().map(|s| s.latency).sum();
        total / count
    }

    pub fn completed(&self) -> u64 {
        self.samples.lock().completed
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            throughput: self.throughput(),
            latency_ms: self.latency().as_secs_f64() * 1000.0,
            completed: self.completed(),
        }
    }
}
