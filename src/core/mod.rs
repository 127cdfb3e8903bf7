// Core types
pub mod types;
pub use types::*;

pub mod error;
pub use error::{ChannelError, ConfigError, GraphInconsistency, LockError};

pub mod config;
pub use config::{Cadence, DiagnosticsConfig, RangeMs, SimulationConfig, WorkerConfig};

// Pipe / Queue / SharedBuffer
pub mod channel;
pub use channel::{Channel, ChannelKind, open_channel};

pub mod telemetry;
pub use telemetry::{Telemetry, TelemetrySample, TelemetrySnapshot};

// Timeline and its JSON-lines sink
pub mod logger;
pub mod timeline;
pub use logger::EventLogger;
pub use timeline::{Timeline, TimelineCursor, TimelineEvent, TimelineKind};

// Wait-for graph, lock table, cycle search
pub mod graph;

pub mod diagnostics;
pub use diagnostics::{DiagnosticsEngine, DiagnosticsEvent, LockGuard, Monitor};
