use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::RecvTimeoutError;
use ipcsync::sim::Simulation;
use ipcsync::{ChannelKind, DiagnosticsEvent, SimulationConfig};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChannelArg {
    Pipe,
    Queue,
    SharedBuffer,
}

impl From<ChannelArg> for ChannelKind {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Pipe => ChannelKind::Pipe,
            ChannelArg::Queue => ChannelKind::Queue,
            ChannelArg::SharedBuffer => ChannelKind::SharedBuffer,
        }
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "ipcsync - IPC synchronization simulator with live deadlock diagnostics"
)]
struct Cli {
    /// Number of simulated processes
    #[arg(long)]
    procs: Option<usize>,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Channel transport
    #[arg(long, value_enum)]
    channel: Option<ChannelArg>,

    /// Start with the forced-deadlock drill enabled
    #[arg(long)]
    deadlock: bool,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-lines event log; `{timestamp}` is expanded
    #[arg(long)]
    log: Option<PathBuf>,

    /// Seed for worker timing
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_file(path)?,
            None => SimulationConfig::default(),
        };
        if let Some(procs) = self.procs {
            config = config.with_processes(procs);
        }
        if let Some(channel) = self.channel {
            config = config.with_channel(channel.into());
        }
        if self.deadlock {
            config = config.with_force_deadlock(true);
        }
        if let Some(log) = self.log {
            config = config.with_log(log);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let run_for = Duration::from_secs(cli.seconds);
    let config = cli.into_config()?;

    let sim = Simulation::start(config).context("Failed to start simulation")?;
    let events = sim.engine().subscribe();
    for alert in sim.engine().current_alerts() {
        println!("{alert}");
    }
    let deadline = Instant::now() + run_for;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(DiagnosticsEvent::AlertRaised(alerts)) => {
                for alert in alerts {
                    println!("{alert}");
                }
            }
            Ok(DiagnosticsEvent::AlertCleared) => println!("Deadlock cleared"),
            Ok(DiagnosticsEvent::Degraded(reason)) => {
                eprintln!("Diagnostics degraded: {reason}");
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!("{}", sim.channel().status());
    println!("{}", sim.engine().bottleneck_summary());
    let log_path = sim.engine().timeline().log_path().map(Path::to_path_buf);
    let summary = sim.stop();
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?
    );
    if let Some(path) = log_path {
        println!("Timeline written to {}", path.display());
    }
    Ok(())
}
