//! Structured event log for timeline events
//!
//! Writes every [`TimelineEvent`] as one JSON line. File I/O happens on a
//! dedicated writer thread fed through a channel, so logging never blocks the
//! simulated processes on disk access. The log is flushed on demand and when
//! the logger is dropped.

use crate::core::timeline::TimelineEvent;
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Commands for controlling the writer thread
#[derive(Debug)]
enum LoggerCommand {
    /// Write one serialized event
    Entry(String),
    /// Flush pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// JSON-lines event logger
///
/// # Example
///
/// ```no_run
/// use ipcsync::EventLogger;
///
/// let logger = EventLogger::with_file("logs/ipcsync_{timestamp}.jsonl").unwrap();
/// println!("logging to {}", logger.path().display());
/// ```
pub struct EventLogger {
    sender: Sender<LoggerCommand>,
    /// Set while a flush is in flight so concurrent flushes collapse into one
    flushing: Arc<AtomicBool>,
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush logs during EventLogger drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a logger that writes to `path`
    ///
    /// If the file name contains `{timestamp}` it is replaced with the
    /// current UTC time (`%Y%m%d_%H%M%S`). Missing parent directories are
    /// created and an existing file is truncated.
    ///
    /// # Errors
    /// Returns an error if the directory or the file cannot be created.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();

        #[allow(clippy::literal_string_with_formatting_args)]
        let file_path = if path_buf.to_string_lossy().contains("{timestamp}") {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            PathBuf::from(
                path_buf
                    .to_string_lossy()
                    .replace("{timestamp}", &timestamp),
            )
        } else {
            path_buf
        };

        if let Some(parent) = file_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create log directory {}", parent.display())
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&file_path)
            .with_context(|| format!("Failed to open log file {}", file_path.display()))?;

        let (tx, rx) = unbounded::<LoggerCommand>();
        thread::Builder::new()
            .name("ipcsync-logger".into())
            .spawn(move || writer_thread(file, rx))
            .context("Failed to spawn logger thread")?;

        Ok(EventLogger {
            sender: tx,
            flushing: Arc::new(AtomicBool::new(false)),
            path: file_path,
        })
    }

    /// Path of the file being written, after placeholder expansion
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an event for writing. Never blocks on I/O.
    pub fn log(&self, event: &TimelineEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if let Err(e) = self.sender.send(LoggerCommand::Entry(json)) {
                    eprintln!("Failed to send log entry: {e:?}");
                }
            }
            Err(e) => eprintln!("Failed to serialize log entry: {e:?}"),
        }
    }

    /// Block until every queued entry is on disk
    ///
    /// # Errors
    /// Returns an error if the writer thread is gone or does not confirm the
    /// flush within ten seconds.
    pub fn flush(&self) -> Result<()> {
        let already_flushing = self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();
        if already_flushing {
            return Ok(());
        }

        let result = (|| {
            let (flush_tx, flush_rx) = crossbeam_channel::bounded(1);
            self.sender
                .send(LoggerCommand::Flush(flush_tx))
                .context("Logger thread is not running")?;
            flush_rx
                .recv_timeout(Duration::from_secs(10))
                .context("Flush operation timed out")
        })();

        self.flushing.store(false, Ordering::SeqCst);
        result
    }
}

fn writer_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Entry(json) => {
                if let Err(e) = writeln!(writer, "{json}") {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timeline::{Timeline, TimelineKind};
    use tempfile::TempDir;

    #[test]
    fn test_events_are_written_as_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timeline.jsonl");

        let timeline = Timeline::with_logger(EventLogger::with_file(&path).unwrap());
        timeline.push(Some(1), TimelineKind::Send, "P1 sent #1");
        timeline.push(None, TimelineKind::AlertRaised, "DEADLOCK: P0 → P1 → P0");
        timeline.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"process\":1"));
        assert!(lines[0].contains("\"kind\":\"Send\""));
        assert!(!lines[1].contains("\"process\""));
    }

    #[test]
    fn test_timestamp_placeholder_and_directories() {
        let dir = TempDir::new().unwrap();
        let logger =
            EventLogger::with_file(dir.path().join("nested/run_{timestamp}.jsonl")).unwrap();

        let name = logger.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("run_"));
        assert!(!name.contains("{timestamp}"));
        assert!(logger.path().exists());
    }

    #[test]
    fn test_flush_idempotence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flush.jsonl");
        let timeline = Timeline::with_logger(EventLogger::with_file(&path).unwrap());

        for i in 0..10 {
            timeline.push(Some(i), TimelineKind::Info, "tick");
        }
        timeline.flush().unwrap();
        timeline.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 10);
    }

    #[test]
    fn test_logger_drop_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drop.jsonl");
        {
            let timeline = Timeline::with_logger(EventLogger::with_file(&path).unwrap());
            timeline.push(Some(4), TimelineKind::Info, "Started.");
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Started."));
    }
}
