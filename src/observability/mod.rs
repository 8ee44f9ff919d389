//! Observability: structured logging and metrics counters.
//!
//! Logging goes through `tracing`; [`init`] installs a `tracing-subscriber`
//! registry with an `EnvFilter` and a pretty or JSON `fmt` layer, writing to
//! stderr or an append-only log file.
//!
//! Counters are emitted through the `metrics` facade. No recorder is
//! installed here, so they cost nothing unless an embedding application
//! installs one.
//!
//! | Counter | Labels |
//! |---------|--------|
//! | `duplicate_checks_total` | `outcome` |
//! | `duplicate_store_errors_total` | `operation` |
//! | `images_rejected_total` | |
//! | `image_fetches_total` | |

mod logging;

pub use logging::{LogFormat, LoggingConfig};

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes logging from config settings.
///
/// # Errors
///
/// Returns an error if logging has already been initialized or the log file
/// cannot be opened.
pub fn init_from_settings(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    init(LoggingConfig::from_settings(settings, verbose))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if logging has already been initialized or the log file
/// cannot be opened.
pub fn init(config: LoggingConfig) -> Result<()> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "observability already initialized".to_string(),
        });
    }

    match (&config.file, config.format) {
        (Some(log_file), LogFormat::Json) => {
            let writer = LogSink::append_to(log_file)?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(subscriber_error)?;
        },
        (Some(log_file), LogFormat::Pretty) => {
            let writer = LogSink::append_to(log_file)?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(subscriber_error)?;
        },
        (None, LogFormat::Json) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stderr)
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(subscriber_error)?;
        },
        (None, LogFormat::Pretty) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(io::stderr)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(subscriber_error)?;
        },
    }

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "failed to mark observability initialized".to_string(),
        })
}

/// Append-only log file shared by every span and event.
///
/// `dupwatch process` writes replies to stdout and logs to stderr; a log file
/// keeps a long-running session's history without mixing into either
/// stream. Segment tasks log concurrently, so each write takes the lock and
/// lands whole.
#[derive(Clone)]
struct LogSink {
    path: Arc<Path>,
    file: Arc<Mutex<File>>,
}

impl LogSink {
    /// Opens `path` for appending, creating missing parent directories.
    fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| log_file_error("create_log_dir", path, &e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| log_file_error("open_log_file", path, &e))?;

        Ok(Self {
            path: Arc::from(path),
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn locked(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.file.lock().map_err(|_| {
            io::Error::other(format!("log file {} lock poisoned", self.path.display()))
        })
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.locked()?.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.locked()?.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn log_file_error(operation: &str, path: &Path, e: &io::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {e}", path.display()),
    }
}

/// A second `init` in the same process lands here (the global subscriber is
/// already set).
#[allow(clippy::needless_pass_by_value)]
fn subscriber_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sink_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dupwatch.log");

        let mut sink = LogSink::append_to(&path).unwrap();
        sink.write_all(b"line\n").unwrap();
        sink.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }

    #[test]
    fn test_log_sink_appends_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dupwatch.log");

        LogSink::append_to(&path).unwrap().write_all(b"a\n").unwrap();
        LogSink::append_to(&path).unwrap().write_all(b"b\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_log_sink_lines_stay_whole_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dupwatch.log");
        let sink = LogSink::append_to(&path).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|n| {
                let mut sink = sink.clone();
                std::thread::spawn(move || {
                    let line = format!("{}\n", n.to_string().repeat(64));
                    for _ in 0..50 {
                        sink.write_all(line.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 200);
        for line in contents.lines() {
            assert_eq!(line.len(), 64);
            assert!(line.chars().all(|c| c == line.chars().next().unwrap()));
        }
    }

    #[test]
    fn test_log_sink_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the log file.
        let err = LogSink::append_to(dir.path()).err().unwrap();
        assert!(
            matches!(err, Error::OperationFailed { ref operation, .. } if operation == "open_log_file")
        );
    }
}
