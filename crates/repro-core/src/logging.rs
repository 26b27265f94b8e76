//! Logging setup for the `repro` binary and its tests.
//!
//! Human-readable compact output goes to stderr so stdout stays free for
//! the failure reports. With a log file configured, every event is also
//! written there as one JSON object per line.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Returned by [`init_logging`]; keep it alive for the whole run.
#[derive(Debug)]
pub struct LogGuard {
    /// JSON-lines log file, when one was requested.
    pub log_path: Option<PathBuf>,
}

/// `MakeWriter` that serializes events into one shared file.
#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl SharedFileWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileGuard {
            guard: self.file.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Holds the file lock for one event.
struct SharedFileGuard<'a> {
    guard: MutexGuard<'a, File>,
}

impl Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default level (`info`, or `debug` with
/// `verbose`). Fails if the log file cannot be created or a subscriber is
/// already installed.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> io::Result<LogGuard> {
    let json_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let writer = SharedFileWriter::new(File::create(path)?);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true),
            )
        }
        None => None,
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_writer(io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(terminal_layer)
        .with(json_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LogGuard {
        log_path: log_file.map(Path::to_path_buf),
    })
}

/// Terminal-only logging for tests; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(default_filter(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_subscriber(path: &Path, filter: &str) -> impl tracing::Subscriber + Send + Sync {
        let writer = SharedFileWriter::new(File::create(path).unwrap());
        tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
    }

    #[test]
    fn file_layer_writes_json_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("repro.log.jsonl");

        tracing::subscriber::with_default(json_subscriber(&path, "info"), || {
            tracing::info!(module = "lucene/core", exit_code = 1, "setting last failure code");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().find(|l| !l.trim().is_empty()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["level"], "INFO");
        assert_eq!(parsed["fields"]["module"], "lucene/core");
    }

    #[test]
    fn filter_drops_debug_by_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("repro.log.jsonl");

        tracing::subscriber::with_default(json_subscriber(&path, "info"), || {
            tracing::debug!(hidden = true, "debug event");
            tracing::info!(shown = true, "info event");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("shown"));
        assert!(!content.contains("hidden"));
    }

    #[test]
    fn test_logging_is_reentrant() {
        init_test_logging();
        init_test_logging();
        tracing::info!("still works");
    }
}
