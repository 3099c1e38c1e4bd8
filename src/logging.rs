//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set. Otherwise sitegen logs at `info`, or `debug` with
//! `--verbose`. Worker stderr is logged under the `sitegen::worker` target so
//! it can be filtered on its own, e.g. `RUST_LOG=sitegen=info,sitegen::worker=debug`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE_PREFIX: &str = "sitegen.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    /// Emit JSON lines on stderr instead of human-readable text
    pub json: bool,
    /// Also write JSON logs to a daily rolling file in this directory
    pub log_dir: Option<PathBuf>,
}

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "sitegen=debug,tower_http=debug"
    } else {
        "sitegen=info,tower_http=info"
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the program so buffered file logs are flushed.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(options.verbose)));

    let stderr_layer = if options.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(options.verbose)
            .boxed()
    };

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
