//! Subscriber setup for the adapter process.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::args::Args;

/// Prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "bleadapter.log";
/// Rotated files kept on disk.
pub const MAX_LOG_FILES: usize = 5;

fn json_requested() -> bool {
    std::env::var("BLEADAPTER_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `--logLevel` when set. The returned guard flushes the
/// file writer and must live until the process exits.
pub fn init(args: &Args) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.directive()));

    let (writer, guard, ansi) = if args.log_to_stderr {
        (BoxMakeWriter::new(std::io::stderr), None, true)
    } else {
        std::fs::create_dir_all(&args.log_dir)
            .with_context(|| format!("Unable to create log directory {}", args.log_dir.display()))?;
        let appender = Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(MAX_LOG_FILES)
            .build(&args.log_dir)
            .context("Unable to open log file")?;
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        (BoxMakeWriter::new(non_blocking), Some(guard), false)
    };

    let installed = if json_requested() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .compact()
            .try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Unable to install log subscriber: {}", e))?;

    Ok(guard)
}
