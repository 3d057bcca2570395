//! taskpilot - a command-line task manager.
//!
//! Talks to the taskpilot REST API. The session is saved between runs and
//! renewed automatically when the access token expires.

mod cli;
mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Command;
use commands::App;
use taskpilot_core::Config;

/// Directory for a daily-rotated log file, in addition to stderr.
const ENV_LOG_DIR: &str = "TASKPILOT_LOG_DIR";

const LOG_FILE_PREFIX: &str = "taskpilot.log";

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` controls the level (default `warn`). The returned guard must
/// live until exit so buffered file output is flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR).ok().filter(|d| !d.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let command = Command::parse(std::env::args().skip(1))?;
    if command == Command::Help {
        println!("{}", cli::USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    info!(api = %config.api_base_url, "taskpilot starting");

    let mut app = App::new(config)?;
    app.run(command).await
}
