// Non-blocking Logger

/*
 * SHM RELAY - NON-BLOCKING ASYNC LOGGER
 * =================================================================
 * Component Name: src/utils/logger.rs
 * Core Responsibility: Install the global tracing subscriber (stderr + optional rolling file).
 * Design Pattern: Async Appender
 * =================================================================
 */

use std::net::SocketAddr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::config_loader::LoggingConfig;

/// Install the global subscriber. Call once from `main`.
/// When a log directory is configured the returned guard must stay alive
/// until exit, or buffered file lines are lost.
pub fn init_logger(config: &LoggingConfig) -> Option<WorkerGuard> {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, &config.file_name);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking_file)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_ansi(false)
                .compact();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if installed.is_ok() {
        match &config.dir {
            Some(dir) => tracing::info!("LOGGER: logging to {}/{}", dir.display(), config.file_name),
            None => tracing::debug!("LOGGER: console logging only"),
        }
    }

    guard
}

/// Audit line for every command a relay peer issues.
pub fn log_relay_command(peer: &SocketAddr, command: &str, outcome: &str) {
    tracing::info!(
        target: "RELAY_AUDIT",
        peer = %peer,
        command = command,
        outcome = outcome,
        "RELAY COMMAND"
    );
}
