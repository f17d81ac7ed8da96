//! Async structured logging init.
//!
//! A non-blocking writer backed by a bounded channel keeps log output
//! off the hot path, and `log_level` selects a `tracing` filter.

use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LogConfig;

/// Installs the global `tracing` subscriber per `config`. The returned
/// guard must be kept alive for the logger's lifetime — dropping it
/// stops the background writer thread, losing any buffered records.
/// Returns `None` when logging is disabled, matching `log_enabled =
/// false`.
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        return None;
    }

    let level = parse_level(&config.level);
    let (writer, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(config.queue_size)
        .finish(std::io::stdout());

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(writer)
        .with_target(false)
        .init();

    Some(guard)
}

/// Maps the configured level name onto a `tracing::Level`. Unrecognized
/// values fall back to `INFO` rather than panicking at startup over a
/// typo.
fn parse_level(level: &str) -> tracing::Level {
    match level.to_ascii_lowercase().as_str() {
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_name_falls_back_to_info() {
        assert_eq!(parse_level("chatty"), tracing::Level::INFO);
        assert_eq!(parse_level("DEBUG"), tracing::Level::DEBUG);
    }
}
