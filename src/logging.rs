//! Ambient structured-logging facility.
//!
//! Installs a global `tracing_subscriber` once per process. Level is read
//! from `STATEWIRE_LOG_LEVEL` as a single digit (`0`-`4`), following the
//! numbering of the logging framework this crate's error/log model is based
//! on (`Err`=0, `Warn`=1, `Info`=2, `Trace`=3, `Debug`=4) rather than
//! tracing's own severity ordering.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

const ENV_VAR: &str = "STATEWIRE_LOG_LEVEL";

fn level_from_digit(digit: &str) -> Option<tracing::Level> {
    match digit {
        "0" => Some(tracing::Level::ERROR),
        "1" => Some(tracing::Level::WARN),
        "2" => Some(tracing::Level::INFO),
        "3" => Some(tracing::Level::TRACE),
        "4" => Some(tracing::Level::DEBUG),
        _ => None,
    }
}

/// Install the global tracing subscriber, if one has not already been
/// installed by this process. Safe to call from every entry point
/// (`Server::start`, `Client::connect`, tests, ...) — only the first call
/// has any effect.
pub fn init() {
    INIT.call_once(|| {
        let level = match std::env::var(ENV_VAR) {
            Ok(v) => level_from_digit(v.trim()).unwrap_or_else(|| {
                // The subscriber isn't installed yet, so fall back to
                // eprintln for this one warning.
                eprintln!(
                    "{ENV_VAR}={v:?} is not a valid level digit (0-4); defaulting to Info"
                );
                tracing::Level::INFO
            }),
            Err(_) => tracing::Level::INFO,
        };

        let filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .ok();
    });
}
