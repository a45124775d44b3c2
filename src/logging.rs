//! Logging init: `tracing` to stderr, filtered by `RUST_LOG`.
//!
//! Worker processes must never log to stdout, which carries the `$init`
//! line.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,kio_dispatch=debug";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber for an application embedding the scheduler.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Install the global subscriber inside a worker process.
pub fn init_worker_logging(protocol: &str) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(protocol, pid = std::process::id(), "worker logging initialized");
    }
    installed
}
