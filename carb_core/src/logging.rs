//! Tracing setup for carbfx.
//!
//! Diagnostics always go to stderr. Stdout is reserved for command output
//! (effect tables, carbs on board) so it can be piped or redirected without
//! log lines mixed in. `RUST_LOG` overrides the default level.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level used by library consumers that do not pick one
pub const DEFAULT_LEVEL: &str = "info";

/// Install the global subscriber at [`DEFAULT_LEVEL`]
pub fn init() {
    init_with_level(DEFAULT_LEVEL)
}

/// Install the global subscriber, logging at `default_level` unless `RUST_LOG`
/// is set.
///
/// The CLI passes `warn` so routine file loads stay quiet.
pub fn init_with_level(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Route logs to the test harness at debug level
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
