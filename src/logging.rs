//! Diagnostics go to stderr through `tracing`.
//!
//! The writer looks up fd 2 on every event, so once the daemon points its
//! stderr at `run/error_log` everything it logs afterwards lands there.

use tracing_subscriber::EnvFilter;

/// Filter directives, e.g. `SLOOP_LOG=debug`
pub const ENV_LOG: &str = "SLOOP_LOG";

pub fn init() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"));

    // A second call (tests, embedding binaries) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
