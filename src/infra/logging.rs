//! Tracing bootstrap for the CLI binary.

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global subscriber once. The configured level is the
/// default; a `TSHIFT_LOG` environment variable overrides it.
pub fn init(level: &str, quiet: bool) {
    let default_directive = if quiet { "error" } else { level };
    let filter = EnvFilter::try_from_env("TSHIFT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    // A second init (e.g. in tests) is harmless; ignore the error.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
