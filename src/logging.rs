//! Log output setup.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `level` when
/// `RUST_LOG` is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed, which makes
/// repeated calls (from tests, or from an embedding program) harmless.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
