//! Log subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// [`Settings::log_level`].
///
/// Safe to call on every cold start; a subscriber that is already installed
/// is left in place.
pub fn init(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .try_init();
}
