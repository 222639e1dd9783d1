//! Diagnostic tracing for the `viper` binary.
//!
//! The library only emits events; installing a subscriber is the binary's job.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn";

/// Install a stderr subscriber filtered by `RUST_LOG` (default `warn`).
///
/// ```bash
/// RUST_LOG=viper=debug viper history
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_init_is_repeatable() {
        init();
        init();
        tracing::warn!("logging initialized twice");
    }
}
