//! Log output setup

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Filter built from `RUST_LOG`, falling back to the configured level
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init(config: &LoggingConfig) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(config.ansi),
        )
        .with(filter(config))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [valid filter".to_string(),
            ansi: false,
        };
        // Must not panic whatever RUST_LOG holds
        let _ = filter(&config);
    }

    #[test]
    fn test_init_twice() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ansi: false,
        };
        init(&config);
        assert!(!init(&config));
    }
}
