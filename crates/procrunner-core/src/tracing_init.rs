//! Log subscriber for the `procrunner` binary.
//!
//! Stdout belongs to the status display, so log lines go to stderr. While
//! the display redraws in place, an unset level defaults to `warn` to keep
//! per-launch and per-exit lines from shifting the redrawn frame.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(logging: &LoggingConfig, interactive: bool) -> String {
    format!("procrunner={}", logging.effective_level(interactive))
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(logging: &LoggingConfig, interactive: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(logging, interactive)));
    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_targets_the_binary_crate() {
        let logging = LoggingConfig::default();
        assert_eq!(default_filter(&logging, true), "procrunner=warn");
        assert_eq!(default_filter(&logging, false), "procrunner=info");
    }

    #[test]
    fn explicit_level_wins_on_a_terminal() {
        let logging = LoggingConfig {
            level: Some("debug".to_string()),
            json: false,
        };
        assert_eq!(default_filter(&logging, true), "procrunner=debug");
    }
}
