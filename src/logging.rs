//! # Structured Logging
//!
//! Environment-aware tracing initialization. Console output is human
//! readable in development and JSON in production; the filter honors
//! `RUST_LOG` when set and falls back to an environment-specific default.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// Safe to call from multiple entry points (tests, embedding binaries);
/// subsequent calls are no-ops, and an already-installed global subscriber
/// is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));

        let registry = tracing_subscriber::registry().with(filter);

        let result = if environment == "production" {
            registry
                .with(fmt::layer().with_target(true).with_ansi(false).json())
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(true).with_ansi(true))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed, keeping it");
        }
    });
}

fn get_environment() -> String {
    std::env::var("CONDUCTOR_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}
