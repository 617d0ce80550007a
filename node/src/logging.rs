//! Structured logging initialisation for the overlay node.
//!
//! Two output formats: human-readable lines for development, and
//! newline-delimited JSON for log aggregation. `RUST_LOG` overrides the
//! configured level filter when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Selects the output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty, coloured output for local development.
    Human,
    /// Newline-delimited JSON for production pipelines.
    Json,
}

impl LogFormat {
    /// Parse a config string. Anything other than `"json"` means human.
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Human
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// # Panics
///
/// Panics when a global subscriber has already been installed in this
/// process.
pub fn init_logging(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Human => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true))
                .init();
        }
    }
}
