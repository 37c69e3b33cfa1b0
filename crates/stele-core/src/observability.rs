//! Observability infrastructure: structured logging with consistent spans.
//!
//! Provides the one-time logging initializer and span constructors used by
//! the namespace and ingestion components.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops. Log levels are controlled through
/// `RUST_LOG` (e.g. `info`, `stele_namespace=debug`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for namespace operations (search, modify, load).
#[must_use]
pub fn namespace_span(operation: &str) -> Span {
    tracing::info_span!("namespace", op = operation)
}

/// Creates a span for the ingestion path.
#[must_use]
pub fn ingest_span(operation: &str) -> Span {
    tracing::debug_span!("ingest", op = operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_span_helpers() {
        let span = namespace_span("search");
        let _guard = span.enter();
        tracing::info!("message in span");
    }
}
