//! Tracing Module - structured logging for the dispatch runtime
//!
//! Installs a single `fmt` layer filtered by the configured directive.
//! `RUST_LOG` is not consulted; the loader already maps it into
//! `LoggingConfig::level`.

use courier_shared::config::LoggingConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;

const FALLBACK_DIRECTIVE: &str = "info";

/// Result of tracing initialization
#[derive(Debug, Default)]
pub struct TracingResult {
    pub initialized: bool,
    pub errors: Vec<String>,
}

impl TracingResult {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parses the level directive, falling back to `info` when it is invalid.
pub fn build_filter(level: &str) -> (EnvFilter, Option<String>) {
    match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(e) => (
            EnvFilter::new(FALLBACK_DIRECTIVE),
            Some(format!("invalid log directive '{}': {}", level, e)),
        ),
    }
}

/// Initialize tracing
pub fn init_tracing(config: &LoggingConfig) -> TracingResult {
    let mut result = TracingResult::new();
    let (env_filter, filter_error) = build_filter(&config.level);
    result.errors.extend(filter_error);

    let logging_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .with_writer(std::io::stdout)
        .with_filter(env_filter);

    let subscriber = tracing_subscriber::Registry::default().with(logging_layer);
    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => {
            result.initialized = true;
            info!(level = %config.level, "Tracing initialized");
        }
        Err(e) => result.errors.push(format!("global subscriber already set: {}", e)),
    }

    result
}
