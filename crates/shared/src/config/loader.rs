//! Configuration loader
//!
//! Loads [`DispatchConfig`] from an optional `.env` file and the process
//! environment.

use std::path::Path;

use super::dto::{
    DispatchConfig, LoggingConfig, OrchestratorConfig, OutboxRelayConfig, SchedulerConfig,
    SweeperConfig,
};
use super::error::{ConfigError, Result};
use super::validator::validate_dispatch_config;

/// Configuration loader
///
/// # Example
///
/// ```ignore
/// use courier_shared::config::ConfigLoader;
/// use std::path::PathBuf;
///
/// let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
/// let config = loader.load_dispatch_config()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Optional path to .env file
    env_file_path: Option<std::path::PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<std::path::PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the dispatch configuration.
    pub fn load_dispatch_config(&self) -> Result<DispatchConfig> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let config = DispatchConfig::from_env()?;
        validate_dispatch_config(&config)?;

        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

// ============================================================================
// Implementation: DispatchConfig::from_env
// ============================================================================

impl DispatchConfig {
    /// Build configuration from `COURIER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let orchestrator_defaults = OrchestratorConfig::default();
        let sweeper_defaults = SweeperConfig::default();
        let outbox_defaults = OutboxRelayConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        Ok(Self {
            orchestrator: OrchestratorConfig {
                max_handler_concurrency: parse_var(
                    &lookup,
                    "COURIER_MAX_HANDLER_CONCURRENCY",
                    orchestrator_defaults.max_handler_concurrency,
                )?,
                handler_timeout_secs: parse_optional_var(&lookup, "COURIER_HANDLER_TIMEOUT_SECS")?,
            },
            sweeper: SweeperConfig {
                interval_ms: parse_var(
                    &lookup,
                    "COURIER_SWEEP_INTERVAL_MS",
                    sweeper_defaults.interval_ms,
                )?,
                batch_size: parse_var(
                    &lookup,
                    "COURIER_SWEEP_BATCH_SIZE",
                    sweeper_defaults.batch_size,
                )?,
                orphan_grace_secs: parse_var(
                    &lookup,
                    "COURIER_ORPHAN_GRACE_SECS",
                    sweeper_defaults.orphan_grace_secs,
                )?,
            },
            outbox: OutboxRelayConfig {
                poll_interval_ms: parse_var(
                    &lookup,
                    "COURIER_OUTBOX_POLL_INTERVAL_MS",
                    outbox_defaults.poll_interval_ms,
                )?,
                batch_size: parse_var(
                    &lookup,
                    "COURIER_OUTBOX_BATCH_SIZE",
                    outbox_defaults.batch_size,
                )?,
            },
            scheduler: SchedulerConfig {
                queue_depth: parse_var(
                    &lookup,
                    "COURIER_SCHEDULER_QUEUE_DEPTH",
                    scheduler_defaults.queue_depth,
                )?,
                mode: parse_var(&lookup, "COURIER_SCHEDULER_MODE", scheduler_defaults.mode)?,
            },
            logging: LoggingConfig {
                level: lookup("COURIER_LOG_LEVEL")
                    .or_else(|| lookup("RUST_LOG"))
                    .unwrap_or_else(|| LoggingConfig::default().level),
            },
        })
    }
}

/// Parse a variable, falling back to `default` when unset.
/// A set but malformed value is an error rather than a silent fallback.
fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match parse_optional_var(lookup, var)? {
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

fn parse_optional_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw,
            }),
    }
}

// ============================================================================
// Tests
// ============================================================================
