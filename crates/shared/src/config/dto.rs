//! Configuration Data Transfer Objects (DTOs)

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on concurrently executing handlers for one envelope.
pub const DEFAULT_MAX_HANDLER_CONCURRENCY: usize = 4;

/// Root configuration for the dispatch engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub orchestrator: OrchestratorConfig,
    pub sweeper: SweeperConfig,
    pub outbox: OutboxRelayConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Fan-out settings for one orchestration pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of handlers executing at the same time
    pub max_handler_concurrency: usize,

    /// Optional wall-clock limit for a single handler execution (seconds)
    pub handler_timeout_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_handler_concurrency: DEFAULT_MAX_HANDLER_CONCURRENCY,
            handler_timeout_secs: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }
}

/// Retry/orphan sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    pub interval_ms: u64,
    pub batch_size: usize,

    /// How long a Pending envelope, or a Failed envelope past its due time,
    /// may sit untouched before the sweep reschedules it (seconds)
    pub orphan_grace_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            batch_size: 100,
            orphan_grace_secs: 300,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }
}

/// Outbox relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRelayConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 50,
        }
    }
}

impl OutboxRelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which background scheduler implementation to wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// In-process tokio job queue
    #[default]
    Tokio,
    /// Records jobs and never runs them (test mode)
    Noop,
}

impl std::str::FromStr for SchedulerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tokio" => Ok(SchedulerMode::Tokio),
            "noop" => Ok(SchedulerMode::Noop),
            other => Err(format!("unknown scheduler mode: {}", other)),
        }
    }
}

/// Background scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity of the in-process job channel
    pub queue_depth: usize,
    pub mode: SchedulerMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            mode: SchedulerMode::Tokio,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full `EnvFilter` directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
