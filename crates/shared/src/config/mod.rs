//! Configuration module for the courier dispatch engine
//!
//! Configuration is loaded once at startup, validated, and passed to the
//! dispatcher, orchestrator, sweepers and scheduler by value.
//!
//! # Environment Variables
//!
//! All variables are optional; unset variables take the documented default.
//!
//! - `COURIER_MAX_HANDLER_CONCURRENCY`: handlers run at once per envelope (default: 4)
//! - `COURIER_HANDLER_TIMEOUT_SECS`: per-handler timeout, unset = none
//! - `COURIER_SWEEP_INTERVAL_MS`: retry sweep period (default: 5000)
//! - `COURIER_SWEEP_BATCH_SIZE`: envelopes per sweep (default: 100)
//! - `COURIER_ORPHAN_GRACE_SECS`: age before the sweep reschedules (default: 300)
//! - `COURIER_OUTBOX_POLL_INTERVAL_MS`: outbox relay period (default: 1000)
//! - `COURIER_OUTBOX_BATCH_SIZE`: messages per relay pass (default: 50)
//! - `COURIER_SCHEDULER_QUEUE_DEPTH`: in-process job queue capacity (default: 1024)
//! - `COURIER_SCHEDULER_MODE`: `tokio` or `noop` (default: tokio)
//! - `COURIER_LOG_LEVEL`: tracing filter directive (default: "info")

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{
    DispatchConfig, LoggingConfig, OrchestratorConfig, OutboxRelayConfig, SchedulerConfig,
    SchedulerMode, SweeperConfig,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::validate_dispatch_config;
