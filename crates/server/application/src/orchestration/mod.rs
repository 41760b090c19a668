//! Envelope orchestration.

mod execution;
pub mod orchestrator;


pub(crate) use execution::invoke_guarded;
pub use orchestrator::{OrchestrationOutcome, Orchestrator};
