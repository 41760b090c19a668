//! Background scheduler adapters.

pub mod recording;
pub mod tokio_scheduler;

pub use recording::RecordingScheduler;
pub use tokio_scheduler::TokioScheduler;
