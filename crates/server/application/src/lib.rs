// Courier Dispatch - Application Layer
// Casos de uso: encolar comandos, orquestar handlers y el pipeline del outbox

pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod orchestration;
pub mod outbox;
pub mod sweeper;

pub use dispatch::{CommandDispatcher, EnqueueOutcome};
pub use error::{DispatchError, OrchestrationError, OutboxError};
pub use jobs::DispatchJobHandler;
pub use orchestration::{OrchestrationOutcome, Orchestrator};
pub use outbox::{
    DeliveryOutcome, DeliveryProcessor, DeliverySweepReport, DeliverySweeper,
    OutboxDispatchReport, OutboxDispatcher, OutboxWriter, write_event,
};
pub use sweeper::{RetrySweeper, SweepReport};
