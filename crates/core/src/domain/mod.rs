// Domain Layer - Pure business logic and entities

pub mod error;
pub mod record;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use record::{OutboxRecord, OutboxStatus, RecordId, WorkerId};
pub use task::{
    ChargeSubscriptionPayload, SendMailPayload, SendPushPayload, TaskEnvelope, TaskType,
};
