// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod outbox_repository;
pub mod time_provider;
pub mod transaction;
pub mod workflow_engine;

// Re-exports
pub use id_provider::IdProvider;
pub use outbox_repository::OutboxRepository;
pub use time_provider::TimeProvider;
pub use transaction::{OutboxTransaction, Transaction, TransactionalOutboxRepository};
pub use workflow_engine::{WorkflowEngine, WorkflowRun};
