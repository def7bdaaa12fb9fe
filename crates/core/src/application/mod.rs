// Application Layer - Use Cases and Business Logic

pub mod dispatcher;
pub mod outbox;
pub mod retry;

// Re-exports
pub use dispatcher::{
    shutdown_channel, CycleStats, Dispatcher, DispatcherConfig, ShutdownSender, ShutdownToken,
};
pub use outbox::OutboxService;
pub use retry::{RetryDecision, RetryPolicy};
