// TaskRelay Infrastructure - SQLite Adapter
// Implements: OutboxRepository, TransactionalOutboxRepository

mod connection;
mod migration;
mod outbox_repository;
mod transaction;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use outbox_repository::SqliteOutboxRepository;
pub use transaction::SqliteOutboxTransaction;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
