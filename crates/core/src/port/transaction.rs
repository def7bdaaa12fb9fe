// Transaction port for atomic operations
//
// The enqueue use case runs inside the caller's transaction: if the business
// mutation rolls back, the outbox record must not persist.

use crate::domain::{OutboxRecord, RecordId};
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transactional outbox repository operations
#[async_trait]
pub trait TransactionalOutboxRepository: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn OutboxTransaction>>;
}

/// Outbox operations within a transaction
#[async_trait]
pub trait OutboxTransaction: Transaction {
    /// Find the id of the non-terminal record carrying `dedupe_key`, if any
    async fn find_active_by_dedupe_key(&mut self, dedupe_key: &str) -> Result<Option<RecordId>>;

    /// Refresh `updated_at` on a coalesced duplicate enqueue. The existing
    /// record's `available_at` and `attempts` are deliberately left alone so
    /// a duplicate during a backoff window does not expedite the retry.
    async fn refresh_coalesced(&mut self, id: &RecordId, now_millis: i64) -> Result<()>;

    /// Insert a record (within transaction)
    async fn insert(&mut self, record: &OutboxRecord) -> Result<()>;
}
