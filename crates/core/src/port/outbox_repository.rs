// Outbox Repository Port (Interface)
//
// Every mutation is a single atomic, status-guarded statement in the adapter
// so concurrent dispatchers cannot lose updates.

use crate::domain::{OutboxRecord, OutboxStatus, RecordId};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for outbox persistence
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a new record (outside any caller transaction; used by tests
    /// and by the transactional enqueue convenience path)
    async fn insert(&self, record: &OutboxRecord) -> Result<()>;

    /// Find record by ID
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<OutboxRecord>>;

    /// Atomically claim up to `limit` eligible pending records for `worker_id`.
    ///
    /// Claimed records transition to `Dispatching` with lock fields set and
    /// `attempts` incremented, oldest-`available_at`-first. Competing claimers
    /// never receive the same record. An empty batch is not an error.
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: i64,
        now_millis: i64,
    ) -> Result<Vec<OutboxRecord>>;

    /// Release records stuck in `Dispatching` with `locked_at` older than
    /// `cutoff_millis` back to `Pending`, clearing lock fields. `attempts`
    /// is untouched; the stalled claim already counted.
    ///
    /// Returns the number of records released.
    async fn release_stale(&self, cutoff_millis: i64, now_millis: i64) -> Result<u64>;

    /// Resolve a claimed record as dispatched: set `dispatched_at` and
    /// `workflow_run_id`, clear lock fields and `last_error`.
    async fn mark_dispatched(&self, id: &RecordId, now_millis: i64, run_id: &str) -> Result<()>;

    /// Resolve a claimed record as retryable: back to `Pending` with a future
    /// `available_at`, record the error, clear lock fields.
    async fn reschedule(
        &self,
        id: &RecordId,
        available_at: i64,
        error: &str,
        now_millis: i64,
    ) -> Result<()>;

    /// Resolve a claimed record as permanently failed (attempts exhausted)
    async fn mark_failed(&self, id: &RecordId, now_millis: i64, error: &str) -> Result<()>;

    /// Count records by status
    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64>;

    /// Find all records by status (diagnostics and tests)
    async fn find_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxRecord>>;

    /// Whether the backing table exists. When it does not (migration not yet
    /// applied) the dispatcher disables itself instead of error-looping.
    async fn store_ready(&self) -> Result<bool>;
}
