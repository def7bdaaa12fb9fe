// SQLite OutboxRepository Implementation
//
// Every status mutation is a single guarded UPDATE statement. SQLite has no
// FOR UPDATE SKIP LOCKED; the claim is an atomic conditional UPDATE over a
// bounded sub-select, which under the single-writer model gives competing
// dispatchers mutually exclusive batches.

use async_trait::async_trait;
use sqlx::SqlitePool;
use taskrelay_core::application::dispatcher::constants::RETRY_MIN_DELAY_SECS;
use taskrelay_core::domain::{OutboxRecord, OutboxStatus, RecordId, TaskType};
use taskrelay_core::error::{AppError, Result};
use taskrelay_core::port::OutboxRepository;
use tracing::warn;

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();

            // Missing outbox table disables the dispatcher loop rather than
            // error-looping per record
            if message.contains("no such table") {
                return AppError::StoreMissing(message.to_string());
            }

            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => {
                        // UNIQUE constraint failed
                        AppError::Conflict(format!(
                            "Unique constraint violation: {} ({})",
                            message, code_str
                        ))
                    }
                    "5" | "517" => {
                        // SQLITE_BUSY / SQLITE_BUSY_SNAPSHOT - database is locked
                        AppError::Database(format!("Database locked (SQLITE_BUSY): {}", message))
                    }
                    "13" => {
                        // SQLITE_FULL - database or disk is full
                        AppError::Database(format!("Database full: {}", message))
                    }
                    _ => AppError::Database(format!("Database error [{}]: {}", code_str, message)),
                }
            } else {
                AppError::Database(format!("Database error: {}", message))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteOutboxRepository {
    pool: SqlitePool,
}

impl SqliteOutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutboxRepository {
    async fn insert(&self, record: &OutboxRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox (
                id, task_type, payload, dedupe_key,
                status, attempts, max_attempts, available_at,
                locked_at, locked_by,
                dispatched_at, workflow_run_id, failed_at, last_error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.task_type.as_str())
        .bind(record.payload.to_string())
        .bind(&record.dedupe_key)
        .bind(record.status.to_string())
        .bind(record.attempts)
        .bind(record.max_attempts)
        .bind(record.available_at)
        .bind(record.locked_at)
        .bind(&record.locked_by)
        .bind(record.dispatched_at)
        .bind(&record.workflow_run_id)
        .bind(record.failed_at)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::EnqueueFailed(format!(
                "insert affected no rows for record {}",
                record.id
            )));
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<OutboxRecord>> {
        let row = sqlx::query_as::<_, OutboxRow>("SELECT * FROM outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| r.into_record()).transpose()
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: i64,
        now_millis: i64,
    ) -> Result<Vec<OutboxRecord>> {
        let state_dispatching = OutboxStatus::Dispatching.to_string();
        let state_pending = OutboxStatus::Pending.to_string();

        // SQLite treats LIMIT <= 0 as unlimited; the batch must stay bounded
        let limit = limit.max(1);

        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox
            SET status = ?, locked_at = ?, locked_by = ?,
                attempts = attempts + 1, updated_at = ?
            WHERE id IN (
                SELECT id FROM outbox
                WHERE status = ? AND available_at <= ? AND attempts < max_attempts
                ORDER BY available_at ASC, created_at ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(&state_dispatching)
        .bind(now_millis)
        .bind(worker_id)
        .bind(now_millis)
        .bind(&state_pending)
        .bind(now_millis)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            let attempts = row.attempts;
            let max_attempts = row.max_attempts;

            match row.into_record() {
                Ok(record) => claimed.push(record),
                Err(e) => {
                    // A row this dispatcher version cannot represent (task
                    // type drift). Treat like a dispatch failure: consume the
                    // attempt, retry later or fail out.
                    let message = e.to_string();
                    warn!(record_id = %id, error = %message, "Claimed unparseable row");
                    if attempts >= max_attempts {
                        self.mark_failed(&id, now_millis, &message).await?;
                    } else {
                        self.reschedule(
                            &id,
                            now_millis + RETRY_MIN_DELAY_SECS * 1000,
                            &message,
                            now_millis,
                        )
                        .await?;
                    }
                }
            }
        }

        // RETURNING row order is unspecified; restore oldest-eligible-first
        claimed.sort_by(|a, b| {
            (a.available_at, a.created_at).cmp(&(b.available_at, b.created_at))
        });

        Ok(claimed)
    }

    async fn release_stale(&self, cutoff_millis: i64, now_millis: i64) -> Result<u64> {
        let state_pending = OutboxStatus::Pending.to_string();
        let state_dispatching = OutboxStatus::Dispatching.to_string();

        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = ?, locked_at = NULL, locked_by = NULL, updated_at = ?
            WHERE status = ? AND locked_at < ?
            "#,
        )
        .bind(&state_pending)
        .bind(now_millis)
        .bind(&state_dispatching)
        .bind(cutoff_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn mark_dispatched(&self, id: &RecordId, now_millis: i64, run_id: &str) -> Result<()> {
        let state_dispatched = OutboxStatus::Dispatched.to_string();
        let state_dispatching = OutboxStatus::Dispatching.to_string();

        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = ?, dispatched_at = ?, workflow_run_id = ?,
                locked_at = NULL, locked_by = NULL, last_error = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&state_dispatched)
        .bind(now_millis)
        .bind(run_id)
        .bind(now_millis)
        .bind(id)
        .bind(&state_dispatching)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.check_resolved(result.rows_affected(), id, "DISPATCHED")
            .await
    }

    async fn reschedule(
        &self,
        id: &RecordId,
        available_at: i64,
        error: &str,
        now_millis: i64,
    ) -> Result<()> {
        let state_pending = OutboxStatus::Pending.to_string();
        let state_dispatching = OutboxStatus::Dispatching.to_string();

        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = ?, available_at = ?, last_error = ?,
                locked_at = NULL, locked_by = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&state_pending)
        .bind(available_at)
        .bind(error)
        .bind(now_millis)
        .bind(id)
        .bind(&state_dispatching)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.check_resolved(result.rows_affected(), id, "PENDING").await
    }

    async fn mark_failed(&self, id: &RecordId, now_millis: i64, error: &str) -> Result<()> {
        let state_failed = OutboxStatus::Failed.to_string();
        let state_dispatching = OutboxStatus::Dispatching.to_string();

        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = ?, failed_at = ?, last_error = ?,
                locked_at = NULL, locked_by = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&state_failed)
        .bind(now_millis)
        .bind(error)
        .bind(now_millis)
        .bind(id)
        .bind(&state_dispatching)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.check_resolved(result.rows_affected(), id, "FAILED").await
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn find_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT * FROM outbox
            WHERE status = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|row| row.into_record()).collect()
    }

    async fn store_ready(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='outbox'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(count > 0)
    }
}

impl SqliteOutboxRepository {
    /// A zero-row resolution means the record was not ours to resolve;
    /// distinguish missing from already-transitioned for the error message
    async fn check_resolved(&self, rows_affected: u64, id: &RecordId, to: &str) -> Result<()> {
        if rows_affected > 0 {
            return Ok(());
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match current {
            None => Err(AppError::NotFound(format!("Record {} not found", id))),
            Some(status) => Err(AppError::InvalidState(format!(
                "Cannot transition record {} from {} to {}",
                id, status, to
            ))),
        }
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OutboxRow {
    pub(crate) id: String,
    pub(crate) task_type: String,
    pub(crate) payload: String,
    pub(crate) dedupe_key: Option<String>,
    pub(crate) status: String,
    pub(crate) attempts: i32,
    pub(crate) max_attempts: i32,
    pub(crate) available_at: i64,
    pub(crate) locked_at: Option<i64>,
    pub(crate) locked_by: Option<String>,
    pub(crate) dispatched_at: Option<i64>,
    pub(crate) workflow_run_id: Option<String>,
    pub(crate) failed_at: Option<i64>,
    pub(crate) last_error: Option<String>,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}

impl OutboxRow {
    pub(crate) fn into_record(self) -> Result<OutboxRecord> {
        // Unknown task types cannot be represented in the closed enum;
        // surfaced to the caller, which treats them as dispatch failures
        let task_type = TaskType::parse(&self.task_type)?;

        // An unknown status string means the row was written by something
        // this version does not understand; refuse to guess a lifecycle state
        let status = match self.status.as_str() {
            "PENDING" => OutboxStatus::Pending,
            "DISPATCHING" => OutboxStatus::Dispatching,
            "DISPATCHED" => OutboxStatus::Dispatched,
            "FAILED" => OutboxStatus::Failed,
            other => {
                return Err(AppError::Database(format!(
                    "unknown outbox status '{}' for record {}",
                    other, self.id
                )))
            }
        };

        // A malformed payload column still dispatches; schema validation
        // rejects it and routes it through the retry path
        let payload: serde_json::Value =
            serde_json::from_str(&self.payload).unwrap_or(serde_json::json!({}));

        Ok(OutboxRecord {
            id: self.id,
            task_type,
            payload,
            dedupe_key: self.dedupe_key,
            status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            available_at: self.available_at,
            locked_at: self.locked_at,
            locked_by: self.locked_by,
            dispatched_at: self.dispatched_at,
            workflow_run_id: self.workflow_run_id,
            failed_at: self.failed_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use serde_json::json;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn pending_record(available_at: i64) -> OutboxRecord {
        let mut record = OutboxRecord::new_test(TaskType::SendMail, json!({"id": "m1"}));
        record.available_at = available_at;
        record
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        let record = OutboxRecord::new_test(TaskType::SendMail, json!({"id": "m1"}));
        repo.insert(&record).await.unwrap();

        let found = repo.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.task_type, TaskType::SendMail);
        assert_eq!(found.status, OutboxStatus::Pending);
        assert_eq!(found.payload, json!({"id": "m1"}));
    }

    #[tokio::test]
    async fn test_claim_batch_limits_and_orders() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        // 5 eligible records with distinct availability times
        for i in 0..5 {
            let record = pending_record(1000 + i * 100);
            repo.insert(&record).await.unwrap();
        }

        let claimed = repo.claim_batch("worker-1", 2, 10_000).await.unwrap();
        assert_eq!(claimed.len(), 2);

        // Oldest-available-first
        assert_eq!(claimed[0].available_at, 1000);
        assert_eq!(claimed[1].available_at, 1100);

        for record in &claimed {
            assert_eq!(record.status, OutboxStatus::Dispatching);
            assert_eq!(record.attempts, 1);
            assert_eq!(record.locked_by.as_deref(), Some("worker-1"));
            assert!(record.locked_at.is_some());
        }

        // Remaining 3 untouched
        let pending = repo.count_by_status(OutboxStatus::Pending).await.unwrap();
        assert_eq!(pending, 3);
        for record in repo.find_by_status(OutboxStatus::Pending).await.unwrap() {
            assert_eq!(record.attempts, 0);
        }
    }

    #[tokio::test]
    async fn test_claim_batch_clamps_nonpositive_limit() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        for i in 0..5 {
            repo.insert(&pending_record(1000 + i * 100)).await.unwrap();
        }

        // LIMIT <= 0 would be unlimited in SQLite; the batch stays bounded
        let claimed = repo.claim_batch("worker-1", -1, 10_000).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let claimed = repo.claim_batch("worker-1", 0, 10_000).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let pending = repo.count_by_status(OutboxStatus::Pending).await.unwrap();
        assert_eq!(pending, 3);
    }

    #[tokio::test]
    async fn test_unknown_status_is_rejected() {
        let pool = setup_test_db().await;
        let repo = SqliteOutboxRepository::new(pool.clone());

        let record = pending_record(1000);
        repo.insert(&record).await.unwrap();

        sqlx::query("UPDATE outbox SET status = 'ARCHIVED' WHERE id = ?")
            .bind(&record.id)
            .execute(&pool)
            .await
            .unwrap();

        let err = repo.find_by_id(&record.id).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(err.to_string().contains("ARCHIVED"));
    }

    #[tokio::test]
    async fn test_claim_skips_future_and_exhausted() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        let future = pending_record(50_000);
        repo.insert(&future).await.unwrap();

        let mut exhausted = pending_record(1000);
        exhausted.attempts = 5;
        exhausted.max_attempts = 5;
        repo.insert(&exhausted).await.unwrap();

        let claimed = repo.claim_batch("worker-1", 10, 10_000).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_second_claim_sees_nothing() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        repo.insert(&pending_record(1000)).await.unwrap();

        let first = repo.claim_batch("worker-1", 10, 10_000).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = repo.claim_batch("worker-2", 10, 10_000).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_release_stale_restores_claimability() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        repo.insert(&pending_record(1000)).await.unwrap();
        let claimed = repo.claim_batch("worker-1", 1, 10_000).await.unwrap();
        let id = claimed[0].id.clone();

        // Not yet stale
        let released = repo.release_stale(10_000 - 120_000, 10_001).await.unwrap();
        assert_eq!(released, 0);

        // locked_at (10_000) is now older than the cutoff
        let released = repo.release_stale(10_001, 130_000).await.unwrap();
        assert_eq!(released, 1);

        let record = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Pending);
        assert!(record.locked_at.is_none());
        assert!(record.locked_by.is_none());
        // Reclaim does not touch attempts
        assert_eq!(record.attempts, 1);

        let reclaimed = repo.claim_batch("worker-2", 1, 130_000).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_mark_dispatched() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        repo.insert(&pending_record(1000)).await.unwrap();
        let claimed = repo.claim_batch("worker-1", 1, 10_000).await.unwrap();
        let id = claimed[0].id.clone();

        repo.mark_dispatched(&id, 11_000, "run-42").await.unwrap();

        let record = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Dispatched);
        assert_eq!(record.dispatched_at, Some(11_000));
        assert_eq!(record.workflow_run_id.as_deref(), Some("run-42"));
        assert!(record.locked_at.is_none());
        assert!(record.locked_by.is_none());
        assert!(record.last_error.is_none());

        // Terminal: resolving again is an invalid transition
        let err = repo.mark_dispatched(&id, 12_000, "run-43").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_reschedule_and_mark_failed() {
        let repo = SqliteOutboxRepository::new(setup_test_db().await);

        repo.insert(&pending_record(1000)).await.unwrap();
        let claimed = repo.claim_batch("worker-1", 1, 10_000).await.unwrap();
        let id = claimed[0].id.clone();

        repo.reschedule(&id, 20_000, "engine timeout", 10_500)
            .await
            .unwrap();

        let record = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.available_at, 20_000);
        assert_eq!(record.last_error.as_deref(), Some("engine timeout"));
        assert!(record.locked_at.is_none());

        // Claim again and fail out
        let claimed = repo.claim_batch("worker-1", 1, 30_000).await.unwrap();
        assert_eq!(claimed[0].attempts, 2);

        repo.mark_failed(&id, 31_000, "engine unreachable")
            .await
            .unwrap();

        let record = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, OutboxStatus::Failed);
        assert_eq!(record.failed_at, Some(31_000));
        assert_eq!(record.last_error.as_deref(), Some("engine unreachable"));
    }

    #[tokio::test]
    async fn test_store_ready_without_migrations() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let repo = SqliteOutboxRepository::new(pool);

        assert!(!repo.store_ready().await.unwrap());

        let err = repo
            .claim_batch("worker-1", 10, 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreMissing(_)));
    }
}
