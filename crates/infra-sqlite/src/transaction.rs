// SQLite Transaction Implementation
//
// Business code enqueues through these transactions so the outbox insert
// commits or rolls back together with the business mutation.

use crate::outbox_repository::map_sqlx_error;
use crate::SqliteOutboxRepository;
use async_trait::async_trait;
use sqlx::{Sqlite, Transaction as SqlxTransaction};
use taskrelay_core::domain::{OutboxRecord, OutboxStatus, RecordId};
use taskrelay_core::error::{AppError, Result};
use taskrelay_core::port::{OutboxTransaction, Transaction, TransactionalOutboxRepository};

pub struct SqliteOutboxTransaction<'a> {
    tx: SqlxTransaction<'a, Sqlite>,
}

impl<'a> SqliteOutboxTransaction<'a> {
    pub fn new(tx: SqlxTransaction<'a, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteOutboxTransaction<'_> {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl OutboxTransaction for SqliteOutboxTransaction<'_> {
    async fn find_active_by_dedupe_key(&mut self, dedupe_key: &str) -> Result<Option<RecordId>> {
        let state_pending = OutboxStatus::Pending.to_string();
        let state_dispatching = OutboxStatus::Dispatching.to_string();

        let id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM outbox
            WHERE dedupe_key = ? AND status IN (?, ?)
            LIMIT 1
            "#,
        )
        .bind(dedupe_key)
        .bind(&state_pending)
        .bind(&state_dispatching)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn refresh_coalesced(&mut self, id: &RecordId, now_millis: i64) -> Result<()> {
        let result = sqlx::query("UPDATE outbox SET updated_at = ? WHERE id = ?")
            .bind(now_millis)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Record {} not found", id)));
        }

        Ok(())
    }

    async fn insert(&mut self, record: &OutboxRecord) -> Result<()> {
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
        .execute(&mut *self.tx)
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
}

#[async_trait]
impl TransactionalOutboxRepository for SqliteOutboxRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn OutboxTransaction>> {
        let tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteOutboxTransaction::new(tx)))
    }
}
