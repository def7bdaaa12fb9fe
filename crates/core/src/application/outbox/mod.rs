// Outbox Service - enqueue use case over the transactional store

pub mod enqueue;


pub use enqueue::EnqueueRequest;

use crate::domain::{record::DEFAULT_MAX_ATTEMPTS, RecordId};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider, TransactionalOutboxRepository};
use std::sync::Arc;
use tracing::debug;

/// Outbox service: the enqueue entry point for business code
pub struct OutboxService {
    outbox_repo: Arc<dyn TransactionalOutboxRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    default_max_attempts: i32,
}

impl OutboxService {
    pub fn new(
        outbox_repo: Arc<dyn TransactionalOutboxRepository>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            outbox_repo,
            id_provider,
            time_provider,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the attempt ceiling applied to requests that do not set one
    /// (deployment-level default, e.g. from TASKRELAY_MAX_ATTEMPTS)
    pub fn with_default_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    /// Enqueue a record in its own transaction (for callers without one).
    ///
    /// Losing a same-key insert race surfaces as a unique-index conflict;
    /// one fresh transaction then sees the winner's committed record and
    /// coalesces onto it instead of failing the caller.
    pub async fn enqueue(&self, mut req: EnqueueRequest) -> Result<RecordId> {
        if req.max_attempts.is_none() {
            req.max_attempts = Some(self.default_max_attempts);
        }

        match self.enqueue_once(req.clone()).await {
            Err(AppError::Conflict(message)) if req.dedupe_key.is_some() => {
                debug!(
                    dedupe_key = %req.dedupe_key.as_deref().unwrap_or_default(),
                    error = %message,
                    "Lost dedupe insert race, retrying to coalesce"
                );
                self.enqueue_once(req).await
            }
            result => result,
        }
    }

    async fn enqueue_once(&self, req: EnqueueRequest) -> Result<RecordId> {
        let mut tx = self.outbox_repo.begin_transaction().await?;

        let result = enqueue::execute_in_tx(
            tx.as_mut(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            req,
        )
        .await;

        match result {
            Ok(record_id) => {
                tx.commit().await?;
                Ok(record_id)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}
