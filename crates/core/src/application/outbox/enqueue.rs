// Enqueue Use Case
//
// Writes the intent-to-dispatch record in the same transaction as the
// caller's business mutation, so both commit or roll back together.

use crate::domain::{record::DEFAULT_MAX_ATTEMPTS, OutboxRecord, RecordId, TaskType};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, OutboxTransaction, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum JSON nesting depth accepted in a payload
const MAX_PAYLOAD_DEPTH: usize = 32;

/// Maximum dedupe key length
const MAX_DEDUPE_KEY_LEN: usize = 255;

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub task_type: TaskType,
    pub payload: serde_json::Value,

    #[serde(default)]
    pub dedupe_key: Option<String>,

    #[serde(default)]
    pub max_attempts: Option<i32>,

    /// Earliest claim time in epoch ms; defaults to "now"
    #[serde(default)]
    pub available_at: Option<i64>,
}

impl EnqueueRequest {
    /// Raw payload; schema validation is deferred to dispatch time
    pub fn new(task_type: TaskType, payload: serde_json::Value) -> Self {
        Self {
            task_type,
            payload,
            dedupe_key: None,
            max_attempts: None,
            available_at: None,
        }
    }

    /// Typed payload; serialized and checked against the registry schema up
    /// front, so a mismatch fails the caller instead of burning attempts
    pub fn typed<P: Serialize>(task_type: TaskType, payload: &P) -> Result<Self> {
        let value = serde_json::to_value(payload)?;
        task_type.validate_payload(&value)?;
        Ok(Self::new(task_type, value))
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_available_at(mut self, available_at: i64) -> Self {
        self.available_at = Some(available_at);
        self
    }
}

/// Execute enqueue inside the caller's open transaction.
///
/// Dedup: if a non-terminal record already carries the same `dedupe_key`,
/// no new row is created; the existing row's `updated_at` is refreshed and
/// its id returned. Repeated enqueues of the same logical event become a
/// no-op beyond bookkeeping.
pub async fn execute_in_tx(
    tx: &mut dyn OutboxTransaction,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: EnqueueRequest,
) -> Result<RecordId> {
    validate_request(&req)?;

    let now = time_provider.now_millis();

    if let Some(key) = &req.dedupe_key {
        if let Some(existing_id) = tx.find_active_by_dedupe_key(key).await? {
            debug!(
                record_id = %existing_id,
                dedupe_key = %key,
                "Coalescing duplicate enqueue onto existing record"
            );
            tx.refresh_coalesced(&existing_id, now).await?;
            return Ok(existing_id);
        }
    }

    let record_id = id_provider.generate_id();

    let mut record = OutboxRecord::new(record_id.clone(), now, req.task_type, req.payload);
    record.dedupe_key = req.dedupe_key;
    record.max_attempts = req.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
    record.available_at = req.available_at.unwrap_or(now);

    tx.insert(&record).await?;

    debug!(
        record_id = %record_id,
        task_type = %record.task_type,
        available_at = %record.available_at,
        "Outbox record enqueued"
    );

    Ok(record_id)
}

/// Request-shape validation, independent of the payload schema
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    if let Some(key) = &req.dedupe_key {
        if key.is_empty() {
            return Err(AppError::Validation("dedupe_key must not be empty".into()));
        }
        if key.len() > MAX_DEDUPE_KEY_LEN {
            return Err(AppError::Validation(format!(
                "dedupe_key too long ({} > {} chars)",
                key.len(),
                MAX_DEDUPE_KEY_LEN
            )));
        }
    }

    if let Some(max_attempts) = req.max_attempts {
        if max_attempts < 1 {
            return Err(AppError::Validation(format!(
                "max_attempts out of range: {}",
                max_attempts
            )));
        }
    }

    if json_depth(&req.payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(
            "payload too deeply nested".to_string(),
        ));
    }

    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
