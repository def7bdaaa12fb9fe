// Outbox Record Domain Model

use serde::{Deserialize, Serialize};

use super::task::TaskType;

/// Outbox record ID (UUID v4)
pub type RecordId = String;

/// Dispatcher worker identity (stored in `locked_by`)
pub type WorkerId = String;

/// Default ceiling on claim attempts when the caller does not specify one
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Outbox record lifecycle state
///
/// `Dispatched` and `Failed` are terminal; rows are never deleted by this
/// subsystem (retention is an external concern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Dispatching,
    Dispatched,
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Dispatched | OutboxStatus::Failed)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "PENDING"),
            OutboxStatus::Dispatching => write!(f, "DISPATCHING"),
            OutboxStatus::Dispatched => write!(f, "DISPATCHED"),
            OutboxStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outbox record: one row per unit of asynchronous work.
///
/// Written in the same transaction as the business mutation that caused it,
/// then claimed and resolved by the dispatcher. All timestamps are epoch ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: RecordId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,

    pub status: OutboxStatus,

    // Claim bookkeeping
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: i64,
    pub locked_at: Option<i64>,
    pub locked_by: Option<WorkerId>,

    // Terminal outcomes
    pub dispatched_at: Option<i64>,
    pub workflow_run_id: Option<String>,
    pub failed_at: Option<i64>,
    pub last_error: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl OutboxRecord {
    /// Create a new pending record.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique record ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `task_type` - Task type from the registry
    /// * `payload` - Opaque payload, semantically typed per `task_type`
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_type,
            payload,
            dedupe_key: None,
            status: OutboxStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            available_at: created_at,
            locked_at: None,
            locked_by: None,
            dispatched_at: None,
            workflow_run_id: None,
            failed_at: None,
            last_error: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// A record is claimable when it is pending, due, and has attempts left
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        self.status == OutboxStatus::Pending
            && self.available_at <= now_millis
            && self.attempts < self.max_attempts
    }

    /// Lock invariant: `Dispatching` implies both lock fields set, any other
    /// status implies both null
    pub fn lock_fields_consistent(&self) -> bool {
        match self.status {
            OutboxStatus::Dispatching => self.locked_at.is_some() && self.locked_by.is_some(),
            _ => self.locked_at.is_none() && self.locked_by.is_none(),
        }
    }

    /// Create a test record with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(task_type: TaskType, payload: serde_json::Value) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(id, created_at, task_type, payload)
    }
}
