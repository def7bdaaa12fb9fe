//! Retry semantics through the full stack: engine failures reschedule with
//! backoff, exhausted records park in FAILED and stay there.

use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use taskrelay_core::application::outbox::EnqueueRequest;
use taskrelay_core::application::{Dispatcher, DispatcherConfig, OutboxService, RetryPolicy};
use taskrelay_core::domain::{OutboxStatus, TaskType};
use taskrelay_core::port::id_provider::UuidProvider;
use taskrelay_core::port::workflow_engine::mocks::MockWorkflowEngine;
use taskrelay_core::port::{OutboxRepository, TimeProvider};
use taskrelay_infra_sqlite::{create_pool, run_migrations, SqliteOutboxRepository};

const T0: i64 = 1_700_000_000_000;

struct MockClock(AtomicI64);

impl MockClock {
    fn new(now_millis: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now_millis)))
    }

    fn advance(&self, millis: i64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeProvider for MockClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

async fn setup(db_name: &str) -> (Arc<SqliteOutboxRepository>, Arc<MockClock>, OutboxService) {
    let db_path = format!("/tmp/taskrelay_test_{}.db", db_name);
    let _ = std::fs::remove_file(&db_path);

    let pool = create_pool(&db_path).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let repo = Arc::new(SqliteOutboxRepository::new(pool));
    let clock = MockClock::new(T0);
    let service = OutboxService::new(repo.clone(), Arc::new(UuidProvider), clock.clone());

    (repo, clock, service)
}

fn dispatcher(
    repo: Arc<SqliteOutboxRepository>,
    engine: Arc<MockWorkflowEngine>,
    clock: Arc<MockClock>,
) -> Dispatcher {
    Dispatcher::with_worker_id(
        repo,
        engine,
        Arc::new(RetryPolicy::new()),
        clock,
        DispatcherConfig::default(),
        "retry-worker",
    )
}

#[tokio::test]
async fn test_engine_failure_reschedules_with_backoff() {
    let (repo, clock, service) = setup("retry_reschedule").await;

    let record_id = service
        .enqueue(
            EnqueueRequest::new(TaskType::SendMail, json!({"id": "mail-1"})).with_max_attempts(3),
        )
        .await
        .unwrap();

    let engine = Arc::new(MockWorkflowEngine::new_fail("engine unreachable"));
    let dispatcher = dispatcher(repo.clone(), engine.clone(), clock);

    let stats = dispatcher.run_cycle().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(engine.call_count(), 1);

    let record = repo.find_by_id(&record_id).await.unwrap().unwrap();
    assert_eq!(record.status, OutboxStatus::Pending);
    assert_eq!(record.attempts, 1);
    // First retry: 5s base, 0.8-1.2 jitter, clamped to the 5s floor
    assert!(record.available_at >= T0 + 5_000);
    assert!(record.available_at <= T0 + 6_000);
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .contains("engine unreachable"));
    assert!(record.locked_by.is_none());
}

#[tokio::test]
async fn test_exhausted_record_marks_failed() {
    let (repo, clock, service) = setup("retry_exhausted").await;

    let record_id = service
        .enqueue(
            EnqueueRequest::new(TaskType::SendPush, json!({"id": "push-1"})).with_max_attempts(1),
        )
        .await
        .unwrap();

    let engine = Arc::new(MockWorkflowEngine::new_fail("boom"));
    let dispatcher = dispatcher(repo.clone(), engine, clock);

    let stats = dispatcher.run_cycle().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 0);

    let record = repo.find_by_id(&record_id).await.unwrap().unwrap();
    assert_eq!(record.status, OutboxStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert!(record.failed_at.is_some());
    assert!(record.last_error.as_deref().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_fail_once_then_succeed() {
    let (repo, clock, service) = setup("retry_recover").await;

    let record_id = service
        .enqueue(
            EnqueueRequest::new(TaskType::ChargeSubscription, json!({"id": "sub-1"}))
                .with_max_attempts(3),
        )
        .await
        .unwrap();

    let engine = Arc::new(MockWorkflowEngine::new_fail_times(1, "transient"));
    let dispatcher = dispatcher(repo.clone(), engine.clone(), clock.clone());

    let stats = dispatcher.run_cycle().await.unwrap();
    assert_eq!(stats.retried, 1);

    // Past the worst-case first backoff (6s)
    clock.advance(10_000);
    let stats = dispatcher.run_cycle().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(engine.call_count(), 2);

    let record = repo.find_by_id(&record_id).await.unwrap().unwrap();
    assert_eq!(record.status, OutboxStatus::Dispatched);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.workflow_run_id.as_deref(), Some("run-2"));
}

#[tokio::test]
async fn test_failed_record_is_never_revived() {
    let (repo, clock, service) = setup("retry_terminal").await;

    let record_id = service
        .enqueue(
            EnqueueRequest::new(TaskType::SendMail, json!({"id": "mail-x"})).with_max_attempts(1),
        )
        .await
        .unwrap();

    let engine = Arc::new(MockWorkflowEngine::new_fail("down"));
    let dispatcher = dispatcher(repo.clone(), engine.clone(), clock.clone());

    dispatcher.run_cycle().await.unwrap();
    assert_eq!(
        repo.find_by_id(&record_id)
            .await
            .unwrap()
            .unwrap()
            .status,
        OutboxStatus::Failed
    );

    // Even hours later, nothing reclaims or re-dispatches a FAILED record
    clock.advance(4 * 3_600_000);
    let stats = dispatcher.run_cycle().await.unwrap();
    assert_eq!(stats.reclaimed, 0);
    assert_eq!(stats.claimed, 0);
    assert_eq!(engine.call_count(), 1);

    let record = repo.find_by_id(&record_id).await.unwrap().unwrap();
    assert_eq!(record.status, OutboxStatus::Failed);
}

#[tokio::test]
async fn test_backoff_grows_across_attempts() {
    let (repo, clock, service) = setup("retry_growth").await;

    let record_id = service
        .enqueue(
            EnqueueRequest::new(TaskType::SendMail, json!({"id": "mail-g"})).with_max_attempts(5),
        )
        .await
        .unwrap();

    let engine = Arc::new(MockWorkflowEngine::new_fail("still down"));
    let dispatcher = dispatcher(repo.clone(), engine, clock.clone());

    // Attempts 1..3: floor holds at 5s; attempt 4 jumps to 8s base
    let mut seen_delays = Vec::new();
    for _ in 0..4 {
        let before = clock.now_millis();
        let stats = dispatcher.run_cycle().await.unwrap();
        assert_eq!(stats.retried, 1);

        let record = repo.find_by_id(&record_id).await.unwrap().unwrap();
        seen_delays.push(record.available_at - before);
        clock.advance(2 * 3_600_000);
    }

    for (i, delay) in seen_delays.iter().enumerate() {
        let base_secs = match i {
            0 | 1 | 2 => 5,
            _ => 8,
        };
        let min = base_secs * 1000 * 8 / 10;
        let max = base_secs * 1000 * 12 / 10;
        assert!(
            *delay >= min.max(5_000) && *delay <= max,
            "attempt {} delay {}ms outside [{}, {}]",
            i + 1,
            delay,
            min.max(5_000),
            max
        );
    }
}
