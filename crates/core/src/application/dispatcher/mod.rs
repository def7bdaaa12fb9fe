// Dispatcher - claim cycle, stale-lock reclaim, and worker-pool fan-out

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{OutboxRecord, TaskEnvelope, WorkerId};
use crate::error::{AppError, Result};
use crate::port::{OutboxRepository, TimeProvider, WorkflowEngine, WorkflowRun};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Dispatcher configuration (environment-level)
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub dispatch_concurrency: usize,
    pub lock_timeout_ms: i64,
    pub enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            enabled: true,
        }
    }
}

/// Outcome counts for one dispatch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// True when the tick was skipped by the re-entrancy guard
    pub skipped: bool,
    pub reclaimed: u64,
    pub claimed: usize,
    pub dispatched: usize,
    pub retried: usize,
    pub failed: usize,
}

impl CycleStats {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Per-record resolution of a dispatch attempt
enum DispatchOutcome {
    Dispatched,
    Retried,
    Failed,
}

/// Dispatcher instance.
///
/// Holds its own running/disabled state so tests can run independent
/// dispatchers without shared globals. Multiple instances (in one process or
/// many) may poll the same store; the store's atomic claim statement keeps
/// their batches disjoint.
pub struct Dispatcher {
    outbox_repo: Arc<dyn OutboxRepository>,
    engine: Arc<dyn WorkflowEngine>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    config: DispatcherConfig,
    worker_id: WorkerId,
    cycle_running: AtomicBool,
    disabled: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        outbox_repo: Arc<dyn OutboxRepository>,
        engine: Arc<dyn WorkflowEngine>,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
        config: DispatcherConfig,
    ) -> Self {
        let worker_id = format!("dispatcher-{}", uuid::Uuid::new_v4());
        Self::with_worker_id(
            outbox_repo,
            engine,
            retry_policy,
            time_provider,
            config,
            worker_id,
        )
    }

    /// Constructor with an explicit worker identity (tests)
    pub fn with_worker_id(
        outbox_repo: Arc<dyn OutboxRepository>,
        engine: Arc<dyn WorkflowEngine>,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
        config: DispatcherConfig,
        worker_id: impl Into<WorkerId>,
    ) -> Self {
        Self {
            outbox_repo,
            engine,
            retry_policy,
            time_provider,
            config,
            worker_id: worker_id.into(),
            cycle_running: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Run the polling loop until shutdown.
    ///
    /// Each tick runs one stale-lock reclaim pass followed by one claim
    /// cycle. A store-level cycle error is logged and the loop continues;
    /// only a missing outbox table stops polling (the dispatcher degrades to
    /// disabled instead of error-looping).
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        if !self.config.enabled {
            info!("Dispatcher disabled by configuration");
            return Ok(());
        }

        match self.outbox_repo.store_ready().await {
            Ok(true) => {}
            Ok(false) => {
                self.disabled.store(true, Ordering::SeqCst);
                error!("Outbox table not found (migration missing?); dispatcher disabled");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        info!(
            worker_id = %self.worker_id,
            poll_interval_ms = %self.config.poll_interval.as_millis(),
            batch_size = %self.config.batch_size,
            concurrency = %self.config.dispatch_concurrency,
            "Dispatcher started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_disabled() {
                        error!("Dispatcher disabled (outbox store missing); stopping poll loop");
                        break;
                    }
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Dispatch cycle failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!(worker_id = %self.worker_id, "Dispatcher shutting down");
                    break;
                }
            }
        }

        info!(worker_id = %self.worker_id, "Dispatcher stopped");
        Ok(())
    }

    /// Run a single dispatch cycle: reclaim stale locks, claim a batch, fan
    /// the batch out over the worker pool.
    ///
    /// If a cycle is already in flight on this instance, the call is skipped
    /// rather than queued.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        if self.is_disabled() {
            return Ok(CycleStats::skipped());
        }
        if self.cycle_running.swap(true, Ordering::SeqCst) {
            debug!(worker_id = %self.worker_id, "Cycle already running, skipping tick");
            return Ok(CycleStats::skipped());
        }

        let result = self.cycle_inner().await;
        self.cycle_running.store(false, Ordering::SeqCst);

        if let Err(AppError::StoreMissing(msg)) = &result {
            self.disabled.store(true, Ordering::SeqCst);
            error!(error = %msg, "Outbox store missing; dispatcher disabled");
        }

        result
    }

    async fn cycle_inner(&self) -> Result<CycleStats> {
        let now = self.time_provider.now_millis();
        let mut stats = CycleStats::default();

        // Reclaim precedes every claim: records stuck DISPATCHING past the
        // lock timeout (crashed dispatcher) go back to PENDING, attempts
        // untouched.
        let cutoff = now - self.config.lock_timeout_ms;
        stats.reclaimed = self.outbox_repo.release_stale(cutoff, now).await?;
        if stats.reclaimed > 0 {
            warn!(
                reclaimed = %stats.reclaimed,
                lock_timeout_ms = %self.config.lock_timeout_ms,
                "Released stale dispatch locks"
            );
        }

        let batch = self
            .outbox_repo
            .claim_batch(&self.worker_id, self.config.batch_size.max(1), now)
            .await?;
        stats.claimed = batch.len();

        if batch.is_empty() {
            return Ok(stats);
        }

        debug!(
            worker_id = %self.worker_id,
            claimed = %stats.claimed,
            "Claimed outbox batch"
        );

        // Fan out across a bounded worker pool; completion order is not
        // claim order. Every per-record failure resolves to a status
        // transition inside dispatch_record, never an error out of the loop.
        // A zero-permit semaphore would never resolve, so the pool is at
        // least one wide regardless of configuration.
        let semaphore = Arc::new(Semaphore::new(self.config.dispatch_concurrency.max(1)));
        let mut join_set: JoinSet<DispatchOutcome> = JoinSet::new();

        for record in batch {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(format!("semaphore closed: {}", e)))?;

            let repo = Arc::clone(&self.outbox_repo);
            let engine = Arc::clone(&self.engine);
            let retry_policy = Arc::clone(&self.retry_policy);
            let time_provider = Arc::clone(&self.time_provider);

            join_set.spawn(async move {
                let _permit = permit;
                dispatch_record(repo, engine, retry_policy, time_provider, record).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(DispatchOutcome::Dispatched) => stats.dispatched += 1,
                Ok(DispatchOutcome::Retried) => stats.retried += 1,
                Ok(DispatchOutcome::Failed) => stats.failed += 1,
                Err(join_err) => {
                    // The record stays DISPATCHING; the reclaimer recovers it
                    // after the lock timeout.
                    error!(error = ?join_err, "Dispatch task panicked");
                }
            }
        }

        info!(
            worker_id = %self.worker_id,
            claimed = %stats.claimed,
            dispatched = %stats.dispatched,
            retried = %stats.retried,
            failed = %stats.failed,
            "Dispatch cycle complete"
        );

        Ok(stats)
    }
}

/// Resolve one claimed record: validate, hand off to the engine, and persist
/// the outcome. All errors become status transitions.
async fn dispatch_record(
    outbox_repo: Arc<dyn OutboxRepository>,
    engine: Arc<dyn WorkflowEngine>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    record: OutboxRecord,
) -> DispatchOutcome {
    let attempt_result = try_dispatch(engine.as_ref(), &record).await;
    let now = time_provider.now_millis();

    match attempt_result {
        Ok(run) => {
            info!(
                record_id = %record.id,
                task_type = %record.task_type,
                run_id = %run.run_id,
                "Record dispatched to workflow engine"
            );
            if let Err(e) = outbox_repo.mark_dispatched(&record.id, now, &run.run_id).await {
                // The run was started; the record stays DISPATCHING and will
                // be re-dispatched after reclaim (at-least-once).
                error!(
                    record_id = %record.id,
                    error = %e,
                    "Failed to persist dispatch result"
                );
            }
            DispatchOutcome::Dispatched
        }
        Err(e) => {
            let message = e.to_string();
            warn!(
                record_id = %record.id,
                task_type = %record.task_type,
                attempt = %record.attempts,
                error = %message,
                "Dispatch attempt failed"
            );

            match retry_policy.decide(&record) {
                RetryDecision::Retry(delay_ms) => {
                    if let Err(store_err) = outbox_repo
                        .reschedule(&record.id, now + delay_ms, &message, now)
                        .await
                    {
                        error!(
                            record_id = %record.id,
                            error = %store_err,
                            "Failed to reschedule record"
                        );
                    }
                    DispatchOutcome::Retried
                }
                RetryDecision::Exhausted => {
                    if let Err(store_err) =
                        outbox_repo.mark_failed(&record.id, now, &message).await
                    {
                        error!(
                            record_id = %record.id,
                            error = %store_err,
                            "Failed to mark record failed"
                        );
                    }
                    error!(
                        record_id = %record.id,
                        task_type = %record.task_type,
                        attempts = %record.attempts,
                        last_error = %message,
                        "Record permanently failed"
                    );
                    DispatchOutcome::Failed
                }
            }
        }
    }
}

/// Validate against the registry (mandatory at dispatch time) and start the
/// workflow. Validation failure is a retryable dispatch failure, same as an
/// engine error.
async fn try_dispatch(engine: &dyn WorkflowEngine, record: &OutboxRecord) -> Result<WorkflowRun> {
    record.task_type.validate_payload(&record.payload)?;

    let envelope = TaskEnvelope {
        outbox_id: record.id.clone(),
        task_type: record.task_type,
        payload: record.payload.clone(),
        dedupe_key: record.dedupe_key.clone(),
    };

    engine.start(record.task_type.workflow(), &envelope).await
}
