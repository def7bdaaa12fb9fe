// Workflow Engine Port
// Abstraction over the external workflow-execution engine. The engine runs
// the actual task handlers; this subsystem only hands work off.

use crate::domain::TaskEnvelope;
use crate::error::Result;
use async_trait::async_trait;

/// A started workflow run in the external engine
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub run_id: String,
}

/// Workflow engine trait
///
/// Implementations:
/// - WorkflowEngineClient (engine-client crate): JSON-RPC over HTTP
/// - mocks::MockWorkflowEngine: testing
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start the named workflow function with the task envelope as argument.
    ///
    /// Dispatch is at-least-once: the engine may be asked to start the same
    /// envelope again after a crash, so workflow functions must be idempotent.
    ///
    /// # Errors
    /// - AppError::Engine on any network or engine failure
    async fn start(&self, workflow: &str, envelope: &TaskEnvelope) -> Result<WorkflowRun>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Mock engine behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed, returning run ids run-1, run-2, ...
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail the first N calls, then succeed
        FailTimes(usize, String),
    }

    /// Mock workflow engine for testing
    pub struct MockWorkflowEngine {
        behavior: Arc<Mutex<MockBehavior>>,
        started: Arc<Mutex<Vec<TaskEnvelope>>>,
    }

    impl MockWorkflowEngine {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                started: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_fail_times(times: usize, message: impl Into<String>) -> Self {
            Self::new(MockBehavior::FailTimes(times, message.into()))
        }

        /// Number of start() calls made (successful or not)
        pub fn call_count(&self) -> usize {
            self.started.lock().unwrap().len()
        }

        /// Envelopes passed to start(), in call order
        pub fn started_envelopes(&self) -> Vec<TaskEnvelope> {
            self.started.lock().unwrap().clone()
        }

        /// Start calls per outbox record id (for exclusive-claim assertions)
        pub fn calls_per_record(&self) -> HashMap<String, usize> {
            let mut counts = HashMap::new();
            for envelope in self.started.lock().unwrap().iter() {
                *counts.entry(envelope.outbox_id.clone()).or_insert(0) += 1;
            }
            counts
        }
    }

    #[async_trait]
    impl WorkflowEngine for MockWorkflowEngine {
        async fn start(&self, _workflow: &str, envelope: &TaskEnvelope) -> Result<WorkflowRun> {
            let mut started = self.started.lock().unwrap();
            started.push(envelope.clone());
            let call_number = started.len();
            drop(started);

            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Success => Ok(WorkflowRun {
                    run_id: format!("run-{}", call_number),
                }),
                MockBehavior::Fail(msg) => Err(crate::error::AppError::Engine(msg)),
                MockBehavior::FailTimes(times, msg) => {
                    if call_number <= times {
                        Err(crate::error::AppError::Engine(msg))
                    } else {
                        Ok(WorkflowRun {
                            run_id: format!("run-{}", call_number),
                        })
                    }
                }
            }
        }
    }
}
