//! Wire types for the engine's `workflow.start.v1` method

use serde::{Deserialize, Serialize};
use taskrelay_core::domain::TaskEnvelope;

/// Request: start a named workflow function with a task envelope as input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowRequest {
    pub workflow: String,
    pub input: TaskEnvelope,
}

/// Response: the run the engine started
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowResponse {
    pub run_id: String,
}
