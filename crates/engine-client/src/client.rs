//! Workflow engine client implementation

use crate::error::{EngineClientError, Result};
use crate::types::{StartWorkflowRequest, StartWorkflowResponse};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::time::Duration;
use taskrelay_core::domain::TaskEnvelope;
use taskrelay_core::error::AppError;
use taskrelay_core::port::{WorkflowEngine, WorkflowRun};
use tracing::debug;

/// JSON-RPC client for the external workflow-execution engine
///
/// # Example
///
/// ```no_run
/// use taskrelay_engine_client::WorkflowEngineClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = WorkflowEngineClient::connect("http://127.0.0.1:9630")?;
/// # Ok(())
/// # }
/// ```
pub struct WorkflowEngineClient {
    client: HttpClient,
}

impl WorkflowEngineClient {
    /// Connect to the workflow engine
    ///
    /// # Arguments
    ///
    /// * `url` - RPC endpoint URL (e.g., `http://127.0.0.1:9630`)
    pub fn connect(url: impl AsRef<str>) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(url.as_ref())
            .map_err(|e| EngineClientError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self { client })
    }

    async fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<StartWorkflowResponse> {
        let params = rpc_params![request];
        let response: StartWorkflowResponse =
            self.client.request("workflow.start.v1", params).await?;

        Ok(response)
    }
}

#[async_trait]
impl WorkflowEngine for WorkflowEngineClient {
    async fn start(
        &self,
        workflow: &str,
        envelope: &TaskEnvelope,
    ) -> taskrelay_core::error::Result<WorkflowRun> {
        debug!(
            workflow = %workflow,
            outbox_id = %envelope.outbox_id,
            "Starting workflow run"
        );

        let request = StartWorkflowRequest {
            workflow: workflow.to_string(),
            input: envelope.clone(),
        };

        let response = self
            .start_workflow(request)
            .await
            .map_err(|e| AppError::Engine(e.to_string()))?;

        Ok(WorkflowRun {
            run_id: response.run_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_bad_url() {
        assert!(WorkflowEngineClient::connect("not a url").is_err());
    }
}
