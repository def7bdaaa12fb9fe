//! Workflow engine client for TaskRelay
//!
//! Implements the core `WorkflowEngine` port against the engine's JSON-RPC
//! endpoint. The engine executes the actual task handlers; TaskRelay only
//! hands envelopes off to it.

mod client;
mod error;
mod types;

pub use client::WorkflowEngineClient;
pub use error::EngineClientError;
pub use types::{StartWorkflowRequest, StartWorkflowResponse};
