// Task Type Registry - closed set of task types and their payload contracts

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};
use super::record::RecordId;

/// Closed set of task types handled by the dispatcher.
///
/// Adding a variant forces an exhaustive-match update everywhere a task
/// is validated or handed to the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskType {
    SendMail,
    SendPush,
    ChargeSubscription,
}

impl TaskType {
    /// Wire name, as written by enqueue callers and stored in the outbox
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SendMail => "sendMail",
            TaskType::SendPush => "sendPush",
            TaskType::ChargeSubscription => "chargeSubscription",
        }
    }

    /// Workflow function name in the external engine
    pub fn workflow(&self) -> &'static str {
        match self {
            TaskType::SendMail => "sendMailWorkflow",
            TaskType::SendPush => "sendPushWorkflow",
            TaskType::ChargeSubscription => "chargeSubscriptionWorkflow",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sendMail" => Ok(TaskType::SendMail),
            "sendPush" => Ok(TaskType::SendPush),
            "chargeSubscription" => Ok(TaskType::ChargeSubscription),
            other => Err(DomainError::UnknownTaskType(other.to_string())),
        }
    }

    /// Validate an opaque payload against this type's schema.
    ///
    /// Mandatory before every engine hand-off; enqueue callers may also
    /// run it up front by building their request from a typed payload.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let check = |err: serde_json::Error| {
            DomainError::ValidationError(format!(
                "payload does not match schema for {}: {}",
                self.as_str(),
                err
            ))
        };

        match self {
            TaskType::SendMail => {
                serde_json::from_value::<SendMailPayload>(payload.clone()).map_err(check)?;
            }
            TaskType::SendPush => {
                serde_json::from_value::<SendPushPayload>(payload.clone()).map_err(check)?;
            }
            TaskType::ChargeSubscription => {
                serde_json::from_value::<ChargeSubscriptionPayload>(payload.clone())
                    .map_err(check)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload for `sendMail`: the mail to deliver, referenced by id.
/// Task handlers load the full message; the outbox stays thin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMailPayload {
    pub id: String,
}

/// Payload for `sendPush`: the notification id to deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendPushPayload {
    pub id: String,
}

/// Payload for `chargeSubscription`: the subscription id to charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChargeSubscriptionPayload {
    pub id: String,
}

/// Envelope handed to the workflow engine when a record is dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    pub outbox_id: RecordId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,
}
