//! Bodies of the internal reply frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome reported for a synchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// The handler returned a value.
    Succeeded,
    /// The handler failed.
    Failed,
    /// The handler exceeded its declared timeout.
    Timeout,
}

/// Body of a `__syncResult` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResultData {
    /// Command that was invoked.
    pub command_id: String,
    /// Correlation id copied from the request.
    pub call_id: u64,
    /// Outcome.
    pub status: SyncStatus,
    /// Handler result, present when `status` is `SUCCEEDED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message, present when `status` is `FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SyncResultData {
    /// A successful result.
    pub fn succeeded(command_id: impl Into<String>, call_id: u64, result: Value) -> Self {
        Self {
            command_id: command_id.into(),
            call_id,
            status: SyncStatus::Succeeded,
            result: Some(result),
            error_message: None,
        }
    }

    /// A failed result.
    pub fn failed(command_id: impl Into<String>, call_id: u64, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            call_id,
            status: SyncStatus::Failed,
            result: None,
            error_message: Some(message.into()),
        }
    }

    /// A timed-out result.
    pub fn timed_out(command_id: impl Into<String>, call_id: u64) -> Self {
        Self {
            command_id: command_id.into(),
            call_id,
            status: SyncStatus::Timeout,
            result: None,
            error_message: None,
        }
    }
}

/// Body of an `__error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    /// Command whose processing failed, if the frame could be parsed that far.
    #[serde(default)]
    pub command_id: Option<String>,
    /// Failure description.
    pub message: String,
}
