//! Wire protocol for the "SparkMonitor" comm channel.
//!
//! A Spark-enabled kernel runs a listener that streams job/stage/task
//! lifecycle events to the frontend over a named bidirectional comm channel.
//! Every frame on the channel is a JSON envelope; frames from the kernel
//! carry the event itself as a nested JSON-encoded string in `msg`.
//!
//! The inner payload is keyed by a `msgtype` discriminant drawn from a
//! closed set of lifecycle kinds. Unknown kinds are preserved as
//! [`SparkEvent::Unrecognized`] so callers can log them, rather than being
//! treated as decode errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the comm channel the kernel-side listener serves.
pub const CHANNEL_NAME: &str = "SparkMonitor";

/// Envelope discriminant on frames sent by the kernel-side listener.
pub const FROM_BACKEND: &str = "fromscala";

/// Envelope discriminant announcing a fresh frontend listener.
pub const OPEN_FROM_FRONTEND: &str = "openfromfrontend";

/// A frame on the comm channel, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommMessage {
    pub msgtype: String,

    /// JSON-encoded event payload; present on backend frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl CommMessage {
    /// The announce frame sent right after the channel opens, telling the
    /// listener a fresh frontend is attached.
    pub fn open_from_frontend() -> Self {
        Self {
            msgtype: OPEN_FROM_FRONTEND.to_string(),
            msg: None,
        }
    }

    /// A backend frame wrapping a JSON-encoded event payload.
    pub fn from_backend(payload: impl Into<String>) -> Self {
        Self {
            msgtype: FROM_BACKEND.to_string(),
            msg: Some(payload.into()),
        }
    }
}

/// Errors decoding the inner event payload of a backend frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload has no msgtype discriminant")]
    MissingKind,
}

/// A job started on the Spark scheduler.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStart {
    pub job_id: i64,
    #[serde(default)]
    pub stage_ids: Vec<i64>,
    #[serde(default)]
    pub name: String,
    pub submission_time: Option<i64>,
    pub status: Option<String>,
    pub job_group: Option<String>,
    #[serde(default)]
    pub num_tasks: i32,
    #[serde(default)]
    pub total_cores: i32,
    #[serde(default)]
    pub num_executors: i32,
    pub app_id: Option<String>,
}

/// A job finished, successfully or not.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnd {
    pub job_id: i64,
    pub status: Option<String>,
    pub completion_time: Option<i64>,
}

/// A stage was submitted to the scheduler.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSubmitted {
    pub stage_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub num_tasks: i32,
    #[serde(default)]
    pub parent_ids: Vec<i64>,
    pub submission_time: Option<i64>,
    #[serde(default)]
    pub job_ids: Vec<i64>,
}

/// A stage completed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCompleted {
    pub stage_id: i64,
    pub status: Option<String>,
    #[serde(default)]
    pub num_tasks: i32,
    pub submission_time: Option<i64>,
    pub completion_time: Option<i64>,
}

/// A stage transitioned to actively running tasks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageActive {
    pub stage_id: i64,
    pub status: Option<String>,
}

/// A task launched on an executor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStart {
    pub task_id: i64,
    pub stage_id: i64,
    #[serde(default)]
    pub index: i32,
    pub launch_time: Option<i64>,
    #[serde(default)]
    pub executor_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub speculative: bool,
}

/// A task finished on an executor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnd {
    pub task_id: i64,
    pub stage_id: i64,
    #[serde(default)]
    pub index: i32,
    pub launch_time: Option<i64>,
    pub finish_time: Option<i64>,
    #[serde(default)]
    pub executor_id: String,
    #[serde(default)]
    pub host: String,
    pub status: Option<String>,
    #[serde(default)]
    pub speculative: bool,
}

/// The Spark application started.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStart {
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_name: String,
    pub spark_user: Option<String>,
    pub start_time: Option<i64>,
}

/// The Spark application ended. Received but never forwarded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationEnd {
    pub end_time: Option<i64>,
}

/// An executor joined the application.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorAdded {
    #[serde(default)]
    pub executor_id: String,
    pub host: Option<String>,
    #[serde(default)]
    pub total_cores: i32,
    pub time: Option<i64>,
}

/// An executor left the application.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorRemoved {
    #[serde(default)]
    pub executor_id: String,
    #[serde(default)]
    pub total_cores: i32,
    pub time: Option<i64>,
}

/// A decoded event from the kernel-side listener.
///
/// One variant per recognized `msgtype`, each carrying exactly the fields
/// that kind is known to emit (extra wire fields are ignored). Unknown
/// discriminants are captured in `Unrecognized` so they round-trip into a
/// log line instead of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SparkEvent {
    JobStart(JobStart),
    JobEnd(JobEnd),
    StageSubmitted(StageSubmitted),
    StageCompleted(StageCompleted),
    StageActive(StageActive),
    TaskStart(TaskStart),
    TaskEnd(TaskEnd),
    ApplicationStart(ApplicationStart),
    ApplicationEnd(ApplicationEnd),
    ExecutorAdded(ExecutorAdded),
    ExecutorRemoved(ExecutorRemoved),
    /// An event kind this frontend does not know about.
    Unrecognized(String),
}

impl SparkEvent {
    /// Decode the JSON payload of a backend frame.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let kind = value
            .get("msgtype")
            .and_then(|v| v.as_str())
            .ok_or(ProtocolError::MissingKind)?
            .to_string();

        let event = match kind.as_str() {
            "sparkJobStart" => SparkEvent::JobStart(serde_json::from_value(value)?),
            "sparkJobEnd" => SparkEvent::JobEnd(serde_json::from_value(value)?),
            "sparkStageSubmitted" => SparkEvent::StageSubmitted(serde_json::from_value(value)?),
            "sparkStageCompleted" => SparkEvent::StageCompleted(serde_json::from_value(value)?),
            "sparkStageActive" => SparkEvent::StageActive(serde_json::from_value(value)?),
            "sparkTaskStart" => SparkEvent::TaskStart(serde_json::from_value(value)?),
            "sparkTaskEnd" => SparkEvent::TaskEnd(serde_json::from_value(value)?),
            "sparkApplicationStart" => {
                SparkEvent::ApplicationStart(serde_json::from_value(value)?)
            }
            "sparkApplicationEnd" => SparkEvent::ApplicationEnd(serde_json::from_value(value)?),
            "sparkExecutorAdded" => SparkEvent::ExecutorAdded(serde_json::from_value(value)?),
            "sparkExecutorRemoved" => SparkEvent::ExecutorRemoved(serde_json::from_value(value)?),
            _ => SparkEvent::Unrecognized(kind),
        };
        Ok(event)
    }

    /// The wire discriminant this event was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            SparkEvent::JobStart(_) => "sparkJobStart",
            SparkEvent::JobEnd(_) => "sparkJobEnd",
            SparkEvent::StageSubmitted(_) => "sparkStageSubmitted",
            SparkEvent::StageCompleted(_) => "sparkStageCompleted",
            SparkEvent::StageActive(_) => "sparkStageActive",
            SparkEvent::TaskStart(_) => "sparkTaskStart",
            SparkEvent::TaskEnd(_) => "sparkTaskEnd",
            SparkEvent::ApplicationStart(_) => "sparkApplicationStart",
            SparkEvent::ApplicationEnd(_) => "sparkApplicationEnd",
            SparkEvent::ExecutorAdded(_) => "sparkExecutorAdded",
            SparkEvent::ExecutorRemoved(_) => "sparkExecutorRemoved",
            SparkEvent::Unrecognized(kind) => kind,
        }
    }
}
