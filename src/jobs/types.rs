use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::results::extract::{coerce_string, first_match, FieldSource, SUMMARY_FIELDS};
use crate::results::RunRecord;

use FieldSource::Named;

pub const JOB_ID_FIELDS: &[FieldSource] = &[Named("job_id"), Named("jobId"), Named("task_id")];
pub const JOB_STATUS_FIELDS: &[FieldSource] = &[Named("status"), Named("state"), Named("job_status")];
pub const JOB_DONE_FLAG_FIELDS: &[FieldSource] = &[Named("done"), Named("completed"), Named("finished")];
pub const JOB_ERROR_FIELDS: &[FieldSource] = &[Named("error"), Named("detail")];
pub const JOB_MESSAGE_FIELDS: &[FieldSource] = &[Named("message"), Named("progress")];
pub const EMBEDDED_RESULT_FIELDS: &[FieldSource] = &[Named("result"), Named("run"), Named("data")];

/// Opaque backend handle for a background run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Job ids arrive as strings or numbers; blank ids do not count
    pub fn from_value(value: &Value) -> Option<Self> {
        coerce_string(value)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(JobId)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
    Other(String), // Unrecognised tags are treated as still in progress
}

impl JobStatus {
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "submitted" | "queued" | "pending" => JobStatus::Submitted,
            "running" | "in_progress" | "started" | "processing" => JobStatus::Running,
            "completed" | "complete" | "done" | "finished" | "success" | "succeeded" => JobStatus::Completed,
            "failed" | "error" | "errored" => JobStatus::Failed,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            other => JobStatus::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Other(tag) => tag,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `GET /job_status/{id}` payload, read tolerantly
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub error: Option<String>,
    pub message: Option<String>,
    pub result: Option<RunRecord>,
}

impl StatusReport {
    pub fn from_payload(payload: &Value) -> Self {
        let result = embedded_result(payload);
        let tagged = first_match(payload, JOB_STATUS_FIELDS)
            .and_then(Value::as_str)
            .map(JobStatus::parse);

        // Some backends never send a tag and only flip a flag or attach the result
        let status = match tagged {
            Some(status) => status,
            None if first_match(payload, JOB_DONE_FLAG_FIELDS).and_then(Value::as_bool) == Some(true) => {
                JobStatus::Completed
            }
            None if result.is_some() => JobStatus::Completed,
            None => JobStatus::Other("unknown".to_string()),
        };

        Self {
            status,
            error: text_field(payload, JOB_ERROR_FIELDS),
            message: text_field(payload, JOB_MESSAGE_FIELDS),
            result,
        }
    }
}

/// What the backend said right after a run was posted
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    SyncResult(RunRecord),
    AsyncJob(JobId),
    Detached(String), // Accepted in the background without a job handle
    Rejected(String),
}

/// Lifecycle of the job currently owned by the poller
#[derive(Debug, Clone, PartialEq)]
pub enum PollerState {
    Idle,
    Polling(JobId),
    Completed(JobId),
    Failed { job_id: JobId, error: String },
    Cancelled(JobId),
}

impl PollerState {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            PollerState::Idle => None,
            PollerState::Polling(job_id)
            | PollerState::Completed(job_id)
            | PollerState::Cancelled(job_id)
            | PollerState::Failed { job_id, .. } => Some(job_id),
        }
    }
}

/// A run embedded in a response: under a nested result field, or the payload itself
pub(crate) fn embedded_result(payload: &Value) -> Option<RunRecord> {
    let nested = EMBEDDED_RESULT_FIELDS
        .iter()
        .filter_map(|source| source.read(payload))
        .find(|candidate| carries_result(candidate));

    match nested {
        Some(candidate) => RunRecord::from_value(candidate.clone()),
        None if carries_result(payload) => RunRecord::from_value(payload.clone()),
        None => None,
    }
}

fn carries_result(value: &Value) -> bool {
    value.is_object()
        && (RunRecord::looks_like_run(value) || first_match(value, SUMMARY_FIELDS).is_some_and(Value::is_object))
}

fn text_field(payload: &Value, sources: &[FieldSource]) -> Option<String> {
    first_match(payload, sources)
        .and_then(coerce_string)
        .filter(|text| !text.trim().is_empty())
}
