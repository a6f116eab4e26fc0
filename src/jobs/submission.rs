use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::types::{embedded_result, JobId, SubmitOutcome, JOB_ID_FIELDS};
use crate::backend::api_client::{ApiResponse, RUN_STRATEGY_PATH};
use crate::backend::{BackendApi, RunRequest};
use crate::error::Result;
use crate::results::extract::first_match;

pub const GENERIC_REJECTION: &str = "Failed to start backtest";
pub const DETACHED_MESSAGE: &str = "Backtest launched in background, refresh history in a moment";

const DETACHED_STATUS_TAGS: &[&str] = &["started", "queued", "accepted"];

/// Posts backtest runs. Not idempotent: every call may start a new backend job.
#[derive(Debug, Clone)]
pub struct JobSubmissionClient {
    api: Arc<BackendApi>,
}

impl JobSubmissionClient {
    pub fn new(api: Arc<BackendApi>) -> Self {
        Self { api }
    }

    /// Submit a run and classify the immediate answer. Only transport failures are errors.
    #[instrument(skip(self, request), fields(strategy = %request.strategy))]
    pub async fn submit(&self, request: &RunRequest) -> Result<SubmitOutcome> {
        let response = self.api.post_json(RUN_STRATEGY_PATH, request).await?;
        let outcome = classify_submission(&response);

        match &outcome {
            SubmitOutcome::AsyncJob(job_id) => info!(job_id = %job_id, "Backtest accepted as background job"),
            SubmitOutcome::SyncResult(_) => info!("Backtest completed synchronously"),
            SubmitOutcome::Detached(_) => info!("Backtest launched in background without a job id"),
            SubmitOutcome::Rejected(reason) => warn!(
                http_status = %response.status,
                reason = %reason,
                "Backtest submission rejected"
            ),
        }

        Ok(outcome)
    }
}

/// Job id first, then an embedded result, then an id-less background acknowledgement;
/// anything else is a rejection carrying the backend's own words when it gave any.
pub fn classify_submission(response: &ApiResponse) -> SubmitOutcome {
    let Some(body) = &response.body else {
        return SubmitOutcome::Rejected(if response.is_success() {
            GENERIC_REJECTION.to_string()
        } else {
            format!("HTTP {}", response.status.as_u16())
        });
    };

    if !response.is_success() {
        return SubmitOutcome::Rejected(
            rejection_reason(body).unwrap_or_else(|| format!("HTTP {}", response.status.as_u16())),
        );
    }

    if let Some(job_id) = first_match(body, JOB_ID_FIELDS).and_then(JobId::from_value) {
        return SubmitOutcome::AsyncJob(job_id);
    }

    if let Some(record) = embedded_result(body) {
        return SubmitOutcome::SyncResult(record);
    }

    let status_tag = body.get("status").and_then(Value::as_str).map(str::to_ascii_lowercase);
    if status_tag.is_some_and(|tag| DETACHED_STATUS_TAGS.contains(&tag.as_str())) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(DETACHED_MESSAGE)
            .to_string();
        return SubmitOutcome::Detached(message);
    }

    SubmitOutcome::Rejected(rejection_reason(body).unwrap_or_else(|| GENERIC_REJECTION.to_string()))
}

/// `detail` as a string or a validation-error list, then `error`, then `message`
fn rejection_reason(body: &Value) -> Option<String> {
    let detail = match body.get("detail") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(errors)) => {
            let messages: Vec<String> = errors
                .iter()
                .filter_map(|e| e.get("msg").and_then(Value::as_str).or_else(|| e.as_str()))
                .map(str::to_string)
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    };

    detail
        .or_else(|| body.get("error").and_then(Value::as_str).map(str::to_string))
        .or_else(|| body.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|reason| !reason.trim().is_empty())
}
