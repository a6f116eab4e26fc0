use serde_json::Value;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::backend::api_client::HISTORY_PATHS;
use crate::backend::BackendApi;
use crate::error::{DashboardError, Result};
use crate::results::RunRecord;

/// Reads past backtest runs from the backend's history store
#[derive(Debug, Clone)]
pub struct HistoryStoreClient {
    api: Arc<BackendApi>,
}

impl HistoryStoreClient {
    pub fn new(api: Arc<BackendApi>) -> Self {
        Self { api }
    }

    /// Most recent run, or `None` when the store is empty
    pub async fn fetch_latest(&self) -> Result<Option<RunRecord>> {
        Ok(self.fetch_runs().await?.into_iter().next())
    }

    /// All runs, most recent first
    #[instrument(skip(self))]
    pub async fn fetch_runs(&self) -> Result<Vec<RunRecord>> {
        for path in HISTORY_PATHS {
            let response = self.api.get(path).await?;
            if response.is_not_found() {
                debug!(path = %path, "History endpoint not served, trying next");
                continue;
            }

            let http_status = response.status;
            let body = response.body.unwrap_or(Value::Null);
            let discriminator = body.get("status").and_then(Value::as_str);
            if !http_status.is_success() || discriminator != Some("ok") {
                let detail = body
                    .get("detail")
                    .or_else(|| body.get("error"))
                    .or_else(|| body.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Could not load run history (HTTP {})", http_status.as_u16()));
                warn!(path = %path, status = ?discriminator, detail = %detail, "History request rejected");
                return Err(DashboardError::BackendRejection(detail));
            }

            let records = match body.get("data") {
                Some(Value::Array(items)) => collect_records(items.iter().cloned()),
                Some(Value::Null) | None => Vec::new(),
                Some(single @ Value::Object(_)) => collect_records(std::iter::once(single.clone())),
                Some(other) => {
                    return Err(DashboardError::MalformedPayload {
                        endpoint: path.to_string(),
                        detail: format!("data is neither a list nor an object: {}", other),
                    });
                }
            };

            let records = order_most_recent_first(records);
            info!(path = %path, runs = records.len(), "Fetched run history");
            return Ok(records);
        }

        Err(DashboardError::MalformedPayload {
            endpoint: HISTORY_PATHS.join(" | "),
            detail: "no history endpoint served".to_string(),
        })
    }
}

fn collect_records(items: impl Iterator<Item = Value>) -> Vec<RunRecord> {
    items
        .enumerate()
        .filter_map(|(index, item)| {
            let record = RunRecord::from_value(item);
            if record.is_none() {
                warn!(index, "Skipping history entry that is not an object");
            }
            record
        })
        .collect()
}

/// Sort by parsed timestamp, newest first. Runs without a usable timestamp keep their backend
/// order after the timestamped ones; repeated timestamps keep only the first run.
pub fn order_most_recent_first(records: Vec<RunRecord>) -> Vec<RunRecord> {
    let mut seen = HashSet::new();
    let mut keyed: Vec<_> = records
        .into_iter()
        .filter_map(|record| {
            let at = record.parsed_timestamp();
            match at {
                Some(at) if !seen.insert(at) => {
                    debug!(timestamp = %at, "Dropping duplicate run");
                    None
                }
                _ => Some((at, record)),
            }
        })
        .collect();

    // Stable: untimestamped runs (None sorts last under Reverse) stay in backend order
    keyed.sort_by_key(|(at, _)| Reverse(*at));
    keyed.into_iter().map(|(_, record)| record).collect()
}
