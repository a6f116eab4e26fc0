use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::config::Config;
use crate::error::{DashboardError, Result};

pub const HEALTH_PATHS: &[&str] = &["health", "config"];
pub const LOGIN_URL_PATH: &str = "generate_token_url";
pub const RUN_STRATEGY_PATH: &str = "run_strategy";
pub const JOB_STATUS_PATH: &str = "job_status";
pub const HISTORY_PATHS: &[&str] = &["backtests", "latest"];

/// Status plus the decoded body; `body` is `None` when empty or not JSON
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }
}

/// HTTP access to the backtest backend. Reads retry transient failures; submissions never do,
/// since every POST may start a new backend job.
#[derive(Debug, Clone)]
pub struct BackendApi {
    config: Arc<Config>,
    read_client: ClientWithMiddleware,
    submit_client: reqwest::Client,
}

impl BackendApi {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DashboardError::network("client builder", e))?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(500), Duration::from_millis(2000))
            .build_with_max_retries(config.read_retries);

        let read_client = ClientBuilder::new(reqwest_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            config,
            read_client,
            submit_client: reqwest_client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// GET a path relative to the backend base URL
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        let url = self.config.endpoint(path)?;
        self.get_url(url).await
    }

    /// GET /job_status/{job_id}, with the id escaped as a single path segment
    pub async fn get_job_status(&self, job_id: &str) -> Result<ApiResponse> {
        let mut url = self.config.endpoint(JOB_STATUS_PATH)?;
        url.path_segments_mut()
            .map_err(|_| DashboardError::InvalidEndpoint(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(job_id);
        self.get_url(url).await
    }

    /// POST a JSON body without retries
    #[instrument(skip(self))]
    pub async fn post_json<B: Serialize + Debug + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let url = self.config.endpoint(path)?;
        tracing::info!(url = %url, "Sending request to backend");

        let response = self
            .submit_client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| DashboardError::network(url.as_str(), e))?;

        read_response(&url, response).await
    }

    // ==================== Helper/Private methods ====================

    #[instrument(skip_all, fields(url = %url))]
    async fn get_url(&self, url: Url) -> Result<ApiResponse> {
        debug!("Sending request to backend");

        let response = self
            .read_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DashboardError::network(url.as_str(), e))?;

        read_response(&url, response).await
    }
}

async fn read_response(url: &Url, response: reqwest::Response) -> Result<ApiResponse> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| DashboardError::network(url.as_str(), e))?;

    let body = if text.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(url = %url, error = %e, "Response body is not JSON");
                None
            }
        }
    };

    debug!(url = %url, status = %status, "Received backend response");
    Ok(ApiResponse { status, body })
}
