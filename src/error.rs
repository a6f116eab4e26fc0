use thiserror::Error;

pub const NETWORK_FAILURE_MESSAGE: &str = "Failed to contact backend";
pub const AUTH_REQUIRED_MESSAGE: &str = "No valid Kite token. Log in with Kite before running a backtest";

/// Failure taxonomy of the dashboard client. None of these are fatal to the caller.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// The request never completed, or its body could not be read
    #[error("request to {endpoint} failed: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest_middleware::Error,
    },

    /// The backend answered but refused the request
    #[error("backend rejected request: {0}")]
    BackendRejection(String),

    /// A whole response was unusable (individual run fields are absorbed by the normalizer)
    #[error("unexpected payload from {endpoint}: {detail}")]
    MalformedPayload { endpoint: String, detail: String },

    /// Submission attempted without a valid brokerage token
    #[error("no valid brokerage token")]
    AuthPrecondition,

    /// A run is already being submitted or polled
    #[error("a backtest is already running")]
    RunInProgress,

    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl DashboardError {
    pub fn network(endpoint: impl Into<String>, source: impl Into<reqwest_middleware::Error>) -> Self {
        DashboardError::Network {
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }

    /// Text shown to the user for this failure
    pub fn status_message(&self) -> String {
        match self {
            DashboardError::Network { .. } => NETWORK_FAILURE_MESSAGE.to_string(),
            DashboardError::BackendRejection(detail) => detail.clone(),
            DashboardError::MalformedPayload { .. } => "Backend returned an unexpected response".to_string(),
            DashboardError::AuthPrecondition => AUTH_REQUIRED_MESSAGE.to_string(),
            DashboardError::RunInProgress => "A backtest is already running".to_string(),
            DashboardError::InvalidEndpoint(_) => "Backend URL is misconfigured".to_string(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, DashboardError::Network { .. })
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
