use serde_json::Value;
use tracing::{info, instrument, warn};
use url::Url;

use crate::backend::api_client::{HEALTH_PATHS, LOGIN_URL_PATH};
use crate::backend::types::LoginUrlResponse;
use crate::backend::BackendApi;
use crate::error::{DashboardError, Result};
use crate::results::extract::{first_match, FieldSource};

const TOKEN_VALID_FIELDS: &[FieldSource] = &[
    FieldSource::Named("token_valid"),
    FieldSource::Named("kite_token_valid"),
    FieldSource::Named("token_present"),
];

/// Ask the backend whether it holds a usable brokerage token.
/// Tries `/health`, then `/config` when the first is not served.
#[instrument(skip(api))]
pub async fn check_token(api: &BackendApi) -> Result<bool> {
    let mut last_status = None;
    for path in HEALTH_PATHS {
        let response = api.get(path).await?;
        if response.is_not_found() {
            last_status = Some(response.status);
            continue;
        }
        if !response.is_success() {
            return Err(DashboardError::BackendRejection(format!(
                "Health check failed with HTTP {}",
                response.status.as_u16()
            )));
        }

        let token_valid = response
            .body
            .as_ref()
            .and_then(|body| first_match(body, TOKEN_VALID_FIELDS))
            .map(is_truthy)
            .unwrap_or(false);
        info!(path = %path, token_valid, "Backend token status checked");
        return Ok(token_valid);
    }

    Err(DashboardError::MalformedPayload {
        endpoint: HEALTH_PATHS.join(" | "),
        detail: format!("no health endpoint served (last status {:?})", last_status),
    })
}

/// Fetch the brokerage login page the user should be sent to
#[instrument(skip(api))]
pub async fn fetch_login_url(api: &BackendApi) -> Result<Url> {
    let response = api.get(LOGIN_URL_PATH).await?;
    let login_url = response
        .body
        .filter(|_| response.status.is_success())
        .and_then(|body| serde_json::from_value::<LoginUrlResponse>(body).ok())
        .and_then(|parsed| parsed.login_url)
        .ok_or_else(|| DashboardError::BackendRejection("Could not get login URL".to_string()))?;

    Url::parse(&login_url).map_err(|e| DashboardError::MalformedPayload {
        endpoint: LOGIN_URL_PATH.to_string(),
        detail: format!("login_url {:?} is not a URL: {}", login_url, e),
    })
}

/// Outcome markers the backend appends when redirecting back after login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRedirect {
    Success,
    Error(String),
    NoMarker,
}

impl LoginRedirect {
    pub fn from_url(url: &Url) -> Self {
        let mut outcome = LoginRedirect::NoMarker;
        let mut message = None;

        for (key, value) in url.query_pairs() {
            match (key.as_ref(), value.as_ref()) {
                ("login" | "status" | "kite", "success" | "ok") => {
                    if outcome == LoginRedirect::NoMarker {
                        outcome = LoginRedirect::Success;
                    }
                }
                ("login" | "status" | "kite", "error" | "failed") => {
                    outcome = LoginRedirect::Error(String::new());
                }
                ("error", text) => {
                    outcome = LoginRedirect::Error(String::new());
                    message.get_or_insert_with(|| text.to_string());
                }
                ("message", text) => message = Some(text.to_string()),
                _ => {}
            }
        }

        match outcome {
            LoginRedirect::Error(_) => {
                let text = message.filter(|m| !m.is_empty()).unwrap_or_else(|| "Login failed".to_string());
                warn!(error = %text, "Login redirect reported an error");
                LoginRedirect::Error(text)
            }
            other => other,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn redirect(query: &str) -> LoginRedirect {
        LoginRedirect::from_url(&Url::parse(&format!("https://dash.example.com/?{}", query)).unwrap())
    }

    #[test]
    fn redirect_markers_are_recognised() {
        assert_eq!(redirect("login=success"), LoginRedirect::Success);
        assert_eq!(redirect("kite=ok&foo=bar"), LoginRedirect::Success);
        assert_eq!(redirect("foo=bar"), LoginRedirect::NoMarker);
        assert_eq!(
            redirect("error=token%20exchange%20failed"),
            LoginRedirect::Error("token exchange failed".to_string())
        );
        assert_eq!(
            redirect("status=error&message=request%20token%20expired"),
            LoginRedirect::Error("request token expired".to_string())
        );
        assert_eq!(redirect("login=error"), LoginRedirect::Error("Login failed".to_string()));
    }

    #[test]
    fn token_flags_accept_common_encodings() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("True")));
        assert!(is_truthy(&json!(1)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("no")));
    }
}
