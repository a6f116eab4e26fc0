use serde::Serialize;
use std::fmt;

use crate::jobs::JobId;

/// What the dashboard is showing. Only `Submitting` and `Polling` count as busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum ViewState {
    #[default]
    Idle,
    Submitting,
    Polling(JobId),
    Ready,
    Error(String),
}

impl ViewState {
    /// True while a run is in flight and the run button stays disabled
    pub fn is_busy(&self) -> bool {
        matches!(self, ViewState::Submitting | ViewState::Polling(_))
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewState::Idle => write!(f, "idle"),
            ViewState::Submitting => write!(f, "submitting"),
            ViewState::Polling(job_id) => write!(f, "polling {}", job_id),
            ViewState::Ready => write!(f, "ready"),
            ViewState::Error(message) => write!(f, "error: {}", message),
        }
    }
}
