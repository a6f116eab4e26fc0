use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::state::ViewState;
use crate::auth::{self, LoginRedirect};
use crate::backend::{BackendApi, RunRequest};
use crate::config::Config;
use crate::error::{DashboardError, Result, AUTH_REQUIRED_MESSAGE};
use crate::history::HistoryStoreClient;
use crate::jobs::{JobPoller, JobSubmissionClient, PollEvent, PollUpdate, PollerState, SubmitOutcome};
use crate::results::{normalize, ChartModel, RunRecord};

/// Orchestrates auth, submission, polling and history for one dashboard session.
///
/// Every mutation goes through `&mut self`, so a second submission cannot race the first;
/// a deliberate retry goes through [`DashboardController::supersede`]. Nothing here retries
/// on its own.
pub struct DashboardController {
    config: Arc<Config>,
    api: Arc<BackendApi>,
    history: HistoryStoreClient,
    submitter: JobSubmissionClient,
    poller: JobPoller,
    events: UnboundedReceiver<PollEvent>,
    view: ViewState,
    status_message: Option<String>,
    chart: Option<ChartModel>,
    runs: Vec<RunRecord>,
    token_valid: bool,
    pending_refresh: Option<Instant>, // Delayed history refresh after a detached launch
}

impl DashboardController {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let api = Arc::new(BackendApi::new(config.clone())?);
        let (tx, events) = mpsc::unbounded_channel();

        Ok(Self {
            history: HistoryStoreClient::new(api.clone()),
            submitter: JobSubmissionClient::new(api.clone()),
            poller: JobPoller::new(api.clone(), &config, tx),
            config,
            api,
            events,
            view: ViewState::Idle,
            status_message: None,
            chart: None,
            runs: Vec::new(),
            token_valid: false,
            pending_refresh: None,
        })
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Last successfully normalized run
    pub fn chart(&self) -> Option<&ChartModel> {
        self.chart.as_ref()
    }

    /// History list from the last successful refresh, most recent first
    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn token_valid(&self) -> bool {
        self.token_valid
    }

    pub fn poller_state(&self) -> &PollerState {
        self.poller.state()
    }

    pub fn live_poll_loops(&self) -> usize {
        self.poller.live_loops()
    }

    /// Re-read the backend's token status. An unreachable backend leaves submission disabled.
    pub async fn check_auth(&mut self) -> Result<bool> {
        match auth::check_token(&self.api).await {
            Ok(valid) => {
                self.token_valid = valid;
                if !valid {
                    self.status_message = Some(AUTH_REQUIRED_MESSAGE.to_string());
                }
                Ok(valid)
            }
            Err(e) => {
                warn!(error = %e, "Token check failed");
                self.token_valid = false;
                self.status_message = Some(e.status_message());
                Err(e)
            }
        }
    }

    /// Brokerage login page for the front-end to open
    pub async fn request_login(&mut self) -> Result<Url> {
        let login_url = auth::fetch_login_url(&self.api).await;
        if let Err(e) = &login_url {
            warn!(error = %e, "Could not fetch login URL");
            self.status_message = Some(e.status_message());
        }
        login_url
    }

    /// Inspect the URL the login flow returned to and refresh the token flag on success
    pub async fn handle_login_redirect(&mut self, url: &Url) -> Result<bool> {
        match LoginRedirect::from_url(url) {
            LoginRedirect::Success => {
                info!("Login redirect reported success, re-checking token");
                self.check_auth().await
            }
            LoginRedirect::Error(message) => {
                self.token_valid = false;
                self.status_message = Some(message);
                Ok(false)
            }
            LoginRedirect::NoMarker => Ok(self.token_valid),
        }
    }

    /// Start a backtest. Backend rejections land in the view as `Error`; only local refusals
    /// and transport failures are returned as errors.
    #[instrument(skip(self, request), fields(strategy = %request.strategy))]
    pub async fn submit(&mut self, request: RunRequest) -> Result<()> {
        if !self.token_valid {
            warn!("Submission blocked, no valid brokerage token");
            self.status_message = Some(AUTH_REQUIRED_MESSAGE.to_string());
            return Err(DashboardError::AuthPrecondition);
        }
        if self.view.is_busy() {
            debug!(view = %self.view, "Submission ignored while a run is active");
            return Err(DashboardError::RunInProgress);
        }

        let previous = std::mem::replace(&mut self.view, ViewState::Submitting);
        self.status_message = Some("Starting backtest...".to_string());
        self.pending_refresh = None;

        let outcome = match self.submitter.submit(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Submission did not reach the backend");
                self.view = previous;
                self.status_message = Some(e.status_message());
                return Err(e);
            }
        };

        match outcome {
            SubmitOutcome::SyncResult(record) => self.show_run(record),
            SubmitOutcome::AsyncJob(job_id) => {
                self.poller.start(job_id.clone()).await;
                self.status_message = Some(format!("Backtest job {} submitted, waiting for results", job_id));
                self.view = ViewState::Polling(job_id);
            }
            SubmitOutcome::Detached(message) => {
                self.view = previous;
                self.status_message = Some(message);
                self.pending_refresh = Some(Instant::now() + self.config.detached_refresh_delay);
            }
            SubmitOutcome::Rejected(reason) => {
                self.status_message = Some(reason.clone());
                self.view = ViewState::Error(reason);
            }
        }

        Ok(())
    }

    /// User-initiated retry: abandon whatever run is active, then submit afresh
    pub async fn supersede(&mut self, request: RunRequest) -> Result<()> {
        if let Some(job_id) = self.poller.state().job_id().filter(|_| self.poller.is_polling()) {
            info!(job_id = %job_id, "Superseding active backtest");
        }
        self.poller.cancel_and_wait().await;
        if self.view.is_busy() {
            self.view = self.resting_view();
        }
        self.submit(request).await
    }

    /// Reload history and show the newest run. Failures keep the current view.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<()> {
        match self.load_history().await {
            Ok(found) => {
                if !self.view.is_busy() {
                    self.view = if found { ViewState::Ready } else { ViewState::Idle };
                }
                if !found {
                    self.status_message = Some("No backtests stored yet".to_string());
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "History refresh failed");
                self.status_message = Some(e.status_message());
                Err(e)
            }
        }
    }

    /// Apply one poll loop event. Stale events are ignored.
    pub async fn handle_event(&mut self, event: PollEvent) {
        let Some(update) = self.poller.accept(event) else {
            return;
        };

        match update {
            PollUpdate::Progress { message, .. } => self.status_message = Some(message),
            PollUpdate::Completed { embedded: Some(record) } => self.show_run(record),
            PollUpdate::Completed { embedded: None } => match self.load_history().await {
                Ok(true) => {
                    self.view = ViewState::Ready;
                    self.status_message = Some("Backtest completed".to_string());
                }
                Ok(false) => {
                    let message = "Backtest completed but no stored run was found".to_string();
                    self.status_message = Some(message.clone());
                    self.view = ViewState::Error(message);
                }
                Err(e) => {
                    warn!(error = %e, "Could not load the completed run");
                    self.view = self.resting_view();
                    self.status_message = Some(e.status_message());
                }
            },
            PollUpdate::Failed(message) | PollUpdate::Cancelled(message) => {
                self.status_message = Some(message.clone());
                self.view = ViewState::Error(message);
            }
        }
    }

    /// Drive poll events until the current job settles, then run any due delayed refresh
    pub async fn wait_for_job(&mut self) -> Result<()> {
        while matches!(self.view, ViewState::Polling(_)) {
            let Some(event) = self.events.recv().await else {
                break;
            };
            self.handle_event(event).await;
        }

        if let Some(due) = self.pending_refresh.take() {
            sleep_until(due).await;
            self.refresh().await?;
        }
        Ok(())
    }

    /// Stop any active poll loop and drop pending work
    pub fn teardown(&mut self) {
        self.poller.cancel();
        self.pending_refresh = None;
        if self.view.is_busy() {
            self.view = self.resting_view();
            self.status_message = Some("Backtest polling stopped".to_string());
        }
    }

    // ==================== Helper/Private methods ====================

    fn show_run(&mut self, record: RunRecord) {
        let chart = normalize(&record);
        info!(
            points = chart.equity_points.len(),
            trades = chart.trade_count(),
            wins = chart.win_count,
            "Showing backtest result"
        );
        self.chart = Some(chart);
        self.view = ViewState::Ready;
        self.status_message = Some("Backtest completed".to_string());
    }

    /// True when history held at least one run
    async fn load_history(&mut self) -> Result<bool> {
        let runs = self.history.fetch_runs().await?;
        self.chart = runs.first().map(normalize).or(self.chart.take());
        let found = !runs.is_empty();
        self.runs = runs;
        Ok(found)
    }

    fn resting_view(&self) -> ViewState {
        if self.chart.is_some() { ViewState::Ready } else { ViewState::Idle }
    }
}

impl Drop for DashboardController {
    fn drop(&mut self) {
        self.teardown();
    }
}
