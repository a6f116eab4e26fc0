use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{JobId, JobStatus, PollerState, StatusReport};
use crate::backend::{ApiResponse, BackendApi};
use crate::config::Config;
use crate::results::RunRecord;

/// Identifies one poll loop; events from any other loop are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTicket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    Progress { status: Option<JobStatus>, message: String },
    Completed { embedded: Option<RunRecord> },
    Failed(String),
    Cancelled(String),
}

impl PollUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollUpdate::Progress { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PollEvent {
    pub ticket: PollTicket,
    pub job_id: JobId,
    pub update: PollUpdate,
}

/// Owns the single active job status loop. Starting a new job or cancelling aborts the previous
/// loop and advances the ticket, so late results from it are discarded.
pub struct JobPoller {
    api: Arc<BackendApi>,
    interval: Duration,
    timeout: Duration,
    events: UnboundedSender<PollEvent>,
    state: PollerState,
    ticket: u64,
    active: Option<JoinHandle<()>>,
    live_loops: Arc<AtomicUsize>,
}

impl JobPoller {
    pub fn new(api: Arc<BackendApi>, config: &Config, events: UnboundedSender<PollEvent>) -> Self {
        Self {
            api,
            interval: config.poll_interval,
            timeout: config.poll_timeout,
            events,
            state: PollerState::Idle,
            ticket: 0,
            active: None,
            live_loops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> &PollerState {
        &self.state
    }

    pub fn is_polling(&self) -> bool {
        matches!(self.state, PollerState::Polling(_))
    }

    /// Number of poll loops whose task has not been torn down yet
    pub fn live_loops(&self) -> usize {
        self.live_loops.load(Ordering::SeqCst)
    }

    /// Begin polling `job_id`, replacing any loop already running.
    /// The old loop is fully torn down before the new one is spawned.
    pub async fn start(&mut self, job_id: JobId) -> PollTicket {
        if let Some(previous) = self.abort_active() {
            // Resolves with a cancellation error once the aborted task is dropped
            let _ = previous.await;
            if let PollerState::Polling(old_job) = &self.state {
                info!(old_job_id = %old_job, new_job_id = %job_id, "Superseding active job poll");
            }
        }

        self.ticket += 1;
        let ticket = PollTicket(self.ticket);
        self.state = PollerState::Polling(job_id.clone());

        let guard = LiveLoopGuard::new(self.live_loops.clone());
        let poll_loop = PollLoop {
            api: self.api.clone(),
            job_id,
            ticket,
            interval: self.interval,
            timeout: self.timeout,
            events: self.events.clone(),
        };
        self.active = Some(tokio::spawn(async move {
            let _guard = guard;
            poll_loop.run().await;
        }));

        ticket
    }

    /// Stop the active loop immediately. Anything it already queued becomes stale.
    pub fn cancel(&mut self) {
        if self.abort_active().is_some() {
            debug!("Aborted active job poll");
        }
        self.mark_cancelled();
    }

    /// Cancel, and return only once the aborted loop has been torn down
    pub async fn cancel_and_wait(&mut self) {
        let previous = self.abort_active();
        self.mark_cancelled();
        if let Some(handle) = previous {
            let _ = handle.await;
        }
    }

    /// Apply an event to the state machine. Returns the update only when it belongs to the
    /// current loop and the job has not already settled.
    pub fn accept(&mut self, event: PollEvent) -> Option<PollUpdate> {
        let current = match &self.state {
            PollerState::Polling(job_id) => event.ticket == PollTicket(self.ticket) && *job_id == event.job_id,
            _ => false,
        };
        if !current {
            debug!(job_id = %event.job_id, ticket = ?event.ticket, "Discarding stale poll event");
            return None;
        }

        let job_id = event.job_id;
        match &event.update {
            PollUpdate::Progress { .. } => {}
            PollUpdate::Completed { .. } => self.state = PollerState::Completed(job_id),
            PollUpdate::Failed(error) => {
                self.state = PollerState::Failed { job_id, error: error.clone() };
            }
            PollUpdate::Cancelled(_) => self.state = PollerState::Cancelled(job_id),
        }
        if event.update.is_terminal() {
            // The loop exits on its own after a terminal status
            self.active = None;
        }

        Some(event.update)
    }

    // ==================== Helper/Private methods ====================

    fn mark_cancelled(&mut self) {
        if let PollerState::Polling(job_id) = &self.state {
            info!(job_id = %job_id, "Job poll cancelled locally");
            self.state = PollerState::Cancelled(job_id.clone());
        }
    }

    fn abort_active(&mut self) -> Option<JoinHandle<()>> {
        self.ticket += 1;
        let handle = self.active.take()?;
        handle.abort();
        Some(handle)
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
    }
}

struct LiveLoopGuard(Arc<AtomicUsize>);

impl LiveLoopGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveLoopGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PollLoop {
    api: Arc<BackendApi>,
    job_id: JobId,
    ticket: PollTicket,
    interval: Duration,
    timeout: Duration,
    events: UnboundedSender<PollEvent>,
}

impl PollLoop {
    /// Fixed-interval status queries; the next sleep starts only after the previous
    /// request has resolved, so ticks never overlap.
    async fn run(self) {
        let start_time = Instant::now();
        let warn_threshold = self.timeout / 2;
        info!(
            job_id = %self.job_id,
            interval = ?self.interval,
            timeout = ?self.timeout,
            "Starting job status polling"
        );

        loop {
            sleep(self.interval).await;
            let elapsed = start_time.elapsed();

            if elapsed >= self.timeout {
                error!(
                    job_id = %self.job_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout = ?self.timeout,
                    "Job did not finish before the poll deadline. Stopping polling."
                );
                let message = format!("Timed out after {:?} waiting for backtest job {}", self.timeout, self.job_id);
                self.emit(PollUpdate::Failed(message));
                break;
            }

            let update = match self.api.get_job_status(self.job_id.as_str()).await {
                Ok(response) => interpret_status(&self.job_id, &response),
                Err(e) => {
                    error!(job_id = %self.job_id, error = ?e, "Error fetching job status");
                    PollUpdate::Progress {
                        status: None,
                        message: "Lost contact with backend, still waiting for the backtest".to_string(),
                    }
                }
            };

            match &update {
                PollUpdate::Progress { status, .. } if elapsed > warn_threshold => warn!(
                    job_id = %self.job_id,
                    status = ?status,
                    elapsed_secs = elapsed.as_secs(),
                    "Job pending for too long, exceeding warning threshold"
                ),
                PollUpdate::Progress { status, .. } => debug!(
                    job_id = %self.job_id,
                    status = ?status,
                    elapsed_secs = elapsed.as_secs(),
                    "Job pending"
                ),
                terminal => info!(job_id = %self.job_id, update = ?terminal, "Job reached terminal status"),
            }

            let terminal = update.is_terminal();
            if !self.emit(update) || terminal {
                break;
            }
        }
    }

    /// False when nobody is listening any more
    fn emit(&self, update: PollUpdate) -> bool {
        let event = PollEvent {
            ticket: self.ticket,
            job_id: self.job_id.clone(),
            update,
        };
        if self.events.send(event).is_err() {
            debug!(job_id = %self.job_id, "Poll event receiver dropped, stopping");
            return false;
        }
        true
    }
}

/// Turn one status response into a state machine input
pub fn interpret_status(job_id: &JobId, response: &ApiResponse) -> PollUpdate {
    let Some(body) = &response.body else {
        return PollUpdate::Progress {
            status: None,
            message: format!("Backend returned HTTP {} for job {}, still waiting", response.status.as_u16(), job_id),
        };
    };

    let report = StatusReport::from_payload(body);
    if !response.is_success() && matches!(report.status, JobStatus::Other(_)) {
        // A 4xx with an explanation (e.g. an unknown job id) will not recover by polling
        if response.status.is_client_error() {
            if let Some(error) = report.error {
                return PollUpdate::Failed(error);
            }
        }
        return PollUpdate::Progress {
            status: None,
            message: format!("Backend returned HTTP {} for job {}, still waiting", response.status.as_u16(), job_id),
        };
    }

    match report.status {
        JobStatus::Completed => PollUpdate::Completed { embedded: report.result },
        JobStatus::Failed => PollUpdate::Failed(
            report.error.or(report.message).unwrap_or_else(|| "Backtest failed".to_string()),
        ),
        JobStatus::Cancelled => PollUpdate::Cancelled(
            report.error.or(report.message).unwrap_or_else(|| "Backtest was cancelled".to_string()),
        ),
        status => {
            let message = report
                .message
                .unwrap_or_else(|| format!("Backtest job {} is {}", job_id, status));
            PollUpdate::Progress { status: Some(status), message }
        }
    }
}
