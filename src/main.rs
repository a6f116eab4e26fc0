use chrono::NaiveDate;
use eyre::WrapErr;
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, instrument, warn};

use stockbot_dashboard::backend::RunRequest;
use stockbot_dashboard::config::Config;
use stockbot_dashboard::dashboard::{DashboardController, ViewState};
use stockbot_dashboard::logging;

#[instrument(name = "stockbot_dashboard_main")]
#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Load configuration first, it also reads .env
    let cfg = Arc::new(Config::load()?);

    // Initialize logging
    if let Err(e) = logging::init_logging(env!("CARGO_BIN_NAME")) {
        eprintln!("Failed to initialize logging: {}", e);
        return Err(e);
    }
    info!(backend_url = %cfg.backend_url, poll_interval = ?cfg.poll_interval, "Configuration loaded and logging initialized");

    let request = run_request_from_env(&cfg)?;
    let mut controller = DashboardController::new(cfg.clone())?;

    // Without a token the backend refuses runs; point the user at the login page instead
    if !controller.check_auth().await? {
        match controller.request_login().await {
            Ok(login_url) => warn!(login_url = %login_url, "No valid Kite token, log in and re-run"),
            Err(e) => error!(error = %e, "No valid Kite token and no login URL available"),
        }
        return Ok(());
    }

    controller.submit(request).await?;

    let interrupted = tokio::select! {
        result = controller.wait_for_job() => {
            if let Err(e) = result {
                warn!(error = %e, "Could not refresh history after the run");
            }
            false
        }
        _ = signal::ctrl_c() => true,
    };
    if interrupted {
        info!("Interrupted, stopping job polling");
        controller.teardown();
    }

    match (controller.view(), controller.chart()) {
        (ViewState::Ready, Some(chart)) => info!(
            points = chart.equity_points.len(),
            final_equity = ?chart.final_equity(),
            trades = chart.trade_count(),
            wins = chart.win_count,
            losses = chart.loss_count,
            win_rate = chart.win_rate(),
            consistent = chart.is_consistent(),
            "Backtest result ready"
        ),
        (ViewState::Error(message), _) => error!(error = %message, "Backtest did not complete"),
        (view, _) => info!(view = %view, status = ?controller.status_message(), "Dashboard stopped"),
    }

    Ok(())
}

fn run_request_from_env(cfg: &Config) -> eyre::Result<RunRequest> {
    let strategy = env::var("STRATEGY").unwrap_or_else(|_| "swing".to_string());
    let start_date = env_date("START_DATE")?;
    let end_date = env_date("END_DATE")?;
    if end_date < start_date {
        eyre::bail!("END_DATE {} is before START_DATE {}", end_date, start_date);
    }
    Ok(RunRequest::new(strategy, start_date, end_date, cfg))
}

fn env_date(key: &str) -> eyre::Result<NaiveDate> {
    let raw = env::var(key).wrap_err_with(|| format!("{} must be set (YYYY-MM-DD)", key))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").wrap_err_with(|| format!("Invalid {}: {}", key, raw))
}
