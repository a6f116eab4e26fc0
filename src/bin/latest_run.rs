use std::sync::Arc;
use tracing::{info, warn};

use stockbot_dashboard::config::Config;
use stockbot_dashboard::dashboard::DashboardController;
use stockbot_dashboard::logging;
use stockbot_dashboard::results::RunSummary;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cfg = Arc::new(Config::load()?);
    logging::init_logging(env!("CARGO_BIN_NAME"))?;
    info!(backend_url = %cfg.backend_url, "Fetching latest backtest");

    let mut controller = DashboardController::new(cfg)?;
    controller.refresh().await?;

    let Some(chart) = controller.chart() else {
        info!("No backtests stored yet");
        return Ok(());
    };

    info!(
        runs = controller.runs().len(),
        points = chart.equity_points.len(),
        final_equity = ?chart.final_equity(),
        wins = chart.win_count,
        losses = chart.loss_count,
        excluded_points = chart.report.excluded_points(),
        "Latest backtest"
    );

    match &chart.summary {
        RunSummary::Reported(metrics) => {
            for (name, value) in metrics {
                info!(metric = %name, value = %value, "Reported metric");
            }
        }
        RunSummary::Derived(derived) => info!(
            total_pnl = derived.total_pnl,
            win_rate = derived.win_rate,
            trade_count = derived.trade_count,
            "Derived summary"
        ),
    }
    for mismatch in &chart.mismatches {
        warn!(mismatch = ?mismatch, "Reported summary disagrees with trades");
    }

    Ok(())
}
