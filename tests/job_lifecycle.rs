use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stockbot_dashboard::backend::RunRequest;
use stockbot_dashboard::config::Config;
use stockbot_dashboard::dashboard::{DashboardController, ViewState};
use stockbot_dashboard::error::{DashboardError, AUTH_REQUIRED_MESSAGE};
use stockbot_dashboard::jobs::{JobId, PollerState};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

fn config_for(server: &MockServer) -> Arc<Config> {
    let config = Config::new(Url::parse(&server.uri()).unwrap())
        .with_poll_interval(Duration::from_millis(10))
        .with_read_retries(0)
        .with_detached_refresh_delay(Duration::from_millis(20));
    Arc::new(config)
}

fn swing_request(config: &Config) -> RunRequest {
    RunRequest::new(
        "swing",
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        config,
    )
}

fn stored_run(timestamp: &str, final_equity: f64) -> Value {
    json!({
        "timestamp": timestamp,
        "strategy": "swing",
        "equity_curve": [
            {"date": "2024-01-01", "portfolio_equity": 100000},
            {"date": "2024-01-02", "portfolio_equity": final_equity},
        ],
        "trades": [{"PnL": 50}, {"PnL": -20}, {"PnL": 0}],
    })
}

async fn mount_health(server: &MockServer, token_valid: bool) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "token_valid": token_valid})))
        .mount(server)
        .await;
}

async fn mount_history(server: &MockServer, runs: Value) {
    Mock::given(method("GET"))
        .and(path("/backtests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "data": runs})))
        .mount(server)
        .await;
}

async fn authed_controller(server: &MockServer) -> DashboardController {
    mount_health(server, true).await;
    let mut controller = DashboardController::new(config_for(server)).unwrap();
    assert!(controller.check_auth().await.unwrap());
    controller
}

async fn settle(controller: &mut DashboardController) {
    tokio::time::timeout(SETTLE_TIMEOUT, controller.wait_for_job())
        .await
        .expect("job should settle")
        .unwrap();
}

async fn wait_for_no_live_loops(controller: &DashboardController) {
    for _ in 0..200 {
        if controller.live_poll_loops() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("poll loop still alive");
}

#[tokio::test]
async fn async_job_runs_to_completion_then_loads_history() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "J1", "status": "submitted"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "completed"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/backtests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "data": [stored_run("2024-07-01T09:30:00", 100500.0)],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = swing_request(&config_for(&server));
    controller.submit(request).await.unwrap();
    assert_eq!(controller.view(), &ViewState::Polling(JobId::new("J1")));

    settle(&mut controller).await;

    assert_eq!(controller.view(), &ViewState::Ready);
    assert_eq!(controller.poller_state(), &PollerState::Completed(JobId::new("J1")));
    let chart = controller.chart().unwrap();
    assert_eq!(chart.equity_points.len(), 2);
    assert_eq!(chart.final_equity(), Some(100500.0));
    assert_eq!((chart.win_count, chart.loss_count), (1, 2));
    assert_eq!(controller.runs().len(), 1);
    wait_for_no_live_loops(&controller).await;
}

#[tokio::test]
async fn rejected_submission_surfaces_backend_detail() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "invalid date range"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/job_status/.*"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let request = swing_request(&config_for(&server));
    controller.submit(request).await.unwrap();

    match controller.view() {
        ViewState::Error(message) => assert!(message.contains("invalid date range")),
        other => panic!("expected error view, got {:?}", other),
    }
    assert_eq!(controller.poller_state(), &PollerState::Idle);
}

#[tokio::test]
async fn missing_token_blocks_submission_before_any_request() {
    let server = MockServer::start().await;
    mount_health(&server, false).await;
    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut controller = DashboardController::new(config_for(&server)).unwrap();
    assert!(!controller.check_auth().await.unwrap());

    let request = swing_request(&config_for(&server));
    let result = controller.submit(request).await;

    assert!(matches!(result, Err(DashboardError::AuthPrecondition)));
    assert_eq!(controller.status_message(), Some(AUTH_REQUIRED_MESSAGE));
    assert_eq!(controller.view(), &ViewState::Idle);
}

#[tokio::test]
async fn health_falls_back_to_config_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kite_token_valid": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mut controller = DashboardController::new(config_for(&server)).unwrap();
    assert!(controller.check_auth().await.unwrap());
    assert!(controller.token_valid());
}

#[tokio::test]
async fn synchronous_result_is_shown_without_polling() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "result": stored_run("2024-07-01T09:30:00", 99000.0),
        })))
        .mount(&server)
        .await;

    let request = swing_request(&config_for(&server));
    controller.submit(request).await.unwrap();

    assert_eq!(controller.view(), &ViewState::Ready);
    assert_eq!(controller.poller_state(), &PollerState::Idle);
    assert_eq!(controller.chart().unwrap().final_equity(), Some(99000.0));
    assert_eq!(controller.live_poll_loops(), 0);
}

#[tokio::test]
async fn second_submission_is_refused_while_polling() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "J1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .mount(&server)
        .await;

    let config = config_for(&server);
    controller.submit(swing_request(&config)).await.unwrap();
    let second = controller.submit(swing_request(&config)).await;

    assert!(matches!(second, Err(DashboardError::RunInProgress)));
    assert_eq!(controller.view(), &ViewState::Polling(JobId::new("J1")));
    assert_eq!(controller.live_poll_loops(), 1);
    controller.teardown();
}

#[tokio::test]
async fn supersede_replaces_the_active_job() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "J1"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "J2"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": stored_run("2024-07-01T09:30:00", 1.0),
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": stored_run("2024-07-02T09:30:00", 2.0),
        })))
        .mount(&server)
        .await;

    let config = config_for(&server);
    controller.submit(swing_request(&config)).await.unwrap();
    assert_eq!(controller.view(), &ViewState::Polling(JobId::new("J1")));

    // Let J1's loop report completion into the channel before it is superseded
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.supersede(swing_request(&config)).await.unwrap();

    assert_eq!(controller.view(), &ViewState::Polling(JobId::new("J2")));
    assert_eq!(controller.live_poll_loops(), 1);

    settle(&mut controller).await;

    assert_eq!(controller.poller_state(), &PollerState::Completed(JobId::new("J2")));
    assert_eq!(controller.chart().unwrap().final_equity(), Some(2.0));
}

#[tokio::test]
async fn cancelled_job_produces_no_further_updates() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "J1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "completed", "result": stored_run("2024-07-01T09:30:00", 1.0)}))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/backtests"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(&server);
    controller.submit(swing_request(&config)).await.unwrap();

    // First tick fires after 10ms and its reply is held for 200ms
    tokio::time::sleep(Duration::from_millis(60)).await;
    controller.teardown();

    assert_eq!(controller.poller_state(), &PollerState::Cancelled(JobId::new("J1")));
    assert_eq!(controller.view(), &ViewState::Idle);
    wait_for_no_live_loops(&controller).await;

    // Past the point where the in-flight reply would have arrived
    tokio::time::sleep(Duration::from_millis(300)).await;
    settle(&mut controller).await;
    assert_eq!(controller.poller_state(), &PollerState::Cancelled(JobId::new("J1")));
    assert_eq!(controller.view(), &ViewState::Idle);
    assert!(controller.chart().is_none());
}

#[tokio::test]
async fn failed_job_shows_backend_error_verbatim() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobId": 7})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "FAILED",
            "error": "Kite session expired",
        })))
        .mount(&server)
        .await;

    controller.submit(swing_request(&config_for(&server))).await.unwrap();
    settle(&mut controller).await;

    assert_eq!(controller.view(), &ViewState::Error("Kite session expired".to_string()));
    assert_eq!(controller.status_message(), Some("Kite session expired"));
}

#[tokio::test]
async fn detached_launch_refreshes_history_after_delay() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "started"})))
        .mount(&server)
        .await;
    mount_history(&server, json!([stored_run("2024-07-01T09:30:00", 100200.0)])).await;

    controller.submit(swing_request(&config_for(&server))).await.unwrap();
    assert_eq!(controller.view(), &ViewState::Idle);
    assert!(controller.chart().is_none());

    settle(&mut controller).await;
    assert_eq!(controller.view(), &ViewState::Ready);
    assert_eq!(controller.chart().unwrap().final_equity(), Some(100200.0));
}

#[tokio::test]
async fn history_falls_back_to_latest_and_sorts_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "data": [
                stored_run("2024-07-01T09:30:00", 1.0),
                stored_run("2024-07-03T09:30:00", 3.0),
                stored_run("2024-07-02T09:30:00", 2.0),
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut controller = DashboardController::new(config_for(&server)).unwrap();
    controller.refresh().await.unwrap();

    assert_eq!(controller.view(), &ViewState::Ready);
    assert_eq!(controller.runs().len(), 3);
    assert_eq!(controller.chart().unwrap().final_equity(), Some(3.0));
}

#[tokio::test]
async fn history_rejection_keeps_current_view() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/backtests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "error", "detail": "database unavailable"})))
        .mount(&server)
        .await;

    let mut controller = DashboardController::new(config_for(&server)).unwrap();
    let result = controller.refresh().await;

    assert!(matches!(result, Err(DashboardError::BackendRejection(ref detail)) if detail == "database unavailable"));
    assert_eq!(controller.view(), &ViewState::Idle);
    assert_eq!(controller.status_message(), Some("database unavailable"));
}

#[tokio::test]
async fn empty_history_stays_idle() {
    let server = MockServer::start().await;
    mount_history(&server, json!([])).await;

    let mut controller = DashboardController::new(config_for(&server)).unwrap();
    controller.refresh().await.unwrap();

    assert_eq!(controller.view(), &ViewState::Idle);
    assert!(controller.runs().is_empty());
}

#[tokio::test]
async fn login_redirect_success_rechecks_token() {
    let server = MockServer::start().await;
    mount_health(&server, true).await;
    Mock::given(method("GET"))
        .and(path("/generate_token_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login_url": "https://kite.zerodha.com/connect/login?api_key=abc",
        })))
        .mount(&server)
        .await;

    let mut controller = DashboardController::new(config_for(&server)).unwrap();
    let login_url = controller.request_login().await.unwrap();
    assert_eq!(login_url.host_str(), Some("kite.zerodha.com"));

    let returned = Url::parse("http://localhost:3000/?login=success").unwrap();
    assert!(controller.handle_login_redirect(&returned).await.unwrap());
    assert!(controller.token_valid());

    let failed = Url::parse("http://localhost:3000/?status=error&message=request%20token%20expired").unwrap();
    assert!(!controller.handle_login_redirect(&failed).await.unwrap());
    assert_eq!(controller.status_message(), Some("request token expired"));
}

#[tokio::test]
async fn history_client_returns_newest_run() {
    use stockbot_dashboard::backend::BackendApi;
    use stockbot_dashboard::history::HistoryStoreClient;

    let server = MockServer::start().await;
    mount_history(
        &server,
        json!([
            stored_run("2024-07-01T09:30:00", 1.0),
            stored_run("2024-07-05T09:30:00", 5.0),
            "not a run",
        ]),
    )
    .await;

    let api = Arc::new(BackendApi::new(config_for(&server)).unwrap());
    let latest = HistoryStoreClient::new(api).fetch_latest().await.unwrap().unwrap();

    assert_eq!(latest.timestamp(), Some(&json!("2024-07-05T09:30:00")));
    assert_eq!(latest.strategy_id().as_deref(), Some("swing"));
}

#[tokio::test]
async fn unknown_job_fails_with_backend_detail() {
    let server = MockServer::start().await;
    let mut controller = authed_controller(&server).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "J9"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Job not found"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    controller.submit(swing_request(&config)).await.unwrap();
    settle(&mut controller).await;

    assert_eq!(controller.view(), &ViewState::Error("Job not found".to_string()));
    assert_eq!(controller.status_message(), Some("Job not found"));
    assert!(matches!(controller.poller_state(), PollerState::Failed { error, .. } if error == "Job not found"));
    assert!(!controller.view().is_busy());
    wait_for_no_live_loops(&controller).await;
}

#[tokio::test]
async fn job_stuck_running_fails_at_poll_deadline() {
    let server = MockServer::start().await;
    mount_health(&server, true).await;

    Mock::given(method("POST"))
        .and(path("/run_strategy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "J1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/job_status/J1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .mount(&server)
        .await;

    let config = Arc::new(
        Config::clone(&config_for(&server)).with_poll_timeout(Duration::from_millis(100)),
    );
    let mut controller = DashboardController::new(config.clone()).unwrap();
    assert!(controller.check_auth().await.unwrap());

    controller.submit(swing_request(&config)).await.unwrap();
    settle(&mut controller).await;

    match controller.view() {
        ViewState::Error(message) => {
            assert!(message.contains("Timed out"), "unexpected message: {}", message);
            assert!(message.contains("100ms"), "unexpected message: {}", message);
        }
        other => panic!("expected error view, got {:?}", other),
    }
    assert!(matches!(controller.poller_state(), PollerState::Failed { .. }));
    wait_for_no_live_loops(&controller).await;
}
