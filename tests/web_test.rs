use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tower::ServiceExt;
use triphase::driver::{DriverCommand, PhaseSnapshot, StatusSnapshot, SystemMode};
use triphase::phase::PHASE_NAMES;
use triphase::web::{AppState, build_router};

fn test_snapshot() -> StatusSnapshot {
    StatusSnapshot {
        mode: "automatic",
        best_phase: Some(2),
        selected_phase: Some(2),
        phases: PHASE_NAMES
            .iter()
            .copied()
            .enumerate()
            .map(|(i, name)| PhaseSnapshot {
                name,
                voltage: 220.0 + i as f64,
                avg_voltage: 219.5 + i as f64,
                min_voltage: Some(215.0),
                max_voltage: 224.0,
                is_active: i == 2,
            })
            .collect(),
        timestamp: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn test_state() -> (AppState, mpsc::UnboundedReceiver<DriverCommand>) {
    let (_snapshot_tx, snapshot_rx) = watch::channel(Arc::new(test_snapshot()));
    let (_history_tx, history_rx) = watch::channel(Arc::new(vec![[220.0, 221.0, 222.0]]));
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (status_tx, _) = broadcast::channel(16);
    let state = AppState {
        snapshot_rx,
        history_rx,
        commands_tx,
        status_tx,
        log_file: "/nonexistent/triphase.log".to_string(),
    };
    (state, commands_rx)
}

fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_ok() {
    let (state, _rx) = test_state();
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_serves_the_published_snapshot() {
    let (state, _rx) = test_state();
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["mode"], "automatic");
    assert_eq!(json["bestPhase"], 2);
    assert_eq!(json["selectedPhase"], 2);
    assert_eq!(json["phases"].as_array().unwrap().len(), 3);
    assert_eq!(json["phases"][2]["isActive"], true);
    assert_eq!(json["phases"][0]["name"], "Phase 1");
    assert!(json["phases"][0]["avgVoltage"].is_f64());
}

#[tokio::test]
async fn out_of_range_phase_is_a_bad_request() {
    let (state, mut rx) = test_state();
    let response = build_router(state)
        .oneshot(json_post("/api/phase", r#"{"phase": 7}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    // Nothing reached the driver
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn valid_phase_request_reaches_the_driver() {
    let (state, mut rx) = test_state();
    let response = build_router(state)
        .oneshot(json_post("/api/phase", r#"{"phase": 1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    match rx.try_recv() {
        Ok(DriverCommand::SelectPhase(1)) => {}
        other => panic!("unexpected command: {:?}", other),
    }
}

#[tokio::test]
async fn unknown_mode_string_is_a_bad_request() {
    let (state, mut rx) = test_state();
    let response = build_router(state)
        .oneshot(json_post("/api/mode", r#"{"mode": "standby"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn mode_aliases_are_accepted() {
    for mode in ["auto", "automatic", "manual"] {
        let (state, mut rx) = test_state();
        let body = format!(r#"{{"mode": "{}"}}"#, mode);
        let response = build_router(state)
            .oneshot(json_post("/api/mode", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let expected = SystemMode::parse(mode).unwrap();
        match rx.try_recv() {
            Ok(DriverCommand::SetMode(m)) => assert_eq!(m, expected),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

#[tokio::test]
async fn history_returns_rows() {
    let (state, _rx) = test_state();
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/history")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let rows = json["history"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn missing_log_file_is_not_found() {
    let (state, _rx) = test_state();
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/logs/tail?lines=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
