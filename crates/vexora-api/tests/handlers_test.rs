//! Handler tests.

mod common;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use common::create_test_server_state;
use vexora_api::handlers::{
    get_device_handler, health_handler, list_devices_handler, send_command_handler,
};
use vexora_api::{create_router, SendCommandRequest};
use vexora_devices::{
    Acknowledgement, ConnectionState, DeviceRegistry, PublishError, StateReport,
};

fn ping(timeout_ms: Option<i64>) -> SendCommandRequest {
    SendCommandRequest {
        command_type: "ping".to_string(),
        timeout_ms,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_send_command_returns_ack() {
    let mut server = create_test_server_state(None);
    let commands = server.state.commands.clone();

    let state = server.state.clone();
    let handle = tokio::spawn(async move {
        send_command_handler(State(state), Path("dev-1".to_string()), Json(ping(Some(2000)))).await
    });

    let command = server.published.recv().await.unwrap();
    assert_eq!(command["type"], "ping");
    assert_eq!(command["deviceId"], "dev-1");
    commands.on_acknowledge(Acknowledgement {
        v: 1,
        id: command["id"].as_str().unwrap().to_string(),
        device_id: "dev-1".to_string(),
        ts: 1,
        ok: true,
        code: Some("OK".to_string()),
        ..Default::default()
    });

    let (status, Json(body)) = handle.await.unwrap().unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(body.ack.ok);
    assert_eq!(body.ack.code.as_deref(), Some("OK"));
}

#[tokio::test(start_paused = true)]
async fn test_send_command_timeout_is_504_with_ack() {
    let server = create_test_server_state(None);

    let (status, Json(body)) = send_command_handler(
        State(server.state.clone()),
        Path("dev-1".to_string()),
        Json(ping(Some(1000))),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(!body.ack.ok);
    assert_eq!(body.ack.code.as_deref(), Some("TIMEOUT"));
    assert_eq!(body.ack.device_id, "dev-1");
    assert_eq!(server.state.commands.pending_count(), 0);
}

#[tokio::test]
async fn test_send_command_requires_type() {
    let server = create_test_server_state(None);

    let err = send_command_handler(
        State(server.state),
        Path("dev-1".to_string()),
        Json(SendCommandRequest::default()),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_command_not_connected_is_503() {
    let server = create_test_server_state(Some(PublishError::NotConnected));

    let err = send_command_handler(
        State(server.state),
        Path("dev-1".to_string()),
        Json(ping(None)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_send_command_publish_failure_is_502() {
    let server = create_test_server_state(Some(PublishError::Failed("queue closed".into())));

    let err = send_command_handler(
        State(server.state),
        Path("dev-1".to_string()),
        Json(ping(None)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    assert_eq!(err.code, "PUBLISH_FAILED");
}

#[tokio::test]
async fn test_list_devices() {
    let server = create_test_server_state(None);
    let report = StateReport::new("online").with_link("gsm").with_fw("2.0.1");
    server.registry.update_state("dev-2", report, 1_700_000_123_456);
    server.registry.touch("dev-1", 100_000, "telemetry");

    let Json(devices) = list_devices_handler(State(server.state)).await;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].device_id, "dev-1");
    assert_eq!(devices[0].status, "offline");
    assert_eq!(devices[0].last_seen, 100);
    assert_eq!(devices[0].fw_version, None);
    assert_eq!(devices[1].status, "online");
    assert_eq!(devices[1].last_seen, 1_700_000_123);
    assert_eq!(devices[1].fw_version.as_deref(), Some("2.0.1"));

    let json = serde_json::to_value(&devices[0]).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"deviceId":"dev-1","status":"offline","lastSeen":100,"fwVersion":null})
    );
}

#[tokio::test]
async fn test_device_detail() {
    let server = create_test_server_state(None);
    let report = StateReport {
        ip: Some("10.0.0.7"),
        uptime_sec: Some(3600),
        ..StateReport::new("online").with_link("wifi")
    };
    server.registry.update_state("dev-1", report, 2_000);
    server
        .registry
        .record_telemetry("dev-1", 3_000, &[("temp", 21.5), ("hum", 40.0)]);

    let Json(detail) = get_device_handler(State(server.state), Path("dev-1".to_string()))
        .await
        .unwrap();
    assert_eq!(detail.device.device_id, "dev-1");
    assert_eq!(detail.device.status, "online");
    assert_eq!(detail.device.last_seen, 3);

    let state = detail.state.unwrap();
    assert_eq!(state.uptime, 3600);
    assert_eq!(state.link, "wifi");
    assert_eq!(state.ip, "10.0.0.7");

    let telemetry = detail.last_telemetry.unwrap();
    assert_eq!(telemetry.ts, 3_000);
    assert_eq!(telemetry.metrics["temp"], 21.5);
}

#[tokio::test]
async fn test_device_detail_without_state() {
    let server = create_test_server_state(None);
    server.registry.touch("dev-1", 5_000, "event");

    let Json(detail) = get_device_handler(State(server.state), Path("dev-1".to_string()))
        .await
        .unwrap();
    assert_eq!(detail.device.status, "offline");
    assert!(detail.state.is_none());
    assert!(detail.last_telemetry.is_none());

    let json = serde_json::to_value(&detail).unwrap();
    assert!(json["state"].is_null());
    assert!(json["lastTelemetry"].is_null());
}

#[tokio::test]
async fn test_device_detail_unknown_is_404() {
    let server = create_test_server_state(None);

    let err = get_device_handler(State(server.state), Path("ghost".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    assert_eq!(err.code, "NOT_FOUND");
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_device_detail_blank_id_is_400() {
    let server = create_test_server_state(None);

    let err = get_device_handler(State(server.state), Path("  ".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_without_connection() {
    let server = create_test_server_state(None);

    let Json(health) = health_handler(State(server.state)).await;
    assert_eq!(health.status, "ok");
    assert_eq!(health.mqtt, ConnectionState::Disconnected);
    assert_eq!(health.pending_commands, 0);
    assert!(health.dispatch.is_none());
}

#[test]
fn test_request_decoding() {
    let req: SendCommandRequest =
        serde_json::from_str(r#"{"type":"set_interval","params":{"ms":500},"timeoutMs":3000}"#)
            .unwrap();
    assert_eq!(req.command_type, "set_interval");
    assert_eq!(req.timeout_ms, Some(3000));
    assert_eq!(req.params["ms"].as_i64(), Some(500));
}

#[tokio::test]
async fn test_router_builds() {
    let server = create_test_server_state(None);
    let _router = create_router(server.state);
}
