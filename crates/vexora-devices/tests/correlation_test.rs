//! Command/acknowledgement correlation tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{RecordingPublisher, Published};
use vexora_devices::{
    Acknowledgement, CommandError, CommandManager, Dispatcher, MemoryRegistry, MemorySink,
    ParamValue, Params, PublishError, Qos, RateLimiter,
};

fn ack_for(published: &Published, device_id: &str, ok: bool, code: &str) -> Acknowledgement {
    Acknowledgement {
        v: 1,
        id: published.command_id(),
        device_id: device_id.to_string(),
        ts: 1_700_000_000_100,
        ok,
        code: Some(code.to_string()),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_ping_resolved_by_ack_through_dispatcher() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));
    let dispatcher = Dispatcher::new(
        Arc::new(MemorySink::new()),
        Arc::new(MemoryRegistry::new()),
        commands.clone(),
        RateLimiter::new(0),
    );

    let sender = commands.clone();
    let handle = tokio::spawn(async move {
        sender
            .send("dev-1", "ping", Params::new(), Duration::from_secs(2))
            .await
    });

    let command = published.recv().await.unwrap();
    assert_eq!(command.topic, "v1/dev/dev-1/cmd");
    assert_eq!(command.qos, Qos::AtLeastOnce);
    assert!(!command.retain);
    let body = command.json();
    assert_eq!(body["type"], "ping");
    assert_eq!(body["deviceId"], "dev-1");
    assert_eq!(body["v"], 1);
    let id = command.command_id();
    assert!(commands.is_pending(&id));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let ack_json = format!(
        r#"{{"v":1,"id":"{id}","deviceId":"dev-1","ts":1700000000100,"ok":true,"code":"OK"}}"#
    );
    dispatcher.on_message("v1/dev/dev-1/ack", ack_json.as_bytes());

    let ack = handle.await.unwrap().unwrap();
    assert_eq!(ack.id, id);
    assert_eq!(ack.device_id, "dev-1");
    assert!(ack.ok);
    assert_eq!(ack.code.as_deref(), Some("OK"));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_returns_synthetic_ack() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));

    let started = tokio::time::Instant::now();
    let sender = commands.clone();
    let handle = tokio::spawn(async move {
        sender
            .send("dev-1", "reboot", Params::new(), Duration::from_secs(2))
            .await
    });
    let command = published.recv().await.unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(started.elapsed(), Duration::from_secs(2));

    let ack = err.timeout_ack().expect("timeout carries an ack");
    assert!(!ack.ok);
    assert_eq!(ack.code.as_deref(), Some("TIMEOUT"));
    assert_eq!(ack.id, command.command_id());
    assert_eq!(ack.device_id, "dev-1");
    assert_eq!(commands.pending_count(), 0);

    // A late ack finds no waiter and is dropped.
    commands.on_acknowledge(ack_for(&command, "dev-1", true, "OK"));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_concurrent_sends_resolve_independently() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));

    let first = {
        let commands = commands.clone();
        tokio::spawn(async move {
            commands
                .send("dev-1", "ping", Params::new(), Duration::from_secs(5))
                .await
        })
    };
    let second = {
        let commands = commands.clone();
        tokio::spawn(async move {
            commands
                .send("dev-2", "ping", Params::new(), Duration::from_secs(5))
                .await
        })
    };

    let mut sent = vec![published.recv().await.unwrap(), published.recv().await.unwrap()];
    sent.sort_by(|a, b| a.topic.cmp(&b.topic));
    assert_eq!(sent[0].topic, "v1/dev/dev-1/cmd");
    assert_eq!(sent[1].topic, "v1/dev/dev-2/cmd");
    assert_ne!(sent[0].command_id(), sent[1].command_id());
    assert_eq!(commands.pending_count(), 2);

    commands.on_acknowledge(ack_for(&sent[1], "dev-2", false, "BUSY"));
    commands.on_acknowledge(ack_for(&sent[0], "dev-1", true, "OK"));

    let ack1 = first.await.unwrap().unwrap();
    let ack2 = second.await.unwrap().unwrap();
    assert_eq!(ack1.id, sent[0].command_id());
    assert_eq!(ack1.code.as_deref(), Some("OK"));
    assert_eq!(ack2.id, sent[1].command_id());
    assert_eq!(ack2.code.as_deref(), Some("BUSY"));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_first_ack_wins() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));

    let sender = commands.clone();
    let handle = tokio::spawn(async move {
        sender
            .send("dev-1", "ping", Params::new(), Duration::from_secs(5))
            .await
    });
    let command = published.recv().await.unwrap();

    commands.on_acknowledge(ack_for(&command, "dev-1", true, "FIRST"));
    commands.on_acknowledge(ack_for(&command, "dev-1", true, "SECOND"));

    let ack = handle.await.unwrap().unwrap();
    assert_eq!(ack.code.as_deref(), Some("FIRST"));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_returns_immediately() {
    let (publisher, _published) = RecordingPublisher::failing(PublishError::Failed("broker gone".into()));
    let commands = CommandManager::new(publisher);

    let started = tokio::time::Instant::now();
    let err = commands
        .send("dev-1", "ping", Params::new(), Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::PublishFailed(msg) if msg.contains("broker gone")));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_not_connected_is_surfaced() {
    let (publisher, _published) = RecordingPublisher::failing(PublishError::NotConnected);
    let commands = CommandManager::new(publisher);

    let err = commands
        .send("dev-1", "ping", Params::new(), Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotConnected));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_cancellation() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));
    let cancel = CancellationToken::new();

    let sender = commands.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        sender
            .send_with_cancel("dev-1", "ping", Params::new(), Duration::from_secs(30), Some(token))
            .await
    });
    let command = published.recv().await.unwrap();
    assert!(commands.is_pending(&command.command_id()));

    cancel.cancel();
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, CommandError::Cancelled));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_cancellation_beats_pending_ack() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));
    let cancel = CancellationToken::new();

    let sender = commands.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        sender
            .send_with_cancel("dev-1", "ping", Params::new(), Duration::from_secs(30), Some(token))
            .await
    });
    let command = published.recv().await.unwrap();

    commands.on_acknowledge(ack_for(&command, "dev-1", true, "OK"));
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, CommandError::Cancelled));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_ack_without_device_id_is_invalid() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));

    let sender = commands.clone();
    let handle = tokio::spawn(async move {
        sender
            .send("dev-1", "ping", Params::new(), Duration::from_secs(5))
            .await
    });
    let command = published.recv().await.unwrap();

    commands.on_acknowledge(ack_for(&command, "", true, "OK"));

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, CommandError::InvalidAcknowledgement));
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_dropped_send_cleans_up() {
    let (publisher, _published) = RecordingPublisher::new();
    let commands = CommandManager::new(publisher);

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        commands.send("dev-1", "ping", Params::new(), Duration::from_secs(30)),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(commands.pending_count(), 0);
}

#[tokio::test]
async fn test_params_are_published() {
    let (publisher, mut published) = RecordingPublisher::new();
    let commands = Arc::new(CommandManager::new(publisher));

    let mut params = Params::new();
    params.insert("intervalMs".into(), ParamValue::Int(5000));
    params.insert("label".into(), ParamValue::from("lab"));

    let sender = commands.clone();
    tokio::spawn(async move {
        let _ = sender
            .send("dev-1", "set_interval", params, Duration::from_secs(5))
            .await;
    });

    let body = published.recv().await.unwrap().json();
    assert_eq!(body["type"], "set_interval");
    assert_eq!(body["params"]["intervalMs"], 5000);
    assert_eq!(body["params"]["label"], "lab");
}
