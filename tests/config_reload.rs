//! Runtime settings applied without a restart.

use agent_sdk::{AgentClient, RegisterRequest};
use std::time::Duration;

use fleet_sync::config::{load_config, EnrollmentKey};

mod common;
use common::{start_server, test_config};

#[tokio::test]
async fn test_new_enrollment_key_applies_after_reload() {
    let server = start_server().await;
    let request = RegisterRequest {
        node_key: "edge-late".into(),
        ..Default::default()
    };

    let mut agent = AgentClient::new(&server.base_url);
    let err = agent.register("enroll-initech", &request).await.unwrap_err();
    assert_eq!(err.status(), Some(401));

    let mut reloaded = test_config();
    reloaded.sync.enrollment_keys.push(EnrollmentKey {
        key: "enroll-initech".into(),
        tenant_id: "initech".into(),
    });
    server.config_updates.send(reloaded).unwrap();

    let mut registered = None;
    for _ in 0..50 {
        if let Ok(r) = agent.register("enroll-initech", &request).await {
            registered = Some(r);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let registered = registered.expect("enrollment key never took effect");
    let node = server
        .services
        .sync
        .node(registered.node_id.parse().unwrap())
        .await
        .unwrap();
    assert_eq!(node.tenant_id.as_str(), "initech");
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet-sync.toml");
    std::fs::write(
        &path,
        r#"
[listener]
bind_address = "127.0.0.1:7000"

[sync]
heartbeat_timeout_secs = 60
sweep_interval_secs = 10

[[sync.enrollment_keys]]
key = "enroll-acme"
tenant_id = "acme"

[observability]
log_format = "json"
"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.listener.bind_address, "127.0.0.1:7000");
    assert_eq!(config.sync.heartbeat_timeout_secs, 60);
    assert_eq!(config.sync.tenant_for_key("enroll-acme"), Some("acme"));
    assert_eq!(config.cache.build_wait_timeout_ms, 10_000);
}
