//! Shared harness: boots the agent and admin servers on ephemeral ports.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use fleet_sync::admin::setup_admin_router;
use fleet_sync::config::{ControlPlaneConfig, EnrollmentKey};
use fleet_sync::http::HttpServer;
use fleet_sync::lifecycle::{bootstrap, Services, Shutdown};
use fleet_sync::model::{Client, Inbound, NodeId, Outbound};

pub const ACME_KEY: &str = "enroll-acme";
pub const GLOBEX_KEY: &str = "enroll-globex";
pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestServer {
    pub base_url: String,
    pub admin_url: String,
    pub services: Services,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<ControlPlaneConfig>,
    http: reqwest::Client,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn test_config() -> ControlPlaneConfig {
    let mut config = ControlPlaneConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.sync.enrollment_keys = vec![
        EnrollmentKey {
            key: ACME_KEY.into(),
            tenant_id: "acme".into(),
        },
        EnrollmentKey {
            key: GLOBEX_KEY.into(),
            tenant_id: "globex".into(),
        },
    ];
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.admin.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    config
}

pub async fn start_server() -> TestServer {
    start_server_with(test_config()).await
}

pub async fn start_server_with(config: ControlPlaneConfig) -> TestServer {
    let services = bootstrap(config).unwrap();
    let shutdown = Shutdown::new();
    let state = services.app_state();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let (config_updates, updates) = mpsc::unbounded_channel();
    let server = HttpServer::new(state.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, updates, server_shutdown).await;
    });

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr: SocketAddr = admin_listener.local_addr().unwrap();
    let admin_router = setup_admin_router(state);
    let mut admin_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(async move {
                let _ = admin_shutdown.recv().await;
            })
            .await;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        admin_url: format!("http://{}", admin_addr),
        services,
        shutdown,
        config_updates,
        http: reqwest::Client::new(),
    }
}

impl TestServer {
    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{}", self.admin_url, path))
            .bearer_auth(ADMIN_KEY)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_post(&self, path: &str, body: Value) -> reqwest::Response {
        self.http
            .post(format!("{}{}", self.admin_url, path))
            .bearer_auth(ADMIN_KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

pub fn node_id(raw: &str) -> NodeId {
    raw.parse().unwrap()
}

pub fn inbound(tenant: &str, node: NodeId, tag: &str, port: u16) -> Inbound {
    serde_json::from_value(json!({
        "tenant_id": tenant,
        "node_id": node,
        "tag": tag,
        "protocol": "vless",
        "port": port,
        "settings": { "decryption": "none" }
    }))
    .unwrap()
}

pub fn outbound(tenant: &str, node: NodeId, tag: &str, priority: i32) -> Outbound {
    serde_json::from_value(json!({
        "tenant_id": tenant,
        "node_id": node,
        "tag": tag,
        "protocol": "freedom",
        "priority": priority
    }))
    .unwrap()
}

pub fn client(tenant: &str, node: NodeId, email: &str, inbound_tags: &[&str]) -> Client {
    serde_json::from_value(json!({
        "tenant_id": tenant,
        "node_id": node,
        "email": email,
        "uuid": uuid::Uuid::new_v4(),
        "inbound_tags": inbound_tags
    }))
    .unwrap()
}

/// Tags of a named top-level array in a served config.
pub fn tags(config: &serde_json::Map<String, Value>, section: &str) -> Vec<String> {
    config
        .get(section)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("tag").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
