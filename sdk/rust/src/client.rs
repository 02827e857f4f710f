use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::types::{
    ConfigResponse, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    StatsEntry, StatsResponse,
};

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("control plane returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("client has no node credential; register first")]
    NotRegistered,
}

impl SdkError {
    /// HTTP status of a rejected call.
    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One agent's session with the control plane.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
        }
    }

    /// A client resuming a previous registration.
    pub fn with_credentials(base_url: &str, node_id: &str, token: &str) -> Self {
        let mut client = Self::new(base_url);
        client.credentials = Some((node_id.to_string(), token.to_string()));
        client
    }

    pub fn node_id(&self) -> Option<&str> {
        self.credentials.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|(_, token)| token.as_str())
    }

    /// Register with an enrollment key and keep the returned credential.
    pub async fn register(
        &mut self,
        enrollment_key: &str,
        req: &RegisterRequest,
    ) -> Result<RegisterResponse, SdkError> {
        let resp = self
            .client
            .post(format!("{}/api/v1/agent/register", self.base_url))
            .bearer_auth(enrollment_key)
            .json(req)
            .send()
            .await?;
        let registered: RegisterResponse = decode(resp).await?;
        self.credentials = Some((registered.node_id.clone(), registered.token.clone()));
        Ok(registered)
    }

    pub async fn heartbeat(&self, mut report: HeartbeatRequest) -> Result<HeartbeatResponse, SdkError> {
        let (node_id, token) = self.credentials()?;
        report.node_id = node_id.to_string();
        let resp = self
            .client
            .post(format!("{}/api/v1/agent/heartbeat", self.base_url))
            .bearer_auth(token)
            .json(&report)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn fetch_config(&self) -> Result<ConfigResponse, SdkError> {
        let (node_id, token) = self.credentials()?;
        let resp = self
            .client
            .get(format!("{}/api/v1/agent/config/{}", self.base_url, node_id))
            .bearer_auth(token)
            .send()
            .await?;
        decode(resp).await
    }

    /// Report counters for `window`, or the server's current window when `None`.
    pub async fn report_stats(
        &self,
        window: Option<u64>,
        stats: &[StatsEntry],
    ) -> Result<StatsResponse, SdkError> {
        let (node_id, token) = self.credentials()?;
        let mut body = json!({ "nodeId": node_id, "stats": stats });
        if let Some(window) = window {
            body["window"] = json!(window);
        }
        let resp = self
            .client
            .post(format!("{}/api/v1/agent/stats", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        decode(resp).await
    }

    fn credentials(&self) -> Result<(&str, &str), SdkError> {
        self.credentials
            .as_ref()
            .map(|(id, token)| (id.as_str(), token.as_str()))
            .ok_or(SdkError::NotRegistered)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, SdkError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SdkError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}
