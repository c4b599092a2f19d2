//! HTTP clients for the two backend services.
//!
//! - `agent`: thor-agent, a tool-using conversational agent with sessions
//! - `meta_runner`: meta-runner, an intent router in front of several agents
//!
//! Both speak JSON over `POST /chat` and expose `GET /health`. Neither client
//! retries: every failure is returned to the caller as a [`BackendError`],
//! except the health check which folds every failure into `false`.

pub mod agent;
pub mod meta_runner;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, error};

pub use agent::{AgentClient, AgentReply, ToolCall};
pub use meta_runner::{MetaRunnerClient, RouterReply};

/// Failure of a single backend exchange.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl BackendError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        let url = url.to_string();
        if e.is_timeout() {
            Self::Timeout { url }
        } else if e.is_connect() {
            Self::Connect { url, source: e }
        } else {
            Self::Request { url, source: e }
        }
    }
}

/// What the pipeline needs from one backend turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatTurn {
    /// Text to speak back to the user.
    pub reply: String,
    /// Structured side effects reported by the backend (tool calls, actions).
    pub actions: Vec<serde_json::Value>,
}

/// A conversational backend the voice pipeline can dispatch to.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Human-readable service name for logs and status messages.
    fn name(&self) -> &str;

    /// Send one transcript and return the reply. Exactly one request per call.
    async fn chat(&mut self, text: &str) -> Result<ChatTurn, BackendError>;

    /// Go/no-go check. Never fails; any error means `false`.
    async fn health_check(&self) -> bool;
}

pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

/// POST a JSON body and decode the JSON reply.
pub(crate) async fn post_json<B, R>(client: &Client, url: &str, body: &B) -> Result<R, BackendError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| BackendError::from_reqwest(url, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(BackendError::Status {
            url: url.to_string(),
            status,
        });
    }

    let text = resp
        .text()
        .await
        .map_err(|e| BackendError::from_reqwest(url, e))?;
    debug!("Response body from {url}: {}", crate::truncate_preview(&text, 200));

    serde_json::from_str(&text).map_err(|source| BackendError::Decode {
        url: url.to_string(),
        source,
    })
}

/// GET a health endpoint. Returns the decoded body, or `None` on any failure.
pub(crate) async fn fetch_health(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Option<serde_json::Value> {
    let resp = match client.get(url).timeout(timeout).send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!("Health check failed: {}", BackendError::from_reqwest(url, e));
            return None;
        }
    };

    if !resp.status().is_success() {
        error!("Health check failed: {url} returned HTTP {}", resp.status());
        return None;
    }

    match resp.json::<serde_json::Value>().await {
        Ok(data) => Some(data),
        Err(e) => {
            error!("Health check failed: unreadable body from {url}: {e}");
            None
        }
    }
}

/// Loose truthiness for health flags that may arrive as bools or strings.
pub(crate) fn is_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(serde_json::Value::Array(a)) => !a.is_empty(),
        Some(serde_json::Value::Object(o)) => !o.is_empty(),
        Some(serde_json::Value::Null) | None => false,
    }
}

/// Treat an explicit JSON `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn unknown() -> String {
    "unknown".to_string()
}

/// Metadata string that reads `"unknown"` when missing or `null`.
pub(crate) fn unknown_if_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(unknown))
}

pub(crate) fn status_is_ok(data: &serde_json::Value) -> bool {
    data.get("status").and_then(|s| s.as_str()) == Some("ok")
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    /// Serve a router on an ephemeral localhost port and return its base URL.
    pub async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// A base URL nothing is listening on.
    pub async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }
}
