//! Client for the thor-agent service.
//!
//! The agent keeps conversation history server-side, keyed by a session id it
//! hands out on first contact. The client stores that id and replays it until
//! a reset is requested.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{build_http_client, fetch_health, is_truthy, null_as_default, post_json, status_is_ok};
use super::{BackendError, ChatBackend, ChatTurn};
use crate::config::BackendConfig;
use crate::truncate_preview;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    message: &'a str,
    reset: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// One tool invocation the agent performed while answering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCall {
    #[serde(deserialize_with = "null_as_default")]
    pub tool: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
}

/// Decoded `/chat` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentReply {
    #[serde(deserialize_with = "null_as_default")]
    pub reply: String,
    pub session_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCall>,
}

/// Client for communicating with the Thor agent service.
pub struct AgentClient {
    base_url: String,
    client: Client,
    health_timeout: Duration,
    session_id: Option<String>,
}

impl AgentClient {
    pub fn new(base_url: &str) -> reqwest::Result<Self> {
        Self::with_timeouts(base_url, DEFAULT_TIMEOUT, HEALTH_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: &str,
        timeout: Duration,
        health_timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_http_client(timeout)?,
            health_timeout,
            session_id: None,
        })
    }

    pub fn from_config(config: &BackendConfig) -> reqwest::Result<Self> {
        Self::with_timeouts(&config.url, config.timeout(), config.health_timeout())
    }

    /// Session id that will be attached to the next request, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Forget the current conversation. Local only, no request is made.
    pub fn reset_session(&mut self) {
        info!("Resetting conversation session");
        self.session_id = None;
    }

    /// Send a message to the agent.
    ///
    /// With `reset` set, the stored session id is withheld and the agent is
    /// asked to start over; whatever id it returns becomes the stored one.
    pub async fn send(&mut self, message: &str, reset: bool) -> Result<AgentReply, BackendError> {
        let url = format!("{}/chat", self.base_url);
        let body = ChatRequest {
            message,
            reset,
            session_id: if reset { None } else { self.session_id.as_deref() },
        };

        info!("Sending message to agent: {}", truncate_preview(message, 50));

        let reply: AgentReply = match post_json(&self.client, &url, &body).await {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    BackendError::Timeout { .. } => warn!("Request to agent timed out"),
                    BackendError::Connect { .. } => {
                        warn!("Could not connect to agent at {}", self.base_url)
                    }
                    BackendError::Status { status, .. } => warn!("Agent returned error: {status}"),
                    other => warn!("Unexpected error communicating with agent: {other}"),
                }
                return Err(e);
            }
        };

        if let Some(id) = &reply.session_id {
            debug!("Session ID: {id}");
            self.session_id = Some(id.clone());
        }

        info!("Received reply: {}", truncate_preview(&reply.reply, 50));
        Ok(reply)
    }

    /// Healthy only when the agent is up and its MCP tool layer is ready.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let Some(data) = fetch_health(&self.client, &url, self.health_timeout).await else {
            return false;
        };

        let healthy = status_is_ok(&data) && is_truthy(data.get("mcpReady"));
        if healthy {
            info!("Agent service is healthy");
        } else {
            warn!("Agent service health check failed: {data}");
        }
        healthy
    }
}

#[async_trait]
impl ChatBackend for AgentClient {
    fn name(&self) -> &str {
        "thor-agent"
    }

    async fn chat(&mut self, text: &str) -> Result<ChatTurn, BackendError> {
        let reply = self.send(text, false).await?;
        let actions = reply
            .tool_calls
            .iter()
            .filter_map(|call| serde_json::to_value(call).ok())
            .collect();
        Ok(ChatTurn {
            reply: reply.reply,
            actions,
        })
    }

    async fn health_check(&self) -> bool {
        AgentClient::health_check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::{closed_port_url, serve};
    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn chat_handler(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
        let n = {
            let mut seen = seen.lock().unwrap();
            seen.push(body);
            seen.len()
        };
        let session = if n == 1 { "abc123" } else { "def456" };
        Json(json!({"reply": "Logged!", "sessionId": session}))
    }

    async fn recording_agent() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/chat", post(chat_handler))
            .with_state(seen.clone());
        (serve(app).await, seen)
    }

    fn health_server(body: Value) -> Router {
        Router::new().route("/health", get(move || async move { Json(body) }))
    }

    #[tokio::test]
    async fn first_message_has_no_session_and_stores_returned_one() {
        let (url, seen) = recording_agent().await;
        let mut client = AgentClient::new(&url).unwrap();

        let reply = client
            .send("Log my workout: floor press 4x12 @45", false)
            .await
            .unwrap();

        assert_eq!(reply.reply, "Logged!");
        assert_eq!(client.session_id(), Some("abc123"));

        let body = &seen.lock().unwrap()[0];
        assert_eq!(body["message"], "Log my workout: floor press 4x12 @45");
        assert_eq!(body["reset"], false);
        assert!(body.get("sessionId").is_none());
    }

    #[tokio::test]
    async fn stored_session_is_replayed_then_replaced() {
        let (url, seen) = recording_agent().await;
        let mut client = AgentClient::new(&format!("{url}/")).unwrap();

        client.send("first", false).await.unwrap();
        client.send("second", false).await.unwrap();

        assert_eq!(seen.lock().unwrap()[1]["sessionId"], "abc123");
        assert_eq!(client.session_id(), Some("def456"));
    }

    #[tokio::test]
    async fn reset_withholds_session_and_adopts_new_one() {
        let (url, seen) = recording_agent().await;
        let mut client = AgentClient::new(&url).unwrap();

        client.send("first", false).await.unwrap();
        client.send("start over", true).await.unwrap();

        let body = &seen.lock().unwrap()[1];
        assert_eq!(body["reset"], true);
        assert!(body.get("sessionId").is_none());
        assert_eq!(client.session_id(), Some("def456"));
    }

    #[tokio::test]
    async fn reset_session_is_local_and_idempotent() {
        let (url, seen) = recording_agent().await;
        let mut client = AgentClient::new(&url).unwrap();
        client.send("first", false).await.unwrap();

        client.reset_session();
        client.reset_session();
        assert_eq!(client.session_id(), None);
        assert_eq!(seen.lock().unwrap().len(), 1);

        client.send("again", false).await.unwrap();
        assert!(seen.lock().unwrap()[1].get("sessionId").is_none());
    }

    #[tokio::test]
    async fn tool_calls_surface_as_actions() {
        let app = Router::new().route(
            "/chat",
            post(|| async {
                Json(json!({
                    "reply": "Logged floor press.",
                    "sessionId": "s1",
                    "toolCalls": [{"tool": "log_workout", "result": {"results": []}}]
                }))
            }),
        );
        let url = serve(app).await;
        let mut client = AgentClient::new(&url).unwrap();

        let turn = client.chat("log it").await.unwrap();
        assert_eq!(turn.reply, "Logged floor press.");
        assert_eq!(turn.actions.len(), 1);
        assert_eq!(turn.actions[0]["tool"], "log_workout");
    }

    #[tokio::test]
    async fn null_tool_calls_keep_reply_and_session() {
        let app = Router::new().route(
            "/chat",
            post(|| async { Json(json!({"reply": "Logged!", "sessionId": "abc123", "toolCalls": null})) }),
        );
        let url = serve(app).await;
        let mut client = AgentClient::new(&url).unwrap();

        let turn = client.chat("log it").await.unwrap();
        assert_eq!(turn.reply, "Logged!");
        assert!(turn.actions.is_empty());
        assert_eq!(client.session_id(), Some("abc123"));
    }

    #[tokio::test]
    async fn null_reply_reads_as_empty() {
        let app = Router::new().route(
            "/chat",
            post(|| async {
                Json(json!({"reply": null, "sessionId": "abc123", "toolCalls": [{"tool": null}]}))
            }),
        );
        let url = serve(app).await;
        let mut client = AgentClient::new(&url).unwrap();

        let reply = client.send("hi", false).await.unwrap();
        assert_eq!(reply.reply, "");
        assert_eq!(reply.tool_calls[0].tool, "");
        assert_eq!(client.session_id(), Some("abc123"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let app = Router::new().route(
            "/chat",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let url = serve(app).await;
        let mut client = AgentClient::new(&url).unwrap();

        let err = client.send("hi", false).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status, .. } if status.as_u16() == 500));
        assert_eq!(client.session_id(), None);
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let app = Router::new().route("/chat", post(|| async { "not json" }));
        let url = serve(app).await;
        let mut client = AgentClient::new(&url).unwrap();

        let err = client.send("hi", false).await.unwrap_err();
        assert!(matches!(err, BackendError::Decode { .. }));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let app = Router::new().route(
            "/chat",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"reply": "late"}))
            }),
        );
        let url = serve(app).await;
        let mut client =
            AgentClient::with_timeouts(&url, Duration::from_millis(200), HEALTH_TIMEOUT).unwrap();

        let err = client.send("hi", false).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let url = closed_port_url().await;
        let mut client = AgentClient::new(&url).unwrap();

        let err = client.send("hi", false).await.unwrap_err();
        assert!(matches!(err, BackendError::Connect { .. }));
    }

    #[tokio::test]
    async fn healthy_only_when_mcp_ready() {
        let url = serve(health_server(json!({"status": "ok", "mcpReady": true}))).await;
        assert!(AgentClient::new(&url).unwrap().health_check().await);

        let url = serve(health_server(json!({"status": "ok", "mcpReady": false}))).await;
        assert!(!AgentClient::new(&url).unwrap().health_check().await);

        let url = serve(health_server(json!({"status": "ok", "mcpReady": "true"}))).await;
        assert!(AgentClient::new(&url).unwrap().health_check().await);
    }

    #[tokio::test]
    async fn health_check_never_fails() {
        let url = serve(health_server(json!({"mcpReady": true}))).await;
        assert!(!AgentClient::new(&url).unwrap().health_check().await);

        let app = Router::new().route("/health", get(|| async { "<html>down</html>" }));
        let url = serve(app).await;
        assert!(!AgentClient::new(&url).unwrap().health_check().await);

        let url = closed_port_url().await;
        assert!(!AgentClient::new(&url).unwrap().health_check().await);

        let app = Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"status": "ok", "mcpReady": true}))
            }),
        );
        let url = serve(app).await;
        let client =
            AgentClient::with_timeouts(&url, DEFAULT_TIMEOUT, Duration::from_millis(200)).unwrap();
        assert!(!client.health_check().await);
    }
}
