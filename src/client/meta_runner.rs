//! Client for the meta-runner routing service.
//!
//! The meta-runner classifies each message, forwards it to the matching agent
//! (thor, nutrition, health) and reports which agent, intent and model handled
//! it. It keeps no session, so the client is stateless apart from its mode.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{build_http_client, fetch_health, post_json, status_is_ok};
use super::{null_as_default, unknown, unknown_if_null};
use super::{BackendError, ChatBackend, ChatTurn};
use crate::config::{BackendConfig, RoutingMode};
use crate::truncate_preview;

/// Local LLMs behind the router can take a while.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct RouteRequest<'a> {
    text: &'a str,
    mode: &'a str,
}

/// Decoded `/chat` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterReply {
    #[serde(default = "unknown", deserialize_with = "unknown_if_null")]
    pub agent: String,
    #[serde(default = "unknown", deserialize_with = "unknown_if_null")]
    pub intent: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default = "unknown", deserialize_with = "unknown_if_null")]
    pub model: String,
    #[serde(default = "unknown", deserialize_with = "unknown_if_null")]
    pub provider: String,
    #[serde(default)]
    pub actions: Option<Vec<serde_json::Value>>,
}

/// Client for communicating with the meta-runner service.
pub struct MetaRunnerClient {
    base_url: String,
    client: Client,
    health_timeout: Duration,
    mode: RoutingMode,
}

impl MetaRunnerClient {
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
            mode: RoutingMode::Auto,
        })
    }

    pub fn from_config(config: &BackendConfig) -> reqwest::Result<Self> {
        Ok(Self::with_timeouts(&config.url, config.timeout(), config.health_timeout())?
            .with_mode(config.routing_mode))
    }

    /// Routing mode used when the client drives the voice pipeline.
    pub fn with_mode(mut self, mode: RoutingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Send a message to the meta-runner with an explicit routing mode.
    pub async fn send(&self, text: &str, mode: RoutingMode) -> Result<RouterReply, BackendError> {
        let url = format!("{}/chat", self.base_url);
        let body = RouteRequest {
            text,
            mode: mode.as_str(),
        };

        info!("Sending message to meta-runner: {}", truncate_preview(text, 50));

        let reply: RouterReply = match post_json(&self.client, &url, &body).await {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    BackendError::Timeout { .. } => warn!("Request to meta-runner timed out"),
                    BackendError::Connect { .. } => {
                        warn!("Could not connect to meta-runner at {}", self.base_url)
                    }
                    BackendError::Status { status, .. } => {
                        warn!("Meta-runner returned error: {status}")
                    }
                    other => warn!("Unexpected error communicating with meta-runner: {other}"),
                }
                return Err(e);
            }
        };

        info!(
            "Agent: {} | Intent: {} | Model: {}/{}",
            reply.agent, reply.intent, reply.provider, reply.model
        );
        info!("Response: {}", truncate_preview(&reply.message, 100));

        Ok(reply)
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        let Some(data) = fetch_health(&self.client, &url, self.health_timeout).await else {
            return false;
        };

        let healthy = status_is_ok(&data);
        if healthy {
            info!("Meta-runner service is healthy");
        } else {
            warn!("Meta-runner service health check failed: {data}");
        }
        healthy
    }
}

/// Render a reply for terminal display: a framed metadata header, then the message.
pub fn format_response(reply: &RouterReply) -> String {
    let header = format!(
        "Agent: {} | Intent: {} | Model: {}/{}",
        reply.agent, reply.intent, reply.provider, reply.model
    );
    let separator = "=".repeat(header.chars().count());

    format!("\n{separator}\n{header}\n{separator}\n\n{}\n", reply.message)
}

#[async_trait]
impl ChatBackend for MetaRunnerClient {
    fn name(&self) -> &str {
        "meta-runner"
    }

    async fn chat(&mut self, text: &str) -> Result<ChatTurn, BackendError> {
        let reply = self.send(text, self.mode).await?;
        Ok(ChatTurn {
            reply: reply.message,
            actions: reply.actions.unwrap_or_default(),
        })
    }

    async fn health_check(&self) -> bool {
        MetaRunnerClient::health_check(self).await
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

    async fn route_handler(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
        seen.lock().unwrap().push(body);
        Json(json!({
            "agent": "thor",
            "intent": "log_workout",
            "message": "Logged floor press 4x12 at 45.",
            "model": "llama3.1:8b",
            "provider": "ollama",
            "actions": [{"type": "log_workout"}]
        }))
    }

    async fn recording_router() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/chat", post(route_handler))
            .with_state(seen.clone());
        (serve(app).await, seen)
    }

    #[tokio::test]
    async fn send_posts_text_and_mode() {
        let (url, seen) = recording_router().await;
        let client = MetaRunnerClient::new(&url).unwrap();

        let reply = client
            .send("Log my workout: floor press 4x12 @45", RoutingMode::Thor)
            .await
            .unwrap();

        assert_eq!(reply.agent, "thor");
        assert_eq!(reply.intent, "log_workout");
        assert_eq!(reply.provider, "ollama");
        let body = &seen.lock().unwrap()[0];
        assert_eq!(body, &json!({"text": "Log my workout: floor press 4x12 @45", "mode": "thor"}));
    }

    #[tokio::test]
    async fn chat_uses_configured_mode_and_maps_message() {
        let (url, seen) = recording_router().await;
        let mut client = MetaRunnerClient::new(&url)
            .unwrap()
            .with_mode(RoutingMode::Nutrition);

        let turn = client.chat("I ate a chicken salad").await.unwrap();

        assert_eq!(turn.reply, "Logged floor press 4x12 at 45.");
        assert_eq!(turn.actions, vec![json!({"type": "log_workout"})]);
        assert_eq!(seen.lock().unwrap()[0]["mode"], "nutrition");
    }

    #[tokio::test]
    async fn missing_metadata_defaults_to_unknown() {
        let app = Router::new().route("/chat", post(|| async { Json(json!({"message": "hi"})) }));
        let url = serve(app).await;
        let client = MetaRunnerClient::new(&url).unwrap();

        let reply = client.send("hello", RoutingMode::Auto).await.unwrap();
        assert_eq!(reply.agent, "unknown");
        assert_eq!(reply.model, "unknown");
        assert!(reply.actions.is_none());
    }

    #[tokio::test]
    async fn null_fields_read_as_missing() {
        let app = Router::new().route(
            "/chat",
            post(|| async {
                Json(json!({"agent": null, "intent": "log_meal", "message": null, "model": null, "actions": null}))
            }),
        );
        let url = serve(app).await;
        let mut client = MetaRunnerClient::new(&url).unwrap();

        let reply = client.send("hello", RoutingMode::Auto).await.unwrap();
        assert_eq!(reply.agent, "unknown");
        assert_eq!(reply.intent, "log_meal");
        assert_eq!(reply.model, "unknown");
        assert_eq!(reply.message, "");

        let turn = client.chat("hello").await.unwrap();
        assert_eq!(turn.reply, "");
        assert!(turn.actions.is_empty());
    }

    #[tokio::test]
    async fn health_needs_status_ok() {
        let app = Router::new().route("/health", get(|| async { Json(json!({"status": "ok"})) }));
        let url = serve(app).await;
        assert!(MetaRunnerClient::new(&url).unwrap().health_check().await);

        let app =
            Router::new().route("/health", get(|| async { Json(json!({"status": "starting"})) }));
        let url = serve(app).await;
        assert!(!MetaRunnerClient::new(&url).unwrap().health_check().await);

        let url = closed_port_url().await;
        assert!(!MetaRunnerClient::new(&url).unwrap().health_check().await);
    }

    #[test]
    fn format_response_frames_header() {
        let reply = RouterReply {
            agent: "nutrition".into(),
            intent: "log_meal".into(),
            message: "Logged your lunch.".into(),
            model: "gpt-4".into(),
            provider: "openai".into(),
            actions: None,
        };

        let header = "Agent: nutrition | Intent: log_meal | Model: openai/gpt-4";
        let separator = "=".repeat(header.len());
        assert_eq!(
            format_response(&reply),
            format!("\n{separator}\n{header}\n{separator}\n\nLogged your lunch.\n")
        );
    }
}
