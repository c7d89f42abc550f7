//! Webhook receiver
//!
//! Endpoints:
//! - `POST /webhook/{token}/` - queue the raw body for the bot owning `token`
//! - `GET /health` - liveness plus per-bot backlog
//!
//! The receiver never decodes or processes payloads. It answers as soon as the
//! enqueue returns so the provider's delivery is decoupled from processing;
//! a failed enqueue yields a non-2xx status and the provider redelivers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::AppResult;
use crate::identity::BotIdentity;
use crate::logging::payload_preview;
use crate::queue::QueueStore;

/// Registered bots, by token.
#[derive(Debug, Clone, Default)]
pub struct BotRegistry {
    by_token: HashMap<String, (String, BotIdentity)>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();
        for bot in &settings.bots {
            registry.register(&bot.name, bot.identity());
        }
        registry
    }

    pub fn register(&mut self, name: &str, bot: BotIdentity) {
        self.by_token
            .insert(bot.token().to_string(), (name.to_string(), bot));
    }

    pub fn lookup(&self, token: &str) -> Option<&BotIdentity> {
        self.by_token.get(token).map(|(_, bot)| bot)
    }

    /// `(name, identity)` pairs sorted by name.
    pub fn bots(&self) -> Vec<(&str, &BotIdentity)> {
        let mut bots: Vec<_> = self
            .by_token
            .values()
            .map(|(name, bot)| (name.as_str(), bot))
            .collect();
        bots.sort_by(|a, b| a.0.cmp(b.0));
        bots
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

/// Shared state of the webhook server
pub struct WebhookState {
    queue: Arc<dyn QueueStore>,
    /// When set, only tokens listed here are accepted
    registry: Option<BotRegistry>,
    start_time: Instant,
}

impl WebhookState {
    /// Accepts any token.
    pub fn open(queue: Arc<dyn QueueStore>) -> Self {
        Self {
            queue,
            registry: None,
            start_time: Instant::now(),
        }
    }

    /// Accepts only the tokens in `registry`; an empty registry accepts any.
    pub fn with_registry(queue: Arc<dyn QueueStore>, registry: BotRegistry) -> Self {
        Self {
            queue,
            registry: (!registry.is_empty()).then_some(registry),
            start_time: Instant::now(),
        }
    }

    fn resolve(&self, token: &str) -> Option<BotIdentity> {
        match &self.registry {
            Some(registry) => registry.lookup(token).cloned(),
            None => Some(BotIdentity::new(token)),
        }
    }
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhook/{token}", post(webhook_handler))
        .route("/webhook/{token}/", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` is cancelled.
pub async fn serve(addr: &str, state: Arc<WebhookState>, shutdown: CancellationToken) -> AppResult<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Webhook receiver listening on http://{}", listener.local_addr()?);
    log::info!("  POST /webhook/<token>/ - provider updates");
    log::info!("  GET  /health           - liveness and backlog");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    log::info!("Webhook receiver stopped");
    Ok(())
}

fn status(code: StatusCode, status: &str) -> (StatusCode, Json<serde_json::Value>) {
    (code, Json(json!({ "status": status })))
}

async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let Some(bot) = state.resolve(&token) else {
        log::warn!("Rejecting update for unregistered token");
        return status(StatusCode::NOT_FOUND, "error");
    };

    if body.is_empty() {
        log::warn!("Rejecting empty update for {}", bot);
        return status(StatusCode::BAD_REQUEST, "error");
    }

    match state.queue.enqueue(&bot, &body).await {
        Ok(()) => {
            log::debug!("Queued {} bytes for {}: {}", body.len(), bot, payload_preview(&body));
            status(StatusCode::OK, "ok")
        }
        Err(e) => {
            log::error!("Failed to queue update for {}: {}", bot, e);
            status(StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
    }
}

async fn health_handler(State(state): State<Arc<WebhookState>>) -> impl IntoResponse {
    let mut healthy = true;
    let mut backlog = serde_json::Map::new();

    if let Some(registry) = &state.registry {
        for (name, bot) in registry.bots() {
            match state.queue.len(bot).await {
                Ok(len) => {
                    backlog.insert(name.to_string(), json!(len));
                }
                Err(e) => {
                    log::warn!("Health check could not read backlog of '{}': {}", name, e);
                    healthy = false;
                    backlog.insert(name.to_string(), serde_json::Value::Null);
                }
            }
        }
    }

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "service": "relay",
        "version": env!("CARGO_PKG_VERSION"),
        "backlog": backlog,
    });
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_trailing_slash_is_optional() {
        let queue = Arc::new(MemoryQueue::new());
        let app = router(Arc::new(WebhookState::open(Arc::clone(&queue) as Arc<dyn QueueStore>)));
        let bot = BotIdentity::new("1:a");

        for uri in ["/webhook/1:a/", "/webhook/1:a"] {
            let response = app
                .clone()
                .oneshot(
                    Request::post(uri)
                        .body(Body::from(r#"{"update_id":1}"#))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(queue.len(&bot).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let queue = Arc::new(MemoryQueue::new());
        let app = router(Arc::new(WebhookState::open(Arc::clone(&queue) as Arc<dyn QueueStore>)));

        let response = app
            .oneshot(Request::post("/webhook/1:a/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(queue.len(&BotIdentity::new("1:a")).await.unwrap(), 0);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = BotRegistry::new();
        registry.register("tarot", BotIdentity::new("2:b"));
        registry.register("parser", BotIdentity::new("1:a"));

        assert_eq!(registry.lookup("1:a"), Some(&BotIdentity::new("1:a")));
        assert!(registry.lookup("3:c").is_none());
        let names: Vec<_> = registry.bots().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["parser", "tarot"]);
    }
}
