//! Handlers shared by the personalities
//!
//! - [`Reply`] answers with fixed HTML text
//! - [`Privileged`] only lets administrative (synthetic) envelopes through
//! - [`Forward`] hands the envelope to the external command backend

use async_trait::async_trait;
use relaycore::router::{Handler, HandlerContext, HandlerError, HandlerResult};
use relaycore::Envelope;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Outbound side of the bot API.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_html(&self, chat_id: i64, text: &str) -> Result<(), HandlerError>;
}

/// Replies to the originating chat with a fixed text.
pub struct Reply {
    responder: Arc<dyn Responder>,
    text: String,
}

impl Reply {
    pub fn new(responder: Arc<dyn Responder>, text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            responder,
            text: text.into(),
        })
    }
}

#[async_trait]
impl Handler for Reply {
    async fn handle(&self, envelope: &Envelope, _ctx: &HandlerContext) -> HandlerResult {
        let chat_id = envelope.chat_id().ok_or("envelope has no chat to reply to")?;
        self.responder.send_html(chat_id, &self.text).await
    }
}

/// Runs the inner handler only for envelopes injected by the system.
pub struct Privileged {
    inner: Arc<dyn Handler>,
}

impl Privileged {
    pub fn new(inner: Arc<dyn Handler>) -> Arc<Self> {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl Handler for Privileged {
    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> HandlerResult {
        if !envelope.is_system_origin() {
            let sender = envelope.sender().map(|s| s.id.to_string()).unwrap_or_default();
            log::warn!(
                "Ignoring privileged {:?} on '{}' from sender {}",
                envelope.command().map(|cmd| cmd.name),
                ctx.bot_name,
                sender
            );
            return Ok(());
        }
        self.inner.handle(envelope, ctx).await
    }
}

/// Request body sent to the command backend
#[derive(Debug, Serialize)]
pub struct ForwardRequest<'a> {
    pub bot: &'a str,
    pub action: &'a str,
    pub envelope: &'a Envelope,
    /// Per-user state returned by the previous call for this user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

/// Optional response body of the command backend
#[derive(Debug, Default, Deserialize)]
pub struct ForwardResponse {
    /// Replaces the user's state; `null` clears it, absent keeps it
    #[serde(default, deserialize_with = "present")]
    pub state: Option<serde_json::Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// HTTP client of the service that runs command business logic.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    client: reqwest::Client,
    url: Url,
}

impl CommandBackend {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid command backend URL '{}': {}", url, e))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn post(&self, request: &ForwardRequest<'_>) -> Result<ForwardResponse, HandlerError> {
        let response = self.client.post(self.url.clone()).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("command backend answered {} for '{}'", status, request.action).into());
        }
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(ForwardResponse::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Sends the envelope to the command backend under an action name.
pub struct Forward {
    backend: Option<Arc<CommandBackend>>,
    action: String,
}

impl Forward {
    pub fn new(backend: Option<Arc<CommandBackend>>, action: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            action: action.into(),
        })
    }
}

#[async_trait]
impl Handler for Forward {
    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> HandlerResult {
        let Some(backend) = &self.backend else {
            log::info!(
                "No command backend configured, skipping '{}' for '{}' (update {})",
                self.action,
                ctx.bot_name,
                envelope.update_id
            );
            return Ok(());
        };

        let user_id = envelope.sender().and_then(|sender| sender.id.as_i64());
        let request = ForwardRequest {
            bot: &ctx.bot_name,
            action: &self.action,
            envelope,
            state: user_id.and_then(|id| ctx.user_state(id)),
        };
        let response = backend.post(&request).await?;

        if let (Some(id), Some(state)) = (user_id, response.state) {
            ctx.set_user_state(id, state);
        }
        log::debug!("Forwarded '{}' for '{}'", self.action, ctx.bot_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::BotIdentity;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(i64, String)>>);

    #[async_trait]
    impl Responder for Outbox {
        async fn send_html(&self, chat_id: i64, text: &str) -> Result<(), HandlerError> {
            self.0.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    fn ctx() -> HandlerContext {
        HandlerContext::new(BotIdentity::new("1:a"), "parser", -100)
    }

    fn envelope(raw: &str) -> Envelope {
        Envelope::decode(raw.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_reply_targets_origin_chat() {
        let outbox = Arc::new(Outbox::default());
        let reply = Reply::new(Arc::clone(&outbox) as Arc<dyn Responder>, "<b>hi</b>");

        reply
            .handle(&envelope(r#"{"update_id":1,"message":{"text":"/start","chat":{"id":77,"type":"private"}}}"#), &ctx())
            .await
            .unwrap();

        assert_eq!(*outbox.0.lock().unwrap(), vec![(77, "<b>hi</b>".to_string())]);
    }

    #[tokio::test]
    async fn test_reply_without_chat_fails() {
        let reply = Reply::new(Arc::new(Outbox::default()), "hi");
        assert!(reply.handle(&envelope(r#"{"update_id":1}"#), &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_privileged_rejects_regular_users() {
        let outbox = Arc::new(Outbox::default());
        let guarded = Privileged::new(Reply::new(Arc::clone(&outbox) as Arc<dyn Responder>, "report"));

        let user = r#"{"update_id":1,"message":{"text":"/popular","from":{"id":5,"first_name":"Ann"},"chat":{"id":5}}}"#;
        let system = r#"{"update_id":2,"message":{"text":"/popular","from":{"id":-100,"first_name":"django_task"},"chat":{"id":-100}}}"#;
        guarded.handle(&envelope(user), &ctx()).await.unwrap();
        guarded.handle(&envelope(system), &ctx()).await.unwrap();

        assert_eq!(*outbox.0.lock().unwrap(), vec![(-100, "report".to_string())]);
    }

    #[tokio::test]
    async fn test_forward_without_backend_is_skipped() {
        let forward = Forward::new(None, "search");
        forward
            .handle(&envelope(r#"{"update_id":1,"message":{"text":"/search boots"}}"#), &ctx())
            .await
            .unwrap();
    }

    #[test]
    fn test_response_state_null_differs_from_absent() {
        let cleared: ForwardResponse = serde_json::from_str(r#"{"state":null}"#).unwrap();
        assert_eq!(cleared.state, Some(serde_json::Value::Null));

        let kept: ForwardResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(kept.state, None);
    }

    #[test]
    fn test_backend_url_is_validated() {
        assert!(CommandBackend::new("not a url", Duration::from_secs(1)).is_err());
        let backend = CommandBackend::new("http://127.0.0.1:9000/commands", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.url().path(), "/commands");
    }
}
