//! Handler routing
//!
//! A router is an ordered list of `(predicate, handler)` routes contributed by
//! a bot personality. The first route whose predicate matches an envelope
//! handles it; later routes are not consulted.

use async_trait::async_trait;
use moka::sync::Cache;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::defaults;
use crate::envelope::Envelope;
use crate::identity::BotIdentity;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type HandlerResult = Result<(), HandlerError>;

/// Something that acts on a matched envelope.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> HandlerResult;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

/// Wraps `f` as a handler. The closure receives its own copy of the envelope.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, envelope: &Envelope, _ctx: &HandlerContext) -> HandlerResult {
        (self.0)(envelope.clone()).await
    }
}

/// Per-worker state handed to every handler invocation.
///
/// Owned by a single dispatch worker; nothing in here is shared between bots.
pub struct HandlerContext {
    pub bot: BotIdentity,
    pub bot_name: String,
    /// Administrative chat of this bot
    pub system_chat_id: i64,
    user_state: Cache<i64, serde_json::Value>,
}

impl HandlerContext {
    pub fn new(bot: BotIdentity, bot_name: impl Into<String>, system_chat_id: i64) -> Self {
        Self {
            bot,
            bot_name: bot_name.into(),
            system_chat_id,
            user_state: user_state_cache(
                defaults::USER_STATE_CAPACITY,
                Duration::from_secs(defaults::USER_STATE_IDLE_SECS),
            ),
        }
    }

    /// Bounds the per-user state: at most `capacity` users, each forgotten
    /// after `idle` without activity.
    #[must_use]
    pub fn with_user_state_limits(mut self, capacity: u64, idle: Duration) -> Self {
        self.user_state = user_state_cache(capacity, idle);
        self
    }

    /// Ephemeral per-user state (e.g. cards already drawn in this session).
    /// Lost when the worker stops.
    pub fn user_state(&self, user_id: i64) -> Option<serde_json::Value> {
        self.user_state.get(&user_id)
    }

    pub fn set_user_state(&self, user_id: i64, state: serde_json::Value) {
        if state.is_null() {
            self.user_state.invalidate(&user_id);
        } else {
            self.user_state.insert(user_id, state);
        }
    }

    pub fn tracked_users(&self) -> u64 {
        self.user_state.run_pending_tasks();
        self.user_state.entry_count()
    }
}

fn user_state_cache(capacity: u64, idle: Duration) -> Cache<i64, serde_json::Value> {
    Cache::builder().max_capacity(capacity).time_to_idle(idle).build()
}

/// Matching rule of a route.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `/name` in a new message; with `requires_args` at least one argument
    Command { name: String, requires_args: bool },
    /// Plain (non-command) message text matching the pattern anywhere
    Text(Regex),
    /// Message text starting with a command, matched as a whole against the
    /// pattern (for command families like `/card3 deck 5`)
    CommandText(Regex),
    /// Media caption matching the pattern anywhere
    Caption(Regex),
    /// Message carrying a photo
    Photo,
    /// Callback data matching the pattern
    Callback(Regex),
    /// Event happened in a private chat
    PrivateChat,
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn command(name: &str) -> Self {
        Predicate::Command {
            name: name.to_lowercase(),
            requires_args: false,
        }
    }

    pub fn command_with_args(name: &str) -> Self {
        Predicate::Command {
            name: name.to_lowercase(),
            requires_args: true,
        }
    }

    pub fn text(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::Text(Regex::new(pattern)?))
    }

    pub fn command_text(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::CommandText(Regex::new(pattern)?))
    }

    pub fn caption(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::Caption(Regex::new(pattern)?))
    }

    pub fn callback(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::Callback(Regex::new(pattern)?))
    }

    /// Restricts `self` to private chats.
    #[must_use]
    pub fn in_private(self) -> Self {
        Predicate::All(vec![self, Predicate::PrivateChat])
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Predicate::Command { name, requires_args } => envelope
                .command()
                .is_some_and(|cmd| &cmd.name == name && (!requires_args || !cmd.args.is_empty())),
            Predicate::Text(pattern) => envelope.message.as_ref().is_some_and(|msg| {
                msg.command().is_none() && msg.text.as_deref().is_some_and(|text| pattern.is_match(text))
            }),
            Predicate::CommandText(pattern) => envelope.message.as_ref().is_some_and(|msg| {
                msg.command().is_some() && msg.text.as_deref().is_some_and(|text| pattern.is_match(text))
            }),
            Predicate::Caption(pattern) => envelope
                .message
                .as_ref()
                .and_then(|msg| msg.caption.as_deref())
                .is_some_and(|caption| pattern.is_match(caption)),
            Predicate::Photo => envelope.message.as_ref().is_some_and(|msg| msg.has_photo()),
            Predicate::Callback(pattern) => envelope.callback_data().is_some_and(|data| pattern.is_match(data)),
            Predicate::PrivateChat => envelope.is_private_chat(),
            Predicate::All(parts) => parts.iter().all(|part| part.matches(envelope)),
            Predicate::Any(parts) => parts.iter().any(|part| part.matches(envelope)),
            Predicate::Not(inner) => !inner.matches(envelope),
        }
    }
}

/// One `(predicate, handler)` pair.
#[derive(Clone)]
pub struct Route {
    pub name: String,
    pub predicate: Predicate,
    pub handler: Arc<dyn Handler>,
}

impl Route {
    pub fn new(name: impl Into<String>, predicate: Predicate, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            predicate,
            handler,
        }
    }
}

/// First-match dispatcher over an ordered route list.
#[derive(Clone, Default)]
pub struct HandlerRouter {
    routes: Vec<Route>,
    /// Own `@username`, lowercased and without the `@`
    username: Option<String>,
}

impl HandlerRouter {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes, username: None }
    }

    /// Ignores commands that mention another bot (`/start@other_bot`).
    /// Without a username every mention is accepted.
    #[must_use]
    pub fn with_username(mut self, username: Option<&str>) -> Self {
        self.username = username
            .map(|name| name.trim().trim_start_matches('@').to_lowercase())
            .filter(|name| !name.is_empty());
        self
    }

    fn addressed_elsewhere(&self, envelope: &Envelope) -> bool {
        let Some(own) = &self.username else {
            return false;
        };
        envelope
            .command()
            .and_then(|cmd| cmd.mention)
            .is_some_and(|mention| mention.to_lowercase() != *own)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Route that would handle `envelope`, without running it.
    pub fn route_for(&self, envelope: &Envelope) -> Option<&Route> {
        if self.addressed_elsewhere(envelope) {
            return None;
        }
        self.routes.iter().find(|route| route.predicate.matches(envelope))
    }

    /// Runs the first matching handler.
    ///
    /// Returns the name of the route that handled the envelope, or `None`
    /// when nothing matched (not an error: most chatter has no handler).
    pub async fn dispatch(&self, envelope: &Envelope, ctx: &HandlerContext) -> Result<Option<String>, HandlerError> {
        let Some(route) = self.route_for(envelope) else {
            return Ok(None);
        };
        route.handler.handle(envelope, ctx).await?;
        Ok(Some(route.name.clone()))
    }
}
