//! Telegram bot API glue (teloxide)
//!
//! - [`TelegramSession`] announces the webhook URL when a worker starts
//! - [`TelegramResponder`] sends the fixed-text replies

use async_trait::async_trait;
use relaycore::router::HandlerError;
use relaycore::{AppError, AppResult, BotIdentity, Session};
use reqwest::ClientBuilder;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::RequestError;
use url::Url;

use crate::handlers::Responder;

/// Request timeout of the Bot API client.
pub const BOT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a teloxide client for `bot`, honouring a custom `BOT_API_URL`.
pub fn create_bot(bot: &BotIdentity, timeout: Duration) -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(timeout).build()?;
    let api = Bot::with_client(bot.token(), client);

    let api = if let Ok(bot_api_url) = std::env::var("BOT_API_URL") {
        log::info!("Using custom Bot API URL: {}", bot_api_url);
        let url = Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
        api.set_api_url(url)
    } else {
        api
    };

    Ok(api)
}

/// `<host>/webhook/<token>/`
pub fn webhook_url(host: &str, bot: &BotIdentity) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/webhook/{}/", host.trim_end_matches('/'), bot.token()))
}

/// Registers the relay's webhook with Telegram, dropping updates that piled
/// up while no worker was running.
pub struct TelegramSession {
    api: Bot,
    webhook_host: String,
}

impl TelegramSession {
    pub fn new(api: Bot, webhook_host: impl Into<String>) -> Self {
        Self {
            api,
            webhook_host: webhook_host.into(),
        }
    }
}

#[async_trait]
impl Session for TelegramSession {
    async fn announce(&self, bot: &BotIdentity) -> AppResult<()> {
        let url = webhook_url(&self.webhook_host, bot)
            .map_err(|e| AppError::Validation(format!("Invalid webhook host '{}': {}", self.webhook_host, e)))?;

        self.api
            .set_webhook(url)
            .drop_pending_updates(true)
            .await
            .map_err(session_error)?;

        log::info!("Webhook announced for {} at {}/webhook/…", bot, self.webhook_host.trim_end_matches('/'));
        Ok(())
    }
}

/// Telegram answered and refused (bad token, bad URL): retrying will not help.
/// Anything else (network, flood wait, garbled reply) may pass on a retry.
fn session_error(err: RequestError) -> AppError {
    match err {
        RequestError::Api(_) | RequestError::MigrateToChatId(_) => {
            AppError::Validation(format!("Telegram rejected setWebhook: {}", err))
        }
        other => AppError::Session(other.to_string()),
    }
}

pub struct TelegramResponder {
    api: Bot,
}

impl TelegramResponder {
    pub fn new(api: Bot) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Responder for TelegramResponder {
    async fn send_html(&self, chat_id: i64, text: &str) -> Result<(), HandlerError> {
        self.api
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_url() {
        let bot = BotIdentity::new("123:abc");
        let url = webhook_url("https://bots.example.com/", &bot).unwrap();
        assert_eq!(url.as_str(), "https://bots.example.com/webhook/123:abc/");

        assert!(webhook_url("not a host", &bot).is_err());
    }

    #[test]
    fn test_api_rejection_is_not_retried() {
        use relaycore::retry::Retryable;
        use teloxide::ApiError;

        let rejected = session_error(RequestError::Api(ApiError::InvalidToken));
        assert!(matches!(rejected, AppError::Validation(_)));
        assert!(!rejected.is_retryable());
    }
}
