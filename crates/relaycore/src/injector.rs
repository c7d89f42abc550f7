//! Synthetic commands
//!
//! Scheduled and administrative actions are delivered as envelopes shaped
//! exactly like the provider's, pushed through the same
//! [`QueueStore::enqueue`](crate::queue::QueueStore::enqueue) call the webhook
//! uses. Once queued they are indistinguishable from organic traffic apart
//! from the sender, which carries [`SYSTEM_SENDER_NAME`] so privileged
//! handlers can recognize administrative origin.

use chrono::Utc;
use std::sync::Arc;

use crate::envelope::{
    utf16_len, Chat, Envelope, Message, MessageEntity, PeerId, Sender, ENTITY_BOT_COMMAND, ENTITY_URL,
    SYSTEM_SENDER_NAME,
};
use crate::error::{AppError, AppResult};
use crate::identity::BotIdentity;
use crate::queue::QueueStore;

/// `message_id` of a synthetic envelope is the timestamp folded into this range.
const MESSAGE_ID_MODULUS: i64 = 100_000;

/// A logical command addressed to one bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticCommand {
    pub bot: BotIdentity,
    pub name: String,
    pub args: Vec<String>,
}

impl SyntheticCommand {
    pub fn new(bot: BotIdentity, name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            bot,
            name: name.into(),
            args,
        }
    }

    /// `/<name> <args…>`; no trailing space without arguments.
    pub fn text(&self) -> String {
        let mut text = format!("/{}", self.name);
        for arg in &self.args {
            text.push(' ');
            text.push_str(arg);
        }
        text
    }

    fn validate(&self) -> AppResult<()> {
        let name = self.name.as_str();
        if name.is_empty() || name.starts_with('/') || name.chars().any(char::is_whitespace) {
            return Err(AppError::Validation(format!("invalid command name '{}'", name)));
        }
        if self.args.iter().any(|arg| arg.is_empty() || arg.chars().any(char::is_whitespace)) {
            return Err(AppError::Validation(format!(
                "arguments of '/{}' must be non-empty words",
                name
            )));
        }
        Ok(())
    }
}

/// Builds synthetic envelopes and queues them.
pub struct CommandInjector {
    queue: Arc<dyn QueueStore>,
    /// Sender/chat id stamped on injected envelopes
    system_chat_id: i64,
}

impl CommandInjector {
    pub fn new(queue: Arc<dyn QueueStore>, system_chat_id: i64) -> Self {
        Self { queue, system_chat_id }
    }

    /// Renders `command` into a provider-shaped envelope stamped with the
    /// current time.
    pub fn build(&self, command: &SyntheticCommand) -> AppResult<Envelope> {
        self.build_at(command, Utc::now().timestamp())
    }

    /// Same as [`build`](Self::build) with an explicit unix timestamp.
    pub fn build_at(&self, command: &SyntheticCommand, now: i64) -> AppResult<Envelope> {
        command.validate()?;
        let token_len = utf16_len(&command.name) + 1;
        Ok(self.envelope(now, command.text(), ENTITY_BOT_COMMAND, token_len))
    }

    /// Renders free text (e.g. a product link to re-parse) annotated as a
    /// link spanning the whole text.
    pub fn build_text(&self, text: &str) -> AppResult<Envelope> {
        self.build_text_at(text, Utc::now().timestamp())
    }

    pub fn build_text_at(&self, text: &str, now: i64) -> AppResult<Envelope> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("injected text must not be empty".to_string()));
        }
        Ok(self.envelope(now, text.to_string(), ENTITY_URL, utf16_len(text)))
    }

    /// Builds and queues a command for `command.bot`.
    pub async fn inject(&self, command: &SyntheticCommand) -> AppResult<Envelope> {
        let envelope = self.build(command)?;
        log::info!(
            "Queueing synthetic command {} for {} (update_id {})",
            command.text(),
            command.bot,
            envelope.update_id
        );
        self.queue.enqueue(&command.bot, &envelope.encode()?).await?;
        Ok(envelope)
    }

    /// Builds and queues free text for `bot`.
    pub async fn inject_text(&self, bot: &BotIdentity, text: &str) -> AppResult<Envelope> {
        let envelope = self.build_text(text)?;
        log::info!("Queueing synthetic text for {} (update_id {})", bot, envelope.update_id);
        self.queue.enqueue(bot, &envelope.encode()?).await?;
        Ok(envelope)
    }

    fn envelope(&self, now: i64, text: String, entity_kind: &str, entity_len: usize) -> Envelope {
        let system_id = PeerId::Numeric(self.system_chat_id);
        Envelope {
            update_id: now,
            message: Some(Message {
                message_id: Some(now.rem_euclid(MESSAGE_ID_MODULUS)),
                from: Some(Sender {
                    id: system_id.clone(),
                    is_bot: false,
                    first_name: SYSTEM_SENDER_NAME.to_string(),
                    last_name: None,
                    username: None,
                    language_code: None,
                }),
                chat: Some(Chat {
                    id: system_id,
                    kind: Some("private".to_string()),
                }),
                date: Some(now),
                text: Some(text),
                caption: None,
                entities: vec![MessageEntity {
                    kind: entity_kind.to_string(),
                    offset: 0,
                    length: entity_len,
                }],
                photo: None,
            }),
            edited_message: None,
            callback_query: None,
        }
    }
}

/// Argument list for the `top_brand` / `top_category` triggers.
pub fn exclusion_args(ids: &[i64]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn injector() -> (Arc<MemoryQueue>, CommandInjector) {
        let queue = Arc::new(MemoryQueue::new());
        let injector = CommandInjector::new(Arc::clone(&queue) as Arc<dyn QueueStore>, -100500);
        (queue, injector)
    }

    #[test]
    fn test_build_top_brand() {
        let (_, injector) = injector();
        let command = SyntheticCommand::new(
            BotIdentity::new("1:a"),
            "top_brand",
            vec!["12".to_string(), "34".to_string()],
        );
        let envelope = injector.build_at(&command, 1_718_000_123).unwrap();
        let message = envelope.message.as_ref().unwrap();

        assert_eq!(message.text.as_deref(), Some("/top_brand 12 34"));
        let entity = &message.entities[0];
        assert_eq!(entity.kind, "bot_command");
        assert_eq!(entity.offset, 0);
        assert_eq!(&message.text.as_deref().unwrap()[..entity.length], "/top_brand");
    }

    #[test]
    fn test_wire_shape_matches_provider_schema() {
        let (_, injector) = injector();
        let command = SyntheticCommand::new(BotIdentity::new("1:a"), "popular", Vec::new());
        let envelope = injector.build_at(&command, 1_718_000_123).unwrap();
        let wire: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();

        assert_eq!(
            wire,
            json!({
                "update_id": 1_718_000_123,
                "message": {
                    "message_id": 123,
                    "from": {"id": -100500, "is_bot": false, "first_name": "django_task"},
                    "chat": {"id": -100500, "type": "private"},
                    "date": 1_718_000_123,
                    "text": "/popular",
                    "entities": [{"type": "bot_command", "offset": 0, "length": 8}]
                }
            })
        );
    }

    #[test]
    fn test_build_text_uses_url_entity() {
        let (_, injector) = injector();
        let link = "https://www.wildberries.ru/catalog/123456/detail.aspx";
        let envelope = injector.build_text_at(link, 10).unwrap();
        let message = envelope.message.unwrap();

        assert_eq!(message.text.as_deref(), Some(link));
        assert_eq!(message.entities[0].kind, "url");
        assert_eq!(message.entities[0].length, link.len());
        assert_eq!(message.command(), None);
    }

    #[test]
    fn test_rejects_malformed_commands() {
        let (_, injector) = injector();
        let bot = BotIdentity::new("1:a");
        for (name, args) in [
            ("", vec![]),
            ("/popular", vec![]),
            ("top brand", vec![]),
            ("top_brand", vec!["1 2".to_string()]),
        ] {
            let command = SyntheticCommand::new(bot.clone(), name, args);
            assert!(matches!(injector.build(&command), Err(AppError::Validation(_))));
        }
        assert!(injector.build_text("  ").is_err());
    }

    #[tokio::test]
    async fn test_inject_enqueues_encoded_envelope() {
        let (queue, injector) = injector();
        let bot = BotIdentity::new("1:a");
        let command = SyntheticCommand::new(bot.clone(), "top_category", exclusion_args(&[7, 9]));

        let sent = injector.inject(&command).await.unwrap();
        let stored = queue.dequeue(&bot).await.unwrap().unwrap();
        let decoded = Envelope::decode(&stored).unwrap();

        assert_eq!(decoded, sent);
        assert!(decoded.is_system_origin());
        assert_eq!(decoded.command().unwrap().args, vec!["7".to_string(), "9".to_string()]);
    }
}
