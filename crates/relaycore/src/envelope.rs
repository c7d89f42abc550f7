//! Inbound envelope model
//!
//! A deliberately lenient subset of the provider's update schema: only the
//! fields routing needs are typed, everything else is ignored on decode.
//! Synthetic commands are serialized from the same types, so a decoded
//! synthetic envelope and a decoded organic one are the same Rust value shape.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppResult;

/// `first_name` carried by administratively injected envelopes.
pub const SYSTEM_SENDER_NAME: &str = "django_task";

/// Entity type marking a command token.
pub const ENTITY_BOT_COMMAND: &str = "bot_command";

/// Entity type marking a link.
pub const ENTITY_URL: &str = "url";

/// One inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub update_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

/// User or chat id. Real envelopes carry integers; hand-written and legacy
/// synthetic ones sometimes carry strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerId {
    Numeric(i64),
    Text(String),
}

impl PeerId {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PeerId::Numeric(id) => Some(*id),
            PeerId::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Numeric(id) => write!(f, "{}", id),
            PeerId::Text(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: PeerId,

    #[serde(default)]
    pub is_bot: bool,

    #[serde(default)]
    pub first_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: PeerId,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind.as_deref() == Some("private")
    }
}

/// Annotation over a span of message text. Offsets are UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Sender>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Chat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<MessageEntity>,

    /// Photo sizes; only presence matters for routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Vec<serde_json::Value>>,
}

/// Interactive follow-up (inline keyboard button press).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Sender>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Box<Message>>,
}

/// A `/command[@bot] args…` parsed out of message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Lower-cased name without the slash
    pub name: String,
    /// `@botname` suffix, if any
    pub mention: Option<String>,
    pub args: Vec<String>,
}

impl Envelope {
    /// Decodes a raw queue payload.
    pub fn decode(payload: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The message this event is about: new, edited, or the one a callback
    /// button was attached to.
    pub fn effective_message(&self) -> Option<&Message> {
        self.message
            .as_ref()
            .or(self.edited_message.as_ref())
            .or_else(|| self.callback_query.as_ref().and_then(|cb| cb.message.as_deref()))
    }

    pub fn sender(&self) -> Option<&Sender> {
        if let Some(cb) = &self.callback_query {
            return cb.from.as_ref();
        }
        self.message
            .as_ref()
            .or(self.edited_message.as_ref())
            .and_then(|msg| msg.from.as_ref())
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.effective_message()
            .and_then(|msg| msg.chat.as_ref())
            .and_then(|chat| chat.id.as_i64())
    }

    pub fn is_private_chat(&self) -> bool {
        self.effective_message()
            .and_then(|msg| msg.chat.as_ref())
            .is_some_and(Chat::is_private)
    }

    /// Command carried by a new message, if its text starts with one.
    pub fn command(&self) -> Option<Command> {
        self.message.as_ref().and_then(Message::command)
    }

    pub fn callback_data(&self) -> Option<&str> {
        self.callback_query.as_ref().and_then(|cb| cb.data.as_deref())
    }

    /// Whether the envelope was injected administratively rather than sent by
    /// a real user. This is the only trust check in the pipeline.
    pub fn is_system_origin(&self) -> bool {
        self.sender().is_some_and(|sender| sender.first_name == SYSTEM_SENDER_NAME)
    }
}

impl Message {
    /// Parses a leading command.
    ///
    /// When entities are present the first one must be a `bot_command` at
    /// offset 0 and its length delimits the token; otherwise the token is the
    /// first whitespace-separated word starting with `/`.
    pub fn command(&self) -> Option<Command> {
        let text = self.text.as_deref()?;
        if !text.starts_with('/') {
            return None;
        }

        let token = match self.entities.first() {
            Some(entity) if entity.kind == ENTITY_BOT_COMMAND && entity.offset == 0 => {
                utf16_prefix(text, entity.length)
            }
            Some(_) => return None,
            None => text.split_whitespace().next()?.to_string(),
        };

        let rest = text.get(token.len()..).unwrap_or_default();
        let body = token.strip_prefix('/')?;
        let (name, mention) = match body.split_once('@') {
            Some((name, mention)) => (name, Some(mention.to_string())),
            None => (body, None),
        };
        if name.is_empty() {
            return None;
        }

        Some(Command {
            name: name.to_lowercase(),
            mention,
            args: rest.split_whitespace().map(str::to_string).collect(),
        })
    }

    pub fn has_photo(&self) -> bool {
        self.photo.as_ref().is_some_and(|sizes| !sizes.is_empty())
    }
}

/// First `units` UTF-16 code units of `text`, cut at a char boundary.
fn utf16_prefix(text: &str, units: usize) -> String {
    let mut taken = 0;
    let mut end = 0;
    for ch in text.chars() {
        if taken + ch.len_utf16() > units {
            break;
        }
        taken += ch.len_utf16();
        end += ch.len_utf8();
    }
    text[..end].to_string()
}

/// Length of `text` in UTF-16 code units, the unit entity offsets use.
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}
