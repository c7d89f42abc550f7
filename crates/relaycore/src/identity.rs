//! Bot identity and the storage keys derived from it.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Prefix of the per-bot message list.
pub const QUEUE_KEY_PREFIX: &str = "bot_messages_queue_";

/// Prefix of the per-bot worker lock record.
pub const LOCK_KEY_PREFIX: &str = "bot_processing_lock_";

/// Stable key distinguishing one bot's queue, lock and session from another's.
///
/// Derived from the bot credential. The credential itself never shows up in
/// `Debug`/`Display` output; use [`BotIdentity::fingerprint`] in logs.
#[derive(Clone)]
pub struct BotIdentity {
    token: Arc<SecretString>,
}

impl BotIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(SecretString::from(token.into())),
        }
    }

    pub fn from_secret(token: Arc<SecretString>) -> Self {
        Self { token }
    }

    /// The raw credential. Only for building provider URLs and storage keys.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn queue_key(&self) -> String {
        format!("{}{}", QUEUE_KEY_PREFIX, self.token())
    }

    pub fn lock_key(&self) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, self.token())
    }

    /// Short, non-reversible tag safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.token().as_bytes());
        hex::encode(&digest[..4])
    }
}

impl PartialEq for BotIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.token() == other.token()
    }
}

impl Eq for BotIdentity {}

impl std::hash::Hash for BotIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.token().hash(state);
    }
}

impl fmt::Debug for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BotIdentity").field(&self.fingerprint()).finish()
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bot#{}", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_derive_from_token() {
        let id = BotIdentity::new("123:abc");
        assert_eq!(id.queue_key(), "bot_messages_queue_123:abc");
        assert_eq!(id.lock_key(), "bot_processing_lock_123:abc");
        assert_ne!(id.queue_key(), id.lock_key());
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let id = BotIdentity::new("123:very-secret");
        let debug = format!("{:?} {}", id, id);
        assert!(!debug.contains("very-secret"));
        assert_eq!(id.fingerprint().len(), 8);
    }

    #[test]
    fn test_equality_by_token() {
        assert_eq!(BotIdentity::new("a"), BotIdentity::new("a"));
        assert_ne!(BotIdentity::new("a"), BotIdentity::new("b"));
        assert_ne!(BotIdentity::new("a").fingerprint(), BotIdentity::new("b").fingerprint());
    }
}
