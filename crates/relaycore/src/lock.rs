//! Worker lock: at most one dispatch worker per bot.
//!
//! `acquire` never waits. Losing the race is the normal signal that another
//! worker already owns the bot, and the loser is expected to exit.
//!
//! Without a lease the record lives until [`LockStore::release`]; a worker
//! killed without a graceful shutdown leaves it behind and the bot stays
//! unserviced until the record is cleared (`relaybot release-lock`). With a
//! lease the record expires unless the holder keeps renewing it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppResult;
use crate::identity::BotIdentity;

/// Atomic acquire-if-absent / release primitive keyed by bot identity.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Marks the lock held iff nobody holds it. Returns whether it was taken.
    async fn acquire(&self, bot: &BotIdentity) -> AppResult<bool>;

    /// Clears the lock unconditionally.
    async fn release(&self, bot: &BotIdentity) -> AppResult<()>;

    /// Extends the lease of a held lock. Returns false when the record is
    /// gone or belongs to someone else. Without a lease this only reports
    /// whether the record still exists.
    async fn renew(&self, bot: &BotIdentity) -> AppResult<bool>;

    /// Lease length, if records expire.
    fn lease(&self) -> Option<Duration>;

    /// Whether any holder currently exists.
    async fn is_held(&self, bot: &BotIdentity) -> AppResult<bool>;
}

/// Heartbeat period for a lease: a third of its length.
pub fn renew_interval(lease: Duration) -> Duration {
    lease / 3
}

#[derive(Debug, Clone, Copy)]
struct Record {
    expires_at: Option<Instant>,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process lock backend.
#[derive(Debug, Default)]
pub struct MemoryLock {
    records: Mutex<HashMap<String, Record>>,
    lease: Option<Duration>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            records: Mutex::default(),
            lease: Some(lease),
        }
    }

    fn expiry(&self, now: Instant) -> Option<Instant> {
        self.lease.map(|lease| now + lease)
    }
}

#[async_trait]
impl LockStore for MemoryLock {
    async fn acquire(&self, bot: &BotIdentity) -> AppResult<bool> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let key = bot.lock_key();
        if records.get(&key).is_some_and(|record| record.is_live(now)) {
            return Ok(false);
        }
        records.insert(
            key,
            Record {
                expires_at: self.expiry(now),
            },
        );
        Ok(true)
    }

    async fn release(&self, bot: &BotIdentity) -> AppResult<()> {
        self.records.lock().await.remove(&bot.lock_key());
        Ok(())
    }

    async fn renew(&self, bot: &BotIdentity) -> AppResult<bool> {
        let now = Instant::now();
        let expires_at = self.expiry(now);
        let mut records = self.records.lock().await;
        match records.get_mut(&bot.lock_key()) {
            Some(record) if record.is_live(now) => {
                record.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn lease(&self) -> Option<Duration> {
        self.lease
    }

    async fn is_held(&self, bot: &BotIdentity) -> AppResult<bool> {
        let now = Instant::now();
        let records = self.records.lock().await;
        Ok(records.get(&bot.lock_key()).is_some_and(|record| record.is_live(now)))
    }
}
