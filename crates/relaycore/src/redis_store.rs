//! Redis backend for both the message queue and the worker lock.
//!
//! - queue: one list per bot, `RPUSH` on enqueue, `LPOP` on dequeue
//! - lock: `SET <key> <holder> NX [EX <lease>]`, released with `DEL`
//!
//! A single multiplexed connection is shared by every clone of the store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use crate::error::AppResult;
use crate::identity::BotIdentity;
use crate::lock::LockStore;
use crate::queue::QueueStore;

/// Extends the lease only while the record still names this holder.
const RENEW_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
";

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    holder: String,
    lease: Option<Duration>,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/2`).
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        log::info!("Connected to Redis at {}", redact_url(url));
        Ok(Self {
            conn,
            holder: format!("worker-{}", uuid::Uuid::new_v4()),
            lease: None,
        })
    }

    /// Lock records written by this store expire after `lease` unless renewed.
    #[must_use]
    pub fn with_lease(mut self, lease: Option<Duration>) -> Self {
        self.lease = lease;
        self
    }

    /// Value written into lock records held by this store.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn enqueue(&self, bot: &BotIdentity, payload: &[u8]) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(bot.queue_key(), payload).await?;
        Ok(())
    }

    async fn dequeue(&self, bot: &BotIdentity) -> AppResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = conn.lpop(bot.queue_key(), None).await?;
        Ok(payload)
    }

    async fn len(&self, bot: &BotIdentity) -> AppResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(bot.queue_key()).await?;
        Ok(len)
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn acquire(&self, bot: &BotIdentity) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(bot.lock_key()).arg(&self.holder).arg("NX");
        if let Some(lease) = self.lease {
            cmd.arg("EX").arg(lease.as_secs());
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn release(&self, bot: &BotIdentity) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(bot.lock_key()).await?;
        Ok(())
    }

    async fn renew(&self, bot: &BotIdentity) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let Some(lease) = self.lease else {
            let exists: bool = conn.exists(bot.lock_key()).await?;
            return Ok(exists);
        };
        let renewed: i64 = Script::new(RENEW_SCRIPT)
            .key(bot.lock_key())
            .arg(&self.holder)
            .arg(lease.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    fn lease(&self) -> Option<Duration> {
        self.lease
    }

    async fn is_held(&self, bot: &BotIdentity) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(bot.lock_key()).await?;
        Ok(exists)
    }
}

/// Drops the password part of a connection URL for logging.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
