//! Relay core - single-consumer webhook dispatch for Telegram bots (no Telegram client)
//!
//! Provider updates arrive at a webhook, are queued per bot, and are drained in
//! order by exactly one dispatch worker per bot. Scheduled and administrative
//! actions enter the same queue as synthetic envelopes.
//!
//! # Module Structure
//!
//! - `queue`, `lock`, `redis_store`: storage seams and their backends
//! - `webhook`: HTTP ingress
//! - `injector`: synthetic command envelopes
//! - `worker`, `router`: the per-bot dispatch loop and handler routing
//! - `config`, `error`, `logging`, `retry`: ambient plumbing

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod injector;
pub mod lock;
pub mod logging;
pub mod queue;
pub mod redis_store;
pub mod retry;
pub mod router;
pub mod webhook;
pub mod worker;

// Re-export commonly used types for convenience
pub use config::{BotConfig, ScheduleConfig, Settings};
pub use envelope::Envelope;
pub use error::{AppError, AppResult};
pub use identity::BotIdentity;
pub use injector::{CommandInjector, SyntheticCommand};
pub use lock::{LockStore, MemoryLock};
pub use queue::{MemoryQueue, QueueStore};
pub use redis_store::RedisStore;
pub use router::{Handler, HandlerContext, HandlerError, HandlerRouter, Predicate, Route};
pub use webhook::{BotRegistry, WebhookState};
pub use worker::{DispatchWorker, NoopSession, Outcome, Session, Supervisor, WorkerConfig, WorkerState};
