//! Dispatch worker
//!
//! One long-lived task per bot that drains the bot's queue in order and routes
//! each envelope to its handler:
//!
//! `Starting → Polling → Processing → Polling … → ShuttingDown → Stopped`
//!
//! The worker first takes the bot's lock. Losing that race is not an error:
//! another worker already serves the bot and this one returns
//! [`Outcome::LockContended`] right away.

use async_trait::async_trait;
use futures_util::future::join_all;
use moka::future::Cache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{defaults, Settings};
use crate::envelope::Envelope;
use crate::error::{AppError, AppResult};
use crate::identity::BotIdentity;
use crate::lock::{renew_interval, LockStore};
use crate::logging::payload_preview;
use crate::queue::QueueStore;
use crate::retry::{retry, RetryConfig};
use crate::router::{HandlerContext, HandlerRouter};

/// One-time setup with the messaging provider performed after the lock is
/// taken (e.g. announcing the webhook URL).
#[async_trait]
pub trait Session: Send + Sync {
    async fn announce(&self, bot: &BotIdentity) -> AppResult<()>;
}

/// Session for deployments that register the webhook elsewhere, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSession;

#[async_trait]
impl Session for NoopSession {
    async fn announce(&self, _bot: &BotIdentity) -> AppResult<()> {
        Ok(())
    }
}

/// Observable lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Polling,
    Processing,
    ShuttingDown,
    Stopped,
}

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Cancelled, lock released
    Stopped,
    /// Another worker holds the lock; nothing was done
    LockContended,
    /// The lease could not be renewed; the lock may belong to someone else now
    LeaseLost,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep after an empty poll or a storage error
    pub poll_interval: Duration,
    /// Recent update ids remembered for duplicate suppression; 0 disables it
    pub dedup_window: u64,
    pub dedup_ttl: Duration,
    pub session_retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            dedup_window: defaults::DEDUP_WINDOW,
            dedup_ttl: Duration::from_secs(defaults::DEDUP_TTL_SECS),
            session_retry: RetryConfig::session(),
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            dedup_window: settings.dedup_window,
            dedup_ttl: settings.dedup_ttl(),
            session_retry: RetryConfig::session(),
        }
    }
}

pub struct DispatchWorker {
    ctx: Arc<HandlerContext>,
    router: Arc<HandlerRouter>,
    queue: Arc<dyn QueueStore>,
    lock: Arc<dyn LockStore>,
    session: Arc<dyn Session>,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
    seen: Option<Cache<i64, ()>>,
}

impl DispatchWorker {
    pub fn new(
        ctx: HandlerContext,
        router: HandlerRouter,
        queue: Arc<dyn QueueStore>,
        lock: Arc<dyn LockStore>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        let mut worker = Self {
            ctx: Arc::new(ctx),
            router: Arc::new(router),
            queue,
            lock,
            session: Arc::new(NoopSession),
            config: WorkerConfig::default(),
            state,
            seen: None,
        };
        worker.seen = worker.dedup_cache();
        worker
    }

    #[must_use]
    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self.seen = self.dedup_cache();
        self
    }

    pub fn bot_name(&self) -> &str {
        &self.ctx.bot_name
    }

    pub fn bot(&self) -> &BotIdentity {
        &self.ctx.bot
    }

    /// Watches lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn dedup_cache(&self) -> Option<Cache<i64, ()>> {
        (self.config.dedup_window > 0).then(|| {
            Cache::builder()
                .max_capacity(self.config.dedup_window)
                .time_to_live(self.config.dedup_ttl)
                .build()
        })
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Runs until `cancel` fires. The envelope being processed when
    /// cancellation arrives is finished before the lock is released.
    pub async fn run(self, cancel: CancellationToken) -> AppResult<Outcome> {
        let span = tracing::info_span!("worker", bot = %self.ctx.bot_name);
        let outcome = self.run_inner(cancel).instrument(span).await;
        self.set_state(WorkerState::Stopped);
        outcome
    }

    async fn run_inner(&self, cancel: CancellationToken) -> AppResult<Outcome> {
        let bot = &self.ctx.bot;
        self.set_state(WorkerState::Starting);

        if !self.lock.acquire(bot).await? {
            log::info!("{} is already served by another worker, exiting", bot);
            return Ok(Outcome::LockContended);
        }
        log::info!("Acquired worker lock for {} ({})", self.ctx.bot_name, bot);

        let announced = tokio::select! {
            _ = cancel.cancelled() => None,
            result = retry(&self.config.session_retry, || self.session.announce(bot)) => Some(result),
        };
        match announced {
            None => {
                self.set_state(WorkerState::ShuttingDown);
                self.release().await;
                return Ok(Outcome::Stopped);
            }
            Some(Err(e)) => {
                log::error!("Session setup failed for {}: {}", bot, e);
                self.release().await;
                return Err(match e {
                    AppError::Session(_) => e,
                    other => AppError::Session(other.to_string()),
                });
            }
            Some(Ok(())) => {}
        }

        let stop = cancel.child_token();
        let lease_lost = Arc::new(AtomicBool::new(false));
        let heartbeat = self.spawn_heartbeat(stop.clone(), Arc::clone(&lease_lost));

        self.poll_loop(&stop).await;

        self.set_state(WorkerState::ShuttingDown);
        stop.cancel();
        if let Some(heartbeat) = heartbeat {
            if let Err(e) = heartbeat.await {
                log::warn!("Lease heartbeat task failed: {}", e);
            }
        }

        if lease_lost.load(Ordering::SeqCst) {
            log::error!("Lost the worker lease for {}; leaving the lock record alone", bot);
            return Ok(Outcome::LeaseLost);
        }

        self.release().await;
        log::info!("Worker for {} stopped", self.ctx.bot_name);
        Ok(Outcome::Stopped)
    }

    async fn poll_loop(&self, stop: &CancellationToken) {
        let bot = &self.ctx.bot;
        while !stop.is_cancelled() {
            self.set_state(WorkerState::Polling);
            match self.queue.dequeue(bot).await {
                Ok(Some(payload)) => {
                    self.set_state(WorkerState::Processing);
                    self.process(payload).await;
                }
                Ok(None) => self.idle(stop).await,
                Err(e) => {
                    log::warn!(
                        "Queue read for {} failed, retrying in {:?}: {}",
                        bot,
                        self.config.poll_interval,
                        e
                    );
                    self.idle(stop).await;
                }
            }
        }
    }

    async fn idle(&self, stop: &CancellationToken) {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// Decodes and routes one payload. Never fails: every problem is logged
    /// and the payload is considered consumed.
    async fn process(&self, payload: Vec<u8>) {
        let envelope = match Envelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("Dropping undecodable payload ({}): {}", e, payload_preview(&payload));
                return;
            }
        };

        if self.is_duplicate(&envelope).await {
            log::info!("Skipping redelivered update {}", envelope.update_id);
            return;
        }

        let update_id = envelope.update_id;
        let router = Arc::clone(&self.router);
        let ctx = Arc::clone(&self.ctx);
        // Own task so a panicking handler cannot take the loop down with it.
        let handle = tokio::spawn(async move { router.dispatch(&envelope, &ctx).await });

        match handle.await {
            Ok(Ok(Some(route))) => log::debug!("Update {} handled by '{}'", update_id, route),
            Ok(Ok(None)) => log::debug!("No handler for update {}", update_id),
            Ok(Err(e)) => log::error!(
                "Handler failed for update {}: {} (payload: {})",
                update_id,
                e,
                payload_preview(&payload)
            ),
            Err(join_err) if join_err.is_panic() => log::error!(
                "Handler panicked on update {}: {} (payload: {})",
                update_id,
                join_err,
                payload_preview(&payload)
            ),
            Err(join_err) => log::warn!("Handler task for update {} was cancelled: {}", update_id, join_err),
        }
    }

    /// Provider redeliveries repeat the `update_id`. Synthetic envelopes are
    /// stamped with the current second, so two of them may share an id
    /// legitimately and are never suppressed.
    async fn is_duplicate(&self, envelope: &Envelope) -> bool {
        let Some(seen) = &self.seen else {
            return false;
        };
        if envelope.is_system_origin() {
            return false;
        }
        if seen.contains_key(&envelope.update_id) {
            return true;
        }
        seen.insert(envelope.update_id, ()).await;
        false
    }

    fn spawn_heartbeat(&self, stop: CancellationToken, lease_lost: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        let lease = self.lock.lease()?;
        let lock = Arc::clone(&self.lock);
        let bot = self.ctx.bot.clone();
        let span = tracing::info_span!("heartbeat", bot = %self.ctx.bot_name);

        Some(tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(renew_interval(lease));
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = ticker.tick() => {}
                    }
                    match lock.renew(&bot).await {
                        Ok(true) => log::trace!("Renewed lease of {}", bot),
                        Ok(false) => {
                            lease_lost.store(true, Ordering::SeqCst);
                            stop.cancel();
                            return;
                        }
                        // A single failed renewal is survivable: the lease still has two thirds left.
                        Err(e) => log::warn!("Lease renewal for {} failed: {}", bot, e),
                    }
                }
            }
            .instrument(span),
        ))
    }

    async fn release(&self) {
        if let Err(e) = self.lock.release(&self.ctx.bot).await {
            log::error!(
                "Failed to release worker lock for {}: {} (clear it with `relaybot release-lock`)",
                self.ctx.bot,
                e
            );
        }
    }
}

/// Runs one worker per bot under a shared cancellation token.
pub struct Supervisor {
    cancel: CancellationToken,
    workers: Vec<DispatchWorker>,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            workers: Vec::new(),
        }
    }

    pub fn add(&mut self, worker: DispatchWorker) {
        self.workers.push(worker);
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns every worker and waits for all of them.
    ///
    /// Results are returned per bot name in registration order.
    pub async fn run(self) -> Vec<(String, AppResult<Outcome>)> {
        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| {
                let name = worker.bot_name().to_string();
                (name, tokio::spawn(worker.run(self.cancel.clone())))
            })
            .collect();
        log::info!("Supervisor started {} worker(s)", handles.len());

        join_all(handles.into_iter().map(|(name, handle)| async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(AppError::Handler(format!("worker task failed: {}", join_err))),
            };
            match &result {
                Ok(outcome) => log::info!("Worker '{}' finished: {:?}", name, outcome),
                Err(e) => log::error!("Worker '{}' failed: {}", name, e),
            }
            (name, result)
        }))
        .await
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    log::info!("Shutdown signal received");
}
