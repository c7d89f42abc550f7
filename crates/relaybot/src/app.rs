//! Process wiring
//!
//! Builds stores, workers and the webhook state from [`Settings`] and runs the
//! long-lived subcommands until a shutdown signal arrives.

use anyhow::{anyhow, bail, Result};
use relaycore::webhook;
use relaycore::{
    BotConfig, BotRegistry, CommandInjector, DispatchWorker, HandlerContext, LockStore, MemoryLock, MemoryQueue,
    NoopSession, QueueStore, RedisStore, Session, Settings, Supervisor, SyntheticCommand, WebhookState, WorkerConfig,
};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::handlers::CommandBackend;
use crate::personality::{Personality, RouteDeps};
use crate::scheduler::follow_worker;
use crate::telegram::{create_bot, TelegramResponder, TelegramSession, BOT_API_TIMEOUT};
use crate::triggers::Trigger;

/// Queue and lock backends of one process.
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub lock: Arc<dyn LockStore>,
}

impl Stores {
    /// Shared Redis backend used by separate web and worker processes.
    pub async fn redis(settings: &Settings) -> Result<Self> {
        let store = RedisStore::connect(&settings.redis_url)
            .await?
            .with_lease(settings.lock_ttl());
        store.ping().await?;
        let store = Arc::new(store);
        Ok(Self {
            queue: Arc::clone(&store) as Arc<dyn QueueStore>,
            lock: store,
        })
    }

    /// In-process backend for `relaybot run`.
    pub fn memory(settings: &Settings) -> Self {
        let lock = match settings.lock_ttl() {
            Some(lease) => MemoryLock::with_lease(lease),
            None => MemoryLock::new(),
        };
        Self {
            queue: Arc::new(MemoryQueue::new()),
            lock: Arc::new(lock),
        }
    }
}

/// Cancels `cancel` on Ctrl-C / SIGTERM.
pub fn cancel_on_shutdown(cancel: CancellationToken) {
    tokio::spawn(async move {
        relaycore::worker::shutdown_signal().await;
        cancel.cancel();
    });
}

fn command_backend(settings: &Settings) -> Result<Option<Arc<CommandBackend>>> {
    match settings.command_backend_url.as_deref() {
        Some(url) => {
            let backend = CommandBackend::new(url, settings.backend_timeout())?;
            log::info!("Forwarding commands to {}", backend.url());
            Ok(Some(Arc::new(backend)))
        }
        None => {
            log::warn!("command_backend_url is not set; forwarded commands will only be logged");
            Ok(None)
        }
    }
}

pub fn personality(bot: &BotConfig) -> Result<Personality> {
    Personality::from_str(&bot.personality)
        .map_err(|_| anyhow!("bot '{}' has unknown personality '{}'", bot.name, bot.personality))
}

/// Dispatch worker for `bot` with its personality's routes.
pub fn build_worker(
    settings: &Settings,
    bot: &BotConfig,
    stores: &Stores,
    backend: Option<Arc<CommandBackend>>,
) -> Result<DispatchWorker> {
    let personality = personality(bot)?;
    let identity = bot.identity();
    let api = create_bot(&identity, BOT_API_TIMEOUT)?;

    let deps = RouteDeps {
        responder: Arc::new(TelegramResponder::new(api.clone())),
        backend,
    };
    let router = personality.router(&deps)?.with_username(bot.username.as_deref());

    let session: Arc<dyn Session> = match &settings.webhook_host {
        Some(host) => Arc::new(TelegramSession::new(api, host.as_str())),
        None => {
            log::warn!("webhook_host is not set; '{}' will not announce its webhook", bot.name);
            Arc::new(NoopSession)
        }
    };

    log::info!(
        "Worker for '{}' ({}) uses the {} personality with {} routes",
        bot.name,
        identity,
        personality,
        router.routes().len()
    );

    Ok(DispatchWorker::new(
        HandlerContext::new(identity, &bot.name, bot.chat_id),
        router,
        Arc::clone(&stores.queue),
        Arc::clone(&stores.lock),
    )
    .with_session(session)
    .with_config(WorkerConfig::from_settings(settings)))
}

/// Runs workers (all bots, or only `only`) until `cancel` fires.
///
/// A bot's schedules run only while its worker holds the lock, so neither a
/// second `work` process nor a worker that lost its lease doubles the
/// scheduled reports.
pub async fn run_workers(
    settings: &Settings,
    stores: &Stores,
    only: Option<&str>,
    cancel: CancellationToken,
) -> Result<()> {
    let bots: Vec<&BotConfig> = match only {
        Some(name) => vec![settings.bot(name)?],
        None => settings.bots.iter().collect(),
    };
    if bots.is_empty() {
        bail!("no bots configured");
    }

    let backend = command_backend(settings)?;
    let mut supervisor = Supervisor::new(cancel.clone());
    let mut schedulers = Vec::new();

    for bot in bots {
        let worker = build_worker(settings, bot, stores, backend.clone())?;
        let state = worker.subscribe();
        supervisor.add(worker);

        if bot.schedules.is_empty() {
            continue;
        }
        let injector = Arc::new(CommandInjector::new(Arc::clone(&stores.queue), bot.chat_id));
        schedulers.push(follow_worker(state, injector, bot.clone(), cancel.child_token()));
    }

    let results = supervisor.run().await;
    cancel.cancel();
    for scheduler in schedulers {
        if let Err(e) = scheduler.await {
            log::error!("Scheduler task failed: {}", e);
        }
    }

    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|(name, result)| result.err().map(|e| format!("{}: {}", name, e)))
        .collect();
    if !failures.is_empty() {
        bail!("{} worker(s) failed: {}", failures.len(), failures.join("; "));
    }
    Ok(())
}

/// Runs the webhook receiver until `cancel` fires.
pub async fn serve(settings: &Settings, stores: &Stores, cancel: CancellationToken) -> Result<()> {
    let registry = BotRegistry::from_settings(settings);
    if registry.is_empty() {
        log::warn!("No bots configured; accepting updates for any token");
    }
    let state = Arc::new(WebhookState::with_registry(Arc::clone(&stores.queue), registry));
    webhook::serve(&settings.listen_addr, state, cancel).await?;
    Ok(())
}

/// Receiver and workers in one process over in-memory stores.
pub async fn run_single_process(settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let stores = Stores::memory(settings);

    // whichever side returns first stops the other
    let served = async {
        let result = serve(settings, &stores, cancel.clone()).await;
        if let Err(e) = &result {
            log::error!("Webhook receiver failed: {:#}", e);
        }
        cancel.cancel();
        result
    };
    let worked = async {
        let result = run_workers(settings, &stores, None, cancel.clone()).await;
        if let Err(e) = &result {
            log::error!("Workers failed: {:#}", e);
        }
        cancel.cancel();
        result
    };

    let (served, worked) = tokio::join!(served, worked);
    served.and(worked)
}

pub async fn inject(settings: &Settings, stores: &Stores, bot: &str, command: &str, args: Vec<String>) -> Result<()> {
    let bot = settings.bot(bot)?;
    let injector = CommandInjector::new(Arc::clone(&stores.queue), bot.chat_id);
    let envelope = injector
        .inject(&SyntheticCommand::new(bot.identity(), command, args))
        .await?;
    println!("queued update {} for '{}'", envelope.update_id, bot.name);
    Ok(())
}

pub async fn inject_text(settings: &Settings, stores: &Stores, bot: &str, text: &str) -> Result<()> {
    let bot = settings.bot(bot)?;
    let injector = CommandInjector::new(Arc::clone(&stores.queue), bot.chat_id);
    let envelope = injector.inject_text(&bot.identity(), text).await?;
    println!("queued update {} for '{}'", envelope.update_id, bot.name);
    Ok(())
}

pub async fn trigger(settings: &Settings, stores: &Stores, bot: &str, trigger: Trigger) -> Result<()> {
    let bot = settings.bot(bot)?;
    let injector = CommandInjector::new(Arc::clone(&stores.queue), bot.chat_id);
    let envelope = trigger.fire(&injector, &bot.identity()).await?;
    println!("queued {} as update {} for '{}'", trigger, envelope.update_id, bot.name);
    Ok(())
}

/// One line per bot: backlog and whether a worker holds the lock.
pub async fn status(settings: &Settings, stores: &Stores) -> Result<()> {
    if settings.bots.is_empty() {
        println!("no bots configured");
        return Ok(());
    }
    println!("{:<16} {:<10} {:<12} {:>8}  worker", "bot", "key", "personality", "backlog");
    for bot in &settings.bots {
        let identity = bot.identity();
        let backlog = stores.queue.len(&identity).await?;
        let held = stores.lock.is_held(&identity).await?;
        println!(
            "{:<16} {:<10} {:<12} {:>8}  {}",
            bot.name,
            identity.fingerprint(),
            bot.personality,
            backlog,
            if held { "running" } else { "-" }
        );
    }
    Ok(())
}

/// Clears the lock of `bot` left behind by a worker that died without
/// shutting down.
pub async fn release_lock(settings: &Settings, stores: &Stores, bot: &str) -> Result<()> {
    let bot = settings.bot(bot)?;
    let identity = bot.identity();
    if !stores.lock.is_held(&identity).await? {
        println!("'{}' has no worker lock", bot.name);
        return Ok(());
    }
    stores.lock.release(&identity).await?;
    log::warn!("Released worker lock of '{}' by operator request", bot.name);
    println!("released worker lock of '{}'", bot.name);
    Ok(())
}
