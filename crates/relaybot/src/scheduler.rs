//! Periodic synthetic commands
//!
//! Each `[[bots.schedules]]` entry becomes a tokio task that injects its
//! command every `every_secs` while the bot's worker holds its lock. The first run
//! happens one full period after startup.

use relaycore::{BotConfig, CommandInjector, ScheduleConfig, SyntheticCommand, WorkerState};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Starts one task per schedule of `bot`.
pub fn start_schedules(
    injector: Arc<CommandInjector>,
    bot: &BotConfig,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    bot.schedules
        .iter()
        .map(|schedule| {
            let command = SyntheticCommand::new(bot.identity(), &schedule.command, schedule.args.clone());
            spawn_schedule(Arc::clone(&injector), &bot.name, schedule, command, cancel.clone())
        })
        .collect()
}

/// Runs the schedules of `bot` only while its worker serves the bot.
///
/// They start when the worker reaches `Polling` (it holds the lock) and stop
/// when it shuts down for any reason, a lost lease included, or when
/// `cancel` fires.
pub fn follow_worker(
    mut state: watch::Receiver<WorkerState>,
    injector: Arc<CommandInjector>,
    bot: BotConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let serving = tokio::select! {
            _ = cancel.cancelled() => false,
            reached = state.wait_for(|s| *s == WorkerState::Polling) => reached.is_ok(),
        };
        if !serving {
            return;
        }

        let handles = start_schedules(injector, &bot, cancel.clone());
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = state.wait_for(|s| matches!(s, WorkerState::ShuttingDown | WorkerState::Stopped)) => {
                log::info!("Worker of '{}' left service, stopping its schedules", bot.name);
            }
        }
        cancel.cancel();

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Schedule task of '{}' failed: {}", bot.name, e);
            }
        }
    })
}

fn spawn_schedule(
    injector: Arc<CommandInjector>,
    bot_name: &str,
    schedule: &ScheduleConfig,
    command: SyntheticCommand,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = schedule.period();
    let bot_name = bot_name.to_string();

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Scheduled {} for '{}' every {}s",
            command.text(),
            bot_name,
            period.as_secs()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = injector.inject(&command).await {
                log::error!("Scheduled {} for '{}' failed: {}", command.text(), bot_name, e);
            }
        }

        log::debug!("Schedule {} for '{}' stopped", command.text(), bot_name);
    })
}
