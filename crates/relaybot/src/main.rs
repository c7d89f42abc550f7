use anyhow::Result;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;

use relaybot::app::{self, Stores};
use relaybot::cli::{Cli, Commands};
use relaycore::logging::init_logger;
use relaycore::Settings;

/// Parses CLI arguments and dispatches to the subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // before the logger so RUST_LOG from .env applies
    let _ = dotenv();
    init_logger()?;

    let settings = Settings::load(cli.config.as_deref())?;
    log::debug!("Loaded settings: {:?}", settings);

    match cli.command {
        Commands::Serve => {
            let stores = Stores::redis(&settings).await?;
            let cancel = CancellationToken::new();
            app::cancel_on_shutdown(cancel.clone());
            app::serve(&settings, &stores, cancel).await
        }
        Commands::Work { bot } => {
            let stores = Stores::redis(&settings).await?;
            let cancel = CancellationToken::new();
            app::cancel_on_shutdown(cancel.clone());
            app::run_workers(&settings, &stores, bot.as_deref(), cancel).await
        }
        Commands::Run => {
            log::info!("Running receiver and workers in one process (in-memory queue)");
            let cancel = CancellationToken::new();
            app::cancel_on_shutdown(cancel.clone());
            app::run_single_process(&settings, cancel).await
        }
        Commands::Inject { bot, command, args } => {
            let stores = Stores::redis(&settings).await?;
            app::inject(&settings, &stores, &bot, &command, args).await
        }
        Commands::InjectText { bot, text } => {
            let stores = Stores::redis(&settings).await?;
            app::inject_text(&settings, &stores, &bot, &text).await
        }
        Commands::Trigger { bot, trigger } => {
            let stores = Stores::redis(&settings).await?;
            app::trigger(&settings, &stores, &bot, trigger.into()).await
        }
        Commands::Status => {
            let stores = Stores::redis(&settings).await?;
            app::status(&settings, &stores).await
        }
        Commands::ReleaseLock { bot } => {
            let stores = Stores::redis(&settings).await?;
            app::release_lock(&settings, &stores, &bot).await
        }
    }
}
