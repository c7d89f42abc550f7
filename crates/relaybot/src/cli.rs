use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::triggers::Trigger;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(author, version, about = "Webhook relay and dispatch workers for the parser and tarot bots", long_about = None)]
pub struct Cli {
    /// Config file (defaults to relay.toml in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the webhook receiver
    Serve,

    /// Run dispatch workers and schedules (one worker per bot)
    Work {
        /// Only serve this bot
        #[arg(long)]
        bot: Option<String>,
    },

    /// Run receiver and workers in one process with in-memory storage
    Run,

    /// Queue a synthetic command for a bot
    Inject {
        #[arg(long)]
        bot: String,

        /// Command name without the slash
        command: String,

        args: Vec<String>,
    },

    /// Queue free text (e.g. a product link) for a bot
    InjectText {
        #[arg(long)]
        bot: String,

        text: String,
    },

    /// Fire a named administrative trigger
    Trigger {
        #[arg(long)]
        bot: String,

        #[command(subcommand)]
        trigger: TriggerCommand,
    },

    /// Show backlog and lock state of every bot
    Status,

    /// Clear a stale worker lock left by a crashed worker
    ReleaseLock {
        #[arg(long)]
        bot: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TriggerCommand {
    /// Post the most popular products
    Popular,
    /// Post the top brand, excluding brand ids
    TopBrand { ids: Vec<i64> },
    /// Post the top category, excluding category ids
    TopCategory { ids: Vec<i64> },
    /// Re-parse a product link
    Reparse { link: String },
}

impl From<TriggerCommand> for Trigger {
    fn from(command: TriggerCommand) -> Self {
        match command {
            TriggerCommand::Popular => Trigger::Popular,
            TriggerCommand::TopBrand { ids } => Trigger::TopBrand { exclude: ids },
            TriggerCommand::TopCategory { ids } => Trigger::TopCategory { exclude: ids },
            TriggerCommand::Reparse { link } => Trigger::Reparse { link },
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
