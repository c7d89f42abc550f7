//! Named administrative triggers
//!
//! Operator-facing shortcuts over [`CommandInjector`]: each trigger renders to
//! the synthetic command or text the parser bot understands.

use relaycore::injector::exclusion_args;
use relaycore::{AppError, AppResult, BotIdentity, CommandInjector, Envelope, SyntheticCommand};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Most requested products of the last day
    Popular,
    /// Top brand, skipping the given brand ids
    TopBrand { exclude: Vec<i64> },
    /// Top category, skipping the given category ids
    TopCategory { exclude: Vec<i64> },
    /// Re-run link parsing for a product whose card came back empty
    Reparse { link: String },
}

impl Trigger {
    /// Synthetic command for command triggers; `None` for [`Trigger::Reparse`].
    pub fn command(&self, bot: &BotIdentity) -> Option<SyntheticCommand> {
        let (name, args) = match self {
            Trigger::Popular => ("popular", Vec::new()),
            Trigger::TopBrand { exclude } => ("top_brand", exclusion_args(exclude)),
            Trigger::TopCategory { exclude } => ("top_category", exclusion_args(exclude)),
            Trigger::Reparse { .. } => return None,
        };
        Some(SyntheticCommand::new(bot.clone(), name, args))
    }

    /// Queues the trigger for `bot`.
    pub async fn fire(&self, injector: &CommandInjector, bot: &BotIdentity) -> AppResult<Envelope> {
        if let Trigger::Reparse { link } = self {
            return injector.inject_text(bot, link).await;
        }
        let command = self
            .command(bot)
            .ok_or_else(|| AppError::Validation(format!("'{}' is not a command trigger", self)))?;
        injector.inject(&command).await
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Popular => f.write_str("popular"),
            Trigger::TopBrand { exclude } => write!(f, "top_brand {:?}", exclude),
            Trigger::TopCategory { exclude } => write!(f, "top_category {:?}", exclude),
            Trigger::Reparse { link } => write!(f, "reparse {}", link),
        }
    }
}
