//! Bot personalities
//!
//! A personality is a named route table. Each registered bot picks one in its
//! config (`personality = "parser"`), and its dispatch worker routes every
//! envelope through that table.

pub mod parser;
pub mod tarot;

use relaycore::{HandlerRouter, Route};
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString};

use crate::handlers::{CommandBackend, Responder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Personality {
    /// Marketplace product cards (wildberries / ozon links)
    Parser,
    /// Tarot, oraculum and rune readings
    Tarot,
}

/// Collaborators the route handlers are built from.
#[derive(Clone)]
pub struct RouteDeps {
    pub responder: Arc<dyn Responder>,
    pub backend: Option<Arc<CommandBackend>>,
}

impl Personality {
    /// Ordered `(predicate, handler)` table; the first matching route wins.
    pub fn routes(self, deps: &RouteDeps) -> Result<Vec<Route>, regex::Error> {
        match self {
            Personality::Parser => parser::routes(deps),
            Personality::Tarot => tarot::routes(deps),
        }
    }

    pub fn router(self, deps: &RouteDeps) -> Result<HandlerRouter, regex::Error> {
        Ok(HandlerRouter::new(self.routes(deps)?))
    }
}
