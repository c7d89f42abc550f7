//! Relay bot - Telegram glue, bot personalities and process wiring over `relaycore`
//!
//! # Module Structure
//!
//! - `personality`: route tables of the parser and tarot bots
//! - `handlers`: fixed replies, sentinel-only guard, command backend forwarding
//! - `telegram`: teloxide client, webhook announcement, message sending
//! - `scheduler`, `triggers`: periodic and operator-fired synthetic commands
//! - `app`, `cli`: subcommands and their wiring

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod app;
pub mod cli;
pub mod handlers;
pub mod personality;
pub mod scheduler;
pub mod telegram;
pub mod triggers;
