//! Core logic for the fixup link-relay bot.
//!
//! This crate is platform-agnostic. Discord lives behind the `RelayPort`
//! trait, implemented in the adapter crate.

pub mod config;
pub mod domain;
pub mod errors;
pub mod links;
pub mod logging;
pub mod messaging;
pub mod ownership;
pub mod relay;
pub mod retraction;
pub mod webhooks;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
