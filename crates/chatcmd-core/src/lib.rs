//! Conversational command engine.
//!
//! This crate is transport-agnostic. The messaging platform lives behind the
//! [`messaging::port::Transport`] port, implemented in adapter crates; the
//! [`simulation`] module substitutes it for deterministic command tests.

pub mod commands;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod simulation;

pub use errors::{Error, Result};
