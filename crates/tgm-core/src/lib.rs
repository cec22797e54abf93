//! Core domain + application logic for the keyword monitor.
//!
//! This crate is framework-agnostic. The Telegram transport lives behind the
//! ports in [`messaging::port`] and is implemented in an adapter crate.

pub mod clock;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod filter;
pub mod fingerprint;
pub mod lock;
pub mod logging;
pub mod messaging;
pub mod monitor;
pub mod pipeline;

pub use errors::{Error, Result};
