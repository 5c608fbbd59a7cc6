//! Core of the invoice bot broadcast system.
//!
//! This crate is framework-agnostic. Telegram and the invoice store live behind
//! ports (traits) implemented in adapter crates.

pub mod broadcast;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod utils;

pub use errors::{Error, Result};
