//! # Reel Server Library
//!
//! Wires configuration, the SQLite queue store and the command scheduler
//! into a runnable application.

pub mod app;
pub mod startup;

pub use app::{App, AppBuilder};
