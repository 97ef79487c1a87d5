//! # Reel Core
//!
//! Shared error type and tracing setup used by every crate in the Reel
//! media backend.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_tracing, TracingConfig};
