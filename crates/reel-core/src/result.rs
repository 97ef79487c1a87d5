//! Result type aliases for Reel.

use crate::ReelError;

/// A specialized `Result` type for Reel operations.
pub type ReelResult<T> = Result<T, ReelError>;
