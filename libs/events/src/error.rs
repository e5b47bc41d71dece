//! Error types for protocol vocabulary parsing.

use thiserror::Error;

/// Errors that can occur when decoding protocol vocabulary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The task state name is not part of the lifecycle vocabulary.
    #[error("unknown task state: {0}")]
    UnknownState(String),
}
