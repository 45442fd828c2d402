//! Construction-time error taxonomy.
//!
//! Errors that occur while *describing* a test (malformed strategies or
//! configuration) are fatal and surface before any trial runs. Per-trial
//! recoverable conditions live in `data::DrawError` instead.

use thiserror::Error;

/// A strategy or configuration was constructed with arguments that can
/// never produce a value. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }
}
