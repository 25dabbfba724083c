//! Error types for the undo engine.
//!
//! Only precondition failures are recoverable errors. Internal invariant
//! violations (stride mismatches, handle reuse after removal, reference count
//! underflow) are programming defects and assert instead.

use thiserror::Error;

use crate::undo::ObjectId;

/// Main error type for undo operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No object is in an editable state, so there is nothing to capture
    #[error("no editable object to capture")]
    NoEditTarget,

    /// A step references an object the host can no longer resolve
    #[error("object {0:?} not found")]
    ObjectNotFound(ObjectId),

    /// A step references an object that is not currently editable
    #[error("object {0:?} is not in an editable state")]
    NotEditable(ObjectId),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type alias for undo operations.
pub type Result<T> = std::result::Result<T, Error>;
