//! # Error Taxonomy
//!
//! `Validation` is a caller bug and fails fast. `Dispatch` is a normal, dropped outcome.
//! `Delivery` is recovered locally by the fan-out engine. `Storage` aborts critical steps.

use thiserror::Error;

use crate::domain::types::{Namespace, UserId};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid arguments to `{operation}`: {reason}")]
    Validation {
        operation: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CoreError {
    pub fn validation(operation: &'static str, reason: impl Into<String>) -> Self {
        CoreError::Validation {
            operation,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown action namespace `{0}`")]
    UnknownNamespace(String),

    #[error("no handler for action `{namespace}/{action}`")]
    UnknownAction { namespace: Namespace, action: String },

    #[error("no pending continuation for {0}")]
    NoPendingContinuation(UserId),

    #[error("malformed action: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The platform reports the target cannot be reached (blocked bot, left room, unknown user).
    #[error("target {target} unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("invalid target `{0}`")]
    InvalidTarget(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage operation `{operation}` failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
