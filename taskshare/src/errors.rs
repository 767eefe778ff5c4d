//! Error types for shared task coordination.
//!
//! Two kinds of failure reach callers: the shared work's own error, which every
//! still-pending child receives verbatim, and cancellation. Misuse of the
//! coordinator itself is reported through [`CoordinatorError`].

use std::sync::Arc;
use thiserror::Error;

/// The outcome of a shared task or of one caller's view onto it.
pub type Outcome<T> = Result<T, TaskError>;

/// The error a task (or a child view) rejects with.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task or child view was cancelled.
    #[error("Task cancelled")]
    Cancelled,

    /// The underlying work failed.
    #[error("Task failed: {0}")]
    Failed(Arc<anyhow::Error>),
}

impl TaskError {
    /// Wraps the underlying work's error.
    #[must_use]
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Arc::new(error.into()))
    }

    /// Returns true for the cancellation outcome.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the underlying work's error, if this is a failure.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Cancelled => None,
            Self::Failed(error) => Some(error),
        }
    }

    /// Returns true if both errors are cancellations or share the same cause.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::Failed(a), Self::Failed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Errors raised by the coordinator for invalid use.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// A task is already in flight for this key.
    #[error("A task is already registered for key {key}")]
    AlreadyRegistered {
        /// Debug rendering of the key.
        key: String,
    },

    /// The coordinator configuration is invalid.
    #[error("Invalid coordinator config: {0}")]
    InvalidConfig(String),
}

impl CoordinatorError {
    /// Creates an already-registered error for the given key.
    #[must_use]
    pub fn already_registered(key: &impl std::fmt::Debug) -> Self {
        Self::AlreadyRegistered {
            key: format!("{key:?}"),
        }
    }
}
