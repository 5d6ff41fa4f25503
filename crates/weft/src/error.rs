//! Error taxonomy for the thread engine.
//!
//! Structural failures ([`ThreadError::Validation`]) are always surfaced:
//! the event log is the single source of truth and is never auto-repaired.
//! Budget shortfalls and recovery failures are normally reported through
//! result objects ([`OptimizationResult`](crate::context::OptimizationResult),
//! [`RecoveryResult`](crate::recovery::RecoveryResult)); the matching variants
//! here exist for callers that want to turn those into `?`-propagated errors.

use crate::thread::ThreadStatus;

/// Errors produced by the thread engine.
#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    /// Malformed or out-of-order event log. Never auto-repaired.
    #[error("invalid thread: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A single message cannot fit the token budget even after eviction.
    #[error("message needs {needed} tokens but only {available} are available for history")]
    BudgetExceeded { needed: usize, available: usize },

    /// Transport failure on save/load/delete/list.
    #[error("storage error: {0}")]
    Storage(String),

    /// Load of an unknown thread id.
    #[error("thread not found: {0}")]
    NotFound(String),

    /// The retry budget for a thread is consumed.
    #[error("recovery budget exhausted for thread {thread_id} after {attempts} attempt(s)")]
    RecoveryExhausted { thread_id: String, attempts: u32 },

    /// A recovery attempt could not restore the thread.
    #[error("recovery of thread {thread_id} failed: {message}")]
    RecoveryFailed { thread_id: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted snapshot was written by an incompatible major version.
    #[error("unsupported snapshot version {found} (expected major version {expected_major})")]
    UnsupportedVersion { found: String, expected_major: u32 },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ThreadStatus,
        to: ThreadStatus,
    },

    /// Appends are rejected once a thread reaches a terminal status.
    #[error("thread {thread_id} is {status} and accepts no further events")]
    ThreadClosed {
        thread_id: String,
        status: ThreadStatus,
    },

    /// An LLM or tool collaborator failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl ThreadError {
    /// Shorthand for a validation failure with a single message.
    pub fn invalid(message: impl Into<String>) -> Self {
        ThreadError::Validation(vec![message.into()])
    }

    /// Whether this error means the thread id does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ThreadError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ThreadError>;
