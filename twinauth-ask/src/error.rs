//! Transport-level ask failures

use std::time::Duration;
use thiserror::Error;

/// Failure of a single ask attempt
///
/// These never reach callers directly: transient failures are retried and the
/// last one is handed to the timeout handler, while [`AskError::Closed`] maps
/// straight to `EnforcementError::Unavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AskError {
    /// No reply within the per-attempt timeout or the overall deadline
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// Target answered but is temporarily unable to serve
    #[error("target unavailable: {0}")]
    Unavailable(String),

    /// Target is gone (mailbox closed); retrying cannot help
    #[error("target closed: {0}")]
    Closed(String),
}

impl AskError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AskError::Timeout(_) | AskError::Unavailable(_))
    }
}
