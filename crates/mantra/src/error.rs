//! Caller-facing errors for session operations.
//!
//! Generation and cleanup failures are deliberately absent: the former
//! surfaces as a `GenerationError` event, the latter in a `CleanupReport`.

use crate::sessions::{AffirmationId, SessionId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("segment {index} not found in session {session_id}")]
    SegmentNotFound { session_id: SessionId, index: u64 },

    #[error("affirmation {affirmation_id} not found in session {session_id}")]
    AffirmationNotFound {
        session_id: SessionId,
        affirmation_id: AffirmationId,
    },

    #[error("invalid session options: {0}")]
    InvalidOptions(String),

    #[error("invalid playback position: {0}")]
    InvalidPosition(f64),
}

impl SessionError {
    /// True for every lookup miss (session, segment, or affirmation).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SessionError::SessionNotFound(_)
                | SessionError::SegmentNotFound { .. }
                | SessionError::AffirmationNotFound { .. }
        )
    }
}
