//! Outbound session notifications.
//!
//! Observers (a websocket bridge, a player UI, tests) subscribe to a
//! broadcast channel of [`SessionEvent`]s. Publishing never blocks and never
//! fails the operation that triggered it; a slow subscriber just lags.

use crate::sessions::{AffirmationId, SegmentId, SessionId};
use cas::ContentHash;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop from the caller.
    Requested,
    /// Force-stopped by the retention sweeper.
    Expired,
    /// Process shutting down.
    Shutdown,
}

/// Session notifications, tagged by kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Initial buffer populated
    SegmentsReady { session_id: SessionId, count: usize },

    /// One more segment appended to the buffer tail
    NewSegmentReady {
        session_id: SessionId,
        index: u64,
        segment_id: SegmentId,
        handle: ContentHash,
    },

    /// Affirmation pool synthesized (count may be zero)
    AffirmationsReady { session_id: SessionId, count: usize },

    /// Client should play this clip now
    PlayAffirmation {
        session_id: SessionId,
        affirmation_id: AffirmationId,
        handle: ContentHash,
        text: String,
    },

    /// Session stopped and its storage released
    SessionStopped {
        session_id: SessionId,
        reason: StopReason,
    },

    /// A generation call failed; the session keeps running
    GenerationError { session_id: SessionId, cause: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::SegmentsReady { session_id, .. }
            | SessionEvent::NewSegmentReady { session_id, .. }
            | SessionEvent::AffirmationsReady { session_id, .. }
            | SessionEvent::PlayAffirmation { session_id, .. }
            | SessionEvent::SessionStopped { session_id, .. }
            | SessionEvent::GenerationError { session_id, .. } => session_id,
        }
    }
}

/// Handle for publishing session events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: SessionEvent) {
        tracing::debug!(
            session.id = %event.session_id(),
            event = ?event,
            "Publishing session event"
        );
        let _ = self.tx.send(event);
    }

    pub fn generation_error(&self, session_id: &SessionId, cause: impl Into<String>) {
        self.publish(SessionEvent::GenerationError {
            session_id: session_id.clone(),
            cause: cause.into(),
        });
    }

    pub fn session_stopped(&self, session_id: &SessionId, reason: StopReason) {
        self.publish(SessionEvent::SessionStopped {
            session_id: session_id.clone(),
            reason,
        });
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
