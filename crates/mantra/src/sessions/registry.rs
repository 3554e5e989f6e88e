//! Session registry and handles.
//!
//! The registry maps session ids to [`SessionHandle`]s. Handles are cloned out
//! of the map before any await, so no map guard is ever held across a call
//! into an actor.
//!
//! Stopping removes the entry first and only then asks the actor to clean up.
//! Whoever removes the entry owns the stop; a concurrent or repeated stop
//! finds nothing and reports `SessionNotFound`, so cleanup never runs twice.

use super::actor::{SessionActor, SessionCommand};
use super::types::{
    AffirmationId, PositionUpdate, SessionId, SessionOptions, SessionSnapshot, TrackDescriptor,
};
use crate::cleanup::CleanupReport;
use crate::error::SessionError;
use crate::events::{EventPublisher, StopReason};
use crate::generation::Generators;
use cas::{ContentHash, ContentStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const MAILBOX_CAPACITY: usize = 64;

/// Everything a session actor needs from its surroundings.
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn ContentStore>,
    pub generators: Generators,
    pub events: EventPublisher,
    /// Tracks actors and generation tasks so shutdown can wait for them
    pub tracker: TaskTracker,
}

impl SessionContext {
    pub fn new(store: Arc<dyn ContentStore>, generators: Generators, events: EventPublisher) -> Self {
        Self {
            store,
            generators,
            events,
            tracker: TaskTracker::new(),
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

/// Cheap, cloneable reference to a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub owner_id: String,
    pub track_id: String,
    pub started_at: DateTime<Utc>,
    created: Instant,
    seq: u64,
    tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// False once the session has begun stopping or its actor is gone.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    fn not_found(&self) -> SessionError {
        SessionError::SessionNotFound(self.id.clone())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| self.not_found())?;
        rx.await.map_err(|_| self.not_found())
    }

    pub async fn update_position(&self, position: f64) -> Result<PositionUpdate, SessionError> {
        self.request(|reply| SessionCommand::UpdatePosition { position, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn segment_handle(&self, index: u64) -> Result<ContentHash, SessionError> {
        self.request(|reply| SessionCommand::SegmentHandle { index, reply })
            .await?
            .ok_or_else(|| SessionError::SegmentNotFound {
                session_id: self.id.clone(),
                index,
            })
    }

    pub async fn affirmation_handle(
        &self,
        affirmation_id: &AffirmationId,
    ) -> Result<ContentHash, SessionError> {
        let id = affirmation_id.clone();
        self.request(|reply| SessionCommand::AffirmationHandle { id, reply })
            .await?
            .ok_or_else(|| SessionError::AffirmationNotFound {
                session_id: self.id.clone(),
                affirmation_id: affirmation_id.clone(),
            })
    }

    async fn stop(&self, reason: StopReason) -> Result<CleanupReport, SessionError> {
        self.request(|reply| SessionCommand::Stop { reason, reply })
            .await
    }
}

/// Table of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    next_seq: AtomicU64,
    ctx: SessionContext,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            sessions: DashMap::new(),
            next_seq: AtomicU64::new(0),
            ctx,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Validate options, register a new session, and start its actor.
    ///
    /// Returns immediately; the initial buffer and affirmation pool are
    /// produced in the background.
    pub fn create(
        &self,
        owner_id: impl Into<String>,
        track: TrackDescriptor,
        options: SessionOptions,
    ) -> Result<SessionHandle, SessionError> {
        options.validate(&track)?;

        let id = SessionId::generate();
        let owner_id = owner_id.into();
        let started_at = Utc::now();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let cancel = CancellationToken::new();

        let handle = SessionHandle {
            id: id.clone(),
            owner_id: owner_id.clone(),
            track_id: track.id.clone(),
            started_at,
            created: Instant::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            tx: tx.clone(),
            cancel: cancel.clone(),
        };

        tracing::info!(
            session.id = %id,
            owner.id = %owner_id,
            track.id = %track.id,
            buffer_size = options.buffer_size,
            affirmation_interval = options.affirmation_interval,
            "Created session"
        );

        let actor = SessionActor::new(
            id.clone(),
            owner_id,
            track,
            options,
            started_at,
            self.ctx.clone(),
            rx,
            tx.downgrade(),
            cancel,
        );
        self.sessions.insert(id, handle.clone());
        self.ctx.tracker.spawn(actor.run());

        Ok(handle)
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))
    }

    /// Active sessions for one owner, in creation order.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| entry.owner_id == owner_id && entry.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(|h| h.seq);
        handles
    }

    /// Every registered session, in creation order.
    pub fn all(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(|h| h.seq);
        handles
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove a session and release everything it owns.
    pub async fn stop(
        &self,
        id: &SessionId,
        reason: StopReason,
    ) -> Result<CleanupReport, SessionError> {
        let (_, handle) = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;

        match handle.stop(reason).await {
            Ok(report) => Ok(report),
            // The actor already exited and cleaned up after itself.
            Err(SessionError::SessionNotFound(_)) => {
                tracing::warn!(session.id = %id, "Session actor gone before stop");
                Ok(CleanupReport::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::VoiceOptions;
    use cas::MemoryStore;
    use mantraconf::SessionDefaults;

    fn registry() -> SessionRegistry {
        let store: Arc<dyn ContentStore> = Arc::new(MemoryStore::new());
        let generators = Generators::mock(store.clone(), Duration::ZERO);
        SessionRegistry::new(SessionContext::new(store, generators, EventPublisher::default()))
    }

    fn track() -> TrackDescriptor {
        TrackDescriptor {
            id: "track-1".to_string(),
            track_type: "sleep".to_string(),
            mood_tags: vec![],
            duration_secs: 300.0,
            affirmations: vec!["I rest".to_string()],
            voice: VoiceOptions::default(),
        }
    }

    fn options() -> SessionOptions {
        SessionOptions::from_defaults(&SessionDefaults::default())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = registry();
        let handle = registry.create("alice", track(), options()).unwrap();
        let fetched = registry.get(&handle.id).unwrap();
        assert_eq!(fetched.owner_id, "alice");
        assert_eq!(fetched.track_id, "track-1");
        assert!(fetched.is_active());

        let snapshot = fetched.snapshot().await.unwrap();
        assert!(snapshot.is_active());
        assert_eq!(snapshot.current_position, 0.0);
        assert_eq!(snapshot.current_segment_index, 0);
        assert_eq!(snapshot.last_affirmation_time, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_options_not_registered() {
        let registry = registry();
        let mut opts = options();
        opts.buffer_size = 0;
        assert!(registry.create("alice", track(), opts).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_list_by_owner_in_creation_order() {
        let registry = registry();
        let a = registry.create("alice", track(), options()).unwrap();
        let _b = registry.create("bob", track(), options()).unwrap();
        let c = registry.create("alice", track(), options()).unwrap();

        let ids: Vec<_> = registry
            .list_by_owner("alice")
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert_eq!(registry.all().len(), 3);
    }

    #[tokio::test]
    async fn test_stop_twice() {
        let registry = registry();
        let handle = registry.create("alice", track(), options()).unwrap();

        registry.stop(&handle.id, StopReason::Requested).await.unwrap();
        let second = registry.stop(&handle.id, StopReason::Requested).await;
        assert_eq!(second, Err(SessionError::SessionNotFound(handle.id.clone())));
        assert!(registry.get(&handle.id).is_err());

        // A stale handle sees the actor gone.
        assert!(handle.snapshot().await.unwrap_err().is_not_found());
        assert!(!handle.is_active());
    }
}
