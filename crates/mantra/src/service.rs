//! Boundary operations for the surrounding system.
//!
//! `MantraService` is what a transport layer (HTTP handlers, a websocket
//! bridge) calls into. It resolves per-call options against configured
//! defaults, validates input, and forwards to the registry.

use crate::cleanup::CleanupReport;
use crate::error::SessionError;
use crate::events::{EventPublisher, SessionEvent, StopReason};
use crate::generation::Generators;
use crate::sessions::{
    AffirmationId, SessionContext, SessionId, SessionOptions, SessionRegistry, SessionSnapshot,
    TrackDescriptor,
};
use crate::sweeper::RetentionSweeper;
use anyhow::{Context, Result};
use cas::{ContentHash, ContentStore, FileStore};
use chrono::{DateTime, Utc};
use mantraconf::{MantraConfig, RetentionConfig, SessionDefaults};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub use crate::sessions::PositionUpdate;

/// How long `shutdown` waits for in-flight generation to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-session overrides; `None` falls back to the configured default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartOptions {
    pub affirmation_interval: Option<f64>,
    pub buffer_size: Option<usize>,
    pub segment_duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub id: SessionId,
    pub affirmation_interval: f64,
    pub total_duration: f64,
}

/// One row of `list_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub track_id: String,
    pub start_time: DateTime<Utc>,
    pub current_position: f64,
    pub total_duration: f64,
    pub is_active: bool,
}

impl From<SessionSnapshot> for SessionSummary {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            is_active: snapshot.is_active(),
            id: snapshot.id,
            track_id: snapshot.track_id,
            start_time: snapshot.started_at,
            current_position: snapshot.current_position,
            total_duration: snapshot.total_duration,
        }
    }
}

struct Inner {
    registry: Arc<SessionRegistry>,
    defaults: SessionDefaults,
    retention: RetentionConfig,
}

/// The orchestrator's public face. Cheap to clone.
#[derive(Clone)]
pub struct MantraService {
    inner: Arc<Inner>,
}

impl MantraService {
    pub fn new(
        store: Arc<dyn ContentStore>,
        generators: Generators,
        defaults: SessionDefaults,
        retention: RetentionConfig,
    ) -> Self {
        let ctx = SessionContext::new(store, generators, EventPublisher::default());
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(SessionRegistry::new(ctx)),
                defaults,
                retention,
            }),
        }
    }

    /// Build the store, adapters, and service described by `config`.
    pub fn from_config(config: &MantraConfig) -> Result<Self> {
        let cas_dir = &config.infra.paths.cas_dir;
        let store: Arc<dyn ContentStore> = Arc::new(
            FileStore::at_path(cas_dir)
                .with_context(|| format!("Failed to open CAS at {}", cas_dir.display()))?,
        );
        tracing::info!(path = %cas_dir.display(), "CAS ready");

        let generators = Generators::from_config(&config.bootstrap.generation, store.clone())?;
        Ok(Self::new(
            store,
            generators,
            config.bootstrap.sessions.clone(),
            config.bootstrap.retention.clone(),
        ))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.inner.registry.context().store
    }

    /// Receive every session event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.registry.context().events.subscribe()
    }

    /// Sweeper over this service's sessions, configured from retention settings.
    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::from_config(self.inner.registry.clone(), &self.inner.retention)
    }

    fn resolve(&self, options: &StartOptions) -> SessionOptions {
        let mut resolved = SessionOptions::from_defaults(&self.inner.defaults);
        if let Some(interval) = options.affirmation_interval {
            resolved.affirmation_interval = interval;
        }
        if let Some(size) = options.buffer_size {
            resolved.buffer_size = size;
        }
        if let Some(duration) = options.segment_duration {
            resolved.segment_duration = duration;
        }
        resolved
    }

    #[tracing::instrument(skip(self, track, options), fields(track.id = %track.id))]
    pub fn start_session(
        &self,
        owner_id: &str,
        track: TrackDescriptor,
        options: StartOptions,
    ) -> Result<SessionStarted, SessionError> {
        let resolved = self.resolve(&options);
        let total_duration = track.duration_secs;
        let handle = self.inner.registry.create(owner_id, track, resolved.clone())?;
        Ok(SessionStarted {
            id: handle.id,
            affirmation_interval: resolved.affirmation_interval,
            total_duration,
        })
    }

    #[tracing::instrument(skip(self), fields(session.id = %id))]
    pub async fn update_position(
        &self,
        id: &SessionId,
        position: f64,
    ) -> Result<PositionUpdate, SessionError> {
        if !position.is_finite() || position < 0.0 {
            return Err(SessionError::InvalidPosition(position));
        }
        self.inner.registry.get(id)?.update_position(position).await
    }

    pub async fn get_segment_handle(
        &self,
        id: &SessionId,
        index: u64,
    ) -> Result<ContentHash, SessionError> {
        self.inner.registry.get(id)?.segment_handle(index).await
    }

    pub async fn get_affirmation_handle(
        &self,
        id: &SessionId,
        affirmation_id: &AffirmationId,
    ) -> Result<ContentHash, SessionError> {
        self.inner
            .registry
            .get(id)?
            .affirmation_handle(affirmation_id)
            .await
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        self.inner.registry.get(id)?.snapshot().await
    }

    #[tracing::instrument(skip(self), fields(session.id = %id))]
    pub async fn stop_session(&self, id: &SessionId) -> Result<CleanupReport, SessionError> {
        self.inner.registry.stop(id, StopReason::Requested).await
    }

    /// Active sessions for `owner_id`, oldest first.
    pub async fn list_sessions(&self, owner_id: &str) -> Vec<SessionSummary> {
        let handles = self.inner.registry.list_by_owner(owner_id);
        let snapshots =
            futures::future::join_all(handles.iter().map(|handle| handle.snapshot())).await;
        // A session stopped mid-listing simply drops out.
        snapshots
            .into_iter()
            .filter_map(|snapshot| snapshot.ok())
            .map(SessionSummary::from)
            .collect()
    }

    /// Stop every session and wait for background work to finish.
    pub async fn shutdown(&self) -> CleanupReport {
        let mut total = CleanupReport::default();
        for handle in self.inner.registry.all() {
            if let Ok(report) = self
                .inner
                .registry
                .stop(&handle.id, StopReason::Shutdown)
                .await
            {
                total.merge(report);
            }
        }

        let tracker = &self.inner.registry.context().tracker;
        tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = tracker.len(),
                "Background generation still running at shutdown"
            );
        }

        tracing::info!(
            released = total.released,
            failures = total.failures.len(),
            "All sessions shut down"
        );
        total
    }
}

impl std::fmt::Debug for MantraService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MantraService")
            .field("sessions", &self.inner.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::VoiceOptions;
    use cas::MemoryStore;

    fn service() -> MantraService {
        let store: Arc<dyn ContentStore> = Arc::new(MemoryStore::new());
        let generators = Generators::mock(store.clone(), Duration::ZERO);
        MantraService::new(
            store,
            generators,
            SessionDefaults::default(),
            RetentionConfig::default(),
        )
    }

    fn track() -> TrackDescriptor {
        TrackDescriptor {
            id: "track-9".to_string(),
            track_type: "focus".to_string(),
            mood_tags: vec!["warm".to_string()],
            duration_secs: 240.0,
            affirmations: vec![],
            voice: VoiceOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_start_uses_defaults_and_overrides() {
        let service = service();
        let started = service
            .start_session("alice", track(), StartOptions::default())
            .unwrap();
        assert_eq!(started.affirmation_interval, 30.0);
        assert_eq!(started.total_duration, 240.0);

        let started = service
            .start_session(
                "alice",
                track(),
                StartOptions {
                    affirmation_interval: Some(45.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(started.affirmation_interval, 45.0);
        let snapshot = service.get_session(&started.id).await.unwrap();
        assert_eq!(snapshot.affirmation_interval, 45.0);
    }

    #[tokio::test]
    async fn test_invalid_start_options() {
        let service = service();
        let err = service
            .start_session(
                "alice",
                track(),
                StartOptions {
                    buffer_size: Some(0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidOptions(_)));

        let err = service
            .start_session(
                "alice",
                track(),
                StartOptions {
                    affirmation_interval: Some(-1.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn test_invalid_position() {
        let service = service();
        let started = service
            .start_session("alice", track(), StartOptions::default())
            .unwrap();
        assert_eq!(
            service.update_position(&started.id, -1.0).await,
            Err(SessionError::InvalidPosition(-1.0))
        );
        assert!(service
            .update_position(&started.id, f64::NAN)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let service = service();
        let missing = SessionId::new("session-missing");
        assert!(service.update_position(&missing, 1.0).await.unwrap_err().is_not_found());
        assert!(service.get_segment_handle(&missing, 0).await.unwrap_err().is_not_found());
        assert!(service.stop_session(&missing).await.unwrap_err().is_not_found());
        assert!(service.list_sessions("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_summary() {
        let service = service();
        let started = service
            .start_session("alice", track(), StartOptions::default())
            .unwrap();
        service.update_position(&started.id, 12.0).await.unwrap();

        let listed = service.list_sessions("alice").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, started.id);
        assert_eq!(listed[0].track_id, "track-9");
        assert_eq!(listed[0].current_position, 12.0);
        assert!(listed[0].is_active);

        service.stop_session(&started.id).await.unwrap();
        assert!(service.list_sessions("alice").await.is_empty());
    }
}
