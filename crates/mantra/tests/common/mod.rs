//! Shared fixtures for mantra integration tests.
//!
//! Services here run on `MemoryStore` (wrapped to count releases) with
//! zero-latency mock generators unless a test swaps in its own double.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use cas::{CasReference, ContentHash, ContentStore, MemoryStore};
use mantra::generation::{
    GeneratedSegment, MockMusicGenerator, MockVoiceSynthesizer, MusicGenerator, MusicRequest,
};
use mantra::{
    Generators, MantraService, SessionEvent, SessionId, SessionSnapshot, TrackDescriptor,
    VoiceOptions,
};
use mantraconf::{RetentionConfig, SessionDefaults};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

/// Memory store that remembers how often each handle was released.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    releases: Mutex<HashMap<ContentHash, usize>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn release_count(&self, hash: &ContentHash) -> usize {
        self.releases
            .lock()
            .unwrap()
            .get(hash)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_release_count(&self) -> usize {
        self.releases
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

impl ContentStore for CountingStore {
    fn store(&self, data: &[u8], mime_type: &str) -> Result<ContentHash> {
        self.inner.store(data, mime_type)
    }

    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        self.inner.retrieve(hash)
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.inner.exists(hash)
    }

    fn path(&self, hash: &ContentHash) -> Option<PathBuf> {
        self.inner.path(hash)
    }

    fn inspect(&self, hash: &ContentHash) -> Result<Option<CasReference>> {
        self.inner.inspect(hash)
    }

    fn release(&self, hash: &ContentHash) -> Result<bool> {
        *self
            .releases
            .lock()
            .unwrap()
            .entry(hash.clone())
            .or_insert(0) += 1;
        self.inner.release(hash)
    }
}

/// Music generator that blocks each segment until the test opens the gate.
pub struct GatedMusic {
    inner: MockMusicGenerator,
    gate: Arc<Semaphore>,
    started: AtomicUsize,
}

impl GatedMusic {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            inner: MockMusicGenerator::new(store, Duration::ZERO),
            gate: Arc::new(Semaphore::new(0)),
            started: AtomicUsize::new(0),
        }
    }

    /// Let `n` more segment calls finish.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MusicGenerator for GatedMusic {
    async fn generate_segment(
        &self,
        request: &MusicRequest,
        duration: f64,
    ) -> Result<GeneratedSegment> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        self.inner.generate_segment(request, duration).await
    }
}

/// Music generator that always fails.
pub struct FailingMusic {
    pub calls: AtomicUsize,
}

impl FailingMusic {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MusicGenerator for FailingMusic {
    async fn generate_segment(
        &self,
        _request: &MusicRequest,
        _duration: f64,
    ) -> Result<GeneratedSegment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("music model unavailable")
    }
}

/// Music generator whose every call panics.
pub struct PanickingMusic;

#[async_trait]
impl MusicGenerator for PanickingMusic {
    async fn generate_segment(
        &self,
        _request: &MusicRequest,
        _duration: f64,
    ) -> Result<GeneratedSegment> {
        panic!("decoder exploded")
    }
}

pub struct Harness {
    pub service: MantraService,
    pub store: Arc<CountingStore>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    /// Zero-latency mock generators.
    pub fn new() -> Self {
        Self::with_retention(RetentionConfig::default())
    }

    pub fn with_retention(retention: RetentionConfig) -> Self {
        let store = Arc::new(CountingStore::new());
        let generators = Generators::mock(store.clone(), Duration::ZERO);
        Self::build(store, generators, retention)
    }

    /// Custom music generator, mock voice.
    pub fn with_music(
        store: Arc<CountingStore>,
        music: Arc<dyn MusicGenerator>,
    ) -> Self {
        let voice = Arc::new(MockVoiceSynthesizer::new(store.clone(), Duration::ZERO));
        Self::with_generators(store, Generators::new(music, voice))
    }

    /// Fully custom adapters over `store`.
    pub fn with_generators(store: Arc<CountingStore>, generators: Generators) -> Self {
        Self::build(store, generators, RetentionConfig::default())
    }

    fn build(
        store: Arc<CountingStore>,
        generators: Generators,
        retention: RetentionConfig,
    ) -> Self {
        let service = MantraService::new(
            store.clone(),
            generators,
            SessionDefaults::default(),
            retention,
        );
        let events = service.subscribe();
        Self {
            service,
            store,
            events,
        }
    }

    /// Next event for `session` matching `pred`, skipping everything else.
    pub async fn wait_for(
        &mut self,
        session: &SessionId,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Ok(event) if event.session_id() == session && pred(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("timed out waiting for session event")
    }

    pub async fn wait_until_ready(&mut self, session: &SessionId) {
        self.wait_for(session, |e| matches!(e, SessionEvent::SegmentsReady { .. }))
            .await;
    }

    /// Wait for both the initial buffer and the affirmation pool, in either
    /// order. Returns (segments, affirmations).
    pub async fn wait_for_startup(&mut self, session: &SessionId) -> (usize, usize) {
        let mut segments = None;
        let mut affirmations = None;
        while segments.is_none() || affirmations.is_none() {
            match self
                .wait_for(session, |e| {
                    matches!(
                        e,
                        SessionEvent::SegmentsReady { .. } | SessionEvent::AffirmationsReady { .. }
                    )
                })
                .await
            {
                SessionEvent::SegmentsReady { count, .. } => segments = Some(count),
                SessionEvent::AffirmationsReady { count, .. } => affirmations = Some(count),
                _ => unreachable!(),
            }
        }
        (segments.unwrap_or(0), affirmations.unwrap_or(0))
    }

    /// Poll until no music generation is outstanding.
    pub async fn wait_until_idle(&self, session: &SessionId) -> SessionSnapshot {
        let poll = async {
            loop {
                let snapshot = self.service.get_session(session).await.unwrap();
                if !snapshot.generation_in_flight {
                    return snapshot;
                }
                tokio::task::yield_now().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), poll)
            .await
            .expect("timed out waiting for generation to settle")
    }

    /// Everything already published, without waiting.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn track(duration_secs: f64) -> TrackDescriptor {
    TrackDescriptor {
        id: "track-1".to_string(),
        track_type: "meditation".to_string(),
        mood_tags: vec!["calm".to_string(), "warm".to_string()],
        duration_secs,
        affirmations: Vec::new(),
        voice: VoiceOptions::default(),
    }
}

pub fn track_with_affirmations(duration_secs: f64, texts: &[&str]) -> TrackDescriptor {
    TrackDescriptor {
        affirmations: texts.iter().map(|t| t.to_string()).collect(),
        ..track(duration_secs)
    }
}
