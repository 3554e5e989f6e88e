//! Generation adapters: background music and spoken affirmations.
//!
//! The orchestrator only sees the [`MusicGenerator`] and [`VoiceSynthesizer`]
//! capabilities. Which implementation backs them (in-process mock or remote
//! model services) is decided once at startup by [`Generators::from_config`].
//!
//! Adapters write the audio they produce into the content store and hand back
//! the handle; they never keep bytes around.

pub mod mock;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use cas::{ContentHash, ContentStore};
use mantraconf::{Backend, GenerationConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use mock::{MockMusicGenerator, MockVoiceSynthesizer};
pub use remote::{RemoteMusicGenerator, RemoteVoiceSynthesizer};

/// What to generate music for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicRequest {
    pub track_type: String,
    pub mood_tags: Vec<String>,
}

impl MusicRequest {
    pub fn new(track_type: impl Into<String>, mood_tags: Vec<String>) -> Self {
        Self {
            track_type: track_type.into(),
            mood_tags,
        }
    }

    /// Text prompt handed to the music model.
    pub fn prompt(&self) -> String {
        let mut parts = vec![format!("{} background music", self.track_type)];
        parts.extend(self.mood_tags.iter().cloned());
        parts.push("seamless".to_string());
        parts.push("no vocals".to_string());
        parts.join(", ")
    }
}

/// Voice settings for affirmation synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceOptions {
    #[serde(default = "VoiceOptions::default_voice")]
    pub voice: String,
    #[serde(default = "VoiceOptions::default_speed")]
    pub speed: f32,
}

impl VoiceOptions {
    fn default_voice() -> String {
        "calm".to_string()
    }

    fn default_speed() -> f32 {
        1.0
    }
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: Self::default_voice(),
            speed: Self::default_speed(),
        }
    }
}

/// A stored music segment, not yet placed in any buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSegment {
    pub handle: ContentHash,
    pub duration: f64,
    pub prompt: String,
}

/// A stored affirmation clip.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAffirmation {
    pub handle: ContentHash,
    pub text: String,
    pub duration: f64,
}

/// An initial batch that failed after storing some of its segments.
#[derive(Debug, Clone, thiserror::Error)]
#[error("initial batch segment {} of {count} failed: {cause}", .failed_at + 1)]
pub struct PartialBatch {
    pub stored: Vec<ContentHash>,
    pub failed_at: usize,
    pub count: usize,
    pub cause: String,
}

/// Produces background music segments.
#[async_trait]
pub trait MusicGenerator: Send + Sync {
    /// Generate one segment of roughly `duration` seconds.
    async fn generate_segment(&self, request: &MusicRequest, duration: f64)
        -> Result<GeneratedSegment>;

    /// Generate `count` segments, each `ceil(total_duration / count)` long.
    ///
    /// Fails as a whole if any segment fails. The error then carries a
    /// [`PartialBatch`] listing whatever was already stored, so the caller can
    /// release it.
    async fn generate_initial_batch(
        &self,
        request: &MusicRequest,
        total_duration: f64,
        count: usize,
    ) -> Result<Vec<GeneratedSegment>> {
        let duration = initial_segment_duration(total_duration, count);
        let mut batch = Vec::new();
        for i in 0..count {
            match self.generate_segment(request, duration).await {
                Ok(segment) => batch.push(segment),
                Err(e) => {
                    tracing::warn!(
                        segment = i,
                        count,
                        error = %e,
                        "Initial batch failed part-way"
                    );
                    return Err(anyhow::Error::new(PartialBatch {
                        stored: batch.into_iter().map(|s| s.handle).collect(),
                        failed_at: i,
                        count,
                        cause: format!("{:#}", e),
                    }));
                }
            }
        }
        Ok(batch)
    }
}

/// Turns affirmation text into speech.
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<GeneratedAffirmation>;

    /// Synthesize every text in order, skipping the ones that fail.
    async fn synthesize_batch(
        &self,
        texts: &[String],
        voice: &VoiceOptions,
    ) -> Vec<GeneratedAffirmation> {
        let mut clips = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.synthesize(text, voice).await {
                Ok(clip) if clip.duration.is_finite() && clip.duration > 0.0 => clips.push(clip),
                Ok(clip) => {
                    tracing::warn!(
                        item = i,
                        duration = clip.duration,
                        "Discarding affirmation with unusable duration"
                    );
                }
                Err(e) => {
                    tracing::warn!(item = i, error = %e, "Affirmation synthesis failed, skipping");
                }
            }
        }
        clips
    }
}

/// Length of each initial-batch segment.
pub fn initial_segment_duration(total_duration: f64, count: usize) -> f64 {
    (total_duration / count.max(1) as f64).ceil()
}

/// The pair of adapters a service runs with.
#[derive(Clone)]
pub struct Generators {
    pub music: Arc<dyn MusicGenerator>,
    pub voice: Arc<dyn VoiceSynthesizer>,
}

impl Generators {
    pub fn new(music: Arc<dyn MusicGenerator>, voice: Arc<dyn VoiceSynthesizer>) -> Self {
        Self { music, voice }
    }

    /// Mock adapters with the given artificial latency.
    pub fn mock(store: Arc<dyn ContentStore>, latency: std::time::Duration) -> Self {
        Self {
            music: Arc::new(MockMusicGenerator::new(store.clone(), latency)),
            voice: Arc::new(MockVoiceSynthesizer::new(store, latency)),
        }
    }

    pub fn from_config(config: &GenerationConfig, store: Arc<dyn ContentStore>) -> Result<Self> {
        let generators = match config.backend {
            Backend::Mock => Self::mock(
                store,
                std::time::Duration::from_millis(config.mock_latency_ms),
            ),
            Backend::Remote => {
                let timeout = std::time::Duration::from_millis(config.request_timeout_ms);
                Self {
                    music: Arc::new(RemoteMusicGenerator::new(
                        &config.music_url,
                        store.clone(),
                        timeout,
                    )?),
                    voice: Arc::new(RemoteVoiceSynthesizer::new(
                        &config.voice_url,
                        store,
                        timeout,
                    )?),
                }
            }
        };
        tracing::info!(backend = %config.backend, "Generation adapters ready");
        Ok(generators)
    }
}

impl std::fmt::Debug for Generators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generators").finish_non_exhaustive()
    }
}
