//! In-process generators for development and tests.
//!
//! They wait an artificial latency, render a quiet low-rate WAV of the right
//! length, and store it. Every clip carries fresh random noise, so no two
//! clips share a content hash.

use super::{
    GeneratedAffirmation, GeneratedSegment, MusicGenerator, MusicRequest, VoiceOptions,
    VoiceSynthesizer,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use cas::{ContentHash, ContentStore};
use rand::Rng;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Low enough that an hour of audio stays under a megabyte.
const MOCK_SAMPLE_RATE: u32 = 200;

/// Peak amplitude of the noise floor (i16 scale).
const NOISE_AMPLITUDE: i16 = 64;

/// Longest clip the mock will render.
pub const MAX_MOCK_CLIP_SECS: f64 = 6.0 * 60.0 * 60.0;

const SECONDS_PER_WORD: f64 = 0.4;
const BASE_SPEECH_SECONDS: f64 = 1.0;

pub struct MockMusicGenerator {
    store: Arc<dyn ContentStore>,
    latency: Duration,
}

impl MockMusicGenerator {
    pub fn new(store: Arc<dyn ContentStore>, latency: Duration) -> Self {
        Self { store, latency }
    }
}

#[async_trait]
impl MusicGenerator for MockMusicGenerator {
    #[tracing::instrument(skip(self, request), fields(track_type = %request.track_type))]
    async fn generate_segment(
        &self,
        request: &MusicRequest,
        duration: f64,
    ) -> Result<GeneratedSegment> {
        if !duration.is_finite() || duration <= 0.0 {
            anyhow::bail!("cannot generate a segment of {} seconds", duration);
        }
        simulate_latency(self.latency).await;

        let wav = render_noise_wav(duration)?;
        let handle = store_wav(self.store.as_ref(), &wav)?;
        tracing::debug!(handle = %handle.short(), duration, "Mock segment generated");

        Ok(GeneratedSegment {
            handle,
            duration,
            prompt: request.prompt(),
        })
    }
}

pub struct MockVoiceSynthesizer {
    store: Arc<dyn ContentStore>,
    latency: Duration,
}

impl MockVoiceSynthesizer {
    pub fn new(store: Arc<dyn ContentStore>, latency: Duration) -> Self {
        Self { store, latency }
    }
}

/// Rough spoken length of `text` at normal speed.
pub fn estimate_speech_duration(text: &str, speed: f32) -> f64 {
    let words = text.split_whitespace().count() as f64;
    let speed = if speed.is_finite() && speed > 0.0 {
        speed as f64
    } else {
        1.0
    };
    (BASE_SPEECH_SECONDS + SECONDS_PER_WORD * words) / speed
}

#[async_trait]
impl VoiceSynthesizer for MockVoiceSynthesizer {
    #[tracing::instrument(skip(self, text), fields(voice = %voice.voice))]
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<GeneratedAffirmation> {
        if text.trim().is_empty() {
            anyhow::bail!("refusing to synthesize empty text");
        }
        simulate_latency(self.latency).await;

        let duration = estimate_speech_duration(text, voice.speed);
        let wav = render_noise_wav(duration)?;
        let handle = store_wav(self.store.as_ref(), &wav)?;
        tracing::debug!(handle = %handle.short(), duration, "Mock affirmation synthesized");

        Ok(GeneratedAffirmation {
            handle,
            text: text.to_string(),
            duration,
        })
    }
}

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

fn store_wav(store: &dyn ContentStore, wav: &[u8]) -> Result<ContentHash> {
    store
        .store(wav, "audio/wav")
        .context("Failed to store generated audio in CAS")
}

/// Mono 16-bit WAV of `duration` seconds of quiet noise.
pub fn render_noise_wav(duration: f64) -> Result<Vec<u8>> {
    if !duration.is_finite() || duration > MAX_MOCK_CLIP_SECS {
        anyhow::bail!(
            "refusing to render {} seconds of audio (limit {})",
            duration,
            MAX_MOCK_CLIP_SECS
        );
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: MOCK_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let frames = (duration * MOCK_SAMPLE_RATE as f64).ceil().max(1.0) as u64;
    let mut rng = rand::rng();
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("failed to start WAV writer")?;
        for _ in 0..frames {
            let sample: i16 = rng.random_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
            writer
                .write_sample(sample)
                .context("failed to write WAV sample")?;
        }
        writer.finalize().context("failed to finalize WAV")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas::MemoryStore;

    fn wav_seconds(bytes: &[u8]) -> f64 {
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        reader.duration() as f64 / reader.spec().sample_rate as f64
    }

    #[test]
    fn test_render_matches_duration() {
        let wav = render_noise_wav(12.5).unwrap();
        assert!((wav_seconds(&wav) - 12.5).abs() < 0.01);
    }

    #[test]
    fn test_render_refuses_oversized_clips() {
        assert!(render_noise_wav(MAX_MOCK_CLIP_SECS + 1.0).is_err());
        assert!(render_noise_wav(1.0e15).is_err());
        assert!(render_noise_wav(f64::INFINITY).is_err());
    }

    #[test]
    fn test_speech_estimate() {
        assert!((estimate_speech_duration("I am calm", 1.0) - 2.2).abs() < 1e-9);
        assert!((estimate_speech_duration("I am calm", 2.0) - 1.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_segments_are_stored_with_distinct_hashes() {
        let store = Arc::new(MemoryStore::new());
        let music = MockMusicGenerator::new(store.clone(), Duration::ZERO);
        let request = MusicRequest::new("focus", vec!["warm".into()]);

        let a = music.generate_segment(&request, 5.0).await.unwrap();
        let b = music.generate_segment(&request, 5.0).await.unwrap();

        assert_ne!(a.handle, b.handle);
        assert_eq!(store.len(), 2);
        assert_eq!(a.prompt, "focus background music, warm, seamless, no vocals");
        let bytes = store.retrieve(&a.handle).unwrap().unwrap();
        assert!((wav_seconds(&bytes) - 5.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_invalid_duration_rejected() {
        let music = MockMusicGenerator::new(Arc::new(MemoryStore::new()), Duration::ZERO);
        let request = MusicRequest::new("focus", vec![]);
        assert!(music.generate_segment(&request, 0.0).await.is_err());
        assert!(music.generate_segment(&request, f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_text_fails() {
        let voice = MockVoiceSynthesizer::new(Arc::new(MemoryStore::new()), Duration::ZERO);
        assert!(voice.synthesize("   ", &VoiceOptions::default()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let voice = MockVoiceSynthesizer::new(Arc::new(MemoryStore::new()), Duration::from_millis(500));
        let started = tokio::time::Instant::now();
        let clip = voice
            .synthesize("I breathe in peace", &VoiceOptions::default())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(clip.text, "I breathe in peace");
    }
}
