//! HTTP clients for the music and voice model services.
//!
//! Both services answer with base64 audio plus its duration. The audio is
//! decoded and written to CAS before the handle is returned.

use super::{
    GeneratedAffirmation, GeneratedSegment, MusicGenerator, MusicRequest, VoiceOptions,
    VoiceSynthesizer,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cas::{ContentHash, ContentStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    prompt: &'a str,
    duration: f64,
    client_job_id: String,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
    speed: f32,
}

/// Response shape shared by both services.
#[derive(Debug, Deserialize)]
struct AudioResponse {
    audio_base64: String,
    duration: f64,
}

/// Shared plumbing: client, base URL, and the store decoded audio lands in.
struct ModelClient {
    base_url: String,
    client: reqwest::Client,
    store: Arc<dyn ContentStore>,
}

impl ModelClient {
    fn new(base_url: &str, store: Arc<dyn ContentStore>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            store,
        })
    }

    fn inject_trace_context(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        use opentelemetry::trace::TraceContextExt;
        use tracing_opentelemetry::OpenTelemetrySpanExt;

        let span = tracing::Span::current();
        let context = span.context();
        let ctx_span = context.span();
        let span_context = ctx_span.span_context();

        if span_context.is_valid() {
            let flags = if span_context.is_sampled() { "01" } else { "00" };
            let traceparent = format!(
                "00-{}-{}-{}",
                span_context.trace_id(),
                span_context.span_id(),
                flags
            );
            builder.header("traceparent", traceparent)
        } else {
            builder
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<AudioResponse> {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.inject_trace_context(self.client.post(&url).json(body));
        let resp = builder
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?;

        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(5);
            tracing::warn!(url = %url, retry_after, "Model service busy");
            anyhow::bail!("model service busy, retry after {}s", retry_after);
        }

        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            anyhow::bail!("model service error {}: {}", status, error_body);
        }

        resp.json::<AudioResponse>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    fn store_audio(&self, response: &AudioResponse) -> Result<ContentHash> {
        if !response.duration.is_finite() || response.duration <= 0.0 {
            anyhow::bail!("model returned unusable duration {}", response.duration);
        }
        let bytes = BASE64
            .decode(&response.audio_base64)
            .context("Failed to decode audio_base64")?;
        self.store
            .store(&bytes, "audio/wav")
            .context("Failed to store generated audio in CAS")
    }
}

pub struct RemoteMusicGenerator {
    inner: ModelClient,
}

impl RemoteMusicGenerator {
    pub fn new(base_url: &str, store: Arc<dyn ContentStore>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            inner: ModelClient::new(base_url, store, timeout)?,
        })
    }
}

#[async_trait]
impl MusicGenerator for RemoteMusicGenerator {
    #[tracing::instrument(skip(self, request), fields(track_type = %request.track_type))]
    async fn generate_segment(
        &self,
        request: &MusicRequest,
        duration: f64,
    ) -> Result<GeneratedSegment> {
        let prompt = request.prompt();
        let body = PredictRequest {
            prompt: &prompt,
            duration,
            client_job_id: uuid::Uuid::new_v4().to_string(),
        };
        let response = self.inner.post("/predict", &body).await?;
        let handle = self.inner.store_audio(&response)?;
        tracing::info!(handle = %handle.short(), duration = response.duration, "Segment generated");

        Ok(GeneratedSegment {
            handle,
            duration: response.duration,
            prompt,
        })
    }
}

pub struct RemoteVoiceSynthesizer {
    inner: ModelClient,
}

impl RemoteVoiceSynthesizer {
    pub fn new(base_url: &str, store: Arc<dyn ContentStore>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            inner: ModelClient::new(base_url, store, timeout)?,
        })
    }
}

#[async_trait]
impl VoiceSynthesizer for RemoteVoiceSynthesizer {
    #[tracing::instrument(skip(self, text), fields(voice = %voice.voice))]
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<GeneratedAffirmation> {
        if text.trim().is_empty() {
            anyhow::bail!("refusing to synthesize empty text");
        }
        let body = SynthesizeRequest {
            text,
            voice: &voice.voice,
            speed: voice.speed,
        };
        let response = self.inner.post("/synthesize", &body).await?;
        let handle = self.inner.store_audio(&response)?;

        Ok(GeneratedAffirmation {
            handle,
            text: text.to_string(),
            duration: response.duration,
        })
    }
}
