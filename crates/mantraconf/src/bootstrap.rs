//! Bootstrap configuration - seeds the orchestrator when it is built.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which generation adapters to wire in at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process fake generators with artificial latency.
    #[default]
    Mock,
    /// HTTP model services.
    Remote,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Mock => write!(f, "mock"),
            Backend::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            "remote" | "real" => Ok(Backend::Remote),
            other => Err(format!("unknown backend '{}', expected mock or remote", other)),
        }
    }
}

/// Generation backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Music model service base URL (remote backend).
    #[serde(default = "GenerationConfig::default_music_url")]
    pub music_url: String,

    /// Voice synthesis service base URL (remote backend).
    #[serde(default = "GenerationConfig::default_voice_url")]
    pub voice_url: String,

    /// Simulated generation latency for the mock backend.
    #[serde(default = "GenerationConfig::default_mock_latency_ms")]
    pub mock_latency_ms: u64,

    /// Per-request HTTP timeout for the remote backend.
    #[serde(default = "GenerationConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl GenerationConfig {
    fn default_music_url() -> String {
        "http://127.0.0.1:2006".to_string()
    }

    fn default_voice_url() -> String {
        "http://127.0.0.1:2010".to_string()
    }

    fn default_mock_latency_ms() -> u64 {
        500
    }

    fn default_request_timeout_ms() -> u64 {
        120_000
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            music_url: Self::default_music_url(),
            voice_url: Self::default_voice_url(),
            mock_latency_ms: Self::default_mock_latency_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Per-session defaults, used when a start request leaves a value out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "SessionDefaults::default_affirmation_interval_secs")]
    pub affirmation_interval_secs: f64,

    /// Segments kept ahead of playback.
    #[serde(default = "SessionDefaults::default_buffer_size")]
    pub buffer_size: usize,

    /// Duration of each segment appended after the initial batch.
    #[serde(default = "SessionDefaults::default_segment_duration_secs")]
    pub segment_duration_secs: f64,

    /// How close to the end of the current segment playback gets before
    /// another segment is requested.
    #[serde(default = "SessionDefaults::default_look_ahead_secs")]
    pub look_ahead_secs: f64,
}

impl SessionDefaults {
    fn default_affirmation_interval_secs() -> f64 {
        30.0
    }

    fn default_buffer_size() -> usize {
        3
    }

    fn default_segment_duration_secs() -> f64 {
        60.0
    }

    fn default_look_ahead_secs() -> f64 {
        30.0
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            affirmation_interval_secs: Self::default_affirmation_interval_secs(),
            buffer_size: Self::default_buffer_size(),
            segment_duration_secs: Self::default_segment_duration_secs(),
            look_ahead_secs: Self::default_look_ahead_secs(),
        }
    }
}

/// Retention sweep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "RetentionConfig::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Absolute age ceiling, measured from session creation.
    #[serde(default = "RetentionConfig::default_max_session_age_secs")]
    pub max_session_age_secs: u64,
}

impl RetentionConfig {
    fn default_sweep_interval_secs() -> u64 {
        300
    }

    fn default_max_session_age_secs() -> u64 {
        1800
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: Self::default_sweep_interval_secs(),
            max_session_age_secs: Self::default_max_session_age_secs(),
        }
    }
}

/// All bootstrap settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub sessions: SessionDefaults,

    #[serde(default)]
    pub retention: RetentionConfig,
}
