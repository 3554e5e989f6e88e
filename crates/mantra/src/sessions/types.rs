//! Domain types for playback sessions.

use crate::error::SessionError;
use crate::generation::VoiceOptions;
use cas::ContentHash;
use chrono::{DateTime, Utc};
use mantraconf::SessionDefaults;
use serde::{Deserialize, Serialize};

/// Unique identifier for a playback session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate a new unique session ID
    pub fn generate() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4().as_simple()))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a buffered segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub String);

impl SegmentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate a segment ID for a session and absolute index
    pub fn for_session(session_id: &SessionId, index: u64) -> Self {
        Self(format!("{}-seg-{}", session_id.as_str(), index))
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a synthesized affirmation clip
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffirmationId(pub String);

impl AffirmationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn for_session(session_id: &SessionId, n: usize) -> Self {
        Self(format!("{}-aff-{}", session_id.as_str(), n))
    }
}

impl std::fmt::Display for AffirmationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Stopped,
}

/// What a session plays. Stands in for the persisted track record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: String,
    /// e.g. "meditation", "sleep", "focus"
    pub track_type: String,
    #[serde(default)]
    pub mood_tags: Vec<String>,
    /// Declared track length in seconds
    pub duration_secs: f64,
    /// Affirmation texts, synthesized once when the session starts
    #[serde(default)]
    pub affirmations: Vec<String>,
    #[serde(default)]
    pub voice: VoiceOptions,
}

/// Fully resolved per-session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub affirmation_interval: f64,
    pub buffer_size: usize,
    /// Duration of each segment appended after the initial batch
    pub segment_duration: f64,
    pub look_ahead: f64,
}

/// Most segments a session may keep ahead of playback.
pub const MAX_BUFFER_SIZE: usize = 64;

/// Longest declared track a session accepts (six hours).
pub const MAX_TRACK_DURATION_SECS: f64 = 6.0 * 60.0 * 60.0;

/// Longest single segment a session may request (one hour).
pub const MAX_SEGMENT_DURATION_SECS: f64 = 60.0 * 60.0;

impl SessionOptions {
    pub fn from_defaults(defaults: &SessionDefaults) -> Self {
        Self {
            affirmation_interval: defaults.affirmation_interval_secs,
            buffer_size: defaults.buffer_size,
            segment_duration: defaults.segment_duration_secs,
            look_ahead: defaults.look_ahead_secs,
        }
    }

    /// Reject settings no session could run with.
    pub fn validate(&self, track: &TrackDescriptor) -> Result<(), SessionError> {
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(SessionError::InvalidOptions(format!(
                "buffer_size must be between 1 and {}, got {}",
                MAX_BUFFER_SIZE, self.buffer_size
            )));
        }
        positive("affirmation_interval", self.affirmation_interval)?;
        positive("segment_duration", self.segment_duration)?;
        positive("track duration", track.duration_secs)?;
        at_most("segment_duration", self.segment_duration, MAX_SEGMENT_DURATION_SECS)?;
        at_most("track duration", track.duration_secs, MAX_TRACK_DURATION_SECS)?;
        if !self.look_ahead.is_finite() || self.look_ahead < 0.0 {
            return Err(SessionError::InvalidOptions(format!(
                "look_ahead must be a non-negative number, got {}",
                self.look_ahead
            )));
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<(), SessionError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SessionError::InvalidOptions(format!(
            "{} must be a positive number, got {}",
            name, value
        )))
    }
}

fn at_most(name: &str, value: f64, limit: f64) -> Result<(), SessionError> {
    if value <= limit {
        Ok(())
    } else {
        Err(SessionError::InvalidOptions(format!(
            "{} must be at most {} seconds, got {}",
            name, limit, value
        )))
    }
}

/// One bounded slice of generated background audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    /// Absolute position in the session's segment sequence
    pub index: u64,
    pub handle: ContentHash,
    pub duration: f64,
    /// Sum of the durations of every earlier segment, evicted ones included
    pub start_offset: f64,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start_offset && position < self.end_offset()
    }
}

/// One synthesized spoken-text clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affirmation {
    pub id: AffirmationId,
    pub handle: ContentHash,
    pub text: String,
    pub duration: f64,
    pub created_at: DateTime<Utc>,
}

/// Result of applying one playback position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position: f64,
    pub current_segment_index: u64,
    /// Affirmation surfaced by this update, if any
    pub affirmation: Option<AffirmationId>,
    /// Whether this update started a generation request
    pub generation_requested: bool,
}

/// Point-in-time copy of a session's state, as seen by its actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub owner_id: String,
    pub track_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub current_position: f64,
    pub total_duration: f64,
    pub affirmation_interval: f64,
    pub last_affirmation_time: f64,
    pub buffer_size: usize,
    pub current_segment_index: u64,
    pub generation_in_flight: bool,
    pub segments: Vec<Segment>,
    pub affirmations: Vec<Affirmation>,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}
