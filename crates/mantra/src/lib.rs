//! mantra - infinite-audio session orchestrator.
//!
//! Manages per-listener playback sessions that combine a continuously
//! regenerated background-music buffer with periodically surfaced spoken
//! affirmations.
//!
//! ## Architecture
//!
//! - **MantraService**: boundary operations called by the surrounding system
//! - **SessionRegistry**: table of live sessions, one actor task per session
//! - **SegmentBuffer**: forward buffer of generated segments with eviction
//! - **AffirmationScheduler**: fixed clip pool, fires on playback position
//! - **RetentionSweeper**: periodic pass enforcing an absolute age ceiling
//! - **generation**: `MusicGenerator` / `VoiceSynthesizer` capabilities with
//!   mock and remote implementations chosen at startup
//!
//! ## Lifecycle
//!
//! ```text
//! start_session()  → actor spawned, initial batch + affirmation pool requested
//!      ↓
//! update_position() → buffer grows / evicts, affirmations fire
//!      ↓
//! stop_session() or sweep → storage released, record removed
//! ```

pub mod affirmations;
pub mod buffer;
pub mod cleanup;
pub mod error;
pub mod events;
pub mod generation;
pub mod service;
pub mod sessions;
pub mod sweeper;
pub mod telemetry;

pub use error::SessionError;
pub use events::{EventPublisher, SessionEvent, StopReason};
pub use generation::{Generators, MusicGenerator, VoiceOptions, VoiceSynthesizer};
pub use service::{MantraService, PositionUpdate, SessionStarted, SessionSummary, StartOptions};
pub use sessions::{SessionId, SessionRegistry, SessionSnapshot, TrackDescriptor};
pub use sweeper::RetentionSweeper;
