//! Playback sessions.
//!
//! ## Architecture
//!
//! - **SessionRegistry**: table of live sessions, hands out [`SessionHandle`]s
//! - **SessionActor**: one task per session, sole owner of its mutable state
//! - **SessionHandle**: cheap clone that talks to an actor over its mailbox
//!
//! Generation runs in tracked background tasks that report back through the
//! same mailbox, so buffer and affirmation state only ever change inside
//! the actor.

mod actor;
pub mod registry;
pub mod types;

pub use registry::{SessionContext, SessionHandle, SessionRegistry};
pub use types::{
    Affirmation, AffirmationId, PositionUpdate, Segment, SegmentId, SessionId, SessionOptions,
    SessionSnapshot, SessionState, TrackDescriptor,
};
