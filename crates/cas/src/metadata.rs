//! Metadata types for CAS objects.
//!
//! Each object can carry a JSON sidecar with its MIME type and size, so
//! `inspect()` never has to read the audio itself.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Metadata stored alongside CAS objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CasMetadata {
    /// MIME type of the content (e.g., "audio/wav").
    pub mime_type: String,

    /// Size of the content in bytes.
    pub size: u64,
}

/// Reference to content in the CAS, combining hash with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasReference {
    pub hash: ContentHash,
    pub mime_type: String,
    pub size_bytes: u64,

    /// Local filesystem path to the content, when the backend has one.
    pub local_path: Option<String>,
}

impl CasReference {
    pub fn new(hash: ContentHash, mime_type: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            hash,
            mime_type: mime_type.into(),
            size_bytes,
            local_path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }
}
