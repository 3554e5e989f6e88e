//! CAS configuration.
//!
//! Environment variables:
//! - `MANTRA_CAS_PATH`: Base path for CAS storage
//! - `MANTRA_CAS_READONLY`: Set to "true" for read-only mode
//!
//! Default path: `~/.mantra/cas`

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Configuration for Content Addressable Storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasConfig {
    /// Objects live in `{base_path}/objects/`, metadata in `{base_path}/metadata/`.
    pub base_path: PathBuf,

    /// Whether to write metadata JSON alongside objects.
    #[serde(default = "default_true")]
    pub store_metadata: bool,

    /// Refuse writes and releases.
    #[serde(default)]
    pub read_only: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CasConfig {
    fn default() -> Self {
        Self::with_base_path(default_cas_path())
    }
}

fn default_cas_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".mantra").join("cas"))
        .unwrap_or_else(|| PathBuf::from(".mantra/cas"))
}

impl CasConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let base_path = env::var("MANTRA_CAS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cas_path());

        let read_only = env::var("MANTRA_CAS_READONLY")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Self {
            base_path,
            store_metadata: true,
            read_only,
        }
    }

    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            store_metadata: true,
            read_only: false,
        }
    }

    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            store_metadata: false,
            read_only: true,
        }
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.base_path.join("metadata")
    }
}
