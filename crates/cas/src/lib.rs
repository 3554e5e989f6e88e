//! Content Addressable Storage (CAS) for mantra.
//!
//! Every generated audio clip (background segment or spoken affirmation) is
//! written here once and referenced by its [`ContentHash`]. The orchestrator
//! never touches bytes directly; it only holds handles and asks the store to
//! release them when a session ends or a segment is evicted.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cas::{ContentStore, FileStore};
//!
//! let store = FileStore::at_path("/var/lib/mantra/cas").unwrap();
//!
//! let hash = store.store(b"RIFF....WAVE", "audio/wav").unwrap();
//! assert!(store.exists(&hash));
//!
//! // Releasing twice is safe: the second call reports "not present".
//! assert!(store.release(&hash).unwrap());
//! assert!(!store.release(&hash).unwrap());
//! ```
//!
//! # Backends
//!
//! - [`FileStore`]: sharded directory layout on local disk.
//! - [`MemoryStore`]: process-local map, used by tests and throwaway runs.
//!
//! # Configuration
//!
//! Environment variables:
//! - `MANTRA_CAS_PATH`: Base path for storage (default: `~/.mantra/cas`)
//! - `MANTRA_CAS_READONLY`: Set to "true" for read-only mode

pub mod config;
pub mod hash;
pub mod metadata;
pub mod store;

pub use config::CasConfig;
pub use hash::{ContentHash, HashError};
pub use metadata::{CasMetadata, CasReference};
pub use store::{ContentStore, FileStore, MemoryStore};
