//! Storage backends for generated audio.
//!
//! Layout of [`FileStore`]:
//! ```text
//! {base_path}/
//! ├── objects/
//! │   └── ab/
//! │       └── cde123...        # content (remainder of hash)
//! └── metadata/
//!     └── ab/
//!         └── cde123....json   # {mime_type, size}
//! ```
//!
//! Identical bytes share one object, so both backends count references:
//! every `store` takes one, every `release` drops one, and the object is
//! deleted with its last reference.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};

use crate::config::CasConfig;
use crate::hash::ContentHash;
use crate::metadata::{CasMetadata, CasReference};

/// Trait for content storage backends.
pub trait ContentStore: Send + Sync {
    /// Store data with associated MIME type, returning the content hash.
    ///
    /// If the data already exists, takes another reference to it without
    /// writing.
    fn store(&self, data: &[u8], mime_type: &str) -> Result<ContentHash>;

    /// Retrieve data by its content hash.
    ///
    /// Returns `Ok(None)` if the hash doesn't exist.
    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>>;

    /// Check if content exists without retrieving it.
    fn exists(&self, hash: &ContentHash) -> bool;

    /// Get the filesystem path for content (if available).
    fn path(&self, hash: &ContentHash) -> Option<PathBuf>;

    /// Get full metadata about stored content.
    ///
    /// Returns `Ok(None)` if the hash doesn't exist.
    fn inspect(&self, hash: &ContentHash) -> Result<Option<CasReference>>;

    /// Drop one reference to stored content, deleting it with the last one.
    ///
    /// Returns `Ok(true)` when a reference was dropped and `Ok(false)` when
    /// there was nothing to release. Any other failure is an error.
    fn release(&self, hash: &ContentHash) -> Result<bool>;
}

/// Filesystem-based content store.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: CasConfig,
    /// References taken by this process. An object on disk with no entry
    /// counts as holding one.
    refs: Arc<Mutex<HashMap<ContentHash, usize>>>,
}

impl FileStore {
    /// Create a new FileStore, creating its directories unless read-only.
    pub fn new(config: CasConfig) -> Result<Self> {
        if !config.read_only {
            fs::create_dir_all(config.objects_dir())
                .context("failed to create CAS objects directory")?;
            fs::create_dir_all(config.metadata_dir())
                .context("failed to create CAS metadata directory")?;
        }

        Ok(Self {
            config,
            refs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Create a FileStore at a specific path.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::with_base_path(path))
    }

    /// Create a read-only FileStore at a specific path.
    pub fn read_only_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(CasConfig::read_only(path))
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .objects_dir()
            .join(hash.prefix())
            .join(hash.remainder())
    }

    fn metadata_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .metadata_dir()
            .join(hash.prefix())
            .join(format!("{}.json", hash.remainder()))
    }
}

impl ContentStore for FileStore {
    fn store(&self, data: &[u8], mime_type: &str) -> Result<ContentHash> {
        if self.config.read_only {
            anyhow::bail!("CAS is in read-only mode");
        }

        let hash = ContentHash::from_data(data);
        let obj_path = self.object_path(&hash);

        // Held across the write so a concurrent release cannot delete the
        // object between the existence check and the count.
        let mut refs = self
            .refs
            .lock()
            .map_err(|_| anyhow::anyhow!("CAS reference table poisoned"))?;

        if let Some(parent) = obj_path.parent() {
            fs::create_dir_all(parent).context("failed to create object prefix directory")?;
        }

        if !obj_path.exists() {
            fs::write(&obj_path, data).context("failed to write object file")?;
        }

        if self.config.store_metadata {
            let meta_path = self.metadata_path(&hash);
            if let Some(parent) = meta_path.parent() {
                fs::create_dir_all(parent)
                    .context("failed to create metadata prefix directory")?;
            }

            if !meta_path.exists() {
                let metadata = CasMetadata {
                    mime_type: mime_type.to_string(),
                    size: data.len() as u64,
                };
                let json =
                    serde_json::to_string(&metadata).context("failed to serialize metadata")?;
                fs::write(&meta_path, json).context("failed to write metadata file")?;
            }
        }

        *refs.entry(hash.clone()).or_insert(0) += 1;
        Ok(hash)
    }

    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        match fs::read(self.object_path(hash)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("failed to read object file"),
        }
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.object_path(hash).exists()
    }

    fn path(&self, hash: &ContentHash) -> Option<PathBuf> {
        let path = self.object_path(hash);
        path.exists().then_some(path)
    }

    fn inspect(&self, hash: &ContentHash) -> Result<Option<CasReference>> {
        let obj_path = self.object_path(hash);
        let meta_path = self.metadata_path(hash);

        if !obj_path.exists() {
            return Ok(None);
        }

        if meta_path.exists() {
            let json = fs::read_to_string(&meta_path).context("failed to read metadata file")?;
            let metadata: CasMetadata =
                serde_json::from_str(&json).context("failed to parse metadata")?;

            Ok(Some(
                CasReference::new(hash.clone(), metadata.mime_type, metadata.size)
                    .with_path(obj_path.to_string_lossy()),
            ))
        } else {
            let file_size = fs::metadata(&obj_path)
                .context("failed to stat object file")?
                .len();

            Ok(Some(
                CasReference::new(hash.clone(), "application/octet-stream", file_size)
                    .with_path(obj_path.to_string_lossy()),
            ))
        }
    }

    fn release(&self, hash: &ContentHash) -> Result<bool> {
        if self.config.read_only {
            anyhow::bail!("CAS is in read-only mode");
        }

        let mut refs = self
            .refs
            .lock()
            .map_err(|_| anyhow::anyhow!("CAS reference table poisoned"))?;
        if let Some(count) = refs.get_mut(hash) {
            if *count > 1 {
                *count -= 1;
                return Ok(true);
            }
        }
        refs.remove(hash);

        let removed = match fs::remove_file(self.object_path(hash)) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to remove object {}", hash.short()))
            }
        };

        // A missing sidecar is fine; the object is what counts.
        match fs::remove_file(self.metadata_path(hash)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(hash = %hash, error = %e, "failed to remove metadata sidecar");
            }
        }

        Ok(removed)
    }
}

/// In-memory content store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ContentHash, MemoryObject>>,
}

#[derive(Debug)]
struct MemoryObject {
    metadata: CasMetadata,
    data: Vec<u8>,
    refs: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently held.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryStore {
    fn store(&self, data: &[u8], mime_type: &str) -> Result<ContentHash> {
        let hash = ContentHash::from_data(data);
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        objects
            .entry(hash.clone())
            .or_insert_with(|| MemoryObject {
                metadata: CasMetadata {
                    mime_type: mime_type.to_string(),
                    size: data.len() as u64,
                },
                data: data.to_vec(),
                refs: 0,
            })
            .refs += 1;
        Ok(hash)
    }

    fn retrieve(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(objects.get(hash).map(|object| object.data.clone()))
    }

    fn exists(&self, hash: &ContentHash) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(hash))
            .unwrap_or(false)
    }

    fn path(&self, _hash: &ContentHash) -> Option<PathBuf> {
        None
    }

    fn inspect(&self, hash: &ContentHash) -> Result<Option<CasReference>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(objects
            .get(hash)
            .map(|object| {
                CasReference::new(
                    hash.clone(),
                    object.metadata.mime_type.clone(),
                    object.metadata.size,
                )
            }))
    }

    fn release(&self, hash: &ContentHash) -> Result<bool> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        match objects.get_mut(hash) {
            Some(object) if object.refs > 1 => {
                object.refs -= 1;
                Ok(true)
            }
            Some(_) => Ok(objects.remove(hash).is_some()),
            None => Ok(false),
        }
    }
}
