//! Storage release for stopped sessions and evicted segments.
//!
//! A handle that is already gone counts as released. Any other failure is
//! recorded and the pass moves on to the next handle.

use cas::{ContentHash, ContentStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub handle: ContentHash,
    pub error: String,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Objects removed by this pass
    pub released: usize,
    /// Objects that were no longer in the store
    pub already_missing: usize,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.released + self.already_missing + self.failures.len()
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.released += other.released;
        self.already_missing += other.already_missing;
        self.failures.extend(other.failures);
    }

    /// Release one handle, recording the outcome.
    pub fn release(&mut self, store: &dyn ContentStore, handle: &ContentHash) {
        match store.release(handle) {
            Ok(true) => self.released += 1,
            Ok(false) => {
                tracing::debug!(handle = %handle.short(), "Already released");
                self.already_missing += 1;
            }
            Err(e) => {
                tracing::warn!(handle = %handle.short(), error = %e, "Failed to release stored audio");
                self.failures.push(CleanupFailure {
                    handle: handle.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }
}

/// Release every handle, never stopping early.
pub fn release_all<'a>(
    store: &dyn ContentStore,
    handles: impl IntoIterator<Item = &'a ContentHash>,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    for handle in handles {
        report.release(store, handle);
    }
    report
}
