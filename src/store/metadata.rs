//! Per-image metadata cache.
//!
//! Probing a gigapixel file is expensive, so dimensions and format are
//! memoized by image id. Each id owns a once-cell: concurrent misses for the
//! same id await a single in-flight probe instead of each opening the file.
//!
//! Entries live for the whole process. Originals are immutable after upload,
//! so there is nothing to invalidate; an eviction policy would plug in here.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::codec::ImageMetadata;
use crate::error::StoreError;

/// Get-or-populate map from image id to [`ImageMetadata`].
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<ImageMetadata>>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return cached metadata, running `probe` on a miss.
    ///
    /// Concurrent callers for the same uncached id share one probe. A failed
    /// probe is not cached; the next caller tries again.
    pub async fn get_or_populate<F, Fut>(
        &self,
        image_id: &str,
        probe: F,
    ) -> Result<ImageMetadata, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ImageMetadata, StoreError>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(image_id.to_string()).or_default().clone()
        };

        match cell.get_or_try_init(probe).await {
            Ok(metadata) => Ok(metadata.clone()),
            Err(err) => {
                // Drop the empty cell so failed ids don't accumulate
                let mut entries = self.entries.lock().await;
                if let Some(current) = entries.get(image_id) {
                    if Arc::ptr_eq(current, &cell) && !current.initialized() {
                        entries.remove(image_id);
                    }
                }
                Err(err)
            }
        }
    }

    /// Cached metadata without probing.
    pub async fn get(&self, image_id: &str) -> Option<ImageMetadata> {
        let entries = self.entries.lock().await;
        entries.get(image_id).and_then(|cell| cell.get().cloned())
    }

    /// Seed an entry with metadata that is already known.
    ///
    /// Returns `false` if the id was already populated; the existing value
    /// is kept.
    pub async fn insert(&self, image_id: &str, metadata: ImageMetadata) -> bool {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(image_id.to_string()).or_default().clone()
        };
        cell.set(metadata).is_ok()
    }

    /// Number of populated entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
