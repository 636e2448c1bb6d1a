//! Decode gate.
//!
//! Bounds the number of simultaneous codec renders. A single gigapixel decode
//! can saturate memory, so the default capacity is 1.
//!
//! The gate wraps only the render call. Cache hits and metadata reads never
//! touch it.
//!
//! ```ignore
//! let gate = Arc::new(DecodeGate::new(1));
//!
//! let permit = gate.acquire().await?;
//! let bytes = codec.render(&path, &request).await;
//! drop(permit); // also released on early return or panic
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::TileError;

/// Default number of concurrent renders.
pub const DEFAULT_DECODE_CONCURRENCY: usize = 1;

/// Process-wide admission gate for codec renders.
#[derive(Debug)]
pub struct DecodeGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl DecodeGate {
    /// Create a gate admitting `capacity` renders at once (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot.
    ///
    /// The slot is held until the returned permit is dropped.
    pub async fn acquire(&self) -> Result<GatePermit<'_>, TileError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TileError::GateClosed)?;

        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);

        Ok(GatePermit {
            _permit: permit,
            in_flight: &self.in_flight,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Renders currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest number of slots ever held at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for DecodeGate {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_CONCURRENCY)
    }
}

/// RAII slot in a [`DecodeGate`].
#[derive(Debug)]
pub struct GatePermit<'a> {
    _permit: OwnedSemaphorePermit,
    in_flight: &'a AtomicUsize,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
