//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline extracts problems and draws diagrams.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a UI toolkit's event loop, or a terminal
//! progress bar without the library knowing how the host application
//! communicates. Phase changes are additionally observable through
//! [`crate::driver::PipelineDriver::subscribe`].
//!
//! # Example
//!
//! ```rust
//! use mathvariant::{PipelineConfig, PipelineProgressCallback, UnitSlot};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     drawn: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, slot: UnitSlot, total: usize, _bytes: usize) {
//!         let done = self.drawn.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{slot} drawn ({done}/{total})");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { drawn: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::UnitSlot;
use std::sync::Arc;

/// Called by the pipeline as it moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// Image events for different slots may arrive concurrently and in any
/// order. Implementations must protect shared mutable state with
/// appropriate synchronisation primitives (e.g. `Mutex`, `AtomicUsize`).
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before the extraction request is sent.
    fn on_extraction_start(&self) {}

    /// Called when extraction succeeded.
    ///
    /// # Arguments
    /// * `problem_sets` — number of problem sets found
    /// * `images`       — number of diagrams that will be requested
    fn on_extraction_complete(&self, problem_sets: usize, images: usize) {
        let _ = (problem_sets, images);
    }

    /// Called when an extraction attempt failed (including ones that will be retried).
    fn on_extraction_error(&self, attempt: u32, error: &str) {
        let _ = (attempt, error);
    }

    /// Called just before the synthesis request for `slot` is sent.
    fn on_image_start(&self, slot: UnitSlot, total: usize) {
        let _ = (slot, total);
    }

    /// Called when a diagram was generated.
    ///
    /// `bytes` is the decoded image size.
    fn on_image_complete(&self, slot: UnitSlot, total: usize, bytes: usize) {
        let _ = (slot, total, bytes);
    }

    /// Called when a diagram could not be generated. The variation keeps no image.
    fn on_image_error(&self, slot: UnitSlot, total: usize, error: &str) {
        let _ = (slot, total, error);
    }

    /// Called once after every scheduled diagram has settled.
    ///
    /// # Arguments
    /// * `requested` — diagrams scheduled
    /// * `attached`  — diagrams that were generated
    fn on_imaging_complete(&self, requested: usize, attached: usize) {
        let _ = (requested, attached);
    }

    /// Called by [`crate::PipelineDriver`] for every phase it publishes.
    ///
    /// `phase` is the phase label: `"idle"`, `"extracting"`, `"imaging"`,
    /// `"done"` or `"error"`. Superseded submissions publish nothing.
    fn on_phase(&self, generation: u64, phase: &str) {
        let _ = (generation, phase);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
