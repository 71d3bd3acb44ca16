//! Streaming diagram API: emit image outcomes as they settle.
//!
//! ## Why stream?
//!
//! A photo with several figure problems takes a while to illustrate. The
//! stream lets callers show each diagram the moment it arrives instead of
//! waiting for the whole join, or feed a progress bar.
//!
//! Unlike [`crate::pipeline::fanout::ImageFanout::enrich`], which returns
//! only after every call settled, [`image_stream`] yields one
//! [`ImageOutcome`] per directive in completion order. Each outcome carries
//! its [`UnitSlot`], so callers write results back by position, never by
//! arrival order.
//!
//! Failures are items, not stream errors: a failed diagram never ends the
//! stream early.

use crate::error::SynthesisError;
use crate::model::{AnalysisResult, ImageAsset, UnitSlot};
use crate::pipeline::synthesize::ImageSynthesizer;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::debug;

/// The settled outcome of one diagram request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOutcome {
    /// Which variation the diagram belongs to.
    pub slot: UnitSlot,
    pub result: Result<ImageAsset, SynthesisError>,
}

/// A boxed stream of image outcomes.
pub type ImageStream = Pin<Box<dyn Stream<Item = ImageOutcome> + Send>>;

/// Request a diagram for every directive in `result`, yielding outcomes as
/// they settle.
///
/// Only sets with `has_figure` contribute, and only variations with a
/// non-blank directive. At most `concurrency` requests are in flight.
///
/// # Example
/// ```rust,no_run
/// use futures::StreamExt;
/// use mathvariant::{image_stream, AnalysisResult, ImageSynthesizer};
///
/// # async fn demo(mut result: AnalysisResult, synthesizer: ImageSynthesizer) {
/// let mut outcomes = image_stream(&result, &synthesizer, 4);
/// while let Some(outcome) = outcomes.next().await {
///     if let (Ok(asset), Some(unit)) = (outcome.result, result.variation_mut(outcome.slot)) {
///         unit.image_asset = Some(asset);
///     }
/// }
/// # }
/// ```
pub fn image_stream(
    result: &AnalysisResult,
    synthesizer: &ImageSynthesizer,
    concurrency: usize,
) -> ImageStream {
    outcomes(directive_jobs(result), synthesizer, concurrency, None)
}

/// Every `(slot, directive)` pair that should receive a diagram, in display order.
pub(crate) fn directive_jobs(result: &AnalysisResult) -> Vec<(UnitSlot, String)> {
    result
        .directive_slots()
        .into_iter()
        .filter_map(|slot| {
            let directive = result.variation(slot)?.directive()?;
            Some((slot, directive.to_string()))
        })
        .collect()
}

/// Shared by [`image_stream`] and the fan-out, which also reports progress.
pub(crate) fn outcomes(
    jobs: Vec<(UnitSlot, String)>,
    synthesizer: &ImageSynthesizer,
    concurrency: usize,
    progress: Option<ProgressCallback>,
) -> ImageStream {
    let total = jobs.len();
    debug!("Scheduling {} diagram requests (concurrency {})", total, concurrency);

    let synthesizer = synthesizer.clone();
    let s = stream::iter(jobs.into_iter().map(move |(slot, directive)| {
        let synthesizer = synthesizer.clone();
        let progress = progress.clone();
        async move {
            if let Some(ref cb) = progress {
                cb.on_image_start(slot, total);
            }
            let result = synthesizer.try_synthesize(&directive).await;
            ImageOutcome { slot, result }
        }
    }))
    .buffer_unordered(concurrency.max(1));

    Box::pin(s)
}
