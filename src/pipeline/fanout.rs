//! The variation fan-out: attach a diagram to every variation that asked for one.
//!
//! Every scheduled request runs concurrently and the join waits for all of
//! them. Each outcome is written back through its [`UnitSlot`] to its own
//! variation; a failed request leaves exactly that variation without an
//! image and touches nothing else. The returned result has the shape of
//! the input: same sets, same variations in the same order.

use crate::config::PipelineConfig;
use crate::model::AnalysisResult;
use crate::pipeline::synthesize::ImageSynthesizer;
use crate::progress::ProgressCallback;
use crate::stream;
use futures::StreamExt;
use std::time::Instant;
use tracing::{info, warn};

/// Drives the image synthesizer over a whole [`AnalysisResult`].
#[derive(Clone)]
pub struct ImageFanout {
    synthesizer: ImageSynthesizer,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl ImageFanout {
    pub fn new(synthesizer: ImageSynthesizer, config: &PipelineConfig) -> Self {
        Self {
            synthesizer,
            concurrency: config.concurrency,
            progress: config.progress_callback.clone(),
        }
    }

    pub fn synthesizer(&self) -> &ImageSynthesizer {
        &self.synthesizer
    }

    pub(crate) fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    /// Populate `image_asset` for every figure variation with a directive.
    ///
    /// Never fails. Resolves only after every scheduled request settled.
    pub async fn enrich(&self, mut result: AnalysisResult) -> AnalysisResult {
        let jobs = stream::directive_jobs(&result);
        let requested = jobs.len();
        if requested == 0 {
            return result;
        }

        let start = Instant::now();
        let mut outcomes = stream::outcomes(
            jobs,
            &self.synthesizer,
            self.concurrency,
            self.progress.clone(),
        );

        let mut attached = 0usize;
        while let Some(outcome) = outcomes.next().await {
            match outcome.result {
                Ok(asset) => {
                    if let Some(ref cb) = self.progress {
                        cb.on_image_complete(outcome.slot, requested, asset.data.len());
                    }
                    if let Some(unit) = result.variation_mut(outcome.slot) {
                        unit.image_asset = Some(asset);
                        attached += 1;
                    }
                }
                Err(e) => {
                    warn!("Diagram for {} skipped: {}", outcome.slot, e);
                    if let Some(ref cb) = self.progress {
                        cb.on_image_error(outcome.slot, requested, &e.to_string());
                    }
                }
            }
        }

        info!(
            "Imaging: {}/{} diagrams attached in {:?}",
            attached,
            requested,
            start.elapsed()
        );
        if let Some(ref cb) = self.progress {
            cb.on_imaging_complete(requested, attached);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SynthesisBackend, SynthesisRequest};
    use crate::error::SynthesisError;
    use crate::model::{ImageAsset, ProblemSet, ProblemUnit, UnitSlot};
    use crate::progress::PipelineProgressCallback;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use futures::future::BoxFuture;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Draws a 1-pixel-high PNG as wide as the number after `w=`; fails on "fail".
    struct ByDirective;

    impl SynthesisBackend for ByDirective {
        fn synthesize<'a>(
            &'a self,
            request: &'a SynthesisRequest,
        ) -> BoxFuture<'a, Result<ImageAsset, SynthesisError>> {
            Box::pin(async move {
                if request.prompt.contains("fail") {
                    return Err(SynthesisError::Backend { message: "boom".into() });
                }
                let width: u32 = request
                    .prompt
                    .rsplit("w=")
                    .next()
                    .and_then(|n| n.trim().parse().ok())
                    .unwrap_or(1);
                let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                    width,
                    1,
                    Rgba([0, 0, 0, 255]),
                ));
                let mut buf = Vec::new();
                img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
                Ok(ImageAsset::new(STANDARD.encode(buf), "image/png"))
            })
        }
    }

    #[derive(Default)]
    struct Counts {
        complete: AtomicUsize,
        errors: AtomicUsize,
        attached: AtomicUsize,
    }

    impl PipelineProgressCallback for Counts {
        fn on_image_complete(&self, _slot: UnitSlot, _total: usize, _bytes: usize) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }
        fn on_image_error(&self, _slot: UnitSlot, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_imaging_complete(&self, _requested: usize, attached: usize) {
            self.attached.store(attached, Ordering::SeqCst);
        }
    }

    fn fanout(progress: Option<ProgressCallback>) -> ImageFanout {
        let mut builder = PipelineConfig::builder().concurrency(2);
        if let Some(cb) = progress {
            builder = builder.progress_callback(cb);
        }
        let config = builder.build().unwrap();
        ImageFanout::new(ImageSynthesizer::new(Arc::new(ByDirective), &config), &config)
    }

    fn figure_set(directives: &[&str]) -> ProblemSet {
        ProblemSet {
            id: 1,
            has_figure: true,
            original: ProblemUnit::new("o", "a"),
            variations: directives
                .iter()
                .map(|d| ProblemUnit::new("v", "a").with_directive(*d))
                .collect(),
        }
    }

    #[tokio::test]
    async fn each_outcome_lands_in_its_own_slot() {
        let input = AnalysisResult {
            problems: vec![figure_set(&["w=3", "fail", "w=5"])],
        };
        let counts = Arc::new(Counts::default());
        let out = fanout(Some(counts.clone() as ProgressCallback)).enrich(input.clone()).await;

        let vars = &out.problems[0].variations;
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[0].image_asset.as_ref().and_then(|a| a.width), Some(3));
        assert!(vars[1].image_asset.is_none());
        assert_eq!(vars[2].image_asset.as_ref().and_then(|a| a.width), Some(5));
        assert!(out.problems[0].original.image_asset.is_none());
        assert_eq!(vars[1], input.problems[0].variations[1]);

        assert_eq!(counts.complete.load(Ordering::SeqCst), 2);
        assert_eq!(counts.errors.load(Ordering::SeqCst), 1);
        assert_eq!(counts.attached.load(Ordering::SeqCst), 2);
    }

    /// Tracks the peak number of requests in flight.
    #[derive(Default)]
    struct Peak {
        live: AtomicUsize,
        max: AtomicUsize,
    }

    impl SynthesisBackend for Peak {
        fn synthesize<'a>(
            &'a self,
            request: &'a SynthesisRequest,
        ) -> BoxFuture<'a, Result<ImageAsset, SynthesisError>> {
            Box::pin(async move {
                let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.live.fetch_sub(1, Ordering::SeqCst);
                ByDirective.synthesize(request).await
            })
        }
    }

    #[tokio::test]
    async fn in_flight_requests_respect_the_cap() {
        let backend = Arc::new(Peak::default());
        let config = PipelineConfig::builder().concurrency(2).build().unwrap();
        let fanout = ImageFanout::new(ImageSynthesizer::new(backend.clone(), &config), &config);
        let input = AnalysisResult {
            problems: vec![figure_set(&["w=1", "w=2", "w=3", "w=4", "w=5"])],
        };

        let out = fanout.enrich(input).await;
        assert_eq!(out.image_count(), 5);
        assert_eq!(backend.max.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn figureless_result_passes_through() {
        let mut set = figure_set(&["w=2"]);
        set.has_figure = false;
        let input = AnalysisResult { problems: vec![set] };
        let out = fanout(None).enrich(input.clone()).await;
        assert_eq!(out, input);
    }
}
