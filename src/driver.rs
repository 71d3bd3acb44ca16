//! The pipeline driver: the observable state machine a UI binds to.
//!
//! ```text
//!            submit                  has figures
//! Idle ──────────────▶ Extracting ──────────────▶ Imaging ──▶ Done
//!  ▲                       │    └──── no figures ─────────────▶ Done
//!  │ reset                 └──── extraction failed ─────────▶ Error
//!  └──────────── (any state; submit restarts at Extracting) ─────┘
//! ```
//!
//! ## Cancellation
//!
//! Every submission takes a fresh generation number. A pipeline only
//! writes its phase if the generation it started with is still current,
//! and the check and the write happen inside one
//! [`watch::Sender::send_if_modified`] call. A superseded pipeline may
//! still finish its backend calls, but its result is dropped and it cannot
//! overwrite the newer submission's state.
//!
//! ## Observing
//!
//! [`PipelineDriver::subscribe`] hands out a `watch` receiver and
//! [`PipelineDriver::phase_stream`] a stream of phases; both always reflect
//! the latest submission only.

use crate::analyze;
use crate::backend::{ExtractionBackend, SynthesisBackend};
use crate::config::PipelineConfig;
use crate::error::MathVariantError;
use crate::model::AnalysisResult;
use crate::pipeline::extract::ProblemExtractor;
use crate::pipeline::fanout::ImageFanout;
use crate::pipeline::synthesize::ImageSynthesizer;
use crate::progress::ProgressCallback;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Where the latest submission currently is.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Phase {
    #[default]
    Idle,
    Extracting,
    Imaging,
    /// Terminal: the finished result, images attached where they succeeded.
    Done(Arc<AnalysisResult>),
    /// Terminal: extraction failed. Carries no problem data.
    Error(String),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done(_) | Phase::Error(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Phase::Extracting | Phase::Imaging)
    }

    pub fn result(&self) -> Option<&Arc<AnalysisResult>> {
        match self {
            Phase::Done(r) => Some(r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Phase::Error(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Extracting => "extracting",
            Phase::Imaging => "imaging",
            Phase::Done(_) => "done",
            Phase::Error(_) => "error",
        }
    }
}

/// The value published to subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverState {
    /// Incremented by every `submit` and `reset`.
    pub generation: u64,
    pub phase: Phase,
}

/// What became of one `submit` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// This submission's terminal phase was published.
    Applied(Phase),
    /// A later `submit` or `reset` took over; nothing was published.
    Superseded,
}

impl SubmissionOutcome {
    pub fn phase(&self) -> Option<&Phase> {
        match self {
            SubmissionOutcome::Applied(p) => Some(p),
            SubmissionOutcome::Superseded => None,
        }
    }
}

/// A boxed stream of phases.
pub type PhaseStream = Pin<Box<dyn Stream<Item = Phase> + Send>>;

/// Sequences extraction and imaging for one image at a time.
///
/// Cheap to clone; clones share state, so one clone can `submit` while
/// another observes or submits again.
#[derive(Clone)]
pub struct PipelineDriver {
    extractor: ProblemExtractor,
    fanout: ImageFanout,
    state: Arc<watch::Sender<DriverState>>,
    progress: Option<ProgressCallback>,
}

impl PipelineDriver {
    /// Build a driver over explicit backends.
    pub fn new(
        extraction: Arc<dyn ExtractionBackend>,
        synthesis: Arc<dyn SynthesisBackend>,
        config: &PipelineConfig,
    ) -> Self {
        let extractor = ProblemExtractor::new(extraction, config);
        let fanout = ImageFanout::new(ImageSynthesizer::new(synthesis, config), config);
        Self::from_stages(extractor, fanout)
    }

    /// Build a driver whose backends are resolved from `config` and the environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, MathVariantError> {
        let (extractor, fanout) = analyze::build_stages(config)?;
        Ok(Self::from_stages(extractor, fanout))
    }

    /// Build a driver from prepared stages. Phase events go to the
    /// fan-out's progress callback.
    pub fn from_stages(extractor: ProblemExtractor, fanout: ImageFanout) -> Self {
        let (tx, _rx) = watch::channel(DriverState::default());
        let progress = fanout.progress().cloned();
        Self {
            extractor,
            fanout,
            state: Arc::new(tx),
            progress,
        }
    }

    /// Run the whole pipeline for `image_bytes`.
    ///
    /// Any earlier submission is invalidated the moment this is called;
    /// its result is discarded whenever it settles.
    pub async fn submit(&self, image_bytes: &[u8]) -> SubmissionOutcome {
        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            s.phase = Phase::Extracting;
            generation = s.generation;
        });
        self.notify(generation, Phase::Extracting.label());
        info!("Submission #{}: extracting", generation);

        let result = match self.extractor.extract(image_bytes).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Submission #{}: extraction failed: {}", generation, e);
                return self.finish(generation, Phase::Error(e.to_string()));
            }
        };

        if !result.needs_images() {
            return self.finish(generation, Phase::Done(Arc::new(result)));
        }

        if !self.publish(generation, Phase::Imaging) {
            debug!("Submission #{} superseded before imaging", generation);
            return SubmissionOutcome::Superseded;
        }

        let enriched = self.fanout.enrich(result).await;
        self.finish(generation, Phase::Done(Arc::new(enriched)))
    }

    /// Invalidate any in-flight submission and return to `Idle`.
    pub fn reset(&self) {
        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            s.phase = Phase::Idle;
            generation = s.generation;
        });
        self.notify(generation, Phase::Idle.label());
    }

    /// Snapshot of the current phase.
    pub fn current(&self) -> Phase {
        self.state.borrow().phase.clone()
    }

    /// Snapshot of the current state, generation included.
    pub fn state(&self) -> DriverState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Current phase first, then every change.
    pub fn phase_stream(&self) -> PhaseStream {
        Box::pin(WatchStream::new(self.state.subscribe()).map(|s| s.phase))
    }

    pub fn extractor(&self) -> &ProblemExtractor {
        &self.extractor
    }

    pub fn fanout(&self) -> &ImageFanout {
        &self.fanout
    }

    /// Write `phase` only if `generation` is still current.
    fn publish(&self, generation: u64, phase: Phase) -> bool {
        let label = phase.label();
        let applied = self.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            s.phase = phase;
            true
        });
        if applied {
            self.notify(generation, label);
        }
        applied
    }

    fn notify(&self, generation: u64, label: &str) {
        if let Some(ref cb) = self.progress {
            cb.on_phase(generation, label);
        }
    }

    fn finish(&self, generation: u64, phase: Phase) -> SubmissionOutcome {
        if self.publish(generation, phase.clone()) {
            info!("Submission #{}: {}", generation, phase.label());
            SubmissionOutcome::Applied(phase)
        } else {
            debug!("Submission #{} superseded; result dropped", generation);
            SubmissionOutcome::Superseded
        }
    }
}

impl std::fmt::Debug for PipelineDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDriver")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DisabledSynthesisBackend, ExtractionRequest, ExtractionResponse};
    use crate::error::ExtractionError;
    use futures::future::BoxFuture;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    struct Reply(&'static str);

    impl ExtractionBackend for Reply {
        fn extract<'a>(
            &'a self,
            _request: &'a ExtractionRequest,
        ) -> BoxFuture<'a, Result<ExtractionResponse, ExtractionError>> {
            let body = self.0;
            Box::pin(async move { Ok(ExtractionResponse::new(body)) })
        }
    }

    const TEXT_ONLY: &str = r#"{"problems": [{"id": 1, "hasFigure": false,
        "original": {"text": "2+2", "answer": "4"},
        "variations": [{"text": "3+5", "answer": "8"}]}]}"#;

    fn png() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn driver(body: &'static str) -> PipelineDriver {
        let config = PipelineConfig::builder().max_retries(0).build().unwrap();
        PipelineDriver::new(Arc::new(Reply(body)), Arc::new(DisabledSynthesisBackend), &config)
    }

    #[test]
    fn starts_idle() {
        let d = driver(TEXT_ONLY);
        assert_eq!(d.current(), Phase::Idle);
        assert_eq!(d.state().generation, 0);
    }

    #[tokio::test]
    async fn phase_stream_sees_extracting_then_done() {
        let d = driver(TEXT_ONLY);
        let mut phases = d.phase_stream();
        assert_eq!(phases.next().await, Some(Phase::Idle));

        let outcome = d.submit(&png()).await;
        assert!(matches!(outcome, SubmissionOutcome::Applied(Phase::Done(_))));
        // watch coalesces: only the latest value is guaranteed to be seen
        let last = phases.next().await.unwrap();
        assert!(matches!(last, Phase::Done(_)));
    }

    #[tokio::test]
    async fn reset_returns_to_idle_and_bumps_generation() {
        let d = driver(TEXT_ONLY);
        d.submit(&png()).await;
        let before = d.state().generation;
        d.reset();
        assert_eq!(d.current(), Phase::Idle);
        assert_eq!(d.state().generation, before + 1);
    }

    #[tokio::test]
    async fn error_phase_carries_only_a_message() {
        let d = driver("garbage");
        let outcome = d.submit(&png()).await;
        let phase = outcome.phase().cloned().unwrap();
        assert!(phase.result().is_none());
        assert!(!phase.error().unwrap().is_empty());
        assert_eq!(d.current(), phase);
    }
}
