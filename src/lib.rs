//! # mathvariant
//!
//! Turn a photo of math problems into practice sets: every problem is
//! transcribed, solved, and re-issued as several numerically distinct
//! variations, each with its own freshly drawn diagram when the original
//! depends on a figure.
//!
//! ## Why this crate?
//!
//! Copying a problem and changing its numbers by hand is slow, and doing it
//! carelessly produces triangles that cannot exist or logarithms of negative
//! numbers. A vision model reads the photo and writes the variations in one
//! structured call; an image model then draws a separate figure for every
//! variation, so a figure never shows another variation's values.
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo
//!  │
//!  ├─ 1. Intake    local file or URL → bytes (PNG/JPEG)
//!  ├─ 2. Encode    downscale oversized photos, base64
//!  ├─ 3. Extract   one structured VLM call: problems + variations + directives
//!  ├─ 4. Polish    strip fences, normalise math delimiters, validate rules
//!  ├─ 5. Fan-out   one diagram request per figure variation, all concurrent
//!  └─ 6. Result    AnalysisResult tree (JSON or Markdown worksheet)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mathvariant::{analyze_file, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = PipelineConfig::default();
//!     let result = analyze_file("homework.jpg", &config).await?;
//!     println!("{}", mathvariant::sheet::worksheet(&result, &Default::default()));
//!     Ok(())
//! }
//! ```
//!
//! For interactive front-ends, [`PipelineDriver`] exposes the pipeline as an
//! observable state machine where a new photo cancels the one in flight.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mathvariant` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mathvariant = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod backend;
pub mod config;
pub mod contract;
pub mod driver;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod sheet;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_file, analyze_sync, analyze_to_file, analyze_with_backends};
pub use backend::{
    DisabledSynthesisBackend, ExtractionBackend, ExtractionRequest, ExtractionResponse,
    GeminiImageBackend, LlmExtractionBackend, SynthesisBackend, SynthesisRequest,
};
pub use config::{PipelineConfig, PipelineConfigBuilder, ValidationPolicy};
pub use driver::{DriverState, Phase, PhaseStream, PipelineDriver, SubmissionOutcome};
pub use error::{ExtractionError, MathVariantError, SynthesisError};
pub use model::{AnalysisResult, ImageAsset, ProblemSet, ProblemUnit, SourceImage, UnitSlot};
pub use pipeline::extract::ProblemExtractor;
pub use pipeline::fanout::ImageFanout;
pub use pipeline::synthesize::ImageSynthesizer;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use stream::{image_stream, ImageOutcome, ImageStream};
