//! Generative-backend capabilities.
//!
//! The pipeline never talks to an SDK client directly. It sees two narrow
//! capabilities:
//!
//! * [`ExtractionBackend`] — image + instructions + schema → JSON text
//! * [`SynthesisBackend`]  — diagram prompt + aspect ratio → image payload
//!
//! Production implementations live in [`llm`] (any vision chat model
//! reachable through `edgequake-llm`) and [`gemini`] (Gemini image
//! generation over REST). Tests substitute deterministic fakes.
//!
//! Methods return [`BoxFuture`] so the traits stay object-safe and the
//! pipeline can hold `Arc<dyn …>` the same way it holds an `LLMProvider`.

pub mod gemini;
pub mod llm;

use crate::error::{ExtractionError, SynthesisError};
use crate::model::{ImageAsset, SourceImage};
use futures::future::BoxFuture;

pub use gemini::GeminiImageBackend;
pub use llm::LlmExtractionBackend;

/// Everything one extraction call needs.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub image: SourceImage,
    /// Natural-language instruction set.
    pub instructions: String,
    /// The extraction contract as a JSON schema.
    pub schema: serde_json::Value,
}

/// Raw backend answer for an extraction call.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResponse {
    /// Response body; expected to be JSON conforming to the schema.
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl ExtractionResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Everything one diagram call needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    /// Style preamble followed by the variation's directive.
    pub prompt: String,
    /// Aspect-ratio hint, e.g. "1:1".
    pub aspect_ratio: String,
}

/// Structured extraction from an image.
pub trait ExtractionBackend: Send + Sync {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ExtractionResponse, ExtractionError>>;
}

/// Diagram generation from a text prompt.
pub trait SynthesisBackend: Send + Sync {
    fn synthesize<'a>(
        &'a self,
        request: &'a SynthesisRequest,
    ) -> BoxFuture<'a, Result<ImageAsset, SynthesisError>>;
}

/// Stand-in used when diagrams are switched off or no image key is set.
///
/// Every call settles immediately with [`SynthesisError::Unavailable`], so
/// figure problems come back text-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSynthesisBackend;

impl SynthesisBackend for DisabledSynthesisBackend {
    fn synthesize<'a>(
        &'a self,
        _request: &'a SynthesisRequest,
    ) -> BoxFuture<'a, Result<ImageAsset, SynthesisError>> {
        Box::pin(async { Err(SynthesisError::Unavailable) })
    }
}
