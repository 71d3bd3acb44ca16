//! Diagram generation through the Gemini `generateContent` REST endpoint.
//!
//! `edgequake-llm` covers chat completions only, so image generation goes
//! straight to the HTTP API with `reqwest`. The request asks for an image
//! response modality and passes the aspect-ratio hint; the answer carries
//! the picture as base64 `inlineData` in one of the candidate parts.

use super::{SynthesisBackend, SynthesisRequest};
use crate::error::SynthesisError;
use crate::model::ImageAsset;
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// [`SynthesisBackend`] that calls a Gemini image model.
#[derive(Clone)]
pub struct GeminiImageBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiImageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiImageBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiImageBackend {
    /// Build a backend. `timeout_secs` bounds each HTTP exchange.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Read the API key from `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn api_key_from_env() -> Option<String> {
        ["GEMINI_API_KEY", "GOOGLE_API_KEY"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|key| !key.is_empty())
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }

    async fn request(&self, request: &SynthesisRequest) -> Result<ImageAsset, SynthesisError> {
        let body = serde_json::to_vec(&GenerateRequest::new(request)).map_err(|e| {
            SynthesisError::Backend {
                message: format!("request encoding: {e}"),
            }
        })?;

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SynthesisError::Backend {
                message: e.to_string(),
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| SynthesisError::Backend {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let snippet: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
            return Err(SynthesisError::Backend {
                message: format!("HTTP {status}: {snippet}"),
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_slice(&bytes).map_err(|e| SynthesisError::Backend {
                message: format!("response decoding: {e}"),
            })?;

        let image = parsed.first_image().ok_or(SynthesisError::NoImage)?;
        debug!("Gemini returned {} ({} base64 bytes)", image.mime_type, image.data.len());
        Ok(ImageAsset::new(image.data, image.mime_type))
    }
}

impl SynthesisBackend for GeminiImageBackend {
    fn synthesize<'a>(
        &'a self,
        request: &'a SynthesisRequest,
    ) -> BoxFuture<'a, Result<ImageAsset, SynthesisError>> {
        Box::pin(self.request(request))
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

impl<'a> GenerateRequest<'a> {
    fn new(request: &'a SynthesisRequest) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![TextPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE"],
                image_config: ImageConfig {
                    aspect_ratio: &request.aspect_ratio,
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: Vec<&'static str>,
    image_config: ImageConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig<'a> {
    aspect_ratio: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateResponse {
    /// First non-empty inline image across all candidates.
    fn first_image(self) -> Option<InlineData> {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.inline_data)
            .find(|d| !d.data.is_empty())
    }
}
