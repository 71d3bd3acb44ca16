//! Extraction through a vision chat model.
//!
//! Any provider `edgequake-llm` can reach (Gemini, OpenAI, Anthropic,
//! Ollama …) works here. Not every provider accepts a response schema, so
//! the schema travels inside the system prompt; the instruction text
//! already tells the model to answer with JSON only.
//!
//! ## Message Layout
//!
//! 1. **System message** — extraction instructions
//! 2. **System message** — the extraction contract, rendered as JSON schema
//! 3. **User message** — the photo as a base64 image attachment
//!
//! Failed provider calls are retried here, with exponential backoff, up to
//! the configured budget. The extractor above sees one call either way.

use super::{ExtractionBackend, ExtractionRequest, ExtractionResponse};
use crate::config::{retry_delay, MAX_RETRIES};
use crate::error::ExtractionError;
use crate::prompts::schema_context;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// [`ExtractionBackend`] backed by an `edgequake-llm` provider.
#[derive(Clone)]
pub struct LlmExtractionBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmExtractionBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
            max_retries: 0,
            retry_backoff_ms: 0,
        }
    }

    /// Retry failed provider calls up to `max_retries` times.
    pub fn with_retries(mut self, max_retries: u32, retry_backoff_ms: u64) -> Self {
        self.max_retries = max_retries.min(MAX_RETRIES);
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    fn build_messages(request: &ExtractionRequest) -> Vec<ChatMessage> {
        // `detail: "high"` keeps small exponents and subscripts legible.
        let image = ImageData::new(request.image.data.clone(), request.image.mime_type.as_str())
            .with_detail("high");
        vec![
            ChatMessage::system(request.instructions.as_str()),
            ChatMessage::system(schema_context(&request.schema)),
            ChatMessage::user_with_images("Extract the problems in this image.", vec![image]),
        ]
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl ExtractionBackend for LlmExtractionBackend {
    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> BoxFuture<'a, Result<ExtractionResponse, ExtractionError>> {
        Box::pin(async move {
            let messages = Self::build_messages(request);
            let options = self.build_options();

            let (messages, options) = (&messages, &options);
            let response = retrying(self.max_retries, self.retry_backoff_ms, || async move {
                self.provider
                    .chat(messages, Some(options))
                    .await
                    .map_err(|e| ExtractionError::Backend {
                        message: e.to_string(),
                    })
            })
            .await?;

            debug!(
                "Extraction: {} input tokens, {} output tokens",
                response.prompt_tokens, response.completion_tokens
            );

            Ok(ExtractionResponse {
                content: response.content,
                input_tokens: response.prompt_tokens,
                output_tokens: response.completion_tokens,
            })
        })
    }
}

/// Run `call` until it succeeds, fails permanently, or the budget is spent.
async fn retrying<T, F, Fut>(
    max_retries: u32,
    backoff_ms: u64,
    mut call: F,
) -> Result<T, ExtractionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExtractionError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                let delay = retry_delay(backoff_ms, attempt);
                warn!(
                    "Extraction: provider call failed ({}), retry {}/{} after {:?}",
                    e, attempt, max_retries, delay
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
