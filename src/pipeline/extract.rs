//! The problem extractor: one photo in, one fully-built [`AnalysisResult`] out.
//!
//! All prompt text lives in [`crate::prompts`] and the response shape in
//! [`crate::contract`]; this module only drives the backend call and turns
//! its answer into the data model.
//!
//! ## Retry Strategy
//!
//! A submission makes one backend call. Backend failures, timeouts, empty
//! answers and malformed JSON end the submission with that error; transport
//! retries belong to the backend (see [`crate::backend::LlmExtractionBackend`]).
//! The one exception is [`ValidationPolicy::Reject`]: an answer that breaks
//! the generation rules is asked for again, up to `max_retries` times, with
//! exponential backoff.

use crate::backend::{ExtractionBackend, ExtractionRequest};
use crate::config::{retry_delay, PipelineConfig, ValidationPolicy, MAX_RETRIES};
use crate::contract::{decode_response, extraction_schema};
use crate::error::ExtractionError;
use crate::model::AnalysisResult;
use crate::pipeline::{encode, postprocess, validate};
use crate::progress::ProgressCallback;
use crate::prompts::extraction_prompt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Invokes the extraction backend and builds the problem tree.
#[derive(Clone)]
pub struct ProblemExtractor {
    backend: Arc<dyn ExtractionBackend>,
    instructions: String,
    schema: serde_json::Value,
    max_source_pixels: u32,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
    validation: ValidationPolicy,
    progress: Option<ProgressCallback>,
}

impl ProblemExtractor {
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: &PipelineConfig) -> Self {
        let instructions = config.system_prompt.clone().unwrap_or_else(|| {
            extraction_prompt(config.variations_per_problem, config.language.as_deref())
        });
        Self {
            backend,
            instructions,
            schema: extraction_schema(config.variations_per_problem),
            max_source_pixels: config.max_source_pixels,
            max_retries: config.max_retries.min(MAX_RETRIES),
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
            validation: config.validation,
            progress: config.progress_callback.clone(),
        }
    }

    /// Extract problem sets and their variations from `image_bytes`.
    ///
    /// On success every directive is populated as the model wrote it and
    /// every image asset is absent.
    ///
    /// # Errors
    /// The backend call's [`ExtractionError`], or the last
    /// [`ExtractionError::ConstraintViolation`] once re-asks are exhausted.
    pub async fn extract(&self, image_bytes: &[u8]) -> Result<AnalysisResult, ExtractionError> {
        let start = Instant::now();
        if let Some(ref cb) = self.progress {
            cb.on_extraction_start();
        }

        let request = ExtractionRequest {
            image: encode::prepare_source(image_bytes, self.max_source_pixels)?,
            instructions: self.instructions.clone(),
            schema: self.schema.clone(),
        };

        let mut last_err = ExtractionError::EmptyResponse;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = retry_delay(self.retry_backoff_ms, attempt);
                warn!(
                    "Extraction: asking again {}/{} after {:?}",
                    attempt, self.max_retries, delay
                );
                sleep(delay).await;
            }

            match self.attempt(&request).await {
                Ok(result) => {
                    info!(
                        "Extraction: {} problem sets, {} diagrams requested, {:?}",
                        result.problems.len(),
                        result.directive_slots().len(),
                        start.elapsed()
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_extraction_complete(
                            result.problems.len(),
                            result.directive_slots().len(),
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Extraction: attempt {} failed: {}", attempt + 1, e);
                    if let Some(ref cb) = self.progress {
                        cb.on_extraction_error(attempt + 1, &e.to_string());
                    }
                    let rejected = matches!(e, ExtractionError::ConstraintViolation { .. });
                    last_err = e;
                    if !rejected {
                        break;
                    }
                }
            }
        }

        Err(last_err)
    }

    /// One backend round-trip plus decoding and validation.
    async fn attempt(&self, request: &ExtractionRequest) -> Result<AnalysisResult, ExtractionError> {
        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.backend.extract(request),
        )
        .await
        .map_err(|_| ExtractionError::Timeout {
            secs: self.timeout_secs,
        })??;

        debug!(
            "Extraction: {} input tokens, {} output tokens, {} bytes",
            response.input_tokens,
            response.output_tokens,
            response.content.len()
        );

        let body = postprocess::clean_json_response(&response.content);
        let mut result = decode_response(&body)?;
        postprocess::normalise_result(&mut result);
        self.check(&result)?;
        Ok(result)
    }

    fn check(&self, result: &AnalysisResult) -> Result<(), ExtractionError> {
        if self.validation == ValidationPolicy::Off {
            return Ok(());
        }
        let violations = validate::validate(result);
        if violations.is_empty() {
            return Ok(());
        }
        match self.validation {
            ValidationPolicy::Reject => Err(ExtractionError::ConstraintViolation {
                violations: violations.iter().map(ToString::to_string).collect(),
            }),
            _ => {
                for v in &violations {
                    warn!("Extraction: {}", v);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExtractionResponse;
    use futures::future::BoxFuture;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ExtractionError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, ExtractionError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ExtractionBackend for Scripted {
        fn extract<'a>(
            &'a self,
            _request: &'a ExtractionRequest,
        ) -> BoxFuture<'a, Result<ExtractionResponse, ExtractionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ExtractionError::EmptyResponse));
            Box::pin(async move { next.map(ExtractionResponse::new) })
        }
    }

    fn png() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    fn config(validation: ValidationPolicy, retries: u32) -> PipelineConfig {
        PipelineConfig::builder()
            .max_retries(retries)
            .retry_backoff_ms(1)
            .validation(validation)
            .build()
            .unwrap()
    }

    const GOOD: &str = r#"```json
{"problems": [{"id": 1, "hasFigure": false,
  "original": {"text": "Solve $2x = 4$", "answer": "$x = 2$"},
  "variations": [{"text": "Solve $3y = 9$", "answer": "$y = 3$"}]}]}
```"#;

    const DUPLICATE: &str = r#"{"problems": [{"id": 1, "hasFigure": false,
  "original": {"text": "Solve 2x = 4", "answer": "x = 2"},
  "variations": [{"text": "Solve 2y = 4", "answer": "y = 2"}]}]}"#;

    #[tokio::test]
    async fn fenced_response_is_cleaned_and_normalised() {
        let backend = Scripted::new(vec![Ok(GOOD)]);
        let extractor = ProblemExtractor::new(backend, &config(ValidationPolicy::Warn, 0));
        let result = extractor.extract(&png()).await.unwrap();
        assert_eq!(result.problems[0].original.text, r"Solve \(2x = 4\)");
        assert_eq!(result.problems[0].variations[0].answer, r"\(y = 3\)");
    }

    #[tokio::test]
    async fn malformed_answer_is_sent_once_under_defaults() {
        let backend = Scripted::new(vec![Ok("{\"problems\": [{"), Ok(GOOD)]);
        let extractor = ProblemExtractor::new(backend.clone(), &PipelineConfig::default());
        let err = extractor.extract(&png()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed { .. }), "got {err:?}");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_failure_is_not_resent() {
        let backend = Scripted::new(vec![
            Err(ExtractionError::Backend { message: "503".into() }),
            Ok(GOOD),
        ]);
        let extractor = ProblemExtractor::new(backend.clone(), &config(ValidationPolicy::Reject, 2));
        let err = extractor.extract(&png()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Backend { .. }), "got {err:?}");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_retry_budget_is_capped_without_overflow() {
        let config = PipelineConfig {
            max_retries: 70,
            retry_backoff_ms: 0,
            validation: ValidationPolicy::Reject,
            ..PipelineConfig::default()
        };
        let backend = Scripted::new((0..71).map(|_| Ok(DUPLICATE)).collect());
        let extractor = ProblemExtractor::new(backend.clone(), &config);
        let err = extractor.extract(&png()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::ConstraintViolation { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), MAX_RETRIES as usize + 1);
    }

    #[tokio::test]
    async fn rejected_then_good_succeeds() {
        let backend = Scripted::new(vec![Ok(DUPLICATE), Ok(GOOD)]);
        let extractor = ProblemExtractor::new(backend.clone(), &config(ValidationPolicy::Reject, 1));
        assert!(extractor.extract(&png()).await.is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_image_is_not_sent() {
        let backend = Scripted::new(vec![Ok(GOOD)]);
        let extractor = ProblemExtractor::new(backend.clone(), &config(ValidationPolicy::Warn, 3));
        let err = extractor.extract(b"plain text").await.unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidImage { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reject_policy_retries_then_fails() {
        let backend = Scripted::new(vec![Ok(DUPLICATE), Ok(DUPLICATE)]);
        let extractor = ProblemExtractor::new(backend.clone(), &config(ValidationPolicy::Reject, 1));
        let err = extractor.extract(&png()).await.unwrap_err();
        match err {
            ExtractionError::ConstraintViolation { violations } => {
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("reuses the original's numbers"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn warn_policy_keeps_result() {
        let backend = Scripted::new(vec![Ok(DUPLICATE)]);
        let extractor = ProblemExtractor::new(backend, &config(ValidationPolicy::Warn, 0));
        assert!(extractor.extract(&png()).await.is_ok());
    }

    #[tokio::test]
    async fn custom_system_prompt_replaces_default() {
        let config = PipelineConfig::builder()
            .system_prompt("only this")
            .build()
            .unwrap();
        let extractor = ProblemExtractor::new(Scripted::new(vec![]), &config);
        assert_eq!(extractor.instructions, "only this");
    }
}
