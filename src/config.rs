//! Configuration for the extraction-and-imaging pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share a config between the driver, the extractor and the
//! fan-out, and to log it when two runs behave differently.

use crate::error::MathVariantError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for one pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use mathvariant::{PipelineConfig, ValidationPolicy};
///
/// let config = PipelineConfig::builder()
///     .variations_per_problem(4)
///     .language("Traditional Chinese")
///     .validation(ValidationPolicy::Reject)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Extraction model identifier, e.g. "gemini-2.5-flash", "gpt-4.1".
    /// If None, a per-provider default is used.
    pub model: Option<String>,

    /// Extraction provider name (e.g. "gemini", "openai", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed extraction provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for extraction. Default: 0.4.
    ///
    /// Transcription wants a low temperature, variation wants a higher
    /// one; 0.4 keeps transcription faithful while still spreading the
    /// generated values apart.
    pub temperature: f32,

    /// Maximum tokens the model may generate for the whole answer. Default: 8192.
    ///
    /// A photo with six problems and three variations each easily exceeds
    /// 4 000 tokens once directives are included. Too low a limit truncates
    /// the JSON and surfaces as a malformed response.
    pub max_tokens: usize,

    /// Variations generated for each problem. Range: 1–10. Default: 3.
    pub variations_per_problem: usize,

    /// Output language for texts and answers. `None` keeps the photo's language.
    pub language: Option<String>,

    /// Retry budget for extraction. Default: 2. Capped at [`MAX_RETRIES`].
    ///
    /// The LLM backend spends it on failed provider calls. The extractor
    /// spends it only on re-asking after [`ValidationPolicy::Reject`]
    /// turned an answer down; malformed or empty answers are never re-sent.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff, see [`retry_delay`]). Default: 500.
    pub retry_backoff_ms: u64,

    /// Timeout for one extraction request in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Timeout for one diagram request in seconds. Default: 90.
    pub image_timeout_secs: u64,

    /// Longest edge, in pixels, of the photo sent for extraction. Default: 2048.
    ///
    /// Phone photos are routinely 4000 px or more. Larger images cost more
    /// tokens without improving transcription of printed text.
    pub max_source_pixels: u32,

    /// Generate diagrams for figure problems. Default: true.
    pub images_enabled: bool,

    /// Image-generation model. Default: "gemini-2.5-flash-image".
    pub image_model: String,

    /// API key for the image backend. Falls back to `GEMINI_API_KEY` / `GOOGLE_API_KEY`.
    pub image_api_key: Option<String>,

    /// Base URL of the image backend. Default: the public Generative Language API.
    pub image_endpoint: String,

    /// Aspect-ratio hint sent with every diagram request. Default: "1:1".
    pub aspect_ratio: String,

    /// Custom diagram style preamble. If None, uses the built-in exam style.
    pub style_preamble: Option<String>,

    /// Maximum diagram requests in flight at once. Default: 10.
    ///
    /// The join still waits for every request; the cap only keeps a photo
    /// with many figure problems from tripping provider rate limits.
    pub concurrency: usize,

    /// What to do with semantically invalid extraction output. Default: [`ValidationPolicy::Warn`].
    pub validation: ValidationPolicy,

    /// Custom extraction instructions. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.4,
            max_tokens: 8192,
            variations_per_problem: 3,
            language: None,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            image_timeout_secs: 90,
            max_source_pixels: 2048,
            images_enabled: true,
            image_model: "gemini-2.5-flash-image".to_string(),
            image_api_key: None,
            image_endpoint: "https://generativelanguage.googleapis.com".to_string(),
            aspect_ratio: "1:1".to_string(),
            style_preamble: None,
            concurrency: 10,
            validation: ValidationPolicy::default(),
            system_prompt: None,
            download_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("variations_per_problem", &self.variations_per_problem)
            .field("language", &self.language)
            .field("max_retries", &self.max_retries)
            .field("images_enabled", &self.images_enabled)
            .field("image_model", &self.image_model)
            .field("image_api_key", &self.image_api_key.as_ref().map(|_| "<redacted>"))
            .field("aspect_ratio", &self.aspect_ratio)
            .field("concurrency", &self.concurrency)
            .field("validation", &self.validation)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The diagram preamble in effect.
    pub fn style_preamble(&self) -> &str {
        self.style_preamble
            .as_deref()
            .unwrap_or(crate::prompts::DIAGRAM_STYLE_PREAMBLE)
    }
}

/// Upper bound accepted by [`PipelineConfigBuilder::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Longest single backoff sleep.
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Delay before retry `attempt` (1-based): `base_ms * 2^(attempt - 1)`,
/// saturating and capped at [`MAX_RETRY_DELAY_MS`].
pub fn retry_delay(base_ms: u64, attempt: u32) -> std::time::Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    std::time::Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn variations_per_problem(mut self, n: usize) -> Self {
        self.config.variations_per_problem = n;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = Some(language.into());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_timeout_secs = secs;
        self
    }

    pub fn max_source_pixels(mut self, px: u32) -> Self {
        self.config.max_source_pixels = px.max(256);
        self
    }

    pub fn images_enabled(mut self, v: bool) -> Self {
        self.config.images_enabled = v;
        self
    }

    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.config.image_model = model.into();
        self
    }

    pub fn image_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.image_api_key = Some(key.into());
        self
    }

    pub fn image_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.image_endpoint = url.into();
        self
    }

    pub fn aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.config.aspect_ratio = ratio.into();
        self
    }

    pub fn style_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.config.style_preamble = Some(preamble.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn validation(mut self, policy: ValidationPolicy) -> Self {
        self.config.validation = policy;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, MathVariantError> {
        let c = &self.config;
        if c.variations_per_problem == 0 || c.variations_per_problem > 10 {
            return Err(MathVariantError::InvalidConfig(format!(
                "variations per problem must be 1–10, got {}",
                c.variations_per_problem
            )));
        }
        if c.api_timeout_secs == 0 || c.image_timeout_secs == 0 {
            return Err(MathVariantError::InvalidConfig(
                "timeouts must be at least one second".into(),
            ));
        }
        if !is_aspect_ratio(&c.aspect_ratio) {
            return Err(MathVariantError::InvalidConfig(format!(
                "aspect ratio must look like W:H, got '{}'",
                c.aspect_ratio
            )));
        }
        Ok(self.config)
    }
}

fn is_aspect_ratio(s: &str) -> bool {
    match s.split_once(':') {
        Some((w, h)) => {
            matches!(w.parse::<u32>(), Ok(n) if n > 0) && matches!(h.parse::<u32>(), Ok(n) if n > 0)
        }
        None => false,
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the extractor does when decoded output breaks a generation rule
/// (duplicate numbers, shared directives, empty answers …).
///
/// | Policy | Behaviour |
/// |--------|-----------|
/// | `Off`    | No checks |
/// | `Warn`   | Log every violation, keep the result (default) |
/// | `Reject` | Treat violations as a failed answer; asked again within `max_retries` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationPolicy {
    Off,
    #[default]
    Warn,
    Reject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.variations_per_problem, 3);
        assert_eq!(config.aspect_ratio, "1:1");
        assert_eq!(config.validation, ValidationPolicy::Warn);
        assert!(config.images_enabled);
    }

    #[test]
    fn rejects_out_of_range_variations() {
        assert!(PipelineConfig::builder()
            .variations_per_problem(0)
            .build()
            .is_err());
        assert!(PipelineConfig::builder()
            .variations_per_problem(11)
            .build()
            .is_err());
    }

    #[test]
    fn rejects_bad_aspect_ratio() {
        let err = PipelineConfig::builder()
            .aspect_ratio("square")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("square"));
        assert!(PipelineConfig::builder().aspect_ratio("16:9").build().is_ok());
        assert!(PipelineConfig::builder().aspect_ratio("0:9").build().is_err());
    }

    #[test]
    fn retry_budget_is_capped() {
        let config = PipelineConfig::builder().max_retries(70).build().unwrap();
        assert_eq!(config.max_retries, MAX_RETRIES);
    }

    #[test]
    fn retry_delay_doubles_then_saturates() {
        use std::time::Duration;
        assert_eq!(retry_delay(500, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(500, 3), Duration::from_millis(2000));
        assert_eq!(retry_delay(0, 70), Duration::ZERO);
        assert_eq!(
            retry_delay(u64::MAX, u32::MAX),
            Duration::from_millis(MAX_RETRY_DELAY_MS)
        );
    }

    #[test]
    fn setters_clamp() {
        let config = PipelineConfig::builder()
            .concurrency(0)
            .temperature(9.0)
            .max_source_pixels(10)
            .build()
            .unwrap();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.max_source_pixels, 256);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = PipelineConfig::builder()
            .image_api_key("secret-key")
            .build()
            .unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn default_style_preamble() {
        let config = PipelineConfig::default();
        assert!(config.style_preamble().contains("black and white"));
        let custom = PipelineConfig::builder()
            .style_preamble("Pastel sketch: ")
            .build()
            .unwrap();
        assert_eq!(custom.style_preamble(), "Pastel sketch: ");
    }
}
