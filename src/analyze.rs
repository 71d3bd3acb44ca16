//! One-shot entry points and backend resolution.
//!
//! [`analyze`] runs extraction and imaging once and returns the finished
//! [`AnalysisResult`]. Use [`crate::driver::PipelineDriver`] instead when
//! submissions can overlap and only the latest one should win.

use crate::backend::{
    DisabledSynthesisBackend, ExtractionBackend, GeminiImageBackend, LlmExtractionBackend,
    SynthesisBackend,
};
use crate::config::PipelineConfig;
use crate::error::{ExtractionError, MathVariantError};
use crate::model::AnalysisResult;
use crate::pipeline::extract::ProblemExtractor;
use crate::pipeline::fanout::ImageFanout;
use crate::pipeline::input;
use crate::pipeline::synthesize::ImageSynthesizer;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Extract problems from `image_bytes`, generate variations and draw their diagrams.
///
/// # Errors
/// Only extraction can fail; diagrams that could not be drawn are simply absent.
///
/// # Example
/// ```rust,no_run
/// use mathvariant::{analyze, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("homework.jpg")?;
/// let result = analyze(&bytes, &PipelineConfig::default()).await?;
/// for set in &result.problems {
///     println!("{}: {} variations", set.original.text, set.variations.len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn analyze(
    image_bytes: &[u8],
    config: &PipelineConfig,
) -> Result<AnalysisResult, MathVariantError> {
    let (extractor, fanout) = build_stages(config)?;
    run(&extractor, &fanout, image_bytes).await
}

/// Same as [`analyze`], with explicit backends instead of resolved ones.
pub async fn analyze_with_backends(
    image_bytes: &[u8],
    extraction: Arc<dyn ExtractionBackend>,
    synthesis: Arc<dyn SynthesisBackend>,
    config: &PipelineConfig,
) -> Result<AnalysisResult, MathVariantError> {
    let extractor = ProblemExtractor::new(extraction, config);
    let fanout = ImageFanout::new(ImageSynthesizer::new(synthesis, config), config);
    run(&extractor, &fanout, image_bytes).await
}

/// Read a local image or download one, then [`analyze`] it.
pub async fn analyze_file(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<AnalysisResult, MathVariantError> {
    let image = input::read_input(input_str.as_ref(), config.download_timeout_secs).await?;
    info!("Analysing {}", image.source_name);
    analyze(&image.bytes, config).await
}

/// Blocking wrapper around [`analyze`] for non-async callers.
pub fn analyze_sync(
    image_bytes: &[u8],
    config: &PipelineConfig,
) -> Result<AnalysisResult, MathVariantError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MathVariantError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(image_bytes, config))
}

/// [`analyze_file`] and write the result as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn analyze_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<AnalysisResult, MathVariantError> {
    let result = analyze_file(input_str, config).await?;
    let json = serde_json::to_string_pretty(&result)
        .map_err(|e| MathVariantError::Internal(format!("JSON encoding failed: {e}")))?;
    write_atomic(output_path.as_ref(), json.as_bytes()).await?;
    Ok(result)
}

/// Write `contents` to `path` through a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), MathVariantError> {
    let fail = |e| MathVariantError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}

async fn run(
    extractor: &ProblemExtractor,
    fanout: &ImageFanout,
    image_bytes: &[u8],
) -> Result<AnalysisResult, MathVariantError> {
    let result = extractor.extract(image_bytes).await?;
    if !result.needs_images() {
        return Ok(result);
    }
    Ok(fanout.enrich(result).await)
}

// ── Backend resolution ───────────────────────────────────────────────────

/// Build the extractor and the fan-out from `config` and the environment.
pub fn build_stages(
    config: &PipelineConfig,
) -> Result<(ProblemExtractor, ImageFanout), MathVariantError> {
    let provider = resolve_provider(config)?;
    let extraction = Arc::new(
        LlmExtractionBackend::new(provider, config.temperature, config.max_tokens)
            .with_retries(config.max_retries, config.retry_backoff_ms),
    );
    let synthesis = resolve_synthesis_backend(config)?;

    let extractor = ProblemExtractor::new(extraction, config);
    let fanout = ImageFanout::new(ImageSynthesizer::new(synthesis, config), config);
    Ok((extractor, fanout))
}

/// Resolve the extraction provider.
///
/// Precedence: an explicit provider instance, then `provider_name` (+
/// `model`), then `MATHVARIANT_PROVIDER` + `MATHVARIANT_MODEL`, then a
/// Gemini or OpenAI key, then whatever edgequake-llm auto-detects.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, MathVariantError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or_else(|| default_model(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("MATHVARIANT_PROVIDER"),
        std::env::var("MATHVARIANT_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    for (provider, key) in [("gemini", "GEMINI_API_KEY"), ("openai", "OPENAI_API_KEY")] {
        if std::env::var(key).is_ok_and(|v| !v.is_empty()) {
            let model = config.model.as_deref().unwrap_or_else(|| default_model(provider));
            return create_vision_provider(provider, model);
        }
    }

    let (llm_provider, _) = ProviderFactory::from_env().map_err(|e| {
        ExtractionError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider auto-detected: {}\nSet GEMINI_API_KEY or OPENAI_API_KEY, or pass --provider.",
                e
            ),
        }
    })?;

    Ok(llm_provider)
}

/// Extraction model used when a provider is named without a model.
pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "gemini" | "google" => "gemini-2.5-flash",
        "anthropic" => "claude-sonnet-4-20250514",
        "ollama" => "llama3.2-vision",
        _ => "gpt-4.1",
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, MathVariantError> {
    info!("Extraction provider: {} ({})", provider_name, model);
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        MathVariantError::from(ExtractionError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        })
    })
}

/// Resolve the diagram backend.
///
/// Without an image key, figure problems still come back, just text-only.
pub fn resolve_synthesis_backend(
    config: &PipelineConfig,
) -> Result<Arc<dyn SynthesisBackend>, MathVariantError> {
    if !config.images_enabled {
        info!("Diagram generation disabled");
        return Ok(Arc::new(DisabledSynthesisBackend));
    }

    let key = config
        .image_api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(GeminiImageBackend::api_key_from_env);

    let Some(key) = key else {
        warn!("No GEMINI_API_KEY / GOOGLE_API_KEY set; diagrams will be skipped");
        return Ok(Arc::new(DisabledSynthesisBackend));
    };

    let backend = GeminiImageBackend::new(
        config.image_endpoint.clone(),
        config.image_model.clone(),
        key,
        config.image_timeout_secs,
    )
    .map_err(|e| MathVariantError::Internal(format!("HTTP client: {e}")))?;
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_models() {
        assert_eq!(default_model("gemini"), "gemini-2.5-flash");
        assert_eq!(default_model("openai"), "gpt-4.1");
    }

    #[test]
    fn disabled_images_need_no_key() {
        let config = PipelineConfig::builder().images_enabled(false).build().unwrap();
        assert!(resolve_synthesis_backend(&config).is_ok());
    }

    #[tokio::test]
    async fn atomic_write_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");
        write_atomic(&path, b"{}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert!(!dir.path().join("nested").join("out.json.tmp").exists());
    }
}
