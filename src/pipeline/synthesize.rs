//! The image synthesizer: one directive in, one diagram (or nothing) out.
//!
//! A missing diagram is a degraded but valid outcome. Every failure (backend
//! error, timeout, empty or undecodable payload) is caught here and mapped
//! to `None` by [`ImageSynthesizer::synthesize`]; the fallible
//! [`ImageSynthesizer::try_synthesize`] exists only so the fan-out can log
//! and report why a slot stayed empty.

use crate::backend::{SynthesisBackend, SynthesisRequest};
use crate::config::PipelineConfig;
use crate::error::SynthesisError;
use crate::model::ImageAsset;
use crate::prompts::diagram_prompt;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Wraps directives in the house style and calls the image backend.
#[derive(Clone)]
pub struct ImageSynthesizer {
    backend: Arc<dyn SynthesisBackend>,
    preamble: String,
    aspect_ratio: String,
    timeout_secs: u64,
}

impl ImageSynthesizer {
    pub fn new(backend: Arc<dyn SynthesisBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            preamble: config.style_preamble().to_string(),
            aspect_ratio: config.aspect_ratio.clone(),
            timeout_secs: config.image_timeout_secs,
        }
    }

    /// Generate the diagram for `directive`; `None` on any failure.
    pub async fn synthesize(&self, directive: &str) -> Option<ImageAsset> {
        match self.try_synthesize(directive).await {
            Ok(asset) => Some(asset),
            Err(e) => {
                warn!("Diagram skipped: {}", e);
                None
            }
        }
    }

    /// Generate the diagram for `directive`, reporting why it failed.
    pub async fn try_synthesize(&self, directive: &str) -> Result<ImageAsset, SynthesisError> {
        if directive.trim().is_empty() {
            return Err(SynthesisError::EmptyDirective);
        }

        let request = SynthesisRequest {
            prompt: diagram_prompt(&self.preamble, directive),
            aspect_ratio: self.aspect_ratio.clone(),
        };

        let asset = timeout(
            Duration::from_secs(self.timeout_secs),
            self.backend.synthesize(&request),
        )
        .await
        .map_err(|_| SynthesisError::Timeout {
            secs: self.timeout_secs,
        })??;

        inspect_asset(asset)
    }
}

/// Check that the payload is a real image and record its dimensions.
fn inspect_asset(mut asset: ImageAsset) -> Result<ImageAsset, SynthesisError> {
    if asset.data.trim().is_empty() {
        return Err(SynthesisError::NoImage);
    }

    let bytes = STANDARD
        .decode(asset.data.trim())
        .map_err(|e| SynthesisError::UndecodableImage {
            detail: format!("base64: {e}"),
        })?;

    let reader = image::ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(|e| SynthesisError::UndecodableImage {
            detail: e.to_string(),
        })?;
    let format = reader.format().ok_or_else(|| SynthesisError::UndecodableImage {
        detail: "unknown image format".to_string(),
    })?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| SynthesisError::UndecodableImage {
            detail: e.to_string(),
        })?;

    debug!("Diagram {}x{} ({} bytes, {:?})", width, height, bytes.len(), format);

    if asset.mime_type.trim().is_empty() {
        asset.mime_type = format.to_mime_type().to_string();
    }
    asset.data = asset.data.trim().to_string();
    asset.width = Some(width);
    asset.height = Some(height);
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::sync::Mutex;

    fn png_b64(w: u32, h: u32) -> String {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        STANDARD.encode(buf)
    }

    struct Fixed {
        reply: Result<ImageAsset, SynthesisError>,
        seen: Mutex<Vec<SynthesisRequest>>,
    }

    impl SynthesisBackend for Fixed {
        fn synthesize<'a>(
            &'a self,
            request: &'a SynthesisRequest,
        ) -> BoxFuture<'a, Result<ImageAsset, SynthesisError>> {
            self.seen.lock().unwrap().push(request.clone());
            let reply = self.reply.clone();
            Box::pin(async move { reply })
        }
    }

    struct Hanging;

    impl SynthesisBackend for Hanging {
        fn synthesize<'a>(
            &'a self,
            _request: &'a SynthesisRequest,
        ) -> BoxFuture<'a, Result<ImageAsset, SynthesisError>> {
            Box::pin(futures::future::pending())
        }
    }

    fn synthesizer(backend: Arc<dyn SynthesisBackend>) -> ImageSynthesizer {
        let config = PipelineConfig::builder()
            .aspect_ratio("4:3")
            .image_timeout_secs(1)
            .build()
            .unwrap();
        ImageSynthesizer::new(backend, &config)
    }

    #[tokio::test]
    async fn success_records_dimensions_and_wraps_prompt() {
        let backend = Arc::new(Fixed {
            reply: Ok(ImageAsset::new(png_b64(8, 6), "image/png")),
            seen: Mutex::new(Vec::new()),
        });
        let s = synthesizer(backend.clone());
        let asset = s.synthesize("a right triangle with legs 6 and 8").await.unwrap();
        assert_eq!(asset.width, Some(8));
        assert_eq!(asset.height, Some(6));

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].prompt.starts_with("Professional mathematical diagram"));
        assert!(seen[0].prompt.ends_with("legs 6 and 8"));
        assert_eq!(seen[0].aspect_ratio, "4:3");
    }

    #[tokio::test]
    async fn backend_error_becomes_none() {
        let backend = Arc::new(Fixed {
            reply: Err(SynthesisError::Backend { message: "quota".into() }),
            seen: Mutex::new(Vec::new()),
        });
        assert!(synthesizer(backend).synthesize("circle").await.is_none());
    }

    #[tokio::test]
    async fn garbage_payload_is_rejected() {
        let backend = Arc::new(Fixed {
            reply: Ok(ImageAsset::new("bm90IGFuIGltYWdl", "image/png")),
            seen: Mutex::new(Vec::new()),
        });
        let err = synthesizer(backend).try_synthesize("circle").await.unwrap_err();
        assert!(matches!(err, SynthesisError::UndecodableImage { .. }));
    }

    #[tokio::test]
    async fn empty_payload_is_no_image() {
        let backend = Arc::new(Fixed {
            reply: Ok(ImageAsset::new("", "image/png")),
            seen: Mutex::new(Vec::new()),
        });
        let err = synthesizer(backend).try_synthesize("circle").await.unwrap_err();
        assert_eq!(err, SynthesisError::NoImage);
    }

    #[tokio::test]
    async fn blank_directive_never_reaches_backend() {
        let backend = Arc::new(Fixed {
            reply: Ok(ImageAsset::new(png_b64(2, 2), "image/png")),
            seen: Mutex::new(Vec::new()),
        });
        let err = synthesizer(backend.clone()).try_synthesize("  ").await.unwrap_err();
        assert_eq!(err, SynthesisError::EmptyDirective);
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_backend_times_out() {
        let err = synthesizer(Arc::new(Hanging))
            .try_synthesize("circle")
            .await
            .unwrap_err();
        assert_eq!(err, SynthesisError::Timeout { secs: 1 });
    }

    #[tokio::test]
    async fn missing_mime_type_is_filled_in() {
        let backend = Arc::new(Fixed {
            reply: Ok(ImageAsset::new(png_b64(3, 3), "")),
            seen: Mutex::new(Vec::new()),
        });
        let asset = synthesizer(backend).synthesize("square").await.unwrap();
        assert_eq!(asset.mime_type, "image/png");
    }
}
