//! Error types for the mathvariant library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`MathVariantError`] — **Fatal** for the one-shot entry points: the
//!   input could not be read, the configuration is invalid, or extraction
//!   failed. Returned as `Err(MathVariantError)` from `analyze*`.
//!
//! * [`ExtractionError`] — **Fatal to one submission**: the backend failed,
//!   returned nothing, or returned data that does not decode against the
//!   extraction contract. The pipeline driver turns it into its `Error`
//!   phase and discards everything else from that submission.
//!
//! * [`SynthesisError`] — **Non-fatal**: a single diagram could not be
//!   generated. It never leaves the image synthesizer as an error; the
//!   affected variation simply has no image. It is still reported through
//!   progress callbacks and [`crate::stream::image_stream`] so callers can
//!   log it.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the one-shot and intake APIs.
#[derive(Debug, Error)]
pub enum MathVariantError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PNG or JPEG image.
    #[error("'{source_name}' is not a supported image (PNG or JPEG)\nFirst bytes: {magic:?}")]
    UnsupportedImage { source_name: String, magic: Vec<u8> },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Extraction failed; no problem data was produced.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of the extraction stage. Fatal to the current submission.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    /// The configured provider could not be constructed (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The submitted bytes could not be prepared for the backend.
    #[error("The submitted image could not be read: {detail}")]
    InvalidImage { detail: String },

    /// The backend call itself failed.
    #[error("Extraction request failed: {message}")]
    Backend { message: String },

    /// The backend call did not settle within the configured timeout.
    #[error("Extraction request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend answered with no content, or with no problem sets.
    #[error("The model returned no problems for this image")]
    EmptyResponse,

    /// The response is not JSON or does not match the extraction contract.
    #[error("The model response does not match the extraction contract: {detail}")]
    Malformed { detail: String },

    /// The response decoded, but failed semantic validation under
    /// [`crate::config::ValidationPolicy::Reject`].
    #[error("The generated variations failed validation: {}", violations.join("; "))]
    ConstraintViolation { violations: Vec<String> },
}

impl ExtractionError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Configuration and input problems are permanent; everything the
    /// backend produced (including bad output) may differ on the next call.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ExtractionError::ProviderNotConfigured { .. } | ExtractionError::InvalidImage { .. }
        )
    }
}

/// A non-fatal failure to produce one diagram.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SynthesisError {
    /// The directive was blank after trimming.
    #[error("image directive is empty")]
    EmptyDirective,

    /// No image backend is configured.
    #[error("image synthesis is not available")]
    Unavailable,

    /// The backend call failed.
    #[error("image request failed: {message}")]
    Backend { message: String },

    /// The backend call did not settle within the configured timeout.
    #[error("image request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend answered without any image payload.
    #[error("the model returned no image")]
    NoImage,

    /// The payload is not a decodable image.
    #[error("the returned image could not be decoded: {detail}")]
    UndecodableImage { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_lists_every_violation() {
        let e = ExtractionError::ConstraintViolation {
            violations: vec!["set 1: a".into(), "set 2: b".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("set 1: a; set 2: b"), "got: {msg}");
    }

    #[test]
    fn extraction_error_is_transparent_inside_fatal_error() {
        let e: MathVariantError = ExtractionError::EmptyResponse.into();
        assert_eq!(e.to_string(), ExtractionError::EmptyResponse.to_string());
    }

    #[test]
    fn permanent_extraction_errors_are_not_retried() {
        assert!(!ExtractionError::InvalidImage {
            detail: "gif".into()
        }
        .is_retryable());
        assert!(!ExtractionError::ProviderNotConfigured {
            provider: "openai".into(),
            hint: "set OPENAI_API_KEY".into()
        }
        .is_retryable());
        assert!(ExtractionError::Malformed {
            detail: "eof".into()
        }
        .is_retryable());
        assert!(ExtractionError::Timeout { secs: 5 }.is_retryable());
    }

    #[test]
    fn timeout_display() {
        let e = SynthesisError::Timeout { secs: 90 };
        assert!(e.to_string().contains("90s"));
    }

    #[test]
    fn unsupported_image_display() {
        let e = MathVariantError::UnsupportedImage {
            source_name: "scan.gif".into(),
            magic: b"GIF8".to_vec(),
        };
        let msg = e.to_string();
        assert!(msg.contains("scan.gif"));
        assert!(msg.contains("PNG or JPEG"));
    }
}
