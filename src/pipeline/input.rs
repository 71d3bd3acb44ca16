//! Image intake: turn a user-supplied path or URL into image bytes.
//!
//! The pipeline itself only ever sees bytes. This module is the file-intake
//! collaborator used by [`crate::analyze::analyze_file`] and the CLI. The
//! PNG/JPEG magic bytes are checked here so a mistyped path to a PDF or a
//! HTML error page fails with a readable message before any backend call.

use crate::error::MathVariantError;
use std::path::PathBuf;
use tracing::{debug, info};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Image bytes plus where they came from (for messages and logs).
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub source_name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read the image at `input`, downloading it first when it is a URL.
pub async fn read_input(input: &str, timeout_secs: u64) -> Result<ImageInput, MathVariantError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(MathVariantError::InvalidInput {
            input: input.to_string(),
        });
    }
    let image = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_magic(&image.source_name, &image.bytes)?;
    Ok(image)
}

/// Accept PNG and JPEG only.
pub fn check_magic(source_name: &str, bytes: &[u8]) -> Result<(), MathVariantError> {
    if bytes.starts_with(PNG_MAGIC) || bytes.starts_with(JPEG_MAGIC) {
        return Ok(());
    }
    Err(MathVariantError::UnsupportedImage {
        source_name: source_name.to_string(),
        magic: bytes.iter().take(8).copied().collect(),
    })
}

async fn read_local(path_str: &str) -> Result<ImageInput, MathVariantError> {
    let path = PathBuf::from(path_str);

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(ImageInput {
                source_name: path.display().to_string(),
                bytes,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(MathVariantError::PermissionDenied { path })
        }
        Err(_) => Err(MathVariantError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ImageInput, MathVariantError> {
    info!("Downloading image from: {}", url);

    if reqwest::Url::parse(url).is_err() {
        return Err(MathVariantError::InvalidInput {
            input: url.to_string(),
        });
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| MathVariantError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            MathVariantError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            MathVariantError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(MathVariantError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| MathVariantError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(ImageInput {
        source_name: url.to_string(),
        bytes: bytes.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/worksheet.png"));
        assert!(is_url("http://example.com/worksheet.jpg"));
        assert!(!is_url("/tmp/worksheet.png"));
        assert!(!is_url("worksheet.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_magic_bytes() {
        assert!(check_magic("a.png", b"\x89PNG\r\n\x1a\n....").is_ok());
        assert!(check_magic("a.jpg", &[0xFF, 0xD8, 0xFF, 0xE0]).is_ok());
        match check_magic("a.pdf", b"%PDF-1.7") {
            Err(MathVariantError::UnsupportedImage { magic, .. }) => {
                assert_eq!(magic, b"%PDF-1.7".to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = read_input("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, MathVariantError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_local_file_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"\x89PNG\r\n\x1a\nrest").unwrap();
        let image = read_input(tmp.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(image.bytes.len(), 12);
    }

    #[tokio::test]
    async fn test_local_non_image_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let err = read_input(tmp.path().to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, MathVariantError::UnsupportedImage { .. }));
    }
}
