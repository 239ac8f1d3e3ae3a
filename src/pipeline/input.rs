//! Input loading: normalise a drawing image (file or URL) into a payload.
//!
//! ## Why sniff magic bytes instead of trusting the extension?
//!
//! Drawing exports routinely arrive misnamed (`scan.jpg` that is really a
//! PNG, `.tmp` files from upload pipelines). The extraction service only
//! cares about the actual encoding, so we read the first bytes and decide
//! from those; the extension is never consulted. An unrecognized
//! signature is an [`BomError::UnsupportedFormat`] before any network
//! call is made.

use crate::error::BomError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A drawing image normalised into canonical bytes plus metadata.
///
/// Immutable once created; owned by the pipeline invocation that created
/// it and dropped after extraction completes.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Raw encoded image bytes exactly as read from disk.
    pub bytes: Vec<u8>,
    /// Sniffed MIME type, e.g. `image/png`.
    pub content_type: String,
    /// Path the bytes were read from (the rasterized page file for
    /// PDF-derived payloads).
    pub source_path: PathBuf,
    /// 1-indexed page number for PDF-derived payloads.
    pub page_index: Option<usize>,
    /// Pixel dimensions, read from the image header without a full decode.
    pub width: u32,
    pub height: u32,
}

/// The resolved input — either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; artifact downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing
    /// completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the artifact regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local artifact path.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, BomError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        let path = PathBuf::from(input);
        if !path.exists() {
            return Err(BomError::UnreadableInput {
                path,
                detail: "file not found".into(),
            });
        }
        debug!("Resolved local input: {}", path.display());
        Ok(ResolvedInput::Local(path))
    }
}

/// Load an image file into an [`ImagePayload`].
///
/// `page_index` tags payloads produced from a rasterized PDF page;
/// `source_path` in the payload is always the file actually read.
///
/// # Errors
/// - [`BomError::UnreadableInput`] — file missing, unreadable, or the
///   header cannot be decoded
/// - [`BomError::UnsupportedFormat`] — bytes are not a supported raster
///   encoding
pub fn load(path: &Path, page_index: Option<usize>) -> Result<ImagePayload, BomError> {
    let bytes = std::fs::read(path).map_err(|e| BomError::UnreadableInput {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let content_type = sniff_content_type(&bytes).ok_or_else(|| BomError::UnsupportedFormat {
        path: path.to_path_buf(),
        detail: format!(
            "unrecognized signature: {:02x?}",
            &bytes[..bytes.len().min(8)]
        ),
    })?;

    // Header-only dimension read; a full decode of a 300-DPI A1 sheet
    // would waste tens of MB for two integers.
    let (width, height) =
        image::image_dimensions(path).map_err(|e| BomError::UnreadableInput {
            path: path.to_path_buf(),
            detail: format!("cannot decode image header: {e}"),
        })?;

    debug!(
        "Loaded {} ({}, {}x{}, {} bytes)",
        path.display(),
        content_type,
        width,
        height,
        bytes.len()
    );

    Ok(ImagePayload {
        bytes,
        content_type: content_type.to_string(),
        source_path: path.to_path_buf(),
        page_index,
        width,
        height,
    })
}

/// Identify a supported raster encoding from its leading bytes.
///
/// Returns `None` for anything that is not a raster image we accept —
/// including PDFs, which must go through the rasterization stage first.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else if bytes.starts_with(b"II*\x00") || bytes.starts_with(b"MM\x00*") {
        Some("image/tiff")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Check whether the file is a PDF (magic `%PDF`).
pub fn is_pdf(path: &Path) -> Result<bool, BomError> {
    use std::io::Read;
    let mut f = std::fs::File::open(path).map_err(|e| BomError::UnreadableInput {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut magic = [0u8; 4];
    match f.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"%PDF"),
        Err(_) => Ok(false),
    }
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, BomError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BomError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| BomError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(BomError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);
    let temp_dir = TempDir::new().map_err(|e| BomError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| BomError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| BomError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.bin".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/plan.png"));
        assert!(is_url("http://example.com/plan.png"));
        assert!(!is_url("/tmp/plan.png"));
        assert!(!is_url("plan.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniff_known_signatures() {
        assert_eq!(
            sniff_content_type(b"\x89PNG\r\n\x1a\n....."),
            Some("image/png")
        );
        assert_eq!(sniff_content_type(b"\xff\xd8\xff\xe0..."), Some("image/jpeg"));
        assert_eq!(sniff_content_type(b"GIF89a......"), Some("image/gif"));
        assert_eq!(sniff_content_type(b"BM......"), Some("image/bmp"));
        assert_eq!(sniff_content_type(b"II*\x00...."), Some("image/tiff"));
        assert_eq!(
            sniff_content_type(b"RIFF\x00\x00\x00\x00WEBP"),
            Some("image/webp")
        );
    }

    #[test]
    fn sniff_rejects_pdf_and_text() {
        assert_eq!(sniff_content_type(b"%PDF-1.7"), None);
        assert_eq!(sniff_content_type(b"hello world"), None);
        assert_eq!(sniff_content_type(b""), None);
    }

    #[test]
    fn load_missing_file_is_unreadable() {
        let err = load(Path::new("/definitely/not/here.png"), None).unwrap_err();
        assert!(matches!(err, BomError::UnreadableInput { .. }));
    }

    #[test]
    fn load_unsupported_format() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"not an image at all").unwrap();
        let err = load(f.path(), None).unwrap_err();
        assert!(matches!(err, BomError::UnsupportedFormat { .. }));
    }

    #[test]
    fn load_real_png_payload() {
        use image::{Rgba, RgbaImage};
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.png");
        let img = RgbaImage::from_pixel(8, 6, Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();

        let payload = load(&path, Some(2)).unwrap();
        assert_eq!(payload.content_type, "image/png");
        assert_eq!((payload.width, payload.height), (8, 6));
        assert_eq!(payload.page_index, Some(2));
        assert_eq!(payload.source_path, path);
        assert!(!payload.bytes.is_empty());
    }

    #[test]
    fn pdf_magic_detection() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.4 ...").unwrap();
        assert!(is_pdf(f.path()).unwrap());

        let mut g = tempfile::NamedTempFile::new().unwrap();
        g.write_all(b"\x89PNG\r\n\x1a\n").unwrap();
        assert!(!is_pdf(g.path()).unwrap());
    }

    #[test]
    fn filename_from_url() {
        assert_eq!(
            extract_filename("https://example.com/a/drawing.pdf"),
            "drawing.pdf"
        );
        assert_eq!(extract_filename("https://example.com/"), "downloaded.bin");
    }
}
