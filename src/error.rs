//! Error types for the planbom library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BomError`] — **Fatal**: the invocation cannot proceed at all
//!   (unreadable input on a single-image command, provider not configured,
//!   corrupt store). Returned as `Err(BomError)` from the top-level
//!   pipeline functions.
//!
//! * [`UnitError`] — **Non-fatal**: a single unit (one image, or one page
//!   of a PDF batch) failed while its siblings are fine. Stored inside
//!   [`crate::analyze::UnitReport`] so callers can inspect partial success
//!   rather than losing the whole batch to one bad page.
//!
//! The separation lets callers decide their own tolerance: abort on the
//! first failed unit, log and continue, or collect everything for a
//! post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the planbom library.
///
/// Unit-level failures use [`UnitError`] and are stored in
/// [`crate::analyze::UnitReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BomError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input file cannot be read or decoded.
    #[error("Unreadable input '{}': {detail}", path.display())]
    UnreadableInput { path: PathBuf, detail: String },

    /// The input is readable but is neither a supported raster image nor a
    /// page extracted from a supported document.
    #[error("Unsupported format for '{}': {detail}\nSupported: png, jpeg, gif, bmp, tiff, webp, or a PDF page.", path.display())]
    UnsupportedFormat { path: PathBuf, detail: String },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The external rasterization tool is not installed.
    #[error("Rasterization tool '{tool}' not found.\nInstall poppler-utils and make sure it is on PATH.")]
    RasterToolMissing { tool: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Extraction provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Network- or service-level failure from the extraction service.
    /// Retryable; the client backs off and retries before surfacing this.
    #[error("Extraction service unavailable: {detail}")]
    ServiceUnavailable { detail: String },

    /// The service rejected the payload (invalid request, policy refusal).
    /// Not retryable.
    #[error("Extraction service rejected the request: {detail}")]
    ServiceRejected { detail: String },

    /// The service responded, but not in the expected output shape.
    /// Not retryable.
    #[error("Malformed extraction response: {detail}")]
    MalformedResponse { detail: String },

    /// The extraction call exceeded the configured per-call timeout.
    /// Not retried; the affected unit is marked failed.
    #[error("Extraction call timed out after {secs}s")]
    ExtractionTimeout { secs: u64 },

    /// The raw model output could not be parsed into any candidate line
    /// items at all. Individual bad lines degrade to a partial BOM instead.
    #[error("Extraction output is unparsable: {detail}")]
    UnparsableExtraction { detail: String },

    /// Every unit in a batch failed; there is no result to report.
    #[error("All {total} units failed.\nFirst error: {first_error}")]
    AllUnitsFailed { total: usize, first_error: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// No session with the given id exists in the store.
    #[error("Session '{session_id}' not found in store at '{}'", root.display())]
    NotFound { session_id: String, root: PathBuf },

    /// The store index or a record file exists but cannot be read back.
    #[error("Result store at '{}' is corrupted: {detail}", root.display())]
    StoreCorrupted { root: PathBuf, detail: String },

    // ── Assembly errors ───────────────────────────────────────────────────
    /// Document assembly was requested with no BOMs and no summary text.
    #[error("Nothing to assemble: supply at least one BOM or a summary text")]
    EmptyDocument,

    /// The external typesetting compiler failed.
    #[error("LaTeX compilation failed: {detail}")]
    Compilation { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{}': {source}", path.display())]
    OutputWrite {
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

impl BomError {
    /// Whether the extraction retry policy applies to this error.
    ///
    /// Only service-level unavailability is retryable; rejections and
    /// malformed responses will not improve on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BomError::ServiceUnavailable { .. })
    }
}

/// A non-fatal error for a single unit (image or PDF page).
///
/// Stored alongside [`crate::analyze::UnitReport`] when a unit fails.
/// The overall batch continues unless ALL units fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// The unit's input could not be loaded or rasterized.
    #[error("Unit {unit}: load failed: {detail}")]
    Load { unit: usize, detail: String },

    /// Extraction failed after retries were exhausted, or with a
    /// non-retryable service error.
    #[error("Unit {unit}: extraction failed after {retries} retries: {detail}")]
    Extraction {
        unit: usize,
        retries: u8,
        detail: String,
    },

    /// The extraction call exceeded the per-call timeout.
    #[error("Unit {unit}: extraction timed out after {secs}s")]
    Timeout { unit: usize, secs: u64 },

    /// The model output could not be parsed into any line items.
    #[error("Unit {unit}: extraction output unparsable: {detail}")]
    Unparsable { unit: usize, detail: String },

    /// The extraction succeeded but the result could not be persisted.
    #[error("Unit {unit}: failed to store result: {detail}")]
    Store { unit: usize, detail: String },

    /// The invocation was cancelled between pipeline stages.
    #[error("Unit {unit}: cancelled")]
    Cancelled { unit: usize },
}
