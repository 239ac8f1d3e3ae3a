//! Progress-callback trait for per-unit pipeline events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline processes each unit (one image, or one
//! page of a PDF batch).
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a channel, a log, or a terminal progress bar
//! without the library knowing how the host application communicates. The
//! trait is `Send + Sync` so it works when units are processed
//! concurrently.

use std::sync::Arc;

/// Called by the pipeline as it processes each unit.
///
/// All methods have default no-op implementations so callers only
/// override what they care about.
///
/// # Thread safety
///
/// In a PDF batch, `on_unit_start`, `on_unit_complete`, and
/// `on_unit_error` may be called concurrently from different tasks.
/// Implementations must protect shared mutable state with appropriate
/// synchronisation primitives (`Mutex`, `AtomicUsize`, ...).
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before any unit is processed.
    fn on_batch_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called just before a unit enters the extraction stage.
    ///
    /// `unit` is 1-indexed (the page number for PDF batches).
    fn on_unit_start(&self, unit: usize, total_units: usize) {
        let _ = (unit, total_units);
    }

    /// Called when a unit produced a BOM (possibly partial).
    ///
    /// `item_count` is the number of validated line items.
    fn on_unit_complete(&self, unit: usize, total_units: usize, item_count: usize, partial: bool) {
        let _ = (unit, total_units, item_count, partial);
    }

    /// Called when a unit fails terminally.
    fn on_unit_error(&self, unit: usize, total_units: usize, error: &str) {
        let _ = (unit, total_units, error);
    }

    /// Called once after every unit has been attempted.
    fn on_batch_complete(&self, total_units: usize, success_count: usize) {
        let _ = (total_units, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
