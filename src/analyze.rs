//! Pipeline orchestration: run drawings through load → extract →
//! normalize → store.
//!
//! ## Unit model
//!
//! One *unit* is one drawing image: either a standalone image file, or
//! one page of a PDF. Each unit moves through the stages independently
//! and reports into a [`UnitReport`]; a batch is just units run through
//! a bounded worker pool. A unit failure never aborts its siblings —
//! only a batch where *every* unit failed is an error
//! ([`BomError::AllUnitsFailed`]).
//!
//! ## Cancellation
//!
//! The [`SessionContext`] cancel flag is checked between stages, never
//! mid-external-call: an extraction already in flight runs to
//! completion, and a unit that was stored before cancellation stays
//! stored. Cancelled units report [`UnitError::Cancelled`].

use crate::assemble::{assemble, AssembledDocument};
use crate::bom::{Bom, Provenance, SourceRef};
use crate::config::AnalysisConfig;
use crate::error::{BomError, UnitError};
use crate::pipeline::extract::{self, ExtractionRequest};
use crate::pipeline::{input, normalize, raster};
use crate::session::SessionContext;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "gpt-4o";

/// Outcome of one unit (a standalone image or one PDF page).
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    /// 1-indexed unit number (page number for PDF batches, 1 for images).
    pub unit: usize,
    /// The drawing this unit came from.
    pub source: SourceRef,
    /// The extracted BOM, when the unit succeeded.
    pub bom: Option<Bom>,
    /// Store session id, when the session's save policy is on.
    pub session_id: Option<String>,
    /// The failure, when the unit did not succeed.
    pub error: Option<UnitError>,
    /// Retries consumed by the extraction call.
    pub retries: u8,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

impl UnitReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Succeeded, but some candidate lines were dropped.
    pub fn is_partial(&self) -> bool {
        self.bom.as_ref().is_some_and(|b| b.partial)
    }

    fn failed(unit: usize, source: SourceRef, error: UnitError, started: Instant) -> Self {
        Self {
            unit,
            source,
            bom: None,
            session_id: None,
            error: Some(error),
            retries: 0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Outcome of a whole batch, units in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub units: Vec<UnitReport>,
    pub total_duration_ms: u64,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.succeeded()).count()
    }

    pub fn partial(&self) -> usize {
        self.units.iter().filter(|u| u.is_partial()).count()
    }

    pub fn failed(&self) -> usize {
        self.units.iter().filter(|u| !u.succeeded()).count()
    }

    /// All successfully extracted BOMs, in unit order.
    pub fn boms(&self) -> Vec<Bom> {
        self.units.iter().filter_map(|u| u.bom.clone()).collect()
    }

    /// Process exit code: partial success is still success. Nonzero only
    /// when not a single unit produced a BOM.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() > 0 {
            0
        } else {
            1
        }
    }
}

/// Analyze a single drawing image (local path or URL).
pub async fn analyze_image(
    input_str: &str,
    config: &AnalysisConfig,
    session: &SessionContext,
) -> Result<UnitReport, BomError> {
    info!("Analyzing image: {}", input_str);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let path = resolved.path().to_path_buf();

    if input::is_pdf(&path)? {
        return Err(BomError::UnsupportedFormat {
            path,
            detail: "input is a PDF; analyze it as a multi-page document".into(),
        });
    }

    let provider = resolve_provider(config)?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(1);
    }

    let report = run_unit(
        Arc::clone(&provider),
        path.clone(),
        SourceRef::image(&path),
        1,
        1,
        config.clone(),
        session.clone(),
    )
    .await;

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(1, usize::from(report.succeeded()));
    }

    Ok(report)
}

/// Analyze every page of a PDF as a concurrent batch.
///
/// Pages run through a `buffer_unordered` pool sized by
/// `config.concurrency`; the report lists them back in page order. Fatal
/// only when the document itself is unusable or every page failed.
pub async fn analyze_pdf(
    input_str: &str,
    config: &AnalysisConfig,
    session: &SessionContext,
) -> Result<BatchReport, BomError> {
    let total_start = Instant::now();
    info!("Analyzing PDF: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    if !input::is_pdf(&pdf_path)? {
        return Err(BomError::UnsupportedFormat {
            path: pdf_path,
            detail: "input is not a PDF".into(),
        });
    }

    let provider = resolve_provider(config)?;
    let total = raster::page_count(&pdf_path).await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    // One scratch dir for the whole batch; pages write distinct prefixes.
    let raster_dir = tempfile::tempdir().map_err(|e| BomError::Internal(e.to_string()))?;
    let raster_path = raster_dir.path().to_path_buf();

    let mut units: Vec<UnitReport> = stream::iter((1..=total).map(|page| {
        let provider = Arc::clone(&provider);
        let config = config.clone();
        let session = session.clone();
        let pdf_path = pdf_path.clone();
        let raster_path = raster_path.clone();
        async move {
            run_page(
                provider,
                &pdf_path,
                page,
                total,
                &raster_path,
                config,
                session,
            )
            .await
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    // buffer_unordered yields in completion order; report in page order.
    units.sort_by_key(|u| u.unit);

    let succeeded = units.iter().filter(|u| u.succeeded()).count();
    if succeeded == 0 {
        let first_error = units
            .iter()
            .find_map(|u| u.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(BomError::AllUnitsFailed { total, first_error });
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, succeeded);
    }

    info!(
        "Batch complete: {}/{} pages, {}ms",
        succeeded,
        total,
        total_start.elapsed().as_millis()
    );

    Ok(BatchReport {
        units,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    })
}

/// Assemble a report document from a batch's successful BOMs.
pub fn assemble_batch(
    report: &BatchReport,
    summary_text: Option<String>,
    title: impl Into<String>,
) -> Result<AssembledDocument, BomError> {
    assemble(report.boms(), summary_text, title)
}

/// Rasterize one page, then run it as a unit.
async fn run_page(
    provider: Arc<dyn LLMProvider>,
    pdf_path: &Path,
    page: usize,
    total: usize,
    raster_dir: &Path,
    config: AnalysisConfig,
    session: SessionContext,
) -> UnitReport {
    let started = Instant::now();
    let source = SourceRef::page(pdf_path, page);

    if session.is_cancelled() {
        return UnitReport::failed(page, source, UnitError::Cancelled { unit: page }, started);
    }

    let image_path = match raster::rasterize_page(
        pdf_path,
        page,
        raster_dir,
        config.raster_format,
        config.dpi,
    )
    .await
    {
        Ok(p) => p,
        Err(e) => {
            warn!("Page {} rasterization failed: {}", page, e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_unit_error(page, total, &e.to_string());
            }
            return UnitReport::failed(
                page,
                source,
                UnitError::Load {
                    unit: page,
                    detail: e.to_string(),
                },
                started,
            );
        }
    };

    run_unit(provider, image_path, source, page, total, config, session).await
}

/// Run one unit through load → extract → normalize → store.
///
/// Never returns an error: every failure lands in the report so batch
/// siblings keep going.
async fn run_unit(
    provider: Arc<dyn LLMProvider>,
    image_path: PathBuf,
    source: SourceRef,
    unit: usize,
    total: usize,
    config: AnalysisConfig,
    session: SessionContext,
) -> UnitReport {
    let started = Instant::now();

    if let Some(ref cb) = config.progress_callback {
        cb.on_unit_start(unit, total);
    }

    let fail = |error: UnitError| {
        if let Some(ref cb) = config.progress_callback {
            cb.on_unit_error(unit, total, &error.to_string());
        }
        UnitReport::failed(unit, source.clone(), error, started)
    };

    // Loading
    if session.is_cancelled() {
        return fail(UnitError::Cancelled { unit });
    }
    let payload = match input::load(&image_path, source.page_index) {
        Ok(p) => p,
        Err(e) => {
            return fail(UnitError::Load {
                unit,
                detail: e.to_string(),
            })
        }
    };

    // Extracting
    if session.is_cancelled() {
        return fail(UnitError::Cancelled { unit });
    }
    let request = ExtractionRequest {
        payload,
        context_text: config.context_text.clone(),
    };
    let raw = match extract::extract(&provider, &request, &config).await {
        Ok(r) => r,
        Err(e) => return fail(unit_error(unit, config.max_retries, e)),
    };
    let retries = raw.retries;
    let input_tokens = raw.input_tokens;
    let output_tokens = raw.output_tokens;
    let raw_text = raw.model_output_text.clone();
    let extracted_at = raw.extracted_at;

    // Normalizing
    if session.is_cancelled() {
        return fail(UnitError::Cancelled { unit });
    }
    let bom = match normalize::normalize(raw, source.clone()) {
        Ok(b) => b,
        Err(e) => return fail(unit_error(unit, config.max_retries, e)),
    };

    // Storing (only when the session's save policy is on)
    if session.is_cancelled() {
        return fail(UnitError::Cancelled { unit });
    }
    let session_id = if session.should_save() {
        let provenance = Provenance {
            source_path: source.path.clone(),
            page_index: source.page_index,
            model: config.model.clone(),
            extracted_at,
        };
        match session
            .store()
            .map(|store| store.save(&bom, &provenance, &raw_text))
        {
            Some(Ok(id)) => Some(id),
            Some(Err(e)) => {
                return fail(UnitError::Store {
                    unit,
                    detail: e.to_string(),
                })
            }
            None => None,
        }
    } else {
        None
    };

    debug!(
        "Unit {} done: {} items{} in {}ms",
        unit,
        bom.items.len(),
        if bom.partial { " (partial)" } else { "" },
        started.elapsed().as_millis()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_unit_complete(unit, total, bom.items.len(), bom.partial);
    }

    UnitReport {
        unit,
        source,
        session_id,
        retries,
        input_tokens,
        output_tokens,
        duration_ms: started.elapsed().as_millis() as u64,
        bom: Some(bom),
        error: None,
    }
}

/// Map a fatal pipeline error onto the per-unit taxonomy.
fn unit_error(unit: usize, max_retries: u32, err: BomError) -> UnitError {
    match err {
        BomError::ExtractionTimeout { secs } => UnitError::Timeout { unit, secs },
        BomError::UnparsableExtraction { detail } | BomError::MalformedResponse { detail } => {
            UnitError::Unparsable { unit, detail }
        }
        BomError::ServiceUnavailable { detail } => UnitError::Extraction {
            unit,
            retries: max_retries.min(u8::MAX as u32) as u8,
            detail,
        },
        BomError::ServiceRejected { detail } => UnitError::Extraction {
            unit,
            retries: 0,
            detail,
        },
        other => UnitError::Load {
            unit,
            detail: other.to_string(),
        },
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, BomError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BomError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the extraction provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is; the hook
///    for tests and callers with custom middleware.
/// 2. **Named provider + model** (`config.provider_name`) — created via
///    [`ProviderFactory::create_llm_provider`], which reads the matching
///    API key from the environment.
/// 3. **Environment pair** (`PLANBOM_LLM_PROVIDER` + `PLANBOM_MODEL`) —
///    both set means the execution environment chose; honoured before
///    auto-detection so the choice wins even with multiple keys present.
/// 4. **OpenAI key**, then **full auto-detection**
///    (`ProviderFactory::from_env`) as the no-configuration path.
pub(crate) fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, BomError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("PLANBOM_LLM_PROVIDER"),
        std::env::var("PLANBOM_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BomError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No provider could be auto-detected from the environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or name a provider explicitly.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom::{BomLineItem, Unit};
    use chrono::Utc;

    fn ok_unit(unit: usize, partial: bool) -> UnitReport {
        UnitReport {
            unit,
            source: SourceRef::page("doors.pdf", unit),
            bom: Some(Bom {
                source: SourceRef::page("doors.pdf", unit),
                items: vec![BomLineItem {
                    identifier: format!("A{unit}"),
                    description: "part".into(),
                    quantity: 1,
                    unit: Unit::Piece,
                    unit_weight_kg: None,
                    notes: None,
                }],
                extracted_at: Utc::now(),
                partial,
                diagnostics: vec![],
            }),
            session_id: None,
            error: None,
            retries: 0,
            input_tokens: 10,
            output_tokens: 5,
            duration_ms: 1,
        }
    }

    fn failed_unit(unit: usize) -> UnitReport {
        UnitReport::failed(
            unit,
            SourceRef::page("doors.pdf", unit),
            UnitError::Timeout { unit, secs: 45 },
            Instant::now(),
        )
    }

    #[test]
    fn partial_batch_success_exits_zero() {
        let report = BatchReport {
            units: vec![ok_unit(1, false), failed_unit(2), ok_unit(3, true)],
            total_duration_ms: 10,
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.partial(), 1);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn all_failed_batch_exits_nonzero() {
        let report = BatchReport {
            units: vec![failed_unit(1), failed_unit(2), failed_unit(3)],
            total_duration_ms: 10,
        };
        assert_eq!(report.succeeded(), 0);
        assert_ne!(report.exit_code(), 0);
    }

    #[test]
    fn boms_follow_unit_order_and_skip_failures() {
        let report = BatchReport {
            units: vec![ok_unit(1, false), failed_unit(2), ok_unit(3, false)],
            total_duration_ms: 10,
        };
        let boms = report.boms();
        assert_eq!(boms.len(), 2);
        assert_eq!(boms[0].items[0].identifier, "A1");
        assert_eq!(boms[1].items[0].identifier, "A3");
    }

    #[test]
    fn timeout_maps_to_unit_timeout() {
        let e = unit_error(2, 3, BomError::ExtractionTimeout { secs: 45 });
        assert!(matches!(e, UnitError::Timeout { unit: 2, secs: 45 }));
    }

    #[test]
    fn service_unavailable_records_retry_budget() {
        let e = unit_error(
            1,
            3,
            BomError::ServiceUnavailable {
                detail: "503".into(),
            },
        );
        assert!(matches!(e, UnitError::Extraction { retries: 3, .. }));
    }

    #[test]
    fn unparsable_maps_to_unit_unparsable() {
        let e = unit_error(
            1,
            3,
            BomError::UnparsableExtraction {
                detail: "no json".into(),
            },
        );
        assert!(matches!(e, UnitError::Unparsable { .. }));
    }
}
