//! # planbom
//!
//! Convert engineering drawing images (or PDFs of drawings) into
//! structured Bills of Materials using vision language models, and
//! assemble the results into LaTeX reports.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use planbom::{analyze_image, AnalysisConfig, SessionContext};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AnalysisConfig::builder()
//!     .model("gpt-4o")
//!     .context_text("residential door schedule, metric units")
//!     .build()?;
//!
//! let session = SessionContext::ephemeral();
//! let report = analyze_image("drawing.png", &config, &session).await?;
//! if let Some(bom) = report.bom {
//!     for item in &bom.items {
//!         println!("{} x{} {}", item.identifier, item.quantity, item.unit);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! image / PDF page
//!       │ load (magic-byte sniff, header dims)
//!       ▼
//! ImagePayload ──extract──▶ raw model output ──normalize──▶ Bom
//!                (vision LLM,                  (schema parse,
//!                 retry/backoff)                per-line validation)
//!       │
//!       ▼ optional
//! ResultStore (uuid sessions) ──assemble──▶ LaTeX report ──pdflatex──▶ PDF
//! ```
//!
//! PDFs are rasterized one page per `pdftoppm` invocation and the pages
//! run concurrently through a bounded worker pool; a failed page never
//! takes its siblings down. See [`analyze_pdf`] and [`BatchReport`].
//!
//! ## Feature flags
//!
//! - `cli` *(default)* — the `planbom` binary (clap, indicatif,
//!   tracing-subscriber). Disable for library-only use.

pub mod analyze;
pub mod assemble;
pub mod bom;
pub mod compile;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod store;

pub use analyze::{analyze_image, analyze_pdf, assemble_batch, BatchReport, UnitReport};
pub use assemble::{assemble, AssembledDocument, DocumentSection};
pub use bom::{Bom, BomLineItem, Diagnostic, Provenance, SourceRef, Unit};
pub use compile::compile_latex;
pub use config::{AnalysisConfig, AnalysisConfigBuilder, RasterFormat};
pub use error::{BomError, UnitError};
pub use pipeline::extract::{ExtractionRequest, RawExtractionResult};
pub use pipeline::input::ImagePayload;
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::SessionContext;
pub use store::{ResultStore, SessionResult};

/// Library version, from Cargo.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
