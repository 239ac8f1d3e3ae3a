//! Pipeline stages for drawing-to-BOM extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different rasterization tool) without
//! touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ raster ──▶ extract ──▶ normalize
//! (path/URL) (pdftoppm)  (VLM)      (typed BOM)
//! ```
//!
//! 1. [`input`]     — load an image file (or URL) into an [`input::ImagePayload`]
//! 2. [`raster`]    — rasterize PDF pages via the external `pdftoppm`
//!    tool, one invocation per page so a bad page never aborts its siblings
//! 3. [`extract`]   — drive the vision-model call with retry/backoff; the
//!    only stage with network I/O
//! 4. [`normalize`] — decide the loosely-shaped model output into the
//!    typed [`crate::bom::Bom`], degrading to a partial BOM per bad line

pub mod extract;
pub mod input;
pub mod normalize;
pub mod raster;
