//! PDF rasterization via the external `pdftoppm` tool.
//!
//! ## Why an external process?
//!
//! The rasterizer is a black-box collaborator: we hand it a document path
//! plus format/resolution and get back one raster file per page. Driving
//! `pdftoppm` (poppler-utils) through `tokio::process` keeps the pipeline
//! free of any PDF parsing and makes a rasterization crash an ordinary
//! process-level error instead of a library abort.
//!
//! ## Why one invocation per page?
//!
//! Pages are rasterized lazily, one `pdftoppm -f N -l N` call each, so a
//! corrupt page fails alone: the batch orchestrator records a per-page
//! error and the sibling pages proceed. Rasterizing the whole document up
//! front would turn one bad page into a whole-batch failure.

use crate::config::RasterFormat;
use crate::error::BomError;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Number of pages in a PDF, via `pdfinfo`.
pub async fn page_count(pdf_path: &Path) -> Result<usize, BomError> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .map_err(|e| tool_error("pdfinfo", pdf_path, e))?;

    if !output.status.success() {
        return Err(BomError::UnreadableInput {
            path: pdf_path.to_path_buf(),
            detail: format!(
                "pdfinfo exited {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("Pages:") {
            let count: usize = rest.trim().parse().map_err(|_| BomError::UnreadableInput {
                path: pdf_path.to_path_buf(),
                detail: format!("pdfinfo reported unparsable page count: '{}'", rest.trim()),
            })?;
            info!("{}: {} pages", pdf_path.display(), count);
            return Ok(count);
        }
    }

    Err(BomError::UnreadableInput {
        path: pdf_path.to_path_buf(),
        detail: "pdfinfo output did not include a page count".into(),
    })
}

/// Rasterize a single page (1-indexed) into `out_dir`.
///
/// Returns the path of the produced raster file. Each call uses its own
/// output prefix, so concurrent rasterizations of different pages never
/// collide.
pub async fn rasterize_page(
    pdf_path: &Path,
    page: usize,
    out_dir: &Path,
    format: RasterFormat,
    dpi: u32,
) -> Result<PathBuf, BomError> {
    let prefix = out_dir.join(format!("page-{page}"));

    let output = Command::new("pdftoppm")
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg("-r")
        .arg(dpi.to_string())
        .arg(format.tool_flag())
        .arg(pdf_path)
        .arg(&prefix)
        .output()
        .await
        .map_err(|e| tool_error("pdftoppm", pdf_path, e))?;

    if !output.status.success() {
        return Err(BomError::UnreadableInput {
            path: pdf_path.to_path_buf(),
            detail: format!(
                "pdftoppm failed on page {}: {}",
                page,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    // pdftoppm appends its own page-number suffix (zero-padded depending
    // on the document size), so locate the file rather than predicting
    // the exact name.
    let produced = find_produced_file(out_dir, &format!("page-{page}"), format.extension())?;
    debug!("Rasterized page {} → {}", page, produced.display());
    Ok(produced)
}

/// Locate the single raster file `pdftoppm` wrote for the given prefix.
fn find_produced_file(out_dir: &Path, stem: &str, ext: &str) -> Result<PathBuf, BomError> {
    let entries = std::fs::read_dir(out_dir).map_err(|e| BomError::UnreadableInput {
        path: out_dir.to_path_buf(),
        detail: e.to_string(),
    })?;

    // "page-1" must not match page-10's output; pdftoppm separates its
    // page-number suffix with a dash.
    let wanted = format!("{stem}-");
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&wanted) && name.ends_with(ext) {
            return Ok(path);
        }
    }

    Err(BomError::UnreadableInput {
        path: out_dir.to_path_buf(),
        detail: format!("pdftoppm reported success but produced no '{stem}*.{ext}' file"),
    })
}

fn tool_error(tool: &str, path: &Path, e: std::io::Error) -> BomError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BomError::RasterToolMissing {
            tool: tool.to_string(),
        }
    } else {
        BomError::UnreadableInput {
            path: path.to_path_buf(),
            detail: format!("{tool}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_produced_file_matches_padded_names() {
        let dir = tempfile::tempdir().unwrap();
        // pdftoppm zero-pads: "page-3" prefix becomes "page-3-03.png".
        std::fs::write(dir.path().join("page-3-03.png"), b"x").unwrap();
        let found = find_produced_file(dir.path(), "page-3", "png").unwrap();
        assert!(found.ends_with("page-3-03.png"));
    }

    #[test]
    fn find_produced_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_produced_file(dir.path(), "page-1", "png").unwrap_err();
        assert!(matches!(err, BomError::UnreadableInput { .. }));
    }

    #[test]
    fn missing_tool_maps_to_raster_tool_missing() {
        let e = tool_error(
            "pdftoppm",
            Path::new("x.pdf"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(e, BomError::RasterToolMissing { .. }));

        let e = tool_error(
            "pdftoppm",
            Path::new("x.pdf"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(e, BomError::UnreadableInput { .. }));
    }
}
