//! Typesetting boundary: compile LaTeX source with an external `pdflatex`.
//!
//! Like rasterization, typesetting is delegated to a black-box tool
//! driven through `tokio::process`. Compilation happens in a scratch
//! tempdir; only the finished PDF is moved to the requested output path,
//! so a failed run leaves no `.aux`/`.log` litter next to the user's
//! files.

use crate::error::BomError;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

const JOB_NAME: &str = "report";

/// Compile LaTeX source to a PDF at `out_path`.
///
/// Runs `pdflatex -interaction=nonstopmode` twice so cross-references
/// and longtable column widths settle. The tool's exit status is
/// unreliable in nonstopmode, so success is judged by the PDF actually
/// existing afterwards.
pub async fn compile_latex(source: &str, out_path: &Path) -> Result<(), BomError> {
    let workdir = tempfile::tempdir().map_err(|e| BomError::Internal(e.to_string()))?;
    let tex_path = workdir.path().join(format!("{JOB_NAME}.tex"));
    tokio::fs::write(&tex_path, source)
        .await
        .map_err(|e| BomError::OutputWrite {
            path: tex_path.clone(),
            source: e,
        })?;

    let mut last_output = String::new();
    for pass in 1..=2 {
        debug!("pdflatex pass {pass}");
        let output = Command::new("pdflatex")
            .arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg(format!("{JOB_NAME}.tex"))
            .current_dir(workdir.path())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BomError::Compilation {
                        detail: "pdflatex not found; install a TeX distribution".into(),
                    }
                } else {
                    BomError::Compilation {
                        detail: format!("pdflatex: {e}"),
                    }
                }
            })?;
        last_output = String::from_utf8_lossy(&output.stdout).to_string();
    }

    let pdf_path = workdir.path().join(format!("{JOB_NAME}.pdf"));
    if !pdf_path.exists() {
        return Err(BomError::Compilation {
            detail: extract_tex_error(&last_output),
        });
    }

    // Rename fails across filesystems (tempdir is often on tmpfs), so
    // copy to the destination instead.
    tokio::fs::copy(&pdf_path, out_path)
        .await
        .map_err(|e| BomError::OutputWrite {
            path: out_path.to_path_buf(),
            source: e,
        })?;

    info!("Compiled report → {}", out_path.display());
    Ok(())
}

/// Pull the first error line out of a pdflatex transcript.
fn extract_tex_error(transcript: &str) -> String {
    transcript
        .lines()
        .find(|l| l.starts_with('!'))
        .map(|l| l.trim_start_matches('!').trim().to_string())
        .unwrap_or_else(|| "pdflatex produced no PDF (see transcript)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tex_error_line_is_extracted() {
        let transcript = "This is pdfTeX\n! Undefined control sequence.\nl.12 \\badmacro\n";
        assert_eq!(extract_tex_error(transcript), "Undefined control sequence.");
    }

    #[test]
    fn missing_error_line_falls_back() {
        assert!(extract_tex_error("nothing useful here").contains("no PDF"));
    }
}
