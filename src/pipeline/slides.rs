//! Slide decks (PPT, PPTX, ODP) are rasterised through their PDF export.
//!
//! LibreOffice does the export: `soffice --headless --convert-to pdf` writes
//! `<stem>.pdf` into the run's scratch directory. Each page of that PDF is
//! one slide, rendered by the same pdfium path as ordinary PDFs.

use crate::error::Doc2MdError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Overrides the LibreOffice binary.
pub const SOFFICE_ENV: &str = "DOC2MD_SOFFICE";

/// Upper bound for one export.
const CONVERSION_TIMEOUT: Duration = Duration::from_secs(300);

fn soffice_binary() -> String {
    std::env::var(SOFFICE_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "soffice".to_string())
}

/// Export `deck` to PDF inside `scratch_dir` and return the PDF path.
pub async fn export_to_pdf(deck: &Path, scratch_dir: &Path) -> Result<PathBuf, Doc2MdError> {
    let binary = soffice_binary();
    let fail = |detail: String| Doc2MdError::SlideConversionFailed {
        path: deck.to_path_buf(),
        detail,
    };

    info!("Exporting slides {} to PDF with {}", deck.display(), binary);

    // A private profile dir keeps concurrent exports from fighting over
    // the user's LibreOffice lock file.
    let profile = scratch_dir.join("lo-profile");
    let profile_url = format!("-env:UserInstallation=file://{}", profile.display());

    let child = Command::new(&binary)
        .arg(profile_url)
        .args(["--headless", "--convert-to", "pdf", "--outdir"])
        .arg(scratch_dir)
        .arg(deck)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(CONVERSION_TIMEOUT, child)
        .await
        .map_err(|_| fail(format!("timed out after {}s", CONVERSION_TIMEOUT.as_secs())))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => fail(format!("'{binary}' not found")),
            _ => fail(format!("failed to run '{binary}': {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(fail(format!(
            "exit status {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }

    let pdf = exported_pdf_path(deck, scratch_dir)
        .ok_or_else(|| fail("deck has no usable file name".into()))?;
    if !pdf.exists() {
        return Err(fail(format!(
            "expected {} was not produced",
            pdf.display()
        )));
    }

    debug!("Slides exported to {}", pdf.display());
    Ok(pdf)
}

/// Where LibreOffice writes the export: `<scratch>/<stem>.pdf`.
fn exported_pdf_path(deck: &Path, scratch_dir: &Path) -> Option<PathBuf> {
    let stem = deck.file_stem()?;
    let mut name = stem.to_os_string();
    name.push(".pdf");
    Some(scratch_dir.join(name))
}
