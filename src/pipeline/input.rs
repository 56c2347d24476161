//! Input resolution: normalise a user-supplied path or URL to something local.
//!
//! Renderers need a file-system path (pdfium cannot stream from a socket), so
//! URLs are downloaded into a `TempDir` that lives as long as the
//! [`ResolvedInput`]. Directories are accepted as-is: they are image sets.
//! What kind of document the path holds is decided later by the registry.

use crate::error::Doc2MdError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: a local file or directory, or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` keeps the download alive until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
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

/// Resolve a path or HTTP(S) URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Doc2MdError> {
    if input.trim().is_empty() {
        return Err(Doc2MdError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, Doc2MdError> {
    let path = PathBuf::from(path_str);

    let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Doc2MdError::PermissionDenied { path: path.clone() },
        _ => Doc2MdError::FileNotFound { path: path.clone() },
    })?;

    let readable = if meta.is_dir() {
        std::fs::read_dir(&path).map(|_| ())
    } else {
        std::fs::File::open(&path).map(|_| ())
    };
    if let Err(e) = readable {
        return Err(match e.kind() {
            std::io::ErrorKind::PermissionDenied => Doc2MdError::PermissionDenied { path },
            _ => Doc2MdError::FileNotFound { path },
        });
    }

    debug!("Resolved local input: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Doc2MdError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| Doc2MdError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Doc2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| Doc2MdError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            Doc2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it has an extension, so the registry can
/// use it as a kind tag. Otherwise a neutral name; content sniffing decides.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "download".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_keeps_extension() {
        assert_eq!(filename_from_url("https://x.org/a/deck.pptx?v=2"), "deck.pptx");
        assert_eq!(filename_from_url("https://x.org/get"), "download");
        assert_eq!(filename_from_url("https://x.org/"), "download");
    }

    #[tokio::test]
    async fn local_file_and_directory_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.png");
        std::fs::write(&file, b"\x89PNG").unwrap();

        let resolved = resolve_input(file.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), file.as_path());

        let resolved = resolve_input(dir.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), dir.path());
    }

    #[tokio::test]
    async fn missing_and_empty_inputs() {
        let err = resolve_input("/no/such/file.pdf", 5).await.unwrap_err();
        assert!(matches!(err, Doc2MdError::FileNotFound { .. }));
        let err = resolve_input("  ", 5).await.unwrap_err();
        assert!(matches!(err, Doc2MdError::InvalidInput { .. }));
    }
}
