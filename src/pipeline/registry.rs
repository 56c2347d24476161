//! Document-kind detection and renderer lookup.
//!
//! The kind of a document is decided once, before the worker pool starts:
//!
//! 1. The file extension is looked up in a tag table (`pdf`, `pptx`, `png`, …).
//! 2. If the extension is missing or unknown, the first bytes are sniffed
//!    (`%PDF`, PNG/JPEG/GIF/BMP/WEBP/TIFF signatures, OLE2 and ZIP containers).
//!
//! The same registry then hands out the [`UnitRenderer`] for that kind.
//! Callers can register extra tags or swap renderers (e.g. a custom slide
//! rasteriser) without touching the pool.

use crate::error::Doc2MdError;
use crate::pipeline::render::{ImageRenderer, PdfRenderer, UnitRenderer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// The document families the pipeline knows how to split into units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// PDF: one unit per page.
    Pdf,
    /// PPT/PPTX/ODP: one unit per slide, via a PDF export.
    Slides,
    /// A raster image, or a directory of them: one unit per image.
    Image,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Slides => "slides",
            DocumentKind::Image => "image",
        })
    }
}

/// Extensions recognised as raster images. Also used to filter image directories.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff"];

const SLIDE_EXTENSIONS: &[&str] = &["ppt", "pptx", "pps", "ppsx", "odp"];

/// Maps kind tags to [`DocumentKind`] and kinds to renderers.
pub struct RendererRegistry {
    tags: HashMap<String, DocumentKind>,
    renderers: HashMap<DocumentKind, Arc<dyn UnitRenderer>>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RendererRegistry {
    /// A registry with no tags and no renderers.
    pub fn empty() -> Self {
        Self {
            tags: HashMap::new(),
            renderers: HashMap::new(),
        }
    }

    /// The built-in tag table with the pdfium and `image` renderers.
    ///
    /// Slides are rendered by [`PdfRenderer`] after conversion to PDF.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_tag("pdf", DocumentKind::Pdf);
        for ext in SLIDE_EXTENSIONS {
            registry.register_tag(ext, DocumentKind::Slides);
        }
        for ext in IMAGE_EXTENSIONS {
            registry.register_tag(ext, DocumentKind::Image);
        }

        let pdf: Arc<dyn UnitRenderer> = Arc::new(PdfRenderer);
        registry.register_renderer(DocumentKind::Pdf, Arc::clone(&pdf));
        registry.register_renderer(DocumentKind::Slides, pdf);
        registry.register_renderer(DocumentKind::Image, Arc::new(ImageRenderer));
        registry
    }

    /// Map a file extension (case-insensitive, without the dot) to a kind.
    pub fn register_tag(&mut self, tag: &str, kind: DocumentKind) {
        self.tags.insert(tag.to_ascii_lowercase(), kind);
    }

    /// Install or replace the renderer for a kind.
    pub fn register_renderer(&mut self, kind: DocumentKind, renderer: Arc<dyn UnitRenderer>) {
        self.renderers.insert(kind, renderer);
    }

    /// Kind registered for a tag, if any.
    pub fn kind_for_tag(&self, tag: &str) -> Option<DocumentKind> {
        self.tags.get(&tag.to_ascii_lowercase()).copied()
    }

    /// The renderer for a kind.
    pub fn renderer(&self, kind: DocumentKind) -> Result<Arc<dyn UnitRenderer>, Doc2MdError> {
        self.renderers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Doc2MdError::NoRenderer {
                kind: kind.to_string(),
            })
    }

    /// Decide the kind of `path`: extension tag first, then content sniffing.
    ///
    /// Directories are image sets.
    pub fn detect_kind(&self, path: &Path) -> Result<DocumentKind, Doc2MdError> {
        if path.is_dir() {
            return Ok(DocumentKind::Image);
        }

        if let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.kind_for_tag(e))
        {
            debug!("{}: kind {} from extension", path.display(), kind);
            return Ok(kind);
        }

        let magic = read_magic(path)?;
        match sniff_kind(&magic) {
            Some(kind) => {
                debug!("{}: kind {} from content", path.display(), kind);
                Ok(kind)
            }
            None => Err(Doc2MdError::UnsupportedDocument {
                path: path.to_path_buf(),
                magic: magic.into_iter().take(8).collect(),
            }),
        }
    }
}

/// Read up to 16 leading bytes.
fn read_magic(path: &Path) -> Result<Vec<u8>, Doc2MdError> {
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Doc2MdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Doc2MdError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;
    let mut magic = Vec::with_capacity(16);
    file.take(16)
        .read_to_end(&mut magic)
        .map_err(|e| Doc2MdError::Internal(format!("reading {}: {e}", path.display())))?;
    Ok(magic)
}

/// Identify a kind from leading bytes.
///
/// OLE2 compound files and ZIP archives are assumed to be slide decks: the
/// registry only reaches this probe after the extension lookup failed, and
/// those are the container formats of `.ppt` and `.pptx`/`.odp`.
pub fn sniff_kind(magic: &[u8]) -> Option<DocumentKind> {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    const OLE2: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

    if magic.starts_with(b"%PDF") {
        Some(DocumentKind::Pdf)
    } else if magic.starts_with(PNG)
        || magic.starts_with(JPEG)
        || magic.starts_with(b"GIF87a")
        || magic.starts_with(b"GIF89a")
        || magic.starts_with(b"BM")
        || magic.starts_with(b"II*\0")
        || magic.starts_with(b"MM\0*")
        || (magic.len() >= 12 && &magic[..4] == b"RIFF" && &magic[8..12] == b"WEBP")
    {
        Some(DocumentKind::Image)
    } else if magic.starts_with(OLE2) || magic.starts_with(b"PK\x03\x04") {
        Some(DocumentKind::Slides)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tags_are_case_insensitive() {
        let registry = RendererRegistry::builtin();
        assert_eq!(registry.kind_for_tag("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(registry.kind_for_tag("pptx"), Some(DocumentKind::Slides));
        assert_eq!(registry.kind_for_tag("Jpeg"), Some(DocumentKind::Image));
        assert_eq!(registry.kind_for_tag("docx"), None);
    }

    #[test]
    fn sniff_known_signatures() {
        assert_eq!(sniff_kind(b"%PDF-1.7\n"), Some(DocumentKind::Pdf));
        assert_eq!(sniff_kind(b"\x89PNG\r\n\x1a\n\0\0"), Some(DocumentKind::Image));
        assert_eq!(sniff_kind(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(DocumentKind::Image));
        assert_eq!(sniff_kind(b"RIFF\0\0\0\0WEBPVP8 "), Some(DocumentKind::Image));
        assert_eq!(sniff_kind(b"PK\x03\x04\x14\0"), Some(DocumentKind::Slides));
        assert_eq!(sniff_kind(b"hello world"), None);
        assert_eq!(sniff_kind(b""), None);
    }

    #[test]
    fn detect_falls_back_to_content() {
        let mut tmp = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        tmp.write_all(b"%PDF-1.4\n%...").unwrap();
        let kind = RendererRegistry::builtin().detect_kind(tmp.path()).unwrap();
        assert_eq!(kind, DocumentKind::Pdf);
    }

    #[test]
    fn detect_rejects_unknown_content() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"just some text").unwrap();
        let err = RendererRegistry::builtin().detect_kind(tmp.path()).unwrap_err();
        assert!(matches!(err, Doc2MdError::UnsupportedDocument { .. }));
    }

    #[test]
    fn directory_is_image_set() {
        let dir = tempfile::tempdir().unwrap();
        let kind = RendererRegistry::builtin().detect_kind(dir.path()).unwrap();
        assert_eq!(kind, DocumentKind::Image);
    }

    #[test]
    fn missing_renderer_is_an_error() {
        let registry = RendererRegistry::empty();
        assert!(matches!(
            registry.renderer(DocumentKind::Pdf),
            Err(Doc2MdError::NoRenderer { .. })
        ));
    }

    #[test]
    fn registered_tag_overrides() {
        let mut registry = RendererRegistry::builtin();
        registry.register_tag("key", DocumentKind::Slides);
        assert_eq!(registry.kind_for_tag("KEY"), Some(DocumentKind::Slides));
    }
}
