//! Document preparation: everything that happens once, before the pool runs.
//!
//! ```text
//! input ──resolve──▶ local path ──registry──▶ kind + renderer
//!                                   │
//!                     slides ──soffice──▶ PDF in scratch dir
//!                                   │
//!                      metadata, unit count, page selection ──▶ descriptors
//! ```
//!
//! A [`PreparedDocument`] owns the resolved input and the scratch directory,
//! so downloads and slide exports are removed when it is dropped, whether
//! the run succeeded or not.

use crate::config::{ConversionConfig, PageSelection};
use crate::error::Doc2MdError;
use crate::output::DocumentMetadata;
use crate::pipeline::input::{resolve_input, ResolvedInput};
use crate::pipeline::queue::{RenderContext, UnitDescriptor, UnitSource};
use crate::pipeline::registry::{DocumentKind, RendererRegistry, IMAGE_EXTENSIONS};
use crate::pipeline::render::{extract_metadata, UnitRenderer};
use crate::pipeline::slides::export_to_pdf;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

/// A document ready for the worker pool.
pub struct PreparedDocument {
    pub kind: DocumentKind,
    pub metadata: DocumentMetadata,
    /// Selected units, indexed `0..units.len()` in source order.
    pub units: Vec<UnitDescriptor>,
    pub renderer: Arc<dyn UnitRenderer>,
    _scratch: TempDir,
    _input: ResolvedInput,
}

impl std::fmt::Debug for PreparedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedDocument")
            .field("kind", &self.kind)
            .field("metadata", &self.metadata)
            .field("units", &self.units.len())
            .finish_non_exhaustive()
    }
}

/// Resolve `input`, pick its renderer and lay out the units to convert.
pub async fn prepare(
    input: &str,
    config: &ConversionConfig,
    registry: &RendererRegistry,
) -> Result<PreparedDocument, Doc2MdError> {
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    let path = resolved.path().to_path_buf();

    let kind = registry.detect_kind(&path)?;
    let renderer = registry.renderer(kind)?;
    let scratch = TempDir::new()
        .map_err(|e| Doc2MdError::Internal(format!("Failed to create scratch dir: {e}")))?;

    info!("Preparing {} ({})", input, kind);

    let (document, metadata, images) = match kind {
        DocumentKind::Pdf => {
            let meta =
                extract_metadata(&path, kind, input.to_string(), config.password.as_deref()).await?;
            (path, meta, Vec::new())
        }
        DocumentKind::Slides => {
            let pdf = export_to_pdf(&path, scratch.path()).await?;
            let meta = extract_metadata(&pdf, kind, input.to_string(), None).await?;
            (pdf, meta, Vec::new())
        }
        DocumentKind::Image => {
            let images = list_images(&path)?;
            let meta = DocumentMetadata::bare(kind, input, images.len());
            (path, meta, images)
        }
    };

    let total = metadata.unit_count;
    let selected = select_units(&config.pages, total)?;

    let context = Arc::new(RenderContext {
        kind,
        document,
        scratch_dir: scratch.path().to_path_buf(),
        password: config.password.clone(),
        dpi: config.dpi,
        max_rendered_pixels: config.max_rendered_pixels,
    });

    let units = selected
        .into_iter()
        .enumerate()
        .map(|(index, position)| UnitDescriptor {
            index,
            source_number: position + 1,
            source: match kind {
                DocumentKind::Pdf => UnitSource::Page { page: position },
                DocumentKind::Slides => UnitSource::Slide { slide: position },
                DocumentKind::Image => UnitSource::Image {
                    path: images[position].clone(),
                },
            },
            context: Arc::clone(&context),
        })
        .collect::<Vec<_>>();

    debug!("{} of {} units selected", units.len(), total);

    Ok(PreparedDocument {
        kind,
        metadata,
        units,
        renderer,
        _scratch: scratch,
        _input: resolved,
    })
}

/// Positions to convert. A selection that matches nothing in a non-empty
/// document is an error; an empty document simply has no units.
fn select_units(selection: &PageSelection, total: usize) -> Result<Vec<usize>, Doc2MdError> {
    let indices = selection.to_indices(total);
    if indices.is_empty() && total > 0 {
        let page = match selection {
            PageSelection::All => 1,
            PageSelection::Single(p) => *p,
            PageSelection::Range(start, _) => *start,
            PageSelection::Set(pages) => pages.iter().copied().min().unwrap_or(0),
        };
        return Err(Doc2MdError::PageOutOfRange { page, total });
    }
    Ok(indices)
}

/// Image units: the file itself, or every image in a directory by name.
///
/// Files are not decoded here. A broken image fails in its renderer and is
/// retried like any other unit.
fn list_images(path: &Path) -> Result<Vec<PathBuf>, Doc2MdError> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = std::fs::read_dir(path)
        .map_err(|e| Doc2MdError::UnreadableImage {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path) {
        RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])).save(path).unwrap();
    }

    #[test]
    fn selection_out_of_range() {
        let err = select_units(&PageSelection::Single(7), 3).unwrap_err();
        assert!(matches!(err, Doc2MdError::PageOutOfRange { page: 7, total: 3 }));
        assert_eq!(select_units(&PageSelection::All, 0).unwrap(), Vec::<usize>::new());
        assert_eq!(select_units(&PageSelection::Range(2, 3), 3).unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn image_directory_units_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"));
        write_png(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let doc = prepare(
            dir.path().to_str().unwrap(),
            &ConversionConfig::default(),
            &RendererRegistry::builtin(),
        )
        .await
        .unwrap();

        assert_eq!(doc.kind, DocumentKind::Image);
        assert_eq!(doc.metadata.unit_count, 2);
        let names: Vec<_> = doc
            .units
            .iter()
            .map(|u| match &u.source {
                UnitSource::Image { path } => path.file_name().unwrap().to_string_lossy().into_owned(),
                other => panic!("unexpected source {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
        assert_eq!(doc.units[1].index, 1);
        assert_eq!(doc.units[1].source_number, 2);
    }

    #[tokio::test]
    async fn empty_directory_has_no_units() {
        let dir = tempfile::tempdir().unwrap();
        let doc = prepare(
            dir.path().to_str().unwrap(),
            &ConversionConfig::default(),
            &RendererRegistry::builtin(),
        )
        .await
        .unwrap();
        assert!(doc.units.is_empty());
    }

    #[tokio::test]
    async fn undecodable_image_becomes_a_unit_render_error() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("b.png"), b"not really a png").unwrap();

        let doc = prepare(
            dir.path().to_str().unwrap(),
            &ConversionConfig::default(),
            &RendererRegistry::builtin(),
        )
        .await
        .unwrap();
        assert_eq!(doc.units.len(), 2);

        assert!(doc.renderer.render(&doc.units[0]).is_ok());
        let err = doc.renderer.render(&doc.units[1]).unwrap_err();
        assert!(matches!(err, UnitError::Render { index: 1, .. }), "got: {err}");
    }
}
