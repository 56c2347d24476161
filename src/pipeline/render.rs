//! Unit rasterisation: turn one [`UnitDescriptor`] into a [`Bitmap`].
//!
//! Renderers are synchronous. The worker pool calls them through
//! `tokio::task::spawn_blocking` because pdfium and image decoding are
//! CPU-bound and pdfium is not async-safe.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, for PDF pages and raster inputs alike.

use crate::error::{Doc2MdError, UnitError};
use crate::output::DocumentMetadata;
use crate::pipeline::queue::{UnitDescriptor, UnitSource};
use crate::pipeline::registry::DocumentKind;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Only one pdfium instance may be bound at a time.
static PDFIUM_GUARD: Mutex<()> = Mutex::new(());

/// The guard protects no data, so a panic while it was held leaves nothing
/// inconsistent and poisoning is ignored.
fn lock_pdfium() -> MutexGuard<'static, ()> {
    PDFIUM_GUARD.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A rendered unit, ready for transcription.
#[derive(Debug, Clone)]
pub struct Bitmap {
    /// Run index of the unit this bitmap belongs to.
    pub index: usize,
    pub image: DynamicImage,
}

/// Produces the bitmap for one unit.
///
/// Implementations must be `Send + Sync`: the pool shares one renderer across
/// every worker of a run. Errors are per-unit and lead to a retry.
pub trait UnitRenderer: Send + Sync {
    fn render(&self, unit: &UnitDescriptor) -> Result<Bitmap, UnitError>;
}

/// Renders PDF pages and slides (from the deck's PDF export) with pdfium.
pub struct PdfRenderer;

impl UnitRenderer for PdfRenderer {
    fn render(&self, unit: &UnitDescriptor) -> Result<Bitmap, UnitError> {
        let page_index = match unit.source {
            UnitSource::Page { page } => page,
            UnitSource::Slide { slide } => slide,
            UnitSource::Image { .. } => {
                return Err(render_error(unit, "PdfRenderer cannot render an image unit"));
            }
        };
        let page_index = u16::try_from(page_index)
            .map_err(|_| render_error(unit, format!("page index {page_index} exceeds pdfium's limit")))?;
        let ctx = &unit.context;

        let _guard = lock_pdfium();
        let pdfium = bind_pdfium().map_err(|e| render_error(unit, e))?;

        let document = pdfium
            .load_pdf_from_file(&ctx.document, ctx.password.as_deref())
            .map_err(|e| render_error(unit, format!("{e:?}")))?;

        let pages = document.pages();
        let page = pages
            .get(page_index)
            .map_err(|e| render_error(unit, format!("{e:?}")))?;

        let max = ctx.max_rendered_pixels as i32;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(ctx.dpi as f32 / 72.0)
            .set_maximum_width(max)
            .set_maximum_height(max);

        let image = page
            .render_with_config(&render_config)
            .map_err(|e| render_error(unit, format!("{e:?}")))?
            .as_image();

        debug!(
            "Rendered unit {} ({} {}) → {}x{} px",
            unit.index,
            ctx.kind,
            unit.source_number,
            image.width(),
            image.height()
        );

        Ok(Bitmap {
            index: unit.index,
            image,
        })
    }
}

/// Decodes standalone image files with the `image` crate.
pub struct ImageRenderer;

impl UnitRenderer for ImageRenderer {
    fn render(&self, unit: &UnitDescriptor) -> Result<Bitmap, UnitError> {
        let UnitSource::Image { ref path } = unit.source else {
            return Err(render_error(unit, "ImageRenderer can only render image units"));
        };

        let image = image::open(path)
            .map_err(|e| render_error(unit, format!("{}: {e}", path.display())))?;
        let image = fit_within(image, unit.context.max_rendered_pixels);

        debug!(
            "Loaded unit {} from {} → {}x{} px",
            unit.index,
            path.display(),
            image.width(),
            image.height()
        );

        Ok(Bitmap {
            index: unit.index,
            image,
        })
    }
}

/// Downscale so the longest edge is at most `max_edge`; smaller images are untouched.
pub fn fit_within(image: DynamicImage, max_edge: u32) -> DynamicImage {
    if image.width() <= max_edge && image.height() <= max_edge {
        image
    } else {
        image.resize(max_edge, max_edge, FilterType::Lanczos3)
    }
}

fn render_error(unit: &UnitDescriptor, detail: impl ToString) -> UnitError {
    UnitError::Render {
        index: unit.index,
        detail: detail.to_string(),
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` when set, otherwise the system library.
fn bind_pdfium() -> Result<Pdfium, String> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    };
    bindings.map(Pdfium::new).map_err(|e| e.to_string())
}

/// Read metadata and the page count of a PDF without rendering.
///
/// Fatal: a document that cannot be opened here will not render either.
pub async fn extract_metadata(
    pdf_path: &Path,
    kind: DocumentKind,
    source: String,
    password: Option<&str>,
) -> Result<DocumentMetadata, Doc2MdError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, kind, source, pwd.as_deref()))
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    kind: DocumentKind,
    source: String,
    password: Option<&str>,
) -> Result<DocumentMetadata, Doc2MdError> {
    let _guard = lock_pdfium();
    let pdfium = bind_pdfium().map_err(Doc2MdError::PdfiumBindingFailed)?;

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.to_lowercase().contains("password") {
            if password.is_some() {
                Doc2MdError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                Doc2MdError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            Doc2MdError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let metadata = document.metadata();
    let pages = document.pages();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut meta = DocumentMetadata::bare(kind, source, pages.len() as usize);
    meta.title = get_meta(PdfDocumentMetadataTagType::Title);
    meta.author = get_meta(PdfDocumentMetadataTagType::Author);
    meta.subject = get_meta(PdfDocumentMetadataTagType::Subject);
    meta.creator = get_meta(PdfDocumentMetadataTagType::Creator);
    meta.producer = get_meta(PdfDocumentMetadataTagType::Producer);
    meta.creation_date = get_meta(PdfDocumentMetadataTagType::CreationDate);
    meta.modification_date = get_meta(PdfDocumentMetadataTagType::ModificationDate);
    meta.pdf_version = Some(format!("{:?}", document.version()));
    Ok(meta)
}
