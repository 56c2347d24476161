//! Unit descriptors and the FIFO backlog the worker pool drains.
//!
//! A [`UnitDescriptor`] names one page, slide or image of the document and
//! carries a shared [`RenderContext`] so a renderer can produce its bitmap
//! without any other state. Descriptors are immutable and cheap to clone; the
//! pool moves the same descriptor between the queue and the in-flight set
//! until it succeeds.
//!
//! [`WorkQueue`] is deliberately plain: FIFO order only decides scheduling
//! fairness. Final ordering comes from the assembler sorting by `index`.

use crate::pipeline::registry::DocumentKind;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// Document-wide state every unit of a run shares.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub kind: DocumentKind,
    /// File the renderer reads: the PDF itself, the PDF produced from a
    /// slide deck, or the image directory/file.
    pub document: PathBuf,
    /// Per-run scratch directory. Removed when the run's prepared document drops.
    pub scratch_dir: PathBuf,
    pub password: Option<String>,
    pub dpi: u32,
    pub max_rendered_pixels: u32,
}

/// Kind-specific payload of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSource {
    /// 0-based page of a PDF.
    Page { page: usize },
    /// 0-based slide; rendered from the deck's PDF export.
    Slide { slide: usize },
    /// A standalone image file.
    Image { path: PathBuf },
}

/// One unit of work: unique `index` within the run plus what to render.
#[derive(Debug, Clone)]
pub struct UnitDescriptor {
    /// 0-based position in the run. Results are assembled in this order.
    pub index: usize,
    /// 1-based number of the unit in the source (page 7, slide 3, image 2).
    pub source_number: usize,
    pub source: UnitSource,
    pub context: Arc<RenderContext>,
}

/// FIFO backlog of units that have not yet succeeded.
#[derive(Debug, Default)]
pub struct WorkQueue {
    units: VecDeque<UnitDescriptor>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a run's units in the given order.
    pub fn from_units(units: impl IntoIterator<Item = UnitDescriptor>) -> Self {
        Self {
            units: units.into_iter().collect(),
        }
    }

    /// Append to the tail. Used for the initial load and for retries.
    pub fn enqueue(&mut self, unit: UnitDescriptor) {
        self.units.push_back(unit);
    }

    /// Remove and return the head, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<UnitDescriptor> {
        self.units.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}
