//! Output types returned by the conversion entry points.

use crate::pipeline::registry::DocumentKind;
use serde::{Deserialize, Serialize};

/// The complete result of converting one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Assembled Markdown, units in source order.
    pub markdown: String,
    /// Per-unit results sorted by `index`.
    pub units: Vec<UnitResult>,
    /// What was learned about the document before conversion.
    pub metadata: DocumentMetadata,
    /// Counters and timings for the run.
    pub stats: ConversionStats,
}

/// The successful result of one unit (page, slide or image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    /// 0-based position of the unit in the run.
    pub index: usize,
    /// 1-based page/slide/image number in the source document.
    pub source_number: usize,
    /// Transcribed text, or a placeholder when `degenerate` is set.
    pub text: String,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Wall-clock time of the successful attempt.
    pub duration_ms: u64,
    /// The model output was rejected by the content policy and replaced.
    pub degenerate: bool,
}

impl UnitResult {
    /// A result with only index and text set; `source_number` is `index + 1`.
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            source_number: index + 1,
            text: text.into(),
            attempts: 1,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            degenerate: false,
        }
    }
}

/// Document-level metadata gathered while enumerating units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub kind: DocumentKind,
    /// File name (or directory name for image sets).
    pub source: String,
    /// Units in the document before page selection.
    pub unit_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    /// Only set for PDF-backed kinds.
    pub pdf_version: Option<String>,
}

impl DocumentMetadata {
    /// Metadata with only the structural fields set.
    pub fn bare(kind: DocumentKind, source: impl Into<String>, unit_count: usize) -> Self {
        Self {
            kind,
            source: source.into(),
            unit_count,
            title: None,
            author: None,
            subject: None,
            creator: None,
            producer: None,
            creation_date: None,
            modification_date: None,
            pdf_version: None,
        }
    }
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Units in the document.
    pub total_units: usize,
    /// Units selected for conversion (N).
    pub selected_units: usize,
    /// Units that produced a result. Equals `selected_units` on return.
    pub processed_units: usize,
    /// Results replaced by the content policy.
    pub degenerate_units: usize,
    /// Failed attempts that were retried.
    pub retried_attempts: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    /// Input resolution, kind detection and unit enumeration.
    pub prepare_duration_ms: u64,
    /// Time spent inside the worker pool.
    pub pool_duration_ms: u64,
}
