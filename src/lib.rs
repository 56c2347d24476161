//! # edgequake-doc2md
//!
//! Convert PDFs, slide decks and scanned images to Markdown using Vision
//! Language Models (VLMs).
//!
//! Every page, slide or image is rasterised and read by a VLM the way a human
//! would read it, so multi-column layouts, tables and formulae come out as
//! structured Markdown instead of garbled text.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Prepare   resolve path/URL, detect kind, export slides, select units
//!  ├─ 2. Pool      at most W units in flight; failures go back to the queue
//!  │     ├─ render      pdfium / image decoding (spawn_blocking)
//!  │     ├─ transcribe  one VLM call per attempt
//!  │     └─ screen      content policy for looping output
//!  └─ 3. Assemble  units in source order, "\n\n" around each
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2md::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ConversionConfig::builder().worker_budget(8).build()?;
//!     let output = convert("slides.pptx", &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("{} units, {} retried attempts",
//!         output.stats.processed_units,
//!         output.stats.retried_attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Retry semantics
//!
//! By default a failed unit is retried until it succeeds, so a successful
//! return always contains every selected unit. A unit that can never succeed
//! keeps the conversion running; cancel it by dropping the future, or set
//! [`RetryPolicy::Capped`] to fail fast with
//! [`Doc2MdError::RetriesExhausted`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, PageSelection, TranscriptionTask};
pub use convert::{
    convert, convert_from_bytes, convert_sync, convert_to_file, convert_with_registry, inspect,
};
pub use error::{Doc2MdError, StreamError, TranscribeError, UnitError};
pub use output::{ConversionOutput, ConversionStats, DocumentMetadata, UnitResult};
pub use pipeline::assemble::{assemble, assemble_results};
pub use pipeline::policy::{ContentPolicy, ContentVerdict};
pub use pipeline::pool::{BoundedWorkerPool, ResultSet, RetryPolicy};
pub use pipeline::queue::{RenderContext, UnitDescriptor, UnitSource, WorkQueue};
pub use pipeline::registry::{DocumentKind, RendererRegistry};
pub use pipeline::render::{Bitmap, UnitRenderer};
pub use pipeline::transcribe::{Transcriber, Transcription, VisionTranscriber};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, convert_stream_from_bytes, stream_units, UnitStream};
