//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements one step. The worker pool only sees two seams,
//! [`render::UnitRenderer`] and [`transcribe::Transcriber`], so either can be
//! swapped (or replaced by a test double) without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//!              prepare (once)                       pool (per unit, ≤ W at a time)
//! input ──▶ resolve ──▶ registry ──▶ units ──▶ render ──▶ encode ──▶ VLM ──▶ screen
//! (URL/path)            (kind)     (queue)   (pdfium/    (base64)          (policy)
//!                                             image)
//!                                                   results ──▶ assemble (by index)
//! ```
//!
//! 1. [`input`]     — canonicalise the user-supplied path or URL
//! 2. [`registry`]  — map the input to a [`registry::DocumentKind`] and its renderer
//! 3. [`slides`]    — export slide decks to PDF with LibreOffice
//! 4. [`document`]  — metadata, page selection, unit descriptors
//! 5. [`queue`]     — unit descriptors and the FIFO work queue
//! 6. [`pool`]      — bounded concurrency, retry by re-enqueue, progress
//! 7. [`render`]    — rasterise one unit; runs in `spawn_blocking`
//! 8. [`encode`]    — PNG-encode and base64-wrap a bitmap for the request body
//! 9. [`transcribe`] — one VLM call per attempt; the only stage with network I/O
//! 10. [`postprocess`] — strip fences and invisible characters from model output
//! 11. [`policy`]   — flag degenerate, looping model output
//! 12. [`assemble`] — join results in index order

pub mod assemble;
pub mod document;
pub mod encode;
pub mod input;
pub mod policy;
pub mod pool;
pub mod postprocess;
pub mod queue;
pub mod registry;
pub mod render;
pub mod slides;
pub mod transcribe;
