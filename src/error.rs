//! Error types for the edgequake-doc2md library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`Doc2MdError`] — **Fatal**: the conversion cannot proceed at all
//!   (bad input file, unsupported document, provider not configured, or a
//!   capped retry budget ran out). Returned as `Err(Doc2MdError)` from the
//!   top-level `convert*` functions.
//!
//! * [`UnitError`] — **Non-fatal**: one attempt at one unit (page, slide or
//!   image) failed. The worker pool re-enqueues the unit and reports the error
//!   to the progress callback; it never aborts the run on its own.
//!
//! * [`TranscribeError`] — the tagged failure kinds a
//!   [`crate::pipeline::transcribe::Transcriber`] may return. Wrapped in
//!   [`UnitError::Transcription`] by the pool.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doc2md library.
#[derive(Debug, Error)]
pub enum Doc2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Neither the file extension nor the leading bytes identify a supported kind.
    #[error("Unsupported document '{path}' (first bytes: {magic:02x?})\nSupported: PDF, PPT/PPTX/ODP, PNG, JPEG, GIF, BMP, WEBP, TIFF.")]
    UnsupportedDocument { path: PathBuf, magic: Vec<u8> },

    // ── Document errors ───────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// An image set's directory could not be listed.
    #[error("Image set '{path}' could not be read: {detail}")]
    UnreadableImage { path: PathBuf, detail: String },

    /// The slide deck could not be converted to PDF.
    #[error("Slide conversion failed for '{path}': {detail}\nInstall LibreOffice or point DOC2MD_SOFFICE at the soffice binary.")]
    SlideConversionFailed { path: PathBuf, detail: String },

    /// Selected unit numbers exceed the actual unit count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// No renderer is registered for the detected document kind.
    #[error("No renderer registered for document kind '{kind}'")]
    NoRenderer { kind: String },

    /// A unit kept failing past the configured retry cap.
    ///
    /// Only returned under [`crate::pipeline::pool::RetryPolicy::Capped`];
    /// the default unbounded policy retries forever.
    #[error("Unit {index} failed {attempts} times; giving up.\nLast error: {last_error}")]
    RetriesExhausted {
        index: usize,
        attempts: u32,
        last_error: String,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or set PDFIUM_LIB_PATH=/path/to/libpdfium\n\
to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single attempt at a single unit.
///
/// The worker pool re-enqueues the unit after any of these. `index` is the
/// unit's position in the run (0-based), not the page number in the source.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// Rendering the unit to a bitmap failed.
    #[error("Unit {index}: rendering failed: {detail}")]
    Render { index: usize, detail: String },

    /// The transcriber returned an error.
    #[error("Unit {index}: {source}")]
    Transcription {
        index: usize,
        #[source]
        source: TranscribeError,
    },

    /// The worker task panicked or was cancelled before reporting back.
    #[error("Unit {index}: worker task aborted: {detail}")]
    Panicked { index: usize, detail: String },
}

impl UnitError {
    /// The run index of the unit this error belongs to.
    pub fn index(&self) -> usize {
        match self {
            UnitError::Render { index, .. }
            | UnitError::Transcription { index, .. }
            | UnitError::Panicked { index, .. } => *index,
        }
    }
}

/// The error side of a [`crate::UnitStream`] item.
#[derive(Debug, Error)]
pub enum StreamError {
    /// One failed attempt at one unit. The unit is retried.
    #[error(transparent)]
    Attempt(#[from] UnitError),

    /// The run stopped before every unit succeeded. Always the last item.
    #[error("Conversion aborted: {0}")]
    Aborted(Doc2MdError),
}

impl StreamError {
    /// `true` when no more items follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamError::Aborted(_))
    }
}

/// Why a transcription call failed.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum TranscribeError {
    /// The bitmap could not be encoded for upload.
    #[error("image encoding failed: {0}")]
    Encode(String),

    /// The provider returned an error (network, auth, quota, malformed response).
    #[error("transcription failed: {0}")]
    Provider(String),

    /// The call exceeded the transcriber's own timeout.
    #[error("transcription timed out after {secs}s")]
    Timeout { secs: u64 },
}
