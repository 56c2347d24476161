//! Eager (full-document) conversion entry points.
//!
//! These wait for every unit, then return the assembled Markdown. Use
//! [`crate::stream::convert_stream`] to receive units as they finish.
//!
//! Every entry point follows the same three steps: [`prepare`] the document
//! once, run its units through a [`BoundedWorkerPool`], [`assemble_results`]
//! in source order.

use crate::config::ConversionConfig;
use crate::error::Doc2MdError;
use crate::output::{ConversionOutput, ConversionStats, DocumentMetadata};
use crate::pipeline::assemble::assemble_results;
use crate::pipeline::document::{prepare, PreparedDocument};
use crate::pipeline::pool::BoundedWorkerPool;
use crate::pipeline::registry::RendererRegistry;
use crate::pipeline::transcribe::VisionTranscriber;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Model used when a provider is picked without an explicit model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Convert a document (file, image directory or URL) to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Only fatal errors: unreadable or unsupported input, a PDF that cannot be
/// opened, a failed slide export, an unconfigured provider, an invalid page
/// selection, or an exhausted [`crate::RetryPolicy::Capped`] budget. Unit
/// failures are retried and never surface here under the default policy.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Doc2MdError> {
    convert_with_registry(input_str, config, &RendererRegistry::builtin()).await
}

/// [`convert`] with a caller-supplied renderer registry.
pub async fn convert_with_registry(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
    registry: &RendererRegistry,
) -> Result<ConversionOutput, Doc2MdError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    // ── Step 1: Prepare ──────────────────────────────────────────────────
    let mut prepared = prepare(input_str, config, registry).await?;
    let prepare_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "{} has {} units, {} selected",
        prepared.kind,
        prepared.metadata.unit_count,
        prepared.units.len()
    );

    // ── Step 2: Run the pool ─────────────────────────────────────────────
    let pool = build_pool(&prepared, config).await?;
    let units = std::mem::take(&mut prepared.units);
    let selected_units = units.len();

    let pool_start = Instant::now();
    let results = pool.process_units(units).await?;
    let pool_duration_ms = pool_start.elapsed().as_millis() as u64;

    // ── Step 3: Assemble ─────────────────────────────────────────────────
    let markdown = assemble_results(&results);
    let retried_attempts = results.retried_attempts();
    let units = results.into_results();

    let stats = ConversionStats {
        total_units: prepared.metadata.unit_count,
        selected_units,
        processed_units: units.len(),
        degenerate_units: units.iter().filter(|u| u.degenerate).count(),
        retried_attempts,
        total_input_tokens: units.iter().map(|u| u.input_tokens as u64).sum(),
        total_output_tokens: units.iter().map(|u| u.output_tokens as u64).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        prepare_duration_ms,
        pool_duration_ms,
    };

    info!(
        "Conversion complete: {} units, {} retried attempts, {}ms total",
        stats.processed_units, stats.retried_attempts, stats.total_duration_ms
    );

    Ok(ConversionOutput {
        markdown,
        units,
        metadata: prepared.metadata.clone(),
        stats,
    })
}

/// Convert a document and write the Markdown directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Doc2MdError> {
    let output = convert(input_str, config).await?;
    write_atomic(output_path.as_ref(), &output.markdown).await?;
    Ok(output.stats)
}

pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<(), Doc2MdError> {
    let write_failed = |source| Doc2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_failed)?;
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Doc2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Describe a document without converting it.
///
/// Does not require an LLM provider or API key. Slide decks are still
/// exported to PDF to count their slides.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, Doc2MdError> {
    let prepared = prepare(
        input_str.as_ref(),
        &ConversionConfig::default(),
        &RendererRegistry::builtin(),
    )
    .await?;
    Ok(prepared.metadata)
}

/// Convert document bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed on
/// return; the document kind is sniffed from the content.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2md::{convert_from_bytes, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("scan.png")?;
/// let output = convert_from_bytes(&bytes, &ConversionConfig::default()).await?;
/// println!("{}", output.markdown);
/// # Ok(())
/// # }
/// ```
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionOutput, Doc2MdError> {
    let tmp = write_temp(bytes)?;
    let path = tmp.path().to_string_lossy().to_string();
    // `tmp` is dropped (and the file deleted) when `convert` returns
    convert(&path, config).await
}

pub(crate) fn write_temp(bytes: &[u8]) -> Result<tempfile::NamedTempFile, Doc2MdError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| Doc2MdError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Doc2MdError::Internal(format!("tempfile write: {e}")))?;
    Ok(tmp)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// The pool for a prepared document, with the configured provider behind it.
pub(crate) async fn build_pool(
    prepared: &PreparedDocument,
    config: &ConversionConfig,
) -> Result<BoundedWorkerPool, Doc2MdError> {
    let provider = resolve_provider(config).await?;
    let transcriber = Arc::new(VisionTranscriber::new(provider, config));
    Ok(BoundedWorkerPool::from_config(
        Arc::clone(&prepared.renderer),
        transcriber,
        config,
    ))
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Doc2MdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2MdError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured only when both are set.
/// 4. **`OPENAI_API_KEY`** present: OpenAI with the configured model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub(crate) async fn resolve_provider(
    config: &ConversionConfig,
) -> Result<Arc<dyn LLMProvider>, Doc2MdError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Doc2MdError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out/doc.md");
        write_atomic(&target, "\n\nA\n\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "\n\nA\n\n");
        assert!(!target.with_extension("md.tmp").exists());
    }

    #[tokio::test]
    async fn inspect_image_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["p1.png", "p2.png", "p3.png"] {
            image::RgbImage::new(4, 4).save(dir.path().join(name)).unwrap();
        }
        let meta = inspect(dir.path().to_str().unwrap()).await.unwrap();
        assert_eq!(meta.unit_count, 3);
        assert_eq!(meta.kind, crate::DocumentKind::Image);
    }

    #[tokio::test]
    async fn inspect_missing_file() {
        let err = inspect("/no/such/deck.pptx").await.unwrap_err();
        assert!(matches!(err, Doc2MdError::FileNotFound { .. }));
    }

    #[test]
    fn temp_copy_holds_bytes() {
        let tmp = write_temp(b"%PDF-1.7").unwrap();
        assert_eq!(std::fs::read(tmp.path()).unwrap(), b"%PDF-1.7");
    }
}
