//! Streaming conversion API: emit units as they complete.
//!
//! Large documents take minutes. [`convert_stream`] returns as soon as the
//! document is prepared and yields every unit result the moment the pool
//! records it, plus every failed attempt as an `Err(StreamError::Attempt)`
//! item. Items arrive in completion order; sort by `index` (or use
//! [`crate::assemble`]) when order matters. A run that gives up ends with one
//! `Err(StreamError::Aborted)`; a stream that simply ends is complete.
//!
//! The pool runs in a spawned task and reports through the progress-callback
//! seam into an unbounded channel. Dropping the stream aborts that task, and
//! with it every worker still in flight.

use crate::config::ConversionConfig;
use crate::convert::{build_pool, write_temp};
use crate::error::{Doc2MdError, StreamError, UnitError};
use crate::output::UnitResult;
use crate::pipeline::document::prepare;
use crate::pipeline::pool::BoundedWorkerPool;
use crate::pipeline::queue::UnitDescriptor;
use crate::pipeline::registry::RendererRegistry;
use crate::progress::{ConversionProgressCallback, ProgressCallback};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{error, info};

/// A boxed stream of unit outcomes.
pub type UnitStream = Pin<Box<dyn Stream<Item = Result<UnitResult, StreamError>> + Send>>;

type StreamItem = Result<UnitResult, StreamError>;

/// Forwards pool events into the stream, then to the caller's own callback.
struct ChannelProgress {
    tx: UnboundedSender<StreamItem>,
    inner: Option<ProgressCallback>,
}

impl ConversionProgressCallback for ChannelProgress {
    fn on_conversion_start(&self, total_units: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_conversion_start(total_units);
        }
    }

    fn on_unit_start(&self, index: usize, attempt: u32, total_units: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_unit_start(index, attempt, total_units);
        }
    }

    fn on_unit_complete(&self, result: &UnitResult, completed: usize, total_units: usize) {
        // The receiver may be gone; the pool is aborted right after.
        let _ = self.tx.send(Ok(result.clone()));
        if let Some(ref cb) = self.inner {
            cb.on_unit_complete(result, completed, total_units);
        }
    }

    fn on_unit_error(&self, error: &UnitError, attempt: u32, total_units: usize) {
        let _ = self.tx.send(Err(StreamError::Attempt(error.clone())));
        if let Some(ref cb) = self.inner {
            cb.on_unit_error(error, attempt, total_units);
        }
    }

    fn on_conversion_complete(&self, total_units: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_conversion_complete(total_units);
        }
    }
}

/// Receiver side of a running conversion; aborts the run when dropped.
struct RunningConversion {
    rx: UnboundedReceiverStream<StreamItem>,
    task: JoinHandle<()>,
}

impl Stream for RunningConversion {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for RunningConversion {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Convert a document to Markdown, streaming units as they are ready.
///
/// # Returns
/// - `Ok(UnitStream)`: `Ok(UnitResult)` per success and
///   `Err(StreamError::Attempt)` per failed attempt (the unit is retried).
///   If a capped retry policy gives up, the last item is
///   `Err(StreamError::Aborted)`. Otherwise the stream ends after the last
///   unit succeeds.
/// - `Err(Doc2MdError)`: fatal error while preparing the document or
///   configuring the provider.
pub async fn convert_stream(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<UnitStream, Doc2MdError> {
    start_stream(input_str.as_ref(), config, None).await
}

/// Streaming equivalent of [`crate::convert::convert_from_bytes`].
///
/// The temporary copy of `bytes` lives until the stream finishes or is
/// dropped, because units are rendered lazily by the workers.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2md::{convert_stream_from_bytes, ConversionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("document.pdf")?;
/// let mut stream = convert_stream_from_bytes(&bytes, &ConversionConfig::default()).await?;
/// while let Some(unit) = stream.next().await {
///     match unit {
///         Ok(u) => println!("Unit {}: {} chars", u.source_number, u.text.len()),
///         Err(e) => eprintln!("Retrying: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_stream_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<UnitStream, Doc2MdError> {
    let tmp = write_temp(bytes)?;
    let path = tmp.path().to_string_lossy().to_string();
    start_stream(&path, config, Some(tmp)).await
}

/// Run `units` through an already configured pool, streaming the outcomes.
///
/// The pool's own progress callback still receives every event. Must be
/// called inside a Tokio runtime.
pub fn stream_units(pool: BoundedWorkerPool, units: Vec<UnitDescriptor>) -> UnitStream {
    Box::pin(spawn_run(pool, units, ()))
}

async fn start_stream(
    input_str: &str,
    config: &ConversionConfig,
    keep_alive: Option<tempfile::NamedTempFile>,
) -> Result<UnitStream, Doc2MdError> {
    info!("Starting streaming conversion: {}", input_str);

    let mut prepared = prepare(input_str, config, &RendererRegistry::builtin()).await?;
    let pool = build_pool(&prepared, config).await?;
    let units = std::mem::take(&mut prepared.units);

    Ok(Box::pin(spawn_run(pool, units, (prepared, keep_alive))))
}

/// Spawn the pool. `keep_alive` is dropped when the run ends, not before.
fn spawn_run<K: Send + 'static>(
    mut pool: BoundedWorkerPool,
    units: Vec<UnitDescriptor>,
    keep_alive: K,
) -> RunningConversion {
    let (tx, rx) = unbounded_channel();
    let inner = pool.take_progress();
    let pool = pool.progress(Arc::new(ChannelProgress {
        tx: tx.clone(),
        inner,
    }));

    // Every sender is owned by the task; the stream ends when it finishes.
    let task = tokio::spawn(async move {
        let _keep_alive = keep_alive;
        if let Err(e) = pool.process_units(units).await {
            error!("Streaming conversion stopped: {}", e);
            let _ = tx.send(Err(StreamError::Aborted(e)));
        }
    });

    RunningConversion {
        rx: UnboundedReceiverStream::new(rx),
        task,
    }
}
