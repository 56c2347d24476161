//! Streaming behaviour with in-process test doubles.

use async_trait::async_trait;
use edgequake_doc2md::{
    stream_units, Bitmap, BoundedWorkerPool, ConversionProgressCallback, Doc2MdError,
    DocumentKind, RenderContext, RetryPolicy, StreamError, TranscribeError, Transcriber,
    Transcription, UnitDescriptor, UnitError, UnitRenderer, UnitResult, UnitSource,
};
use futures::StreamExt;
use image::DynamicImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn units(n: usize) -> Vec<UnitDescriptor> {
    let context = Arc::new(RenderContext {
        kind: DocumentKind::Image,
        document: PathBuf::from("/virtual"),
        scratch_dir: std::env::temp_dir(),
        password: None,
        dpi: 150,
        max_rendered_pixels: 2000,
    });
    (0..n)
        .map(|index| UnitDescriptor {
            index,
            source_number: index + 1,
            source: UnitSource::Image {
                path: PathBuf::from(format!("/virtual/{index}.png")),
            },
            context: Arc::clone(&context),
        })
        .collect()
}

struct BlankRenderer;

impl UnitRenderer for BlankRenderer {
    fn render(&self, unit: &UnitDescriptor) -> Result<Bitmap, UnitError> {
        Ok(Bitmap {
            index: unit.index,
            image: DynamicImage::new_rgb8(1, 1),
        })
    }
}

/// Answers `"unit {index}"` after `delay`; fails the first attempts of chosen units.
struct Flaky {
    delay: Duration,
    calls: AtomicUsize,
    fail_first: Mutex<HashMap<usize, u32>>,
}

impl Flaky {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            calls: AtomicUsize::new(0),
            fail_first: Mutex::new(HashMap::new()),
        }
    }

    fn fail_first(self, index: usize, times: u32) -> Self {
        self.fail_first.lock().unwrap().insert(index, times);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for Flaky {
    async fn transcribe(&self, bitmap: &Bitmap) -> Result<Transcription, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let mut failures = self.fail_first.lock().unwrap();
        if let Some(left) = failures.get_mut(&bitmap.index) {
            if *left > 0 {
                *left -= 1;
                return Err(TranscribeError::Provider("HTTP 503".into()));
            }
        }
        Ok(Transcription::text(format!("unit {}", bitmap.index)))
    }
}

#[derive(Default)]
struct Counter {
    completed: AtomicUsize,
    errors: AtomicUsize,
}

impl ConversionProgressCallback for Counter {
    fn on_unit_complete(&self, _result: &UnitResult, _completed: usize, _total: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unit_error(&self, _error: &UnitError, _attempt: u32, _total: usize) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn pool(transcriber: Arc<Flaky>, w: usize) -> BoundedWorkerPool {
    BoundedWorkerPool::new(Arc::new(BlankRenderer), transcriber).worker_budget(w)
}

#[tokio::test]
async fn yields_each_unit_then_ends() {
    let items: Vec<_> = stream_units(pool(Arc::new(Flaky::new(1)), 1), units(3))
        .collect()
        .await;

    let indices: Vec<usize> = items
        .iter()
        .map(|item| item.as_ref().expect("no failures scripted").index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn failed_attempts_are_items_and_reach_the_callback() {
    let counter = Arc::new(Counter::default());
    let transcriber = Arc::new(Flaky::new(1).fail_first(1, 2));
    let pool = pool(transcriber, 2).progress(counter.clone());

    let items: Vec<_> = stream_units(pool, units(3)).collect().await;

    let mut done: Vec<usize> = items.iter().filter_map(|i| i.as_ref().ok()).map(|u| u.index).collect();
    done.sort_unstable();
    assert_eq!(done, vec![0, 1, 2]);

    let attempts: Vec<usize> = items
        .iter()
        .filter_map(|i| match i {
            Err(StreamError::Attempt(e)) => Some(e.index()),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 1]);
    assert!(items.iter().all(|i| !matches!(i, Err(e) if e.is_terminal())));

    assert_eq!(counter.completed.load(Ordering::SeqCst), 3);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn capped_run_ends_with_aborted() {
    let transcriber = Arc::new(Flaky::new(1).fail_first(0, u32::MAX));
    let pool = pool(transcriber, 1).retry_policy(RetryPolicy::Capped { max_retries: 1 });

    let items: Vec<_> = stream_units(pool, units(1)).collect().await;

    assert_eq!(items.len(), 3, "two failed attempts, then the abort");
    assert!(matches!(items[0], Err(StreamError::Attempt(_))));
    assert!(matches!(items[1], Err(StreamError::Attempt(_))));
    match &items[2] {
        Err(e @ StreamError::Aborted(Doc2MdError::RetriesExhausted { index: 0, attempts: 2, .. })) => {
            assert!(e.is_terminal());
        }
        other => panic!("expected an abort, got {other:?}"),
    }
}

#[tokio::test]
async fn dropping_the_stream_stops_the_run() {
    let transcriber = Arc::new(Flaky::new(40));
    let mut stream = stream_units(pool(Arc::clone(&transcriber), 1), units(10));

    let first = stream.next().await.expect("one item").expect("success");
    assert_eq!(first.index, 0);
    drop(stream);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(transcriber.calls() <= 2, "run kept going: {} calls", transcriber.calls());
}
