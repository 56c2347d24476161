//! Worker-pool behaviour with in-process test doubles.
//!
//! No pdfium, no network: a renderer that returns tiny bitmaps and a
//! transcriber whose failures are scripted per unit index.

use async_trait::async_trait;
use edgequake_doc2md::{
    assemble, assemble_results, BoundedWorkerPool, Bitmap, ContentPolicy,
    ConversionProgressCallback, Doc2MdError, DocumentKind, RenderContext, RetryPolicy,
    TranscribeError, Transcriber, Transcription, UnitDescriptor, UnitError, UnitRenderer,
    UnitResult, UnitSource,
};
use image::DynamicImage;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test doubles ─────────────────────────────────────────────────────────────

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

/// Renders 1×1 bitmaps; fails the first `fail_first` attempts of chosen units.
#[derive(Default)]
struct StubRenderer {
    calls: AtomicUsize,
    fail_first: Mutex<HashMap<usize, u32>>,
}

impl StubRenderer {
    fn failing(index: usize, times: u32) -> Self {
        let r = Self::default();
        r.fail_first.lock().unwrap().insert(index, times);
        r
    }
}

impl UnitRenderer for StubRenderer {
    fn render(&self, unit: &UnitDescriptor) -> Result<Bitmap, UnitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.fail_first.lock().unwrap();
        if let Some(left) = failures.get_mut(&unit.index) {
            if *left > 0 {
                *left -= 1;
                return Err(UnitError::Render {
                    index: unit.index,
                    detail: "scripted render failure".into(),
                });
            }
        }
        Ok(Bitmap {
            index: unit.index,
            image: DynamicImage::new_rgb8(1, 1),
        })
    }
}

/// Answers `"unit {index}"` after `delay`, tracking concurrency.
struct ScriptedTranscriber {
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    high_water: AtomicUsize,
    fail_first: Mutex<HashMap<usize, u32>>,
    always_fail: HashSet<usize>,
    reply: Option<String>,
}

impl ScriptedTranscriber {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            fail_first: Mutex::new(HashMap::new()),
            always_fail: HashSet::new(),
            reply: None,
        }
    }

    fn fail_first(self, index: usize, times: u32) -> Self {
        self.fail_first.lock().unwrap().insert(index, times);
        self
    }

    fn always_fail(mut self, index: usize) -> Self {
        self.always_fail.insert(index);
        self
    }

    fn reply_with(mut self, text: impl Into<String>) -> Self {
        self.reply = Some(text.into());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, bitmap: &Bitmap) -> Result<Transcription, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.always_fail.contains(&bitmap.index) {
            return Err(TranscribeError::Provider("HTTP 500".into()));
        }
        {
            let mut failures = self.fail_first.lock().unwrap();
            if let Some(left) = failures.get_mut(&bitmap.index) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TranscribeError::Timeout { secs: 60 });
                }
            }
        }
        let text = self
            .reply
            .clone()
            .unwrap_or_else(|| format!("unit {}", bitmap.index));
        Ok(Transcription {
            text,
            input_tokens: 10,
            output_tokens: 5,
        })
    }
}

/// Records every progress event.
#[derive(Default)]
struct Recorder {
    completed: Mutex<Vec<(usize, usize)>>,
    errors: Mutex<Vec<(usize, u32)>>,
    finished: AtomicUsize,
}

impl ConversionProgressCallback for Recorder {
    fn on_unit_complete(&self, result: &UnitResult, completed: usize, _total: usize) {
        self.completed.lock().unwrap().push((result.index, completed));
    }

    fn on_unit_error(&self, error: &UnitError, attempt: u32, _total: usize) {
        self.errors.lock().unwrap().push((error.index(), attempt));
    }

    fn on_conversion_complete(&self, _total: usize) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn pool(renderer: Arc<StubRenderer>, transcriber: Arc<ScriptedTranscriber>, w: usize) -> BoundedWorkerPool {
    BoundedWorkerPool::new(renderer, transcriber).worker_budget(w)
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_unit_succeeds_exactly_once() {
    for (n, w) in [(1, 1), (7, 1), (7, 3), (20, 5), (3, 10)] {
        let transcriber = Arc::new(ScriptedTranscriber::new(2));
        let results = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), w)
            .process_units(units(n))
            .await
            .unwrap();

        assert_eq!(results.indices().collect::<Vec<_>>(), (0..n).collect::<Vec<_>>());
        for i in 0..n {
            assert_eq!(results.get(i).unwrap().text, format!("unit {i}"));
        }
        assert_eq!(transcriber.calls(), n, "n={n} w={w}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_never_exceeds_budget() {
    let transcriber = Arc::new(ScriptedTranscriber::new(10));
    let results = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), 4)
        .process_units(units(30))
        .await
        .unwrap();

    assert_eq!(results.len(), 30);
    assert!(transcriber.high_water() <= 4, "high water {}", transcriber.high_water());
    assert!(transcriber.high_water() >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn budget_larger_than_units_runs_all_at_once() {
    let transcriber = Arc::new(ScriptedTranscriber::new(150));
    let results = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), 10)
        .process_units(units(4))
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(transcriber.high_water(), 4);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let transcriber = Arc::new(
        ScriptedTranscriber::new(1)
            .fail_first(2, 3)
            .fail_first(5, 1),
    );
    let recorder = Arc::new(Recorder::default());
    let results = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), 3)
        .progress(recorder.clone())
        .process_units(units(8))
        .await
        .unwrap();

    assert_eq!(results.len(), 8);
    assert_eq!(results.retried_attempts(), 4);
    assert_eq!(transcriber.calls(), 8 + 4);
    assert_eq!(results.get(2).unwrap().text, "unit 2");
    assert_eq!(results.get(2).unwrap().attempts, 4);
    assert_eq!(results.get(5).unwrap().attempts, 2);
    assert_eq!(results.get(0).unwrap().attempts, 1);

    let errors = recorder.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 4);
    assert_eq!(errors.iter().filter(|(i, _)| *i == 2).count(), 3);

    // The counter never goes backwards and ends at N.
    let completed = recorder.completed.lock().unwrap().clone();
    let counts: Vec<usize> = completed.iter().map(|(_, c)| *c).collect();
    assert_eq!(counts, (1..=8).collect::<Vec<_>>());
    let indices: HashSet<usize> = completed.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..8).collect());
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn render_failures_are_retried() {
    let renderer = Arc::new(StubRenderer::failing(1, 2));
    let transcriber = Arc::new(ScriptedTranscriber::new(1));
    let results = pool(Arc::clone(&renderer), Arc::clone(&transcriber), 2)
        .process_units(units(3))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results.get(1).unwrap().attempts, 3);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 5);
    // Failed renders never reach the transcriber.
    assert_eq!(transcriber.calls(), 3);
}

#[tokio::test]
async fn zero_units_make_no_calls() {
    let renderer = Arc::new(StubRenderer::default());
    let transcriber = Arc::new(ScriptedTranscriber::new(1));
    let recorder = Arc::new(Recorder::default());
    let results = pool(Arc::clone(&renderer), Arc::clone(&transcriber), 5)
        .progress(recorder.clone())
        .process_units(Vec::new())
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(assemble_results(&results), "");
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(transcriber.calls(), 0);
    assert!(recorder.completed.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_failure_never_terminates() {
    let transcriber = Arc::new(ScriptedTranscriber::new(5).always_fail(3));
    let recorder = Arc::new(Recorder::default());
    let pool = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), 2)
        .progress(recorder.clone());

    let outcome = tokio::time::timeout(Duration::from_millis(400), pool.process_units(units(6))).await;
    assert!(outcome.is_err(), "run must still be going");

    // Everything else finished; the counter is stuck one short of N.
    let completed = recorder.completed.lock().unwrap().clone();
    assert_eq!(completed.len(), 5);
    assert!(completed.iter().all(|(i, _)| *i != 3));
    let errors = recorder.errors.lock().unwrap().clone();
    assert!(errors.len() > 1);
    assert!(errors.iter().all(|(i, _)| *i == 3));
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);

    // Dropping the run stops all work.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let calls = transcriber.calls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transcriber.calls(), calls);
}

#[tokio::test]
async fn capped_policy_gives_up() {
    let transcriber = Arc::new(ScriptedTranscriber::new(1).always_fail(3));
    let err = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), 2)
        .retry_policy(RetryPolicy::Capped { max_retries: 2 })
        .process_units(units(5))
        .await
        .unwrap_err();

    match err {
        Doc2MdError::RetriesExhausted {
            index,
            attempts,
            last_error,
        } => {
            assert_eq!(index, 3);
            assert_eq!(attempts, 3);
            assert!(last_error.contains("HTTP 500"), "{last_error}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn backoff_delays_retries() {
    let transcriber = Arc::new(ScriptedTranscriber::new(0).fail_first(0, 2));
    let started = std::time::Instant::now();
    let results = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), 1)
        .backoff_ms(40)
        .process_units(units(1))
        .await
        .unwrap();

    assert_eq!(results.get(0).unwrap().attempts, 3);
    // 40ms before attempt 2, 80ms before attempt 3.
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn degenerate_output_is_replaced_not_retried() {
    let transcriber =
        Arc::new(ScriptedTranscriber::new(1).reply_with("row row row your boat ".repeat(25)));
    let results = pool(Arc::new(StubRenderer::default()), Arc::clone(&transcriber), 2)
        .content_policy(Some(ContentPolicy::default()))
        .process_units(units(2))
        .await
        .unwrap();

    assert_eq!(transcriber.calls(), 2);
    for i in 0..2 {
        let r = results.get(i).unwrap();
        assert!(r.degenerate);
        assert_eq!(r.attempts, 1);
        assert!(r.text.starts_with(&format!("<!-- unit {}", i + 1)), "{}", r.text);
    }
}

#[test]
fn runs_on_a_plain_test_thread() {
    let transcriber = Arc::new(ScriptedTranscriber::new(1).fail_first(0, 1));
    let results = tokio_test::block_on(
        pool(Arc::new(StubRenderer::default()), transcriber, 2).process_units(units(3)),
    )
    .unwrap();
    assert_eq!(
        assemble_results(&results),
        "\n\nunit 0\n\n\n\nunit 1\n\n\n\nunit 2\n\n"
    );
}

#[test]
fn assembly_ignores_completion_order() {
    let expected = "\n\nA\n\n\n\nB\n\n\n\nC\n\n";
    assert_eq!(assemble([(0, "A"), (1, "B"), (2, "C")]), expected);
    assert_eq!(assemble([(2, "C"), (0, "A"), (1, "B")]), expected);

    let map: BTreeMap<usize, String> = [(1, "B".to_string()), (0, "A".to_string())].into();
    assert_eq!(assemble(map), "\n\nA\n\n\n\nB\n\n");
}
