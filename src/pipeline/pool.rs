//! The bounded, failure-tolerant worker pool that drives every conversion.
//!
//! ## Model
//!
//! One coordinator future owns all run bookkeeping:
//!
//! * the [`WorkQueue`] of units that have not succeeded yet,
//! * the in-flight set (task id → unit, attempt, abort handle),
//! * the [`ResultSet`] of successes, keyed by unit index,
//! * the progress counter.
//!
//! Each dispatched unit runs in its own `tokio::spawn` task: render on the
//! blocking pool, transcribe, screen the text. The task touches no shared
//! state; its outcome comes back through its join handle. The coordinator
//! suspends in exactly one place, waiting for the next completion.
//!
//! ```text
//!   WorkQueue ──dequeue──▶ in-flight (≤ W) ──join──▶ success ──▶ ResultSet
//!       ▲                                      │
//!       └──────────── re-enqueue (tail) ◀── failure
//! ```
//!
//! ## Retry
//!
//! A failed attempt (render error, transcription error, panic) puts the unit
//! back at the tail of the queue. Under [`RetryPolicy::Unbounded`] (the
//! default) this repeats until the unit succeeds: a unit that can never
//! succeed keeps the run alive forever, with the progress counter stalled and
//! the same diagnostic event repeating. Dropping the `process_units` future
//! is the way out; it aborts every task still in flight.
//! [`RetryPolicy::Capped`] turns that case into
//! [`Doc2MdError::RetriesExhausted`].

use crate::config::ConversionConfig;
use crate::error::{Doc2MdError, UnitError};
use crate::output::UnitResult;
use crate::pipeline::policy::{placeholder, ContentPolicy, ContentVerdict};
use crate::pipeline::queue::{UnitDescriptor, WorkQueue};
use crate::pipeline::render::UnitRenderer;
use crate::pipeline::transcribe::{Transcriber, Transcription};
use crate::progress::ProgressCallback;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, info, warn};

/// Upper bound for a single backoff delay.
const MAX_BACKOFF_MS: u64 = 60_000;

/// What happens to a unit after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Re-enqueue forever. (default)
    #[default]
    Unbounded,
    /// Re-enqueue at most `max_retries` times, then abort the run.
    Capped { max_retries: u32 },
}

impl RetryPolicy {
    /// Whether a unit that has failed `failures` times may be tried again.
    pub fn permits_retry(&self, failures: u32) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Capped { max_retries } => failures <= *max_retries,
        }
    }
}

/// Successful unit results of one run, keyed by unit index.
#[derive(Debug, Default)]
pub struct ResultSet {
    results: BTreeMap<usize, UnitResult>,
    retried_attempts: u64,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&UnitResult> {
        self.results.get(&index)
    }

    /// Unit indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.results.keys().copied()
    }

    /// Failed attempts that were re-enqueued during the run.
    pub fn retried_attempts(&self) -> u64 {
        self.retried_attempts
    }

    /// Index → text, the shape the assembler consumes.
    pub fn texts(&self) -> BTreeMap<usize, String> {
        self.results
            .iter()
            .map(|(&index, r)| (index, r.text.clone()))
            .collect()
    }

    /// All results, sorted by index.
    pub fn into_results(self) -> Vec<UnitResult> {
        self.results.into_values().collect()
    }

    fn insert(&mut self, result: UnitResult) {
        let previous = self.results.insert(result.index, result);
        debug_assert!(previous.is_none(), "unit recorded twice");
    }
}

/// Opaque handle of one dispatched attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskId(u64);

struct InFlight {
    unit: UnitDescriptor,
    attempt: u32,
    abort: AbortHandle,
}

/// Dispatched attempts that have not reported back yet.
///
/// Dropping the set aborts every remaining task, so cancelling a run (by
/// dropping its future) does not leave workers calling the provider.
#[derive(Default)]
struct InFlightSet {
    tasks: HashMap<TaskId, InFlight>,
    next_id: u64,
}

impl InFlightSet {
    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn insert(&mut self, unit: UnitDescriptor, attempt: u32, abort: AbortHandle) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.insert(id, InFlight { unit, attempt, abort });
        id
    }

    fn remove(&mut self, id: TaskId) -> Option<InFlight> {
        self.tasks.remove(&id)
    }
}

impl Drop for InFlightSet {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort.abort();
        }
    }
}

/// What a worker task hands back on success.
struct WorkerSuccess {
    transcription: Transcription,
    verdict: ContentVerdict,
    duration_ms: u64,
}

type Completion = BoxFuture<'static, (TaskId, Result<Result<WorkerSuccess, UnitError>, JoinError>)>;

/// Processes units through a renderer and a transcriber with at most
/// `worker_budget` attempts in flight.
pub struct BoundedWorkerPool {
    renderer: Arc<dyn UnitRenderer>,
    transcriber: Arc<dyn Transcriber>,
    worker_budget: usize,
    retry_policy: RetryPolicy,
    backoff_ms: u64,
    content_policy: Option<ContentPolicy>,
    progress: Option<ProgressCallback>,
}

impl BoundedWorkerPool {
    /// A pool with the default budget (5), unbounded retry, no backoff,
    /// no content policy and no progress callback.
    pub fn new(renderer: Arc<dyn UnitRenderer>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            renderer,
            transcriber,
            worker_budget: crate::config::DEFAULT_WORKER_BUDGET,
            retry_policy: RetryPolicy::default(),
            backoff_ms: 0,
            content_policy: None,
            progress: None,
        }
    }

    /// A pool configured from a [`ConversionConfig`].
    pub fn from_config(
        renderer: Arc<dyn UnitRenderer>,
        transcriber: Arc<dyn Transcriber>,
        config: &ConversionConfig,
    ) -> Self {
        let mut pool = Self::new(renderer, transcriber)
            .worker_budget(config.worker_budget)
            .retry_policy(config.retry_policy)
            .backoff_ms(config.retry_backoff_ms)
            .content_policy(config.content_policy);
        pool.progress = config.progress_callback.clone();
        pool
    }

    pub fn worker_budget(mut self, w: usize) -> Self {
        self.worker_budget = w.max(1);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn backoff_ms(mut self, ms: u64) -> Self {
        self.backoff_ms = ms;
        self
    }

    pub fn content_policy(mut self, policy: Option<ContentPolicy>) -> Self {
        self.content_policy = policy;
        self
    }

    pub fn progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Detach the progress callback so a wrapper can be installed in its place.
    pub(crate) fn take_progress(&mut self) -> Option<ProgressCallback> {
        self.progress.take()
    }

    /// Run every unit to success and return the results.
    ///
    /// Unit indices must be unique. On `Ok`, the result set holds exactly one
    /// entry per input unit. Under [`RetryPolicy::Unbounded`] this never
    /// returns `Err`, and never returns at all while some unit keeps failing.
    pub async fn process_units(&self, units: Vec<UnitDescriptor>) -> Result<ResultSet, Doc2MdError> {
        let total = units.len();
        let started = Instant::now();
        info!(
            "Processing {} units with {} workers ({:?})",
            total, self.worker_budget, self.retry_policy
        );
        if let Some(ref cb) = self.progress {
            cb.on_conversion_start(total);
        }

        let mut queue = WorkQueue::from_units(units);
        let mut in_flight = InFlightSet::default();
        let mut pending: FuturesUnordered<Completion> = FuturesUnordered::new();
        let mut results = ResultSet::default();
        let mut failures: HashMap<usize, u32> = HashMap::new();
        let mut completed = 0usize;

        loop {
            while in_flight.len() < self.worker_budget {
                let Some(unit) = queue.dequeue() else { break };
                let attempt = failures.get(&unit.index).copied().unwrap_or(0) + 1;
                pending.push(self.dispatch(unit, attempt, total, &mut in_flight));
            }

            // Empty only when nothing is in flight, which the refill above
            // allows only once the queue is drained too.
            let Some((id, joined)) = pending.next().await else {
                break;
            };
            let Some(InFlight { unit, attempt, .. }) = in_flight.remove(id) else {
                return Err(Doc2MdError::Internal(format!(
                    "completion for unknown task {:?}",
                    id
                )));
            };

            let outcome = joined.unwrap_or_else(|e| {
                Err(UnitError::Panicked {
                    index: unit.index,
                    detail: e.to_string(),
                })
            });

            match outcome {
                Ok(success) => {
                    let result = self.record(&unit, attempt, success);
                    completed += 1;
                    debug!(
                        "Unit {} done on attempt {} ({}/{})",
                        unit.index, attempt, completed, total
                    );
                    if let Some(ref cb) = self.progress {
                        cb.on_unit_complete(&result, completed, total);
                    }
                    results.insert(result);
                }
                Err(error) => {
                    warn!("Attempt {} failed: {}", attempt, error);
                    failures.insert(unit.index, attempt);
                    if let Some(ref cb) = self.progress {
                        cb.on_unit_error(&error, attempt, total);
                    }
                    if !self.retry_policy.permits_retry(attempt) {
                        return Err(Doc2MdError::RetriesExhausted {
                            index: unit.index,
                            attempts: attempt,
                            last_error: error.to_string(),
                        });
                    }
                    results.retried_attempts += 1;
                    queue.enqueue(unit);
                }
            }
        }

        debug_assert!(queue.is_empty() && in_flight.len() == 0);
        debug_assert_eq!(results.len(), total);

        info!(
            "Processed {} units in {}ms ({} retried attempts)",
            total,
            started.elapsed().as_millis(),
            results.retried_attempts
        );
        if let Some(ref cb) = self.progress {
            cb.on_conversion_complete(total);
        }
        Ok(results)
    }

    /// Spawn one attempt and register it in the in-flight set.
    fn dispatch(
        &self,
        unit: UnitDescriptor,
        attempt: u32,
        total: usize,
        in_flight: &mut InFlightSet,
    ) -> Completion {
        debug!("Dispatching unit {} (attempt {})", unit.index, attempt);
        if let Some(ref cb) = self.progress {
            cb.on_unit_start(unit.index, attempt, total);
        }

        let handle = tokio::spawn(run_attempt(
            unit.clone(),
            backoff_delay(self.backoff_ms, attempt),
            Arc::clone(&self.renderer),
            Arc::clone(&self.transcriber),
            self.content_policy,
        ));
        let id = in_flight.insert(unit, attempt, handle.abort_handle());
        async move { (id, handle.await) }.boxed()
    }

    /// Turn a worker's success into the recorded result, applying the
    /// content-policy placeholder when the text was flagged.
    fn record(&self, unit: &UnitDescriptor, attempt: u32, success: WorkerSuccess) -> UnitResult {
        let WorkerSuccess {
            transcription,
            verdict,
            duration_ms,
        } = success;

        let (text, degenerate) = match verdict {
            ContentVerdict::Accepted => (transcription.text, false),
            ContentVerdict::Degenerate { period, repeats, .. } => {
                warn!(
                    "Unit {}: degenerate output ({}-char pattern repeated {} times), using placeholder",
                    unit.index, period, repeats
                );
                (placeholder(unit.source_number, period, repeats), true)
            }
        };

        UnitResult {
            index: unit.index,
            source_number: unit.source_number,
            text,
            attempts: attempt,
            input_tokens: transcription.input_tokens,
            output_tokens: transcription.output_tokens,
            duration_ms,
            degenerate,
        }
    }
}

/// Delay before `attempt`: none for the first, then `base * 2^(retry - 1)`.
fn backoff_delay(base_ms: u64, attempt: u32) -> Option<Duration> {
    if base_ms == 0 || attempt <= 1 {
        return None;
    }
    let factor = 2u64.saturating_pow(attempt - 2);
    Some(Duration::from_millis(
        base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS),
    ))
}

/// One attempt at one unit. Runs in its own task; shares nothing mutable.
async fn run_attempt(
    unit: UnitDescriptor,
    delay: Option<Duration>,
    renderer: Arc<dyn UnitRenderer>,
    transcriber: Arc<dyn Transcriber>,
    content_policy: Option<ContentPolicy>,
) -> Result<WorkerSuccess, UnitError> {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let start = Instant::now();
    let index = unit.index;

    let bitmap = tokio::task::spawn_blocking(move || renderer.render(&unit))
        .await
        .map_err(|e| UnitError::Panicked {
            index,
            detail: format!("render task: {e}"),
        })??;

    let transcription = transcriber
        .transcribe(&bitmap)
        .await
        .map_err(|source| UnitError::Transcription { index, source })?;

    let verdict = content_policy
        .map(|policy| policy.screen(&transcription.text))
        .unwrap_or(ContentVerdict::Accepted);

    Ok(WorkerSuccess {
        transcription,
        verdict,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
