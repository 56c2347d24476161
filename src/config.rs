//! Configuration types for document-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One struct holds every knob so a run
//! can be logged, cloned into worker tasks, and compared against another run.

use crate::error::Doc2MdError;
use crate::pipeline::policy::ContentPolicy;
use crate::pipeline::pool::RetryPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Worker budget used when neither the builder nor `MAX_WORKERS` sets one.
pub const DEFAULT_WORKER_BUDGET: usize = 5;

/// Environment variable that overrides [`DEFAULT_WORKER_BUDGET`].
pub const WORKER_BUDGET_ENV: &str = "MAX_WORKERS";

/// Configuration for a conversion run.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_doc2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .worker_budget(8)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// assert_eq!(config.worker_budget, 8);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Maximum number of units in flight at once. Default: 5, or `MAX_WORKERS`.
    ///
    /// Each in-flight unit holds one rendered bitmap and one open VLM request.
    /// Lower it when the provider answers with `429`.
    pub worker_budget: usize,

    /// Rendering DPI for PDF pages and slides. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest edge of a rendered bitmap in pixels. Default: 2000.
    ///
    /// Applies to every document kind: large raster inputs are downscaled to it.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the LLM completion. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per unit. Default: 4096.
    pub max_tokens: usize,

    /// How failed units are retried. Default: [`RetryPolicy::Unbounded`].
    pub retry_policy: RetryPolicy,

    /// Base delay before a retried attempt, doubled per attempt. Default: 0.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in prompt for `task`.
    pub system_prompt: Option<String>,

    /// Transcribe verbatim or translate. Default: [`TranscriptionTask::Transcribe`].
    pub task: TranscriptionTask,

    /// Unit selection (pages, slides or images, 1-indexed). Default: all.
    pub pages: PageSelection,

    /// Screening of degenerate model output. `None` disables it.
    pub content_policy: Option<ContentPolicy>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-VLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Receives per-unit progress and diagnostic events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            worker_budget: default_worker_budget(),
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            retry_policy: RetryPolicy::default(),
            retry_backoff_ms: 0,
            password: None,
            system_prompt: None,
            task: TranscriptionTask::default(),
            pages: PageSelection::default(),
            content_policy: Some(ContentPolicy::default()),
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("worker_budget", &self.worker_budget)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry_policy", &self.retry_policy)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("task", &self.task)
            .field("pages", &self.pages)
            .field("content_policy", &self.content_policy)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Read the environment-level default worker budget.
pub fn default_worker_budget() -> usize {
    parse_worker_budget(std::env::var(WORKER_BUDGET_ENV).ok().as_deref())
}

/// Parse a worker budget override; anything missing, unparsable or zero
/// falls back to [`DEFAULT_WORKER_BUDGET`].
pub fn parse_worker_budget(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_WORKER_BUDGET)
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn worker_budget(mut self, n: usize) -> Self {
        self.config.worker_budget = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn task(mut self, task: TranscriptionTask) -> Self {
        self.config.task = task;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn content_policy(mut self, policy: Option<ContentPolicy>) -> Self {
        self.config.content_policy = policy;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Doc2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Doc2MdError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.worker_budget == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "Worker budget must be ≥ 1".into(),
            ));
        }
        if let TranscriptionTask::Translate { ref target_language } = c.task {
            if target_language.trim().is_empty() {
                return Err(Doc2MdError::InvalidConfig(
                    "Translation target language must not be empty".into(),
                ));
            }
        }
        if let Some(ref policy) = c.content_policy {
            policy.validate()?;
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the vision model is asked to do with each unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TranscriptionTask {
    /// Reproduce the unit's text verbatim as Markdown. (default)
    #[default]
    Transcribe,
    /// Translate the unit's text into `target_language`, keeping the layout.
    Translate { target_language: String },
}

/// Specifies which units of the document to convert.
///
/// Numbers are 1-indexed page, slide or image positions in the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert everything (default).
    #[default]
    All,
    /// Convert a single unit.
    Single(usize),
    /// Convert a contiguous inclusive range.
    Range(usize, usize),
    /// Convert specific units (deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed positions.
    pub fn to_indices(&self, total: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total).collect(),
            PageSelection::Single(p) if (1..=total).contains(p) => vec![p - 1],
            PageSelection::Single(_) => vec![],
            PageSelection::Range(start, end) => ((*start).max(1) - 1..(*end).min(total)).collect(),
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|p| (1..=total).contains(*p))
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Parses `all`, `5`, `3-15` or `1,3,5`. Numbers are 1-indexed.
impl FromStr for PageSelection {
    type Err = Doc2MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let number = |raw: &str| -> Result<usize, Doc2MdError> {
            match raw.trim().parse::<usize>() {
                Ok(0) => Err(Doc2MdError::InvalidConfig(
                    "Pages are 1-indexed, minimum is 1 (got 0)".into(),
                )),
                Ok(n) => Ok(n),
                Err(_) => Err(Doc2MdError::InvalidConfig(format!(
                    "Invalid page number: '{}'",
                    raw.trim()
                ))),
            }
        };

        if s == "all" {
            Ok(PageSelection::All)
        } else if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (number(start)?, number(end)?);
            if start > end {
                return Err(Doc2MdError::InvalidConfig(format!(
                    "Invalid page range '{start}-{end}': start must be <= end"
                )));
            }
            Ok(PageSelection::Range(start, end))
        } else if s.contains(',') {
            s.split(',')
                .map(number)
                .collect::<Result<Vec<_>, _>>()
                .map(PageSelection::Set)
        } else {
            number(&s).map(PageSelection::Single)
        }
    }
}
