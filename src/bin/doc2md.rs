//! CLI binary for edgequake-doc2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2md::config::DEFAULT_WORKER_BUDGET;
use edgequake_doc2md::{
    convert, convert_to_file, inspect, ContentPolicy, ConversionConfig, ConversionProgressCallback,
    DocumentMetadata, PageSelection, ProgressCallback, RetryPolicy, TranscriptionTask, UnitError,
    UnitResult,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished unit and per failed
/// attempt. Units finish out of order; the bar only counts successes.
struct CliProgressCallback {
    bar: ProgressBar,
    retries: AtomicU64,
}

impl CliProgressCallback {
    /// Starts as a spinner; `on_conversion_start` switches to a bar once the
    /// number of units is known.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            retries: AtomicU64::new(0),
        })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_units: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} units  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_units as u64);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn on_unit_start(&self, index: usize, attempt: u32, _total_units: usize) {
        if attempt > 1 {
            self.bar
                .set_message(format!("unit {} (attempt {attempt})", index + 1));
        }
    }

    fn on_unit_complete(&self, result: &UnitResult, _completed: usize, total_units: usize) {
        let mark = if result.degenerate {
            yellow("◌")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} Unit {:>3}/{:<3}  {:<8}  {}",
            mark,
            result.source_number,
            total_units,
            dim(&format!("{:>5} chars", result.text.len())),
            dim(&format!("{:.1}s", result.duration_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, error: &UnitError, attempt: u32, _total_units: usize) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        let msg: String = error.to_string().chars().take(80).collect();
        self.bar.println(format!(
            "  {} {}  {}",
            yellow("↻"),
            yellow(&msg),
            dim(&format!("attempt {attempt}")),
        ));
    }

    fn on_conversion_complete(&self, total_units: usize) {
        self.bar.finish_and_clear();
        let retries = self.retries.load(Ordering::Relaxed);
        eprintln!(
            "{} {} units converted{}",
            green("✔"),
            bold(&total_units.to_string()),
            if retries > 0 {
                format!("  ({retries} retried attempts)")
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF to stdout
  doc2md report.pdf

  # Slide deck to a file, 8 workers
  doc2md --workers 8 deck.pptx -o deck.md

  # A folder of scans, one unit per image (sorted by file name)
  doc2md scans/ -o scans.md

  # Translate pages 3 to 10 into German
  doc2md --pages 3-10 --translate-to German paper.pdf

  # Give up on a unit after 5 failed attempts instead of retrying forever
  doc2md --max-retries 4 --retry-backoff-ms 500 report.pdf

  # Describe a document (no API key needed)
  doc2md --inspect-only deck.pptx

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  MAX_WORKERS             Default worker budget (units in flight)
  PDFIUM_LIB_PATH         Path to libpdfium; the system library otherwise
  DOC2MD_SOFFICE          LibreOffice binary used for slide decks
"#;

/// Convert PDFs, slide decks and images to Markdown using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md",
    version,
    about = "Convert PDFs, slide decks and images to Markdown using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file, image directory, or HTTP/HTTPS URL.
    input: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "DOC2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Units processed concurrently.
    #[arg(short, long, env = "MAX_WORKERS", default_value_t = DEFAULT_WORKER_BUDGET)]
    workers: usize,

    /// Rendering DPI (72–400).
    #[arg(long, env = "DOC2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest edge of a rendered unit in pixels.
    #[arg(long, env = "DOC2MD_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Unit selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "DOC2MD_PAGES", default_value = "all")]
    pages: String,

    /// Translate into this language instead of transcribing.
    #[arg(long, env = "DOC2MD_TRANSLATE_TO")]
    translate_to: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOC2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOC2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per unit.
    #[arg(long, env = "DOC2MD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOC2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per unit before giving up. Unset: retry until success.
    #[arg(long, env = "DOC2MD_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Base delay before a retry, doubled on each further attempt.
    #[arg(long, env = "DOC2MD_RETRY_BACKOFF_MS", default_value_t = 0)]
    retry_backoff_ms: u64,

    /// Keep looping model output instead of replacing it with a placeholder.
    #[arg(long)]
    no_content_policy: bool,

    /// Output structured JSON (ConversionOutput) instead of Markdown.
    #[arg(long, env = "DOC2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Print document metadata only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2MD_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOC2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "DOC2MD_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; RUST_LOG still wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input)
            .await
            .context("Failed to inspect document")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            print_metadata(&cli.input, &meta);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run conversion ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = convert_to_file(&cli.input, output_path, &config)
            .await
            .context("Conversion failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} units  {}ms  →  {}",
                green("✔"),
                stats.processed_units,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
            eprintln!(
                "   {} tokens in  /  {} tokens out",
                dim(&stats.total_input_tokens.to_string()),
                dim(&stats.total_output_tokens.to_string()),
            );
        }
    } else {
        let output = convert(&cli.input, &config)
            .await
            .context("Conversion failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.markdown.as_bytes())
                .context("Failed to write to stdout")?;
        }

        if !cli.quiet && !cli.json {
            eprintln!(
                "   {} units, {} retried  /  {} tokens in  /  {} tokens out  /  {}ms",
                output.stats.processed_units,
                output.stats.retried_attempts,
                dim(&output.stats.total_input_tokens.to_string()),
                dim(&output.stats.total_output_tokens.to_string()),
                output.stats.total_duration_ms,
            );
        }
    }

    Ok(())
}

fn print_metadata(input: &str, meta: &DocumentMetadata) {
    println!("File:         {}", input);
    println!("Kind:         {}", meta.kind);
    println!("Units:        {}", meta.unit_count);
    let optional = [
        ("Title", &meta.title),
        ("Author", &meta.author),
        ("Subject", &meta.subject),
        ("Creator", &meta.creator),
        ("Producer", &meta.producer),
        ("PDF Version", &meta.pdf_version),
    ];
    for (label, value) in optional {
        if let Some(v) = value {
            println!("{:<13} {}", format!("{label}:"), v);
        }
    }
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let pages: PageSelection = cli.pages.parse().context("Invalid --pages")?;

    let mut builder = ConversionConfig::builder()
        .worker_budget(cli.workers)
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .pages(pages)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(max_retries) = cli.max_retries {
        builder = builder.retry_policy(RetryPolicy::Capped { max_retries });
    }
    builder = builder.content_policy(if cli.no_content_policy {
        None
    } else {
        Some(ContentPolicy::default())
    });
    if let Some(ref language) = cli.translate_to {
        builder = builder.task(TranscriptionTask::Translate {
            target_language: language.clone(),
        });
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
