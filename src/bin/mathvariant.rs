//! CLI binary for mathvariant.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints the worksheet.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mathvariant::analyze::write_atomic;
use mathvariant::sheet::{answer_key, worksheet, SheetOptions};
use mathvariant::{
    analyze_file, AnalysisResult, PipelineConfig, PipelineProgressCallback, ProgressCallback,
    UnitSlot, ValidationPolicy,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the photo is read, then a bar over the diagram requests.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<UnitSlot, Instant>>,
    extraction_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Reading");
        bar.set_message("Sending photo to the model…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            extraction_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} diagrams  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Drawing");
        self.bar.reset_eta();
    }

    fn elapsed(&self, slot: UnitSlot) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&slot))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self) {
        if let Ok(mut t) = self.extraction_started.lock() {
            *t = Some(Instant::now());
        }
    }

    fn on_extraction_complete(&self, problem_sets: usize, images: usize) {
        let secs = self
            .extraction_started
            .lock()
            .ok()
            .and_then(|t| *t)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{problem_sets} problems read, {images} diagrams to draw")),
            dim(&format!("{secs:.1}s")),
        ));
        if images == 0 {
            self.bar.finish_and_clear();
        } else {
            self.activate_bar(images);
        }
    }

    fn on_extraction_error(&self, attempt: u32, error: &str) {
        self.bar.println(format!(
            "  {} attempt {}  {}",
            red("✗"),
            attempt,
            red(&truncate(error, 80)),
        ));
    }

    fn on_image_start(&self, slot: UnitSlot, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(slot, Instant::now());
        }
        self.bar.set_message(slot.to_string());
    }

    fn on_image_complete(&self, slot: UnitSlot, _total: usize, bytes: usize) {
        let secs = self.elapsed(slot);
        self.bar.println(format!(
            "  {} {:<24}  {:<10}  {}",
            green("✓"),
            slot.to_string(),
            dim(&format!("{:>5} KiB", bytes / 1024)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, slot: UnitSlot, _total: usize, error: &str) {
        let secs = self.elapsed(slot);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<24}  {}  {}",
            red("✗"),
            slot.to_string(),
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_imaging_complete(&self, requested: usize, attached: usize) {
        self.bar.finish_and_clear();
        let failed = requested.saturating_sub(attached);
        if failed == 0 {
            eprintln!("{} {} diagrams drawn", green("✔"), bold(&attached.to_string()));
        } else {
            eprintln!(
                "{} {}/{} diagrams drawn  ({} left text-only)",
                cyan("⚠"),
                bold(&attached.to_string()),
                requested,
                red(&failed.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Worksheet with answer key (stdout)
  mathvariant homework.jpg

  # Write to file, five variations per problem
  mathvariant homework.jpg --variations 5 -o practice.md

  # Answer key only
  mathvariant homework.jpg --answers-only

  # Structured JSON (the full problem tree, diagrams as base64)
  mathvariant homework.jpg --json -o result.json

  # Text only, no diagram generation
  mathvariant homework.jpg --no-images

  # Variations in another language
  mathvariant https://example.com/quiz.png --language "Traditional Chinese"

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini key (extraction and diagrams)
  GOOGLE_API_KEY          Fallback key for diagrams
  OPENAI_API_KEY          OpenAI key (extraction only)
  ANTHROPIC_API_KEY       Anthropic key (extraction only)
  MATHVARIANT_PROVIDER    Override provider (gemini, openai, anthropic, ollama)
  MATHVARIANT_MODEL       Override extraction model ID

Diagrams need a Gemini key. Without one, figure problems are still
extracted and varied, just without pictures.
"#;

/// Turn a photo of math problems into practice variations with diagrams.
#[derive(Parser, Debug)]
#[command(
    name = "mathvariant",
    version,
    about = "Turn a photo of math problems into practice variations with diagrams",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PNG/JPEG path or HTTP/HTTPS URL.
    input: String,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "MATHVARIANT_OUTPUT")]
    output: Option<PathBuf>,

    /// Extraction model ID (e.g. gemini-2.5-flash, gpt-4.1).
    #[arg(long, env = "MATHVARIANT_MODEL")]
    model: Option<String>,

    /// Extraction provider: gemini, openai, anthropic, ollama.
    #[arg(long, env = "MATHVARIANT_PROVIDER")]
    provider: Option<String>,

    /// Variations per problem (1–10).
    #[arg(short = 'n', long, env = "MATHVARIANT_VARIATIONS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    variations: u32,

    /// Output language for problems and answers (default: the photo's).
    #[arg(long, env = "MATHVARIANT_LANGUAGE")]
    language: Option<String>,

    /// Skip diagram generation.
    #[arg(long, env = "MATHVARIANT_NO_IMAGES")]
    no_images: bool,

    /// Image generation model.
    #[arg(long, env = "MATHVARIANT_IMAGE_MODEL", default_value = "gemini-2.5-flash-image")]
    image_model: String,

    /// Diagram aspect ratio, e.g. 1:1 or 4:3.
    #[arg(long, env = "MATHVARIANT_ASPECT_RATIO", default_value = "1:1")]
    aspect_ratio: String,

    /// Number of concurrent diagram requests.
    #[arg(short, long, env = "MATHVARIANT_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// What to do when generated variations break the rules.
    #[arg(long, env = "MATHVARIANT_VALIDATION", value_enum, default_value = "warn")]
    validation: ValidationArg,

    /// Path to a text file containing custom extraction instructions.
    #[arg(long, env = "MATHVARIANT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max output tokens for extraction.
    #[arg(long, env = "MATHVARIANT_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Extraction temperature (0.0–2.0).
    #[arg(long, env = "MATHVARIANT_TEMPERATURE", default_value_t = 0.4)]
    temperature: f32,

    /// Retries of failed provider calls, and re-asks after --validation reject.
    #[arg(long, env = "MATHVARIANT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Output the full problem tree as JSON instead of Markdown.
    #[arg(long, env = "MATHVARIANT_JSON", conflicts_with = "answers_only")]
    json: bool,

    /// Print only the answer key.
    #[arg(long)]
    answers_only: bool,

    /// Leave the original problems out of the worksheet.
    #[arg(long)]
    no_originals: bool,

    /// Worksheet title.
    #[arg(long, default_value = "Practice Worksheet")]
    title: String,

    /// Disable progress bar.
    #[arg(long, env = "MATHVARIANT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MATHVARIANT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MATHVARIANT_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MATHVARIANT_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Extraction call timeout in seconds.
    #[arg(long, env = "MATHVARIANT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Per-diagram call timeout in seconds.
    #[arg(long, env = "MATHVARIANT_IMAGE_TIMEOUT", default_value_t = 90)]
    image_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ValidationArg {
    Off,
    Warn,
    Reject,
}

impl From<ValidationArg> for ValidationPolicy {
    fn from(v: ValidationArg) -> Self {
        match v {
            ValidationArg::Off => ValidationPolicy::Off,
            ValidationArg::Warn => ValidationPolicy::Warn,
            ValidationArg::Reject => ValidationPolicy::Reject,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let started = Instant::now();
    let result = analyze_file(&cli.input, &config)
        .await
        .context("Analysis failed")?;

    let rendered = render(&cli, &result)?;

    if let Some(ref output_path) = cli.output {
        write_atomic(output_path, rendered.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
        if !rendered.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        let variations: usize = result.problems.iter().map(|s| s.variations.len()).sum();
        eprintln!(
            "{}  {} problems  {} variations  {} diagrams  {}ms{}",
            green("✔"),
            result.problems.len(),
            variations,
            result.image_count(),
            started.elapsed().as_millis(),
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
    }

    Ok(())
}

fn render(cli: &Cli, result: &AnalysisResult) -> Result<String> {
    if cli.json {
        return serde_json::to_string_pretty(result).context("Failed to serialise output");
    }
    if cli.answers_only {
        return Ok(answer_key(result));
    }
    let options = SheetOptions {
        title: cli.title.clone(),
        include_originals: !cli.no_originals,
        include_images: !cli.no_images,
        include_answers: true,
    };
    Ok(worksheet(result, &options))
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .variations_per_problem(cli.variations as usize)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .concurrency(cli.concurrency)
        .images_enabled(!cli.no_images)
        .image_model(&cli.image_model)
        .aspect_ratio(&cli.aspect_ratio)
        .validation(cli.validation.clone().into())
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .image_timeout_secs(cli.image_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref language) = cli.language {
        builder = builder.language(language);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
