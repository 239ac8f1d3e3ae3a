//! CLI binary for planbom.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use planbom::{
    analyze_image, analyze_pdf, assemble, compile_latex, AnalysisConfig,
    AnalysisProgressCallback, BatchReport, Bom, ProgressCallback, RasterFormat, SessionContext,
    UnitReport,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch plus a per-unit log
/// line, correct even when units complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_units: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_units as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
    }

    fn on_unit_start(&self, unit: usize, _total: usize) {
        self.bar.set_message(format!("unit {unit}"));
    }

    fn on_unit_complete(&self, unit: usize, total: usize, item_count: usize, partial: bool) {
        let tag = if partial {
            cyan("partial")
        } else {
            dim("clean")
        };
        self.bar.println(format!(
            "  {} Unit {:>3}/{:<3}  {:>3} items  {}",
            green("✓"),
            unit,
            total,
            item_count,
            tag,
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, unit: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = truncate(error, 80);
        self.bar.println(format!(
            "  {} Unit {:>3}/{:<3}  {}",
            red("✗"),
            unit,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_units: usize, success_count: usize) {
        let failed = total_units.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} units extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} units extracted  ({} failed)",
                if failed == total_units {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_units,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a BOM from a drawing image
  planbom analyze drawing.png

  # BOM only, as JSON
  planbom bom drawing.png --json

  # Every page of a PDF, saving results
  planbom pdf doors.pdf --save --context "residential door schedule"

  # Assemble a LaTeX report from saved sessions
  planbom latex 6f9b... 12ac... -o report.tex

  # Compile the report to PDF (requires pdflatex)
  planbom latex 6f9b... --compile -o report.pdf

  # Guided menu
  planbom interactive

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY        OpenAI API key
  ANTHROPIC_API_KEY     Anthropic API key
  PLANBOM_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  PLANBOM_MODEL         Override model ID

EXTERNAL TOOLS:
  pdftoppm / pdfinfo    PDF rasterization (install poppler-utils)
  pdflatex              Report compilation (any TeX distribution)
"#;

/// Extract Bills of Materials from engineering drawings using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "planbom",
    version,
    about = "Extract Bills of Materials from engineering drawings using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vision model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "PLANBOM_MODEL")]
    model: Option<String>,

    /// Provider: openai, anthropic, gemini, ollama. Auto-detected from
    /// API key env vars if not set.
    #[arg(long, global = true, env = "PLANBOM_LLM_PROVIDER")]
    provider: Option<String>,

    /// Directory for saved extraction sessions.
    #[arg(long, global = true, env = "PLANBOM_STORE_DIR", default_value = ".planbom")]
    store_dir: PathBuf,

    /// Output structured JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "PLANBOM_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PLANBOM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PLANBOM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a single drawing image (path or URL).
    Analyze {
        /// Drawing image: local path or HTTP/HTTPS URL.
        image: String,

        /// Write the result to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save the result into the session store.
        #[arg(short, long)]
        save: bool,

        /// Free-text context forwarded to the extraction service.
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Extract the BOM from a single image, output only.
    Bom {
        /// Drawing image: local path or HTTP/HTTPS URL.
        image: String,

        /// Write the BOM to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Free-text context forwarded to the extraction service.
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Analyze every page of a PDF as a concurrent batch.
    Pdf {
        /// PDF document: local path or HTTP/HTTPS URL.
        file: String,

        /// Write the batch report to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save each page's result into the session store.
        #[arg(short, long)]
        save: bool,

        /// Free-text context forwarded to the extraction service.
        #[arg(short, long)]
        context: Option<String>,

        /// Rasterization format: png or jpeg.
        #[arg(short, long, default_value = "png")]
        format: RasterFormat,

        /// Rasterization DPI (72–600).
        #[arg(short, long, default_value_t = 300,
              value_parser = clap::value_parser!(u32).range(72..=600))]
        dpi: u32,

        /// Pages extracted concurrently.
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
    },

    /// Assemble a LaTeX report from saved sessions.
    Latex {
        /// Session ids from the store (see `interactive` → list).
        #[arg(required = true)]
        session_ids: Vec<String>,

        /// Output path (.tex, or .pdf with --compile). Default: stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compile the report with pdflatex instead of emitting LaTeX.
        #[arg(long)]
        compile: bool,

        /// Report title.
        #[arg(long, default_value = "Bill of Materials")]
        title: String,

        /// Summary paragraph placed before the sections.
        #[arg(long)]
        summary: Option<String>,
    },

    /// Guided menu for analyze / list / report workflows.
    Interactive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress INFO-level library logs while the progress bar is active;
    // the bar is the feedback channel.
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && !matches!(cli.command, Command::Latex { .. });
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

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };

    match cli.command {
        Command::Analyze {
            ref image,
            ref output,
            save,
            ref context,
        } => {
            let config = build_config(&cli, context.clone(), None, None, None, progress)?;
            let session = make_session(&cli, save)?;
            let report = analyze_image(image, &config, &session).await?;
            emit_unit_report(&cli, &report, output.as_deref())?;
            std::process::exit(if report.succeeded() { 0 } else { 1 });
        }

        Command::Bom {
            ref image,
            ref output,
            ref context,
        } => {
            let config = build_config(&cli, context.clone(), None, None, None, progress)?;
            let session = SessionContext::ephemeral();
            let report = analyze_image(image, &config, &session).await?;
            match report.bom {
                Some(ref bom) => emit_bom(&cli, bom, output.as_deref())?,
                None => {
                    if let Some(ref e) = report.error {
                        anyhow::bail!("extraction failed: {e}");
                    }
                }
            }
        }

        Command::Pdf {
            ref file,
            ref output,
            save,
            ref context,
            format,
            dpi,
            concurrency,
        } => {
            let config = build_config(
                &cli,
                context.clone(),
                Some(format),
                Some(dpi),
                Some(concurrency),
                progress,
            )?;
            let session = make_session(&cli, save)?;

            // Ctrl-C requests cooperative cancellation; in-flight units
            // finish, the rest report Cancelled.
            let cancel = session.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.store(true, Ordering::SeqCst);
                }
            });

            let report = analyze_pdf(file, &config, &session).await?;
            emit_batch_report(&cli, &report, output.as_deref())?;
            std::process::exit(report.exit_code());
        }

        Command::Latex {
            ref session_ids,
            ref output,
            compile,
            ref title,
            ref summary,
        } => {
            let session = SessionContext::with_store_readonly(&cli.store_dir)?;
            let store = session.store().expect("readonly session always has a store");

            let mut boms: Vec<Bom> = Vec::with_capacity(session_ids.len());
            for id in session_ids {
                boms.push(store.load(id)?.bom);
            }
            let document = assemble(boms, summary.clone(), title.clone())?;
            let latex = document.to_latex();

            if compile {
                let out = output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("report.pdf"));
                compile_latex(&latex, &out).await?;
                if !cli.quiet {
                    eprintln!("{} report → {}", green("✔"), bold(&out.display().to_string()));
                }
            } else if let Some(ref path) = output {
                std::fs::write(path, &latex)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                if !cli.quiet {
                    eprintln!("{} LaTeX → {}", green("✔"), bold(&path.display().to_string()));
                }
            } else {
                print!("{latex}");
            }
        }

        Command::Interactive => {
            run_interactive(&cli).await?;
        }
    }

    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(
    cli: &Cli,
    context: Option<String>,
    format: Option<RasterFormat>,
    dpi: Option<u32>,
    concurrency: Option<usize>,
    progress: Option<ProgressCallback>,
) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder();

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(text) = context {
        builder = builder.context_text(text);
    }
    if let Some(f) = format {
        builder = builder.raster_format(f);
    }
    if let Some(d) = dpi {
        builder = builder.dpi(d);
    }
    if let Some(n) = concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn make_session(cli: &Cli, save: bool) -> Result<SessionContext> {
    if save {
        Ok(SessionContext::with_store(&cli.store_dir)?)
    } else {
        Ok(SessionContext::ephemeral())
    }
}

// ── Output rendering ─────────────────────────────────────────────────────────

fn emit_unit_report(cli: &Cli, report: &UnitReport, output: Option<&std::path::Path>) -> Result<()> {
    let text = if cli.json {
        serde_json::to_string_pretty(report)?
    } else {
        render_unit_report(report)
    };
    write_or_print(&text, output)
}

fn emit_bom(cli: &Cli, bom: &Bom, output: Option<&std::path::Path>) -> Result<()> {
    let text = if cli.json {
        serde_json::to_string_pretty(bom)?
    } else {
        render_bom_table(bom)
    };
    write_or_print(&text, output)
}

fn emit_batch_report(cli: &Cli, report: &BatchReport, output: Option<&std::path::Path>) -> Result<()> {
    let text = if cli.json {
        serde_json::to_string_pretty(report)?
    } else {
        let mut out = String::new();
        for unit in &report.units {
            out.push_str(&render_unit_report(unit));
            out.push('\n');
        }
        out.push_str(&format!(
            "{} succeeded, {} partial, {} failed ({}ms)\n",
            report.succeeded(),
            report.partial(),
            report.failed(),
            report.total_duration_ms,
        ));
        out
    };
    write_or_print(&text, output)
}

fn render_unit_report(report: &UnitReport) -> String {
    let mut out = format!("── {} ", report.source.label());
    out.push_str(&"─".repeat(60usize.saturating_sub(out.chars().count())));
    out.push('\n');

    match (&report.bom, &report.error) {
        (Some(bom), _) => {
            out.push_str(&render_bom_table(bom));
            if let Some(ref id) = report.session_id {
                out.push_str(&format!("session: {id}\n"));
            }
        }
        (None, Some(e)) => {
            out.push_str(&format!("FAILED: {e}\n"));
        }
        (None, None) => out.push_str("no result\n"),
    }
    out
}

fn render_bom_table(bom: &Bom) -> String {
    let mut out = String::new();

    if bom.items.is_empty() {
        out.push_str("(no line items extracted)\n");
    } else {
        out.push_str(&format!(
            "{:<12} {:<34} {:>6} {:<6} {:>10}  {}\n",
            "IDENTIFIER", "DESCRIPTION", "QTY", "UNIT", "WT (kg)", "NOTES"
        ));
        for item in &bom.items {
            let weight = item
                .unit_weight_kg
                .map(|w| format!("{w:.2}"))
                .unwrap_or_default();
            out.push_str(&format!(
                "{:<12} {:<34} {:>6} {:<6} {:>10}  {}\n",
                item.identifier,
                truncate(&item.description, 34),
                item.quantity,
                item.unit.to_string(),
                weight,
                item.notes.as_deref().unwrap_or(""),
            ));
        }
        out.push_str(&format!("total quantity: {}\n", bom.total_quantity()));
    }

    if bom.partial {
        out.push_str("partial extraction; dropped lines:\n");
        for d in &bom.diagnostics {
            out.push_str(&format!("  line {}: {}\n", d.line, d.reason));
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    }
}

fn write_or_print(text: &str, output: Option<&std::path::Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} wrote {}", green("✔"), bold(&path.display().to_string()));
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }
    Ok(())
}

// ── Interactive menu ─────────────────────────────────────────────────────────

async fn run_interactive(cli: &Cli) -> Result<()> {
    println!("{}", bold("planbom — interactive mode"));
    println!("store: {}\n", cli.store_dir.display());

    loop {
        println!("  1) analyze an image");
        println!("  2) analyze a PDF");
        println!("  3) list saved sessions");
        println!("  4) show a saved session");
        println!("  5) build a LaTeX report");
        println!("  q) quit");

        match prompt("> ")?.as_str() {
            "1" => {
                let image = prompt("image path or URL: ")?;
                if image.is_empty() {
                    continue;
                }
                let context = optional(prompt("context (optional): ")?);
                let save = prompt("save result? [y/N] ")?.eq_ignore_ascii_case("y");
                let config = build_config(cli, context, None, None, None, None)?;
                let session = make_session(cli, save)?;
                match analyze_image(&image, &config, &session).await {
                    Ok(report) => print!("{}", render_unit_report(&report)),
                    Err(e) => eprintln!("{} {e}", red("✘")),
                }
            }
            "2" => {
                let file = prompt("PDF path or URL: ")?;
                if file.is_empty() {
                    continue;
                }
                let context = optional(prompt("context (optional): ")?);
                let save = prompt("save results? [y/N] ")?.eq_ignore_ascii_case("y");
                let config = build_config(cli, context, None, None, None, None)?;
                let session = make_session(cli, save)?;
                match analyze_pdf(&file, &config, &session).await {
                    Ok(report) => {
                        for unit in &report.units {
                            print!("{}", render_unit_report(unit));
                        }
                        println!(
                            "{} succeeded, {} failed",
                            report.succeeded(),
                            report.failed()
                        );
                    }
                    Err(e) => eprintln!("{} {e}", red("✘")),
                }
            }
            "3" => {
                let session = SessionContext::with_store_readonly(&cli.store_dir)?;
                let store = session.store().expect("store present");
                let ids = store.list()?;
                if ids.is_empty() {
                    println!("(no saved sessions)");
                }
                for id in ids {
                    match store.load(&id) {
                        Ok(r) => println!(
                            "  {}  {}  {} items{}",
                            id,
                            r.bom.source.label(),
                            r.bom.items.len(),
                            if r.bom.partial { " (partial)" } else { "" },
                        ),
                        Err(e) => println!("  {}  {}", id, red(&e.to_string())),
                    }
                }
            }
            "4" => {
                let id = prompt("session id: ")?;
                if id.is_empty() {
                    continue;
                }
                let session = SessionContext::with_store_readonly(&cli.store_dir)?;
                let store = session.store().expect("store present");
                match store.load(&id) {
                    Ok(r) => print!("{}", render_bom_table(&r.bom)),
                    Err(e) => eprintln!("{} {e}", red("✘")),
                }
            }
            "5" => {
                let ids_line = prompt("session ids (space-separated): ")?;
                let ids: Vec<&str> = ids_line.split_whitespace().collect();
                if ids.is_empty() {
                    continue;
                }
                let out = prompt("output path [report.tex]: ")?;
                let out = if out.is_empty() {
                    PathBuf::from("report.tex")
                } else {
                    PathBuf::from(out)
                };
                let compile = prompt("compile to PDF? [y/N] ")?.eq_ignore_ascii_case("y");

                let session = SessionContext::with_store_readonly(&cli.store_dir)?;
                let store = session.store().expect("store present");
                let result: Result<Vec<Bom>, _> =
                    ids.iter().map(|id| store.load(id).map(|r| r.bom)).collect();
                match result {
                    Ok(boms) => match assemble(boms, None, "Bill of Materials") {
                        Ok(doc) => {
                            let latex = doc.to_latex();
                            if compile {
                                match compile_latex(&latex, &out).await {
                                    Ok(()) => println!("{} report → {}", green("✔"), out.display()),
                                    Err(e) => eprintln!("{} {e}", red("✘")),
                                }
                            } else {
                                std::fs::write(&out, latex)?;
                                println!("{} LaTeX → {}", green("✔"), out.display());
                            }
                        }
                        Err(e) => eprintln!("{} {e}", red("✘")),
                    },
                    Err(e) => eprintln!("{} {e}", red("✘")),
                }
            }
            "q" | "Q" | "quit" | "exit" => break,
            "" => {}
            other => println!("unknown option '{other}'"),
        }
        println!();
    }

    Ok(())
}

fn prompt(msg: &str) -> Result<String> {
    print!("{msg}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        // EOF behaves like quit.
        return Ok("q".to_string());
    }
    Ok(line.trim().to_string())
}

fn optional(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
