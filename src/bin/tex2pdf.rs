//! CLI binary for edgequake-tex2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `CompileConfig`, writes the PDF, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_tex2pdf::pipeline::artifact::artifact_name;
use edgequake_tex2pdf::{
    compile, compile_to_file, inspect, CompilePass, CompileConfig, CompileProgressCallback,
    CompileStats, FaultClass, ProgressCallback, Tex2PdfError,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that narrates the pipeline stages.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Extracting archive…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl CompileProgressCallback for CliProgressCallback {
    fn on_extraction_complete(&self, files: usize, bytes: u64) {
        self.bar.println(format!(
            "  {} Extracted {} files  {}",
            green("✓"),
            files,
            dim(&format!("{bytes} bytes"))
        ));
    }

    fn on_pass_start(&self, pass: CompilePass) {
        self.bar.set_prefix("Compiling");
        self.bar.set_message(format!("pass {pass}/2"));
    }

    fn on_pass_complete(&self, pass: CompilePass, duration_ms: u64) {
        self.bar.println(format!(
            "  {} Pass {}/2  {}",
            green("✓"),
            pass,
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_pass_error(&self, pass: CompilePass, error: &str) {
        let msg = match error.char_indices().nth(80) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} Pass {}/2  {}", red("✗"), pass, red(&msg)));
        self.bar.finish_and_clear();
    }

    fn on_artifact_ready(&self, name: &str, size: u64) {
        self.bar.finish_and_clear();
        eprintln!("{} {} ({} bytes)", green("✔"), bold(name), size);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compile paper.zip (must contain document.tex) to ./document.pdf
  tex2pdf paper.zip

  # Choose the output path
  tex2pdf paper.zip -o build/paper.pdf

  # Different entry point, shorter deadline
  tex2pdf --entry-point main.tex --timeout 30 thesis.zip

  # Compile from URL and stream the PDF to stdout
  tex2pdf https://example.com/paper.zip --stdout > paper.pdf

  # List archive entries without compiling
  tex2pdf --inspect-only paper.zip

  # Machine-readable result (stats or error envelope)
  tex2pdf --json paper.zip

EXIT CODES:
  0  success
  1  internal failure (compiler missing, disk error, ...)
  2  bad upload (not a ZIP, too large, unsafe entries, no entry point)
  3  the document did not compile (or hit the deadline)

ENVIRONMENT VARIABLES:
  MAX_UPLOAD_MB        Upload ceiling in megabytes (default 50)
  LATEX_TIMEOUT_SEC    Deadline shared by both compiler passes (default 120)
  TEX_FILENAME         Entry-point file name (default document.tex)
  TEX2PDF_COMPILER     Compiler executable (default pdflatex)
  TEX2PDF_WORKDIR      Parent directory for per-request workspaces
  RUST_LOG             Overrides -v / -q log filtering
"#;

/// Compile zipped LaTeX projects to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "tex2pdf",
    version,
    about = "Compile zipped LaTeX projects to PDF",
    long_about = "Safely extract a ZIP archive of LaTeX sources into a throwaway workspace, \
run pdflatex twice under one deadline, and write the resulting PDF.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local ZIP file path or HTTP/HTTPS URL.
    input: String,

    /// Write the PDF to this file (default: ./<entry stem>.pdf).
    #[arg(short, long, env = "TEX2PDF_OUTPUT", conflicts_with = "stdout")]
    output: Option<PathBuf>,

    /// Write the PDF bytes to stdout.
    #[arg(long, conflicts_with = "json")]
    stdout: bool,

    /// Upload ceiling in megabytes.
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: u64,

    /// Uncompressed size allowed per byte of upload ceiling.
    #[arg(long, env = "TEX2PDF_EXPANSION_FACTOR", default_value_t = 5)]
    expansion_factor: u64,

    /// Deadline in seconds shared by both compiler passes.
    #[arg(long = "timeout", env = "LATEX_TIMEOUT_SEC", default_value_t = 120)]
    timeout_secs: u64,

    /// Entry-point file name at the archive root.
    #[arg(long, env = "TEX_FILENAME", default_value = "document.tex")]
    entry_point: String,

    /// Compiler executable.
    #[arg(long, env = "TEX2PDF_COMPILER", default_value = "pdflatex")]
    compiler: String,

    /// Extra compiler argument, placed before the standard ones (repeatable).
    #[arg(long = "compiler-arg", allow_hyphen_values = true)]
    compiler_args: Vec<String>,

    /// Parent directory for per-request workspaces.
    #[arg(long, env = "TEX2PDF_WORKDIR")]
    workdir: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "TEX2PDF_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print JSON (stats on success, error envelope on failure).
    #[arg(long, env = "TEX2PDF_JSON")]
    json: bool,

    /// List archive entries only, no extraction or compilation.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "TEX2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TEX2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TEX2PDF_QUIET")]
    quiet: bool,
}

/// Success envelope for `--json`.
#[derive(Serialize)]
struct JsonSuccess<'a> {
    output: &'a Path,
    stats: &'a CompileStats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are noise next to the spinner.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
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

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_failure(&cli, &err),
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn CompileProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let summary = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect archive")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
            );
        } else {
            println!("File:           {}", cli.input);
            println!("Entries:        {}", summary.entries.len());
            println!(
                "Declared size:  {} bytes (limit {})",
                summary.total_declared_bytes, summary.extraction_limit
            );
            println!(
                "Entry point:    {} {}",
                config.entry_point,
                if summary.has_entry_point {
                    green("found")
                } else {
                    red("missing")
                }
            );
            for entry in &summary.entries {
                let marker = if entry.safe { " " } else { "!" };
                println!(
                    "  {marker} {:>10}  {}{}",
                    entry.size,
                    entry.name,
                    if entry.is_dir { dim(" (dir)") } else { String::new() }
                );
            }
            if summary.rejected().next().is_some() {
                println!("{}", red("Entries marked ! would be rejected."));
            }
        }
        return Ok(());
    }

    // ── PDF to stdout ────────────────────────────────────────────────────
    if cli.stdout {
        let doc = compile(&cli.input, &config)
            .await
            .context("Compilation failed")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(&doc.bytes)
            .context("Failed to write to stdout")?;
        handle.flush().context("Failed to flush stdout")?;
        return Ok(());
    }

    // ── PDF to file ──────────────────────────────────────────────────────
    let output_path = match cli.output {
        Some(ref p) => p.clone(),
        None => default_output_path(&config)?,
    };

    let stats = compile_to_file(&cli.input, &output_path, &config)
        .await
        .context("Compilation failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&JsonSuccess {
            output: &output_path,
            stats: &stats,
        })
        .context("Failed to serialise stats")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{}  {} passes  {}ms  →  {}",
            green("✔"),
            stats.passes.len(),
            stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
    }

    Ok(())
}

/// `./<entry stem>.<ext>` in the current directory.
fn default_output_path(config: &CompileConfig) -> Result<PathBuf> {
    let name = artifact_name(Path::new(&config.entry_point), &config.output_extension)
        .context("Cannot derive an output file name from the entry point")?;
    Ok(PathBuf::from(name))
}

/// Map CLI args to `CompileConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<CompileConfig> {
    let mut builder = CompileConfig::builder()
        .max_upload_mb(cli.max_upload_mb)
        .expansion_factor(cli.expansion_factor)
        .compile_timeout_secs(cli.timeout_secs)
        .entry_point(&cli.entry_point)
        .compiler(&cli.compiler)
        .compiler_args(&cli.compiler_args)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref dir) = cli.workdir {
        builder = builder.workspace_parent(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Print the failure and choose the exit code from its fault class.
fn report_failure(cli: &Cli, err: &anyhow::Error) -> ExitCode {
    let typed = err.downcast_ref::<Tex2PdfError>();

    if cli.json {
        let report = match typed {
            Some(e) => serde_json::to_string_pretty(&e.report()),
            None => serde_json::to_string_pretty(&serde_json::json!({
                "error": format!("{err:#}"),
                "kind": "internal",
                "fault": "internal",
            })),
        };
        match report {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to serialise error report: {e}"),
        }
    } else {
        eprintln!("{} {:#}", red("✘"), err);
        if let Some(Tex2PdfError::CompilationFailed {
            diagnostic,
            output_tail,
            ..
        }) = typed
        {
            if let Some(d) = diagnostic {
                eprintln!("  {} {}", bold("First error:"), d);
            }
            if cli.verbose && !output_tail.is_empty() {
                eprintln!("{}", dim("── compiler output (tail) ──"));
                eprintln!("{output_tail}");
            }
        }
    }

    match typed.map(Tex2PdfError::fault) {
        Some(FaultClass::Input) => ExitCode::from(2),
        Some(FaultClass::Document) => ExitCode::from(3),
        Some(FaultClass::Internal) | None => ExitCode::from(1),
    }
}
