//! # edgequake-tex2pdf
//!
//! Compile a zipped LaTeX project to PDF: safely unpack an untrusted archive
//! into a throwaway workspace, run `pdflatex` twice under one deadline, and
//! hand back the PDF.
//!
//! ## Why this crate?
//!
//! Accepting LaTeX sources from strangers is risky in two directions. The
//! archive itself can be hostile (`../` entries, absolute paths, a few KB
//! that inflate to gigabytes), and the compiler can run forever on a
//! pathological document. This crate treats both as first-class failure
//! modes: every entry is bounded and confined to its workspace, every
//! compile races a wall-clock deadline, and every workspace is removed on
//! every exit path.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ZIP
//!  │
//!  ├─ 1. Upload     path or URL → bytes, `.zip` name, size ceiling
//!  ├─ 2. Workspace  fresh `latex-*` temp dir owned by the request
//!  ├─ 3. Extract    declared + actual size budget, traversal rejection
//!  ├─ 4. Entry      `document.tex` must exist at the archive root
//!  ├─ 5. Compile    pdflatex ×2, nonstopmode, one shared deadline
//!  └─ 6. Artifact   `document.pdf` read back, workspace removed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_tex2pdf::{compile, CompileConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CompileConfig::default();
//!     let doc = compile("paper.zip", &config).await?;
//!     std::fs::write(&doc.name, &doc.bytes)?;
//!     eprintln!("{} bytes in {}ms", doc.size, doc.stats.total_duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Every failure is a [`Tex2PdfError`]. [`Tex2PdfError::fault`] sorts it into
//! input, document and internal faults, and [`Tex2PdfError::status_code`]
//! maps those onto 400 / 500 / 500 for HTTP front-ends.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tex2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-tex2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compile;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use compile::{compile, compile_archive, compile_sync, compile_to_file, inspect, inspect_archive};
pub use config::{CompileConfig, CompileConfigBuilder};
pub use error::{CompilePass, ErrorReport, FaultClass, Tex2PdfError};
pub use output::{ArchiveEntry, ArchiveSummary, CompileStats, CompiledDocument, PassReport};
pub use pipeline::diagnose::TexDiagnostic;
pub use progress::{CompileProgressCallback, NoopProgressCallback, ProgressCallback};
