//! Compile entry points: archive in, PDF out.
//!
//! ## Request lifecycle
//!
//! Every request gets its own [`Workspace`]. The stages run strictly in
//! order and the first failure ends the request:
//!
//! ```text
//! ceiling ──▶ workspace ──▶ extract ──▶ entry point ──▶ pass 1 ──▶ pass 2 ──▶ artifact
//! ```
//!
//! The artifact is read into memory *before* the workspace is removed, so a
//! [`CompiledDocument`] never points into a directory that no longer exists.
//! Removal happens on every path: explicitly via [`Workspace::close`] once
//! the outcome is known, and through `Drop` if the request future is
//! cancelled part-way.

use crate::config::CompileConfig;
use crate::error::{FaultClass, Tex2PdfError};
use crate::output::{ArchiveSummary, CompileStats, CompiledDocument};
use crate::pipeline::workspace::Workspace;
use crate::pipeline::{artifact, compiler, extract, input};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

/// Compile an in-memory ZIP archive.
///
/// This is the core entry point; the other functions in this module load
/// the archive and then call it.
///
/// # Errors
/// Any [`Tex2PdfError`]. Use [`Tex2PdfError::fault`] to tell a bad upload
/// or a broken document apart from a broken host.
pub async fn compile_archive(
    bytes: Vec<u8>,
    config: &CompileConfig,
) -> Result<CompiledDocument, Tex2PdfError> {
    let total_start = Instant::now();
    let ceiling = config.max_upload_bytes();

    if bytes.len() as u64 > ceiling {
        return Err(Tex2PdfError::InvalidUpload {
            reason: format!(
                "Upload is {} bytes; the limit is {} bytes",
                bytes.len(),
                ceiling
            ),
        });
    }

    let workspace = Workspace::create(config.workspace_parent.as_deref())?;
    info!(
        "Compiling {}-byte archive in {}",
        bytes.len(),
        workspace.root().display()
    );

    let result = run(bytes, &workspace, config, total_start).await;
    workspace.close();

    match &result {
        Ok(doc) => info!(
            "Compiled {} ({} bytes) in {}ms",
            doc.name, doc.size, doc.stats.total_duration_ms
        ),
        Err(e) => log_failure(e),
    }
    result
}

async fn run(
    bytes: Vec<u8>,
    workspace: &Workspace,
    config: &CompileConfig,
    total_start: Instant,
) -> Result<CompiledDocument, Tex2PdfError> {
    // ── Step 1: Extract ──────────────────────────────────────────────────
    let extract_start = Instant::now();
    let report = extract::extract(
        bytes,
        workspace.root(),
        config.max_upload_bytes(),
        config.expansion_factor,
    )
    .await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(report.files, report.bytes_written);
    }

    // ── Step 2: Entry point ──────────────────────────────────────────────
    let entry_point = workspace.resolve_entry_point(&config.entry_point)?;

    // ── Step 3: Two passes under one deadline ────────────────────────────
    let compile_start = Instant::now();
    let deadline = tokio::time::Instant::now()
        .checked_add(config.compile_timeout)
        .ok_or_else(|| {
            Tex2PdfError::InvalidConfig(format!(
                "Compile timeout {:?} is too large",
                config.compile_timeout
            ))
        })?;
    let passes = compiler::compile(workspace.root(), &entry_point, deadline, config).await?;
    let compile_duration_ms = compile_start.elapsed().as_millis() as u64;

    // ── Step 4: Artifact ─────────────────────────────────────────────────
    let artifact =
        artifact::resolve_artifact(workspace.root(), &entry_point, &config.output_extension)
            .await?;
    let name = artifact.name.clone();
    let modified = artifact.modified;
    let bytes = artifact.read_all().await?;
    let size = bytes.len() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_artifact_ready(&name, size);
    }

    Ok(CompiledDocument {
        name,
        bytes,
        size,
        modified,
        stats: CompileStats {
            files_extracted: report.files,
            directories_extracted: report.directories,
            bytes_extracted: report.bytes_written,
            passes,
            extract_duration_ms,
            compile_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        },
    })
}

/// Internal faults are operator problems; the rest are the caller's.
fn log_failure(e: &Tex2PdfError) {
    match e.fault() {
        FaultClass::Internal => error!("Compile failed ({}): {}", e.kind(), e),
        FaultClass::Input | FaultClass::Document => {
            warn!("Compile rejected ({}): {}", e.kind(), e)
        }
    }
}

/// Load a ZIP from a local path or URL and compile it.
///
/// # Arguments
/// * `input`  — local file path or HTTP/HTTPS URL; the name must end in `.zip`
/// * `config` — compile configuration
pub async fn compile(
    input: impl AsRef<str>,
    config: &CompileConfig,
) -> Result<CompiledDocument, Tex2PdfError> {
    let input = input.as_ref();
    info!("Starting compile: {}", input);

    let upload = input::load_upload(
        input,
        config.max_upload_bytes(),
        config.download_timeout_secs,
    )
    .await
    .inspect_err(log_failure)?;

    compile_archive(upload.bytes, config).await
}

/// Compile and write the artifact to `output_path`.
///
/// Uses atomic write (temp file + rename) so a failed or interrupted run
/// never leaves a truncated PDF behind.
pub async fn compile_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &CompileConfig,
) -> Result<CompileStats, Tex2PdfError> {
    let doc = compile(input, config).await?;
    let path = output_path.as_ref();
    write_atomic(path, &doc.bytes).await?;
    info!("Wrote {} ({} bytes)", path.display(), doc.size);
    Ok(doc.stats)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Tex2PdfError> {
    let write_failed = |source| Tex2PdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_failed)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(write_failed)?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_failed(e));
    }
    Ok(())
}

/// Synchronous wrapper around [`compile`].
///
/// Creates a temporary tokio runtime internally; do not call it from inside
/// an existing runtime.
pub fn compile_sync(
    input: impl AsRef<str>,
    config: &CompileConfig,
) -> Result<CompiledDocument, Tex2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Tex2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(compile(input, config))
}

/// List an upload's entries without extracting or compiling anything.
///
/// Reports which names would be rejected and whether the declared sizes
/// fit the extraction limit, so a caller can vet an archive up front.
pub async fn inspect(
    input: impl AsRef<str>,
    config: &CompileConfig,
) -> Result<ArchiveSummary, Tex2PdfError> {
    let upload = input::load_upload(
        input.as_ref(),
        config.max_upload_bytes(),
        config.download_timeout_secs,
    )
    .await?;
    inspect_archive(&upload.bytes, config)
}

/// [`inspect`] for bytes already in memory.
pub fn inspect_archive(
    bytes: &[u8],
    config: &CompileConfig,
) -> Result<ArchiveSummary, Tex2PdfError> {
    let entries = extract::list_entries(bytes)?;
    let entry_point = extract::normalize_entry_name(&config.entry_point);

    let has_entry_point = entries.iter().any(|e| {
        !e.is_dir && entry_point.is_some() && extract::normalize_entry_name(&e.name) == entry_point
    });
    let total_declared_bytes = entries.iter().map(|e| e.size).fold(0u64, u64::saturating_add);

    Ok(ArchiveSummary {
        entries,
        total_declared_bytes,
        extraction_limit: config.extraction_limit(),
        has_entry_point,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::tests::zip_of;
    use tempfile::TempDir;

    fn config_in(parent: &TempDir) -> CompileConfig {
        CompileConfig::builder()
            .workspace_parent(parent.path())
            .max_upload_mb(1)
            .build()
            .unwrap()
    }

    fn leftovers(parent: &TempDir) -> usize {
        std::fs::read_dir(parent.path()).unwrap().count()
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_workspace() {
        let parent = TempDir::new().unwrap();
        let config = config_in(&parent);

        let err = compile_archive(vec![0u8; 1024 * 1024 + 1], &config)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "invalid_upload");
        assert_eq!(leftovers(&parent), 0);
    }

    #[tokio::test]
    async fn missing_entry_point_cleans_up() {
        let parent = TempDir::new().unwrap();
        let config = config_in(&parent);
        let bytes = zip_of(&[("main.tex", "\\documentclass{article}")]);

        let err = compile_archive(bytes, &config).await.unwrap_err();

        assert_eq!(err.to_string(), "No document.tex found in the ZIP file");
        assert_eq!(err.status_code(), 400);
        assert_eq!(leftovers(&parent), 0);
    }

    #[tokio::test]
    async fn traversal_cleans_up() {
        let parent = TempDir::new().unwrap();
        let config = config_in(&parent);
        let bytes = zip_of(&[("document.tex", "x"), ("../../escape.txt", "x")]);

        let err = compile_archive(bytes, &config).await.unwrap_err();

        assert_eq!(err.kind(), "path_traversal_rejected");
        assert_eq!(leftovers(&parent), 0);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_is_a_config_error() {
        let parent = TempDir::new().unwrap();
        let mut config = config_in(&parent);
        config.compile_timeout = std::time::Duration::MAX;
        let bytes = zip_of(&[("document.tex", "\\documentclass{article}")]);

        let err = compile_archive(bytes, &config).await.unwrap_err();

        assert_eq!(err.kind(), "invalid_config");
        assert_eq!(leftovers(&parent), 0);
    }

    #[test]
    fn inspect_reports_entry_point_and_limits() {
        let config = CompileConfig::default();
        let bytes = zip_of(&[
            ("./document.tex", "hello"),
            ("figs/", ""),
            ("figs/a.png", "png"),
        ]);

        let summary = inspect_archive(&bytes, &config).unwrap();

        assert!(summary.has_entry_point);
        assert_eq!(summary.total_declared_bytes, 8);
        assert_eq!(summary.extraction_limit, 50 * 1024 * 1024 * 5);
        assert!(summary.would_extract());
    }

    #[test]
    fn inspect_without_entry_point() {
        let config = CompileConfig::default();
        let bytes = zip_of(&[("sub/document.tex", "hello")]);
        let summary = inspect_archive(&bytes, &config).unwrap();
        assert!(!summary.has_entry_point);
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/document.pdf");

        write_atomic(&path, b"%PDF-1.5").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
