//! Artifact resolution: find the compiled output next to the entry point.
//!
//! The compiler writes `<entry stem>.<output extension>` into the directory
//! given by `-output-directory`, which is always the workspace root. Both
//! passes exiting cleanly does not guarantee the file exists (a document
//! with no pages, a misconfigured compiler), so its absence is reported as
//! an internal failure instead of returning an empty body.

use crate::error::Tex2PdfError;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

/// An open handle to the compiled output, plus the metadata a response needs.
///
/// Must be consumed before the workspace is closed.
#[derive(Debug)]
pub struct Artifact {
    /// File name only, e.g. `document.pdf`.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    file: tokio::fs::File,
}

impl Artifact {
    /// Read the whole artifact into memory.
    pub async fn read_all(mut self) -> Result<Vec<u8>, Tex2PdfError> {
        let mut bytes = Vec::with_capacity(self.size as usize);
        self.file
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| {
                Tex2PdfError::Internal(format!(
                    "Failed to read artifact {}: {e}",
                    self.path.display()
                ))
            })?;
        Ok(bytes)
    }
}

/// Derive the artifact file name from the entry point's file name.
///
/// `document.tex` → `document.pdf`; a name without an extension gains one.
pub fn artifact_name(entry_point: &Path, extension: &str) -> Option<String> {
    let file_name = entry_point.file_name()?;
    Path::new(file_name)
        .with_extension(extension)
        .to_str()
        .map(str::to_string)
}

/// Open the artifact produced for `entry_point` in `workspace_root`.
pub async fn resolve_artifact(
    workspace_root: &Path,
    entry_point: &Path,
    extension: &str,
) -> Result<Artifact, Tex2PdfError> {
    let name = artifact_name(entry_point, extension).ok_or_else(|| {
        Tex2PdfError::Internal(format!(
            "Cannot derive artifact name from {}",
            entry_point.display()
        ))
    })?;
    let path = workspace_root.join(&name);

    let missing = |reason: &dyn std::fmt::Display| {
        error!("Artifact {} unavailable: {}", path.display(), reason);
        Tex2PdfError::ArtifactMissing { path: path.clone() }
    };

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| missing(&e))?;
    let meta = file.metadata().await.map_err(|e| missing(&e))?;
    if !meta.is_file() {
        return Err(missing(&"not a regular file"));
    }
    let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());

    debug!("Resolved artifact {} ({} bytes)", path.display(), meta.len());
    Ok(Artifact {
        name,
        path,
        size: meta.len(),
        modified,
        file,
    })
}
