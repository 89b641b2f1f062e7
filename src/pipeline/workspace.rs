//! Per-request workspace: an exclusively-owned temporary directory.
//!
//! Everything a request writes (extracted sources, compiler aux files, the
//! PDF) lives under one `latex-*` directory created by [`tempfile`]. The
//! [`Workspace`] owns that directory; [`Workspace::close`] removes it and
//! reports failures, and `Drop` removes it on every other exit path
//! (early `?` returns, cancellation, panics).

use crate::error::Tex2PdfError;
use crate::pipeline::extract::normalize_entry_name;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const WORKSPACE_PREFIX: &str = "latex-";

/// An isolated directory owned by exactly one request.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> Result<Self, Tex2PdfError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);

        let dir = match parent {
            Some(p) => builder.tempdir_in(p),
            None => builder.tempdir(),
        }
        .map_err(|source| Tex2PdfError::WorkspaceUnavailable { source })?;

        debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Root directory of the workspace.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Locate the entry-point file by its fixed name.
    pub fn resolve_entry_point(&self, name: &str) -> Result<PathBuf, Tex2PdfError> {
        resolve_entry_point(self.root(), name)
    }

    /// Recursively remove the workspace, logging rather than failing.
    ///
    /// The request outcome is already decided when this runs; a cleanup
    /// failure must not mask it.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed workspace {}", path.display()),
            Err(e) => warn!("Failed to remove workspace {}: {}", path.display(), e),
        }
    }
}

/// Locate `name` under `root`; it must exist and be a regular file.
///
/// Pure existence check: the content is not inspected.
pub fn resolve_entry_point(root: &Path, name: &str) -> Result<PathBuf, Tex2PdfError> {
    let missing = || Tex2PdfError::EntryPointMissing {
        name: name.to_string(),
    };

    let relative = normalize_entry_name(name)
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(missing)?;
    let path = root.join(relative);

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => {
            debug!("Resolved entry point {}", path.display());
            Ok(path)
        }
        _ => Err(missing()),
    }
}
