//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn CompileProgressCallback>`] via
//! [`crate::config::CompileConfigBuilder::progress_callback`] to receive
//! events as a request moves through extraction and the two compiler passes.
//!
//! Callers can forward events to a terminal spinner, a job table, or a log
//! without the library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_tex2pdf::{CompilePass, CompileProgressCallback, CompileConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PassCounter {
//!     passes: AtomicUsize,
//! }
//!
//! impl CompileProgressCallback for PassCounter {
//!     fn on_pass_complete(&self, pass: CompilePass, duration_ms: u64) {
//!         self.passes.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("pass {pass} done in {duration_ms}ms");
//!     }
//! }
//!
//! let counter = Arc::new(PassCounter { passes: AtomicUsize::new(0) });
//!
//! let config = CompileConfig::builder()
//!     .progress_callback(counter as Arc<dyn CompileProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::CompilePass;
use std::sync::Arc;

/// Called by the pipeline as it moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`: requests run
/// on tokio tasks and one callback may be shared by many of them.
pub trait CompileProgressCallback: Send + Sync {
    /// Called once the archive has been materialised in the workspace.
    ///
    /// # Arguments
    /// * `files` — regular files written
    /// * `bytes` — total bytes written
    fn on_extraction_complete(&self, files: usize, bytes: u64) {
        let _ = (files, bytes);
    }

    /// Called just before a compiler pass is spawned.
    fn on_pass_start(&self, pass: CompilePass) {
        let _ = pass;
    }

    /// Called when a compiler pass exits successfully.
    fn on_pass_complete(&self, pass: CompilePass, duration_ms: u64) {
        let _ = (pass, duration_ms);
    }

    /// Called when a compiler pass fails or hits the deadline.
    ///
    /// # Arguments
    /// * `pass`  — the failing pass
    /// * `error` — human-readable error description
    fn on_pass_error(&self, pass: CompilePass, error: &str) {
        let _ = (pass, error);
    }

    /// Called once the artifact has been read back from the workspace.
    ///
    /// # Arguments
    /// * `name` — artifact file name (e.g. `document.pdf`)
    /// * `size` — artifact size in bytes
    fn on_artifact_ready(&self, name: &str, size: u64) {
        let _ = (name, size);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CompileProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CompileConfig`].
pub type ProgressCallback = Arc<dyn CompileProgressCallback>;
