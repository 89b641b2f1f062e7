//! Configuration types for archive-to-PDF compilation.
//!
//! All pipeline behaviour is controlled through [`CompileConfig`], built via
//! its [`CompileConfigBuilder`]. The value is constructed once at startup and
//! passed by reference into every request; nothing inside the pipeline reads
//! environment variables or other ambient state.

use crate::error::Tex2PdfError;
use crate::pipeline::extract::normalize_entry_name;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Bytes per megabyte for the upload ceiling.
const MIB: u64 = 1024 * 1024;

/// Longest accepted compile deadline.
pub const MAX_COMPILE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for one archive-to-PDF compilation.
///
/// Built via [`CompileConfig::builder()`] or using
/// [`CompileConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_tex2pdf::CompileConfig;
/// use std::time::Duration;
///
/// let config = CompileConfig::builder()
///     .max_upload_mb(20)
///     .compile_timeout(Duration::from_secs(60))
///     .entry_point("main.tex")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_upload_bytes(), 20 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct CompileConfig {
    /// Upload size ceiling in megabytes. Default: 50.
    ///
    /// Applied to the compressed archive. The extraction budget is derived
    /// from it via [`Self::expansion_factor`].
    pub max_upload_mb: u64,

    /// Multiplier applied to the upload ceiling to bound the total
    /// uncompressed size of the archive. Default: 5.
    ///
    /// LaTeX projects are mostly text and compress 3–4×; 5× tolerates that
    /// while keeping a crafted archive from filling the disk.
    pub expansion_factor: u64,

    /// Wall-clock budget shared by both compiler passes. Default: 120 s.
    pub compile_timeout: Duration,

    /// Entry-point file name, relative to the archive root. Default: `document.tex`.
    pub entry_point: String,

    /// Extension of the produced artifact, without the dot. Default: `pdf`.
    pub output_extension: String,

    /// Compiler executable. Default: `pdflatex`.
    pub compiler: String,

    /// Extra arguments placed before the standard
    /// `-interaction=nonstopmode -output-directory <dir> <input>` tail.
    /// Default: empty.
    pub compiler_args: Vec<String>,

    /// How many trailing bytes of compiler output to keep for error reports.
    /// Default: 8 KiB.
    pub output_tail_bytes: usize,

    /// Directory under which per-request workspaces are created.
    /// If None, the system temp directory is used.
    pub workspace_parent: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional stage-event callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: 50,
            expansion_factor: 5,
            compile_timeout: Duration::from_secs(120),
            entry_point: "document.tex".to_string(),
            output_extension: "pdf".to_string(),
            compiler: "pdflatex".to_string(),
            compiler_args: Vec::new(),
            output_tail_bytes: 8 * 1024,
            workspace_parent: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for CompileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileConfig")
            .field("max_upload_mb", &self.max_upload_mb)
            .field("expansion_factor", &self.expansion_factor)
            .field("compile_timeout", &self.compile_timeout)
            .field("entry_point", &self.entry_point)
            .field("output_extension", &self.output_extension)
            .field("compiler", &self.compiler)
            .field("compiler_args", &self.compiler_args)
            .field("output_tail_bytes", &self.output_tail_bytes)
            .field("workspace_parent", &self.workspace_parent)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn CompileProgressCallback>"),
            )
            .finish()
    }
}

impl CompileConfig {
    /// Create a new builder for `CompileConfig`.
    pub fn builder() -> CompileConfigBuilder {
        CompileConfigBuilder {
            config: Self::default(),
        }
    }

    /// Upload ceiling in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(MIB)
    }

    /// Total uncompressed bytes an archive may expand to.
    pub fn extraction_limit(&self) -> u64 {
        self.max_upload_bytes().saturating_mul(self.expansion_factor)
    }
}

/// Builder for [`CompileConfig`].
#[derive(Debug)]
pub struct CompileConfigBuilder {
    config: CompileConfig,
}

impl CompileConfigBuilder {
    pub fn max_upload_mb(mut self, mb: u64) -> Self {
        self.config.max_upload_mb = mb.max(1);
        self
    }

    pub fn expansion_factor(mut self, factor: u64) -> Self {
        self.config.expansion_factor = factor.max(1);
        self
    }

    pub fn compile_timeout(mut self, timeout: Duration) -> Self {
        self.config.compile_timeout = timeout;
        self
    }

    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compile_timeout = Duration::from_secs(secs);
        self
    }

    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.config.entry_point = name.into();
        self
    }

    pub fn output_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.output_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn compiler(mut self, program: impl Into<String>) -> Self {
        self.config.compiler = program.into();
        self
    }

    pub fn compiler_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.compiler_args.push(arg.into());
        self
    }

    pub fn compiler_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.compiler_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_tail_bytes(mut self, n: usize) -> Self {
        self.config.output_tail_bytes = n.max(256);
        self
    }

    pub fn workspace_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.workspace_parent = Some(dir.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CompileConfig, Tex2PdfError> {
        let c = &self.config;
        if c.compile_timeout.is_zero() {
            return Err(Tex2PdfError::InvalidConfig(
                "Compile timeout must be greater than zero".into(),
            ));
        }
        if c.compile_timeout > MAX_COMPILE_TIMEOUT {
            return Err(Tex2PdfError::InvalidConfig(format!(
                "Compile timeout {}s exceeds the {}s maximum",
                c.compile_timeout.as_secs(),
                MAX_COMPILE_TIMEOUT.as_secs()
            )));
        }
        if c.compiler.trim().is_empty() {
            return Err(Tex2PdfError::InvalidConfig(
                "Compiler program must not be empty".into(),
            ));
        }
        if c.output_extension.is_empty() || c.output_extension.contains(['/', '\\']) {
            return Err(Tex2PdfError::InvalidConfig(format!(
                "Output extension '{}' is not a plain extension",
                c.output_extension
            )));
        }
        match normalize_entry_name(&c.entry_point) {
            Some(normalized) if !normalized.as_os_str().is_empty() => {}
            _ => {
                return Err(Tex2PdfError::InvalidConfig(format!(
                    "Entry point '{}' must be a relative path inside the archive",
                    c.entry_point
                )))
            }
        }
        Ok(self.config)
    }
}
