//! Error types for the edgequake-tex2pdf library.
//!
//! Every failure in the pipeline is terminal for the request, so there is a
//! single error type, [`Tex2PdfError`]. What callers need on top of the
//! message is *whose fault it was*:
//!
//! * [`FaultClass::Input`] — the uploaded archive is bad (corrupt, malicious,
//!   too large, missing the entry point). Fixing it is the caller's job.
//! * [`FaultClass::Document`] — the archive was fine but the compiler
//!   rejected the document. The captured log tail says why.
//! * [`FaultClass::Internal`] — the service itself is broken (compiler not
//!   installed, temp dir unwritable, compiler claimed success but wrote
//!   nothing).
//!
//! [`ErrorReport`] is the serialisable envelope handed to transports.

use crate::pipeline::diagnose::TexDiagnostic;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One of the two compiler invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CompilePass {
    First,
    Second,
}

impl CompilePass {
    /// Both passes in execution order.
    pub const ALL: [CompilePass; 2] = [CompilePass::First, CompilePass::Second];

    /// 1-indexed pass number.
    pub fn number(self) -> u8 {
        match self {
            CompilePass::First => 1,
            CompilePass::Second => 2,
        }
    }
}

impl fmt::Display for CompilePass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl From<CompilePass> for u8 {
    fn from(pass: CompilePass) -> Self {
        pass.number()
    }
}

impl TryFrom<u8> for CompilePass {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(CompilePass::First),
            2 => Ok(CompilePass::Second),
            other => Err(format!("compile pass must be 1 or 2, got {other}")),
        }
    }
}

/// Who is to blame for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// The uploaded archive is unusable.
    Input,
    /// The compiler rejected the document.
    Document,
    /// Environment or tool inconsistency; not the caller's fault.
    Internal,
}

/// All errors returned by the edgequake-tex2pdf library.
#[derive(Debug, Error)]
pub enum Tex2PdfError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The upload could not be read, has the wrong type, or is too large.
    #[error("Invalid upload: {reason}")]
    InvalidUpload { reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The archive structure is corrupt or an entry cannot be decoded.
    #[error("Invalid ZIP file: {detail}")]
    InvalidArchive { detail: String },

    /// An entry name would land outside the workspace.
    #[error(
        "Suspicious archive entry rejected: '{}' resolves outside the workspace",
        bounded_name(.entry)
    )]
    PathTraversalRejected { entry: String },

    /// Cumulative uncompressed size exceeds the expansion budget.
    #[error("Uncompressed size too large: {total} bytes exceeds the {limit}-byte limit")]
    SizeBudgetExceeded { total: u64, limit: u64 },

    /// Writing an extracted entry to disk failed.
    #[error("Failed to extract '{path}': {source}")]
    ExtractionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Workspace errors ──────────────────────────────────────────────────
    /// The required entry-point file is not in the archive.
    #[error("No {name} found in the ZIP file")]
    EntryPointMissing { name: String },

    /// The per-request temporary directory could not be created.
    #[error("Could not create workspace directory: {source}")]
    WorkspaceUnavailable {
        #[source]
        source: std::io::Error,
    },

    // ── Compilation errors ────────────────────────────────────────────────
    /// The compiler exited non-zero or ran past the shared deadline.
    #[error("{}", compilation_failed_message(.pass, .timed_out))]
    CompilationFailed {
        pass: CompilePass,
        timed_out: bool,
        /// Bounded tail of the combined stdout/stderr.
        output_tail: String,
        /// First TeX error found in the tail, if any.
        diagnostic: Option<TexDiagnostic>,
    },

    /// The compiler binary could not be started.
    #[error("Failed to start compiler '{program}': {source}\nIs a TeX distribution installed and on PATH?")]
    CompilerUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Both passes succeeded but the expected output is absent.
    #[error("PDF not generated: expected '{path}' after a successful compile")]
    ArtifactMissing { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Longest entry name echoed back in messages and logs.
const MAX_ENTRY_NAME_BYTES: usize = 256;

/// Cut `name` to at most [`MAX_ENTRY_NAME_BYTES`] on a char boundary.
pub(crate) fn bounded_name(name: &str) -> Cow<'_, str> {
    if name.len() <= MAX_ENTRY_NAME_BYTES {
        return Cow::Borrowed(name);
    }
    let mut end = MAX_ENTRY_NAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}…", &name[..end]))
}

fn compilation_failed_message(pass: &CompilePass, timed_out: &bool) -> String {
    let headline = match pass {
        CompilePass::First => "LaTeX compilation failed".to_string(),
        CompilePass::Second => "LaTeX compilation failed (2nd pass)".to_string(),
    };
    if *timed_out {
        format!("{headline}: compile deadline exceeded")
    } else {
        headline
    }
}

impl Tex2PdfError {
    /// Short machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Tex2PdfError::InvalidUpload { .. } => "invalid_upload",
            Tex2PdfError::InvalidArchive { .. } => "invalid_archive",
            Tex2PdfError::PathTraversalRejected { .. } => "path_traversal_rejected",
            Tex2PdfError::SizeBudgetExceeded { .. } => "size_budget_exceeded",
            Tex2PdfError::ExtractionFailed { .. } => "extraction_failed",
            Tex2PdfError::EntryPointMissing { .. } => "entry_point_missing",
            Tex2PdfError::WorkspaceUnavailable { .. } => "workspace_unavailable",
            Tex2PdfError::CompilationFailed { .. } => "compilation_failed",
            Tex2PdfError::CompilerUnavailable { .. } => "compiler_unavailable",
            Tex2PdfError::ArtifactMissing { .. } => "artifact_missing",
            Tex2PdfError::OutputWriteFailed { .. } => "output_write_failed",
            Tex2PdfError::InvalidConfig(_) => "invalid_config",
            Tex2PdfError::Internal(_) => "internal",
        }
    }

    /// Which party the failure is attributed to.
    pub fn fault(&self) -> FaultClass {
        match self {
            Tex2PdfError::InvalidUpload { .. }
            | Tex2PdfError::InvalidArchive { .. }
            | Tex2PdfError::PathTraversalRejected { .. }
            | Tex2PdfError::SizeBudgetExceeded { .. }
            | Tex2PdfError::EntryPointMissing { .. } => FaultClass::Input,
            Tex2PdfError::CompilationFailed { .. } => FaultClass::Document,
            Tex2PdfError::ExtractionFailed { .. }
            | Tex2PdfError::WorkspaceUnavailable { .. }
            | Tex2PdfError::CompilerUnavailable { .. }
            | Tex2PdfError::ArtifactMissing { .. }
            | Tex2PdfError::OutputWriteFailed { .. }
            | Tex2PdfError::InvalidConfig(_)
            | Tex2PdfError::Internal(_) => FaultClass::Internal,
        }
    }

    /// HTTP status a transport should answer with.
    ///
    /// Compiler rejections answer 500: the upload itself was well-formed.
    pub fn status_code(&self) -> u16 {
        match self.fault() {
            FaultClass::Input => 400,
            FaultClass::Document | FaultClass::Internal => 500,
        }
    }

    /// Which pass failed, for compilation failures.
    pub fn failed_pass(&self) -> Option<CompilePass> {
        match self {
            Tex2PdfError::CompilationFailed { pass, .. } => Some(*pass),
            _ => None,
        }
    }

    /// Build the serialisable envelope for this error.
    pub fn report(&self) -> ErrorReport {
        let (error, details) = match self {
            Tex2PdfError::CompilationFailed {
                output_tail,
                diagnostic,
                ..
            } => {
                let details = match diagnostic {
                    Some(d) => format!("{d}\n\n{output_tail}"),
                    None => output_tail.clone(),
                };
                (self.to_string(), Some(details))
            }
            Tex2PdfError::InvalidArchive { detail } => {
                ("Invalid ZIP file".to_string(), Some(detail.clone()))
            }
            Tex2PdfError::PathTraversalRejected { .. }
            | Tex2PdfError::SizeBudgetExceeded { .. } => {
                ("Invalid ZIP file".to_string(), Some(self.to_string()))
            }
            Tex2PdfError::InvalidUpload { reason } => {
                ("Invalid upload".to_string(), Some(reason.clone()))
            }
            other => (other.to_string(), None),
        };

        ErrorReport {
            error,
            kind: self.kind().to_string(),
            fault: self.fault(),
            pass: self.failed_pass(),
            details,
        }
    }
}

/// JSON envelope for a failed request.
///
/// `error` is a short headline, `kind` is machine-readable, `details` carries
/// the bounded diagnostic text (compiler log tail for compile failures).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: String,
    pub kind: String,
    pub fault: FaultClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<CompilePass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_failure(pass: CompilePass, timed_out: bool) -> Tex2PdfError {
        Tex2PdfError::CompilationFailed {
            pass,
            timed_out,
            output_tail: "! Undefined control sequence.".into(),
            diagnostic: None,
        }
    }

    #[test]
    fn second_pass_display_is_tagged() {
        let e = compile_failure(CompilePass::Second, false);
        assert_eq!(e.to_string(), "LaTeX compilation failed (2nd pass)");
        assert_eq!(e.failed_pass(), Some(CompilePass::Second));
    }

    #[test]
    fn timeout_display_mentions_deadline() {
        let e = compile_failure(CompilePass::First, true);
        assert!(e.to_string().contains("deadline"), "got: {e}");
    }

    #[test]
    fn long_entry_names_are_cut_in_messages() {
        let ascii = format!("{}evil.tex", "../".repeat(10_000));
        let e = Tex2PdfError::PathTraversalRejected { entry: ascii };
        let message = e.to_string();
        assert!(message.len() < MAX_ENTRY_NAME_BYTES + 100, "{} bytes", message.len());
        assert!(message.contains("…"));

        // 'é' is two bytes, so byte 256 falls mid-char after one leading 'a'.
        let multibyte = format!("a{}", "é".repeat(1000));
        let cut = bounded_name(&multibyte);
        assert!(cut.len() <= MAX_ENTRY_NAME_BYTES + "…".len());
        assert!(cut.starts_with('a') && cut.ends_with('…'));
        assert_eq!(cut.chars().filter(|c| *c == 'é').count(), 127);

        assert_eq!(bounded_name("document.tex"), "document.tex");
    }

    #[test]
    fn fault_classes_separate_input_document_internal() {
        let input = Tex2PdfError::PathTraversalRejected {
            entry: "../evil".into(),
        };
        let document = compile_failure(CompilePass::First, false);
        let internal = Tex2PdfError::ArtifactMissing {
            path: "/tmp/x/document.pdf".into(),
        };

        assert_eq!(input.fault(), FaultClass::Input);
        assert_eq!(document.fault(), FaultClass::Document);
        assert_eq!(internal.fault(), FaultClass::Internal);
        assert_eq!(input.status_code(), 400);
        assert_eq!(internal.status_code(), 500);
    }

    #[test]
    fn report_serialises_pass_as_number() {
        let report = compile_failure(CompilePass::Second, false).report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "compilation_failed");
        assert_eq!(json["pass"], 2);
        assert_eq!(json["fault"], "document");
        assert!(json["details"]
            .as_str()
            .unwrap()
            .contains("Undefined control sequence"));
    }

    #[test]
    fn report_omits_empty_fields() {
        let report = Tex2PdfError::EntryPointMissing {
            name: "document.tex".into(),
        }
        .report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["error"], "No document.tex found in the ZIP file");
        assert!(json.get("pass").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn pass_rejects_out_of_range_numbers() {
        assert!(CompilePass::try_from(3).is_err());
        assert_eq!(CompilePass::try_from(1).unwrap(), CompilePass::First);
    }
}
