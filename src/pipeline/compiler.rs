//! Compilation orchestrator: two compiler passes under one shared deadline.
//!
//! LaTeX resolves cross-references (`\ref`, `\cite`, the table of contents)
//! from the `.aux` file written by the *previous* run, so every request runs
//! the compiler exactly twice. The second pass is never skipped, even when
//! the first pass's log suggests it would be redundant.
//!
//! ## Deadline
//!
//! The caller hands in one absolute [`Instant`]. Both passes race against it;
//! a slow first pass leaves less time for the second. When the deadline
//! fires the child is killed and reaped, and the pass is reported as failed.
//! `kill_on_drop` covers the remaining case: a request future dropped while
//! a child is running still takes the child down with it.
//!
//! ## Output capture
//!
//! Stdout and stderr are both pointed at one anonymous temp file, which keeps
//! the two streams interleaved in the order the compiler wrote them and keeps
//! memory flat no matter how chatty the compiler is. Only a bounded head (for
//! diagnostics) and tail (for the error report) are ever read back.

use crate::config::CompileConfig;
use crate::error::{CompilePass, Tex2PdfError};
use crate::output::PassReport;
use crate::pipeline::diagnose::{self, TexDiagnostic};
use std::io::SeekFrom;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Never block on an interactive prompt.
pub const INTERACTION_FLAG: &str = "-interaction=nonstopmode";

/// Followed by the workspace root.
pub const OUTPUT_DIRECTORY_FLAG: &str = "-output-directory";

/// How much of the start of the log is scanned for the first error.
const DIAGNOSTIC_SCAN_BYTES: u64 = 256 * 1024;

enum PassExit {
    Exited(ExitStatus),
    TimedOut,
}

/// Text read back from a pass's capture file.
struct CapturedOutput {
    tail: String,
    diagnostic: Option<TexDiagnostic>,
}

/// Run both compiler passes in `workspace_root` against `entry_point`.
///
/// Returns one [`PassReport`] per pass on success. Does not check that an
/// artifact was produced; see [`crate::pipeline::artifact`].
pub async fn compile(
    workspace_root: &Path,
    entry_point: &Path,
    deadline: Instant,
    config: &CompileConfig,
) -> Result<Vec<PassReport>, Tex2PdfError> {
    let mut reports = Vec::with_capacity(CompilePass::ALL.len());

    for pass in CompilePass::ALL {
        if let Some(ref cb) = config.progress_callback {
            cb.on_pass_start(pass);
        }

        match run_pass(pass, workspace_root, entry_point, deadline, config).await {
            Ok(report) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_pass_complete(pass, report.duration_ms);
                }
                reports.push(report);
            }
            Err(e) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_pass_error(pass, &e.to_string());
                }
                return Err(e);
            }
        }
    }

    Ok(reports)
}

/// Spawn one compiler invocation and wait for it, bounded by `deadline`.
async fn run_pass(
    pass: CompilePass,
    workspace_root: &Path,
    entry_point: &Path,
    deadline: Instant,
    config: &CompileConfig,
) -> Result<PassReport, Tex2PdfError> {
    let started = Instant::now();

    if started >= deadline {
        warn!("Pass {} not started: compile deadline already passed", pass);
        return Err(Tex2PdfError::CompilationFailed {
            pass,
            timed_out: true,
            output_tail: String::new(),
            diagnostic: None,
        });
    }

    let capture = tempfile::tempfile().map_err(|e| capture_error("create", e))?;
    let stdout = capture.try_clone().map_err(|e| capture_error("clone", e))?;
    let stderr = capture.try_clone().map_err(|e| capture_error("clone", e))?;

    let mut command = Command::new(&config.compiler);
    command
        .args(&config.compiler_args)
        .arg(INTERACTION_FLAG)
        .arg(OUTPUT_DIRECTORY_FLAG)
        .arg(workspace_root)
        .arg(entry_point)
        .current_dir(workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);

    debug!("Pass {}: {:?}", pass, command.as_std());

    let mut child = command
        .spawn()
        .map_err(|source| Tex2PdfError::CompilerUnavailable {
            program: config.compiler.clone(),
            source,
        })?;

    let exit = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => PassExit::Exited(status),
        Ok(Err(e)) => {
            return Err(Tex2PdfError::Internal(format!(
                "Waiting for compiler (pass {pass}) failed: {e}"
            )))
        }
        Err(_) => {
            warn!("Pass {} hit the compile deadline; killing compiler", pass);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill compiler after deadline: {}", e);
            }
            PassExit::TimedOut
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let captured = read_capture(capture, config.output_tail_bytes).await?;

    match exit {
        PassExit::Exited(status) if status.success() => {
            info!("Pass {} succeeded in {}ms", pass, duration_ms);
            Ok(PassReport {
                pass,
                duration_ms,
                output_tail: captured.tail,
            })
        }
        PassExit::Exited(status) => {
            warn!("Pass {} failed after {}ms: {}", pass, duration_ms, status);
            Err(Tex2PdfError::CompilationFailed {
                pass,
                timed_out: false,
                output_tail: captured.tail,
                diagnostic: captured.diagnostic,
            })
        }
        PassExit::TimedOut => Err(Tex2PdfError::CompilationFailed {
            pass,
            timed_out: true,
            output_tail: captured.tail,
            diagnostic: captured.diagnostic,
        }),
    }
}

fn capture_error(action: &str, e: std::io::Error) -> Tex2PdfError {
    Tex2PdfError::Internal(format!("Failed to {action} output capture file: {e}"))
}

/// Read the bounded head and tail of the capture file.
///
/// The child shares the file offset, so every read seeks explicitly.
async fn read_capture(
    capture: std::fs::File,
    tail_bytes: usize,
) -> Result<CapturedOutput, Tex2PdfError> {
    let mut file = tokio::fs::File::from_std(capture);
    let len = file
        .metadata()
        .await
        .map_err(|e| capture_error("stat", e))?
        .len();

    let mut head = Vec::new();
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(|e| capture_error("seek", e))?;
    (&mut file)
        .take(DIAGNOSTIC_SCAN_BYTES.min(len))
        .read_to_end(&mut head)
        .await
        .map_err(|e| capture_error("read", e))?;

    let start = len.saturating_sub(tail_bytes as u64);
    let mut tail = Vec::new();
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|e| capture_error("seek", e))?;
    (&mut file)
        .take(len - start)
        .read_to_end(&mut tail)
        .await
        .map_err(|e| capture_error("read", e))?;

    let tail = tail_text(&tail);
    let diagnostic = diagnose::first_error(&String::from_utf8_lossy(&head))
        .or_else(|| diagnose::first_error(&tail));

    Ok(CapturedOutput { tail, diagnostic })
}

/// Decode a byte tail, dropping a UTF-8 sequence cut by the truncation.
pub(crate) fn tail_text(bytes: &[u8]) -> String {
    let skip = bytes
        .iter()
        .take(3)
        .take_while(|b| (**b & 0xC0) == 0x80)
        .count();
    String::from_utf8_lossy(&bytes[skip..]).into_owned()
}
