//! Diagnostics: pull the first TeX error out of captured compiler output.
//!
//! A failing `pdflatex` run prints hundreds of lines of package banners
//! before the one line that matters. TeX reports errors in two shapes:
//!
//! ```text
//! ! Undefined control sequence.          (classic)
//! l.12 \foo
//!
//! ./document.tex:12: Undefined control sequence.   (-file-line-error)
//! ```
//!
//! [`first_error`] recognises both and returns the earliest one found, so
//! error reports can lead with a one-line summary above the raw log tail.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The first error TeX reported, with its source location when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TexDiagnostic {
    /// Error message without the leading `! `.
    pub message: String,
    /// Source file, only present in `-file-line-error` output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-indexed source line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl fmt::Display for TexDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: {}", self.message),
            (None, Some(line)) => write!(f, "line {line}: {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

static RE_BANG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^! (.+?)\s*$").unwrap());

static RE_LINE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^l\.(\d+)").unwrap());

static RE_FILE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\S+?\.(?:tex|sty|cls|bib|ltx)):(\d+): (.+?)\s*$").unwrap()
});

/// How far past a `! ` line to look for its `l.N` marker.
const LINE_MARKER_WINDOW: usize = 2048;

/// Find the earliest TeX error in `log`.
pub fn first_error(log: &str) -> Option<TexDiagnostic> {
    let classic = RE_BANG.captures(log).map(|caps| {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let message = caps[1].to_string();
        let window_end = floor_char_boundary(log, whole.end + LINE_MARKER_WINDOW);
        let line = RE_LINE_MARKER
            .captures(&log[whole.end..window_end])
            .and_then(|c| c[1].parse().ok());
        (
            whole.start,
            TexDiagnostic {
                message,
                file: None,
                line,
            },
        )
    });

    let file_line = RE_FILE_LINE.captures(log).map(|caps| {
        let start = caps.get(0).map_or(0, |m| m.start());
        (
            start,
            TexDiagnostic {
                message: caps[3].to_string(),
                file: Some(caps[1].trim_start_matches("./").to_string()),
                line: caps[2].parse().ok(),
            },
        )
    });

    match (classic, file_line) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a.1 } else { b.1 }),
        (Some(a), None) => Some(a.1),
        (None, Some(b)) => Some(b.1),
        (None, None) => None,
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
