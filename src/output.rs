//! Output types returned by the compile API.

use crate::error::CompilePass;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A successfully compiled document, read out of its (now removed) workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledDocument {
    /// Artifact file name, e.g. `document.pdf`.
    pub name: String,

    /// Raw artifact bytes.
    #[serde(skip)]
    pub bytes: Vec<u8>,

    /// Artifact size in bytes.
    pub size: u64,

    /// Modification time of the artifact inside the workspace.
    pub modified: SystemTime,

    pub stats: CompileStats,
}

/// Timing and volume figures for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileStats {
    pub files_extracted: usize,
    pub directories_extracted: usize,
    pub bytes_extracted: u64,

    /// One report per successful compiler pass, in order.
    pub passes: Vec<PassReport>,

    pub extract_duration_ms: u64,
    /// Both passes, measured from the start of the deadline.
    pub compile_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Outcome of a compiler pass that exited successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: CompilePass,
    pub duration_ms: u64,
    /// Last bytes of combined stdout/stderr; warnings live here.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_tail: String,
}

/// Central-directory listing of an upload, produced without extracting it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub entries: Vec<ArchiveEntry>,
    /// Sum of declared uncompressed sizes.
    pub total_declared_bytes: u64,
    /// `ceiling × expansion_factor` for the active configuration.
    pub extraction_limit: u64,
    /// Whether an entry normalises to the configured entry point.
    pub has_entry_point: bool,
}

impl ArchiveSummary {
    /// Entries whose names would be rejected at extraction.
    pub fn rejected(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|e| !e.safe)
    }

    /// True if extraction would pass the declared-size and name gates.
    pub fn would_extract(&self) -> bool {
        self.total_declared_bytes <= self.extraction_limit && self.rejected().next().is_none()
    }
}

/// One entry of an archive's central directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Name exactly as stored in the archive.
    pub name: String,
    pub is_dir: bool,
    /// Declared uncompressed size.
    pub size: u64,
    pub compressed_size: u64,
    /// False if the name is absolute, drive-qualified or escapes the root.
    pub safe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64, safe: bool) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_string(),
            is_dir: false,
            size,
            compressed_size: size / 2,
            safe,
        }
    }

    #[test]
    fn summary_flags_unsafe_entries() {
        let summary = ArchiveSummary {
            entries: vec![entry("document.tex", 10, true), entry("../x", 1, false)],
            total_declared_bytes: 11,
            extraction_limit: 100,
            has_entry_point: true,
        };
        assert_eq!(summary.rejected().count(), 1);
        assert!(!summary.would_extract());
    }

    #[test]
    fn summary_flags_declared_overrun() {
        let summary = ArchiveSummary {
            entries: vec![entry("document.tex", 500, true)],
            total_declared_bytes: 500,
            extraction_limit: 100,
            has_entry_point: true,
        };
        assert!(!summary.would_extract());
    }

    #[test]
    fn document_bytes_are_not_serialised() {
        let doc = CompiledDocument {
            name: "document.pdf".into(),
            bytes: b"%PDF".to_vec(),
            size: 4,
            modified: SystemTime::UNIX_EPOCH,
            stats: CompileStats::default(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("bytes").is_none());
        assert_eq!(json["name"], "document.pdf");
        assert_eq!(json["size"], 4);
    }

    #[test]
    fn pass_report_serialises_pass_number() {
        let report = PassReport {
            pass: CompilePass::Second,
            duration_ms: 12,
            output_tail: String::new(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pass"], 2);
        assert!(json.get("output_tail").is_none());
    }
}
