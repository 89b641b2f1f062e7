//! Archive extraction: materialise untrusted ZIP entries inside a workspace.
//!
//! The archive is opened through its central directory rather than streamed
//! so every entry's declared size is known before a single byte of it is
//! decompressed. Each entry passes three gates in order:
//!
//! 1. **Budget**: declared uncompressed sizes are summed; once the running
//!    total exceeds `ceiling × expansion_factor` extraction stops.
//! 2. **Name**: the entry name is lexically normalised; absolute,
//!    drive-qualified, NUL-carrying and upward-escaping names are rejected.
//! 3. **Containment**: the joined target path is re-normalised and must sit
//!    at or below the workspace root, independently of gate 2.
//!
//! Declared sizes come from archive metadata and can lie, so the copy loop
//! also counts bytes actually written against the same limit.
//!
//! Extraction is synchronous filesystem work and runs on the blocking pool.

use crate::error::{bounded_name, Tex2PdfError};
use crate::output::ArchiveEntry;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

const DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;
const COPY_CHUNK: usize = 64 * 1024;

/// What an extraction wrote to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Regular files written.
    pub files: usize,
    /// Directory entries created.
    pub directories: usize,
    /// Decompressed bytes written across all files.
    pub bytes_written: u64,
}

/// Extract `bytes` into `dest` on the blocking thread pool.
///
/// `size_ceiling × expansion_factor` bounds both the declared and the
/// actually written uncompressed size.
pub async fn extract(
    bytes: Vec<u8>,
    dest: &Path,
    size_ceiling: u64,
    expansion_factor: u64,
) -> Result<ExtractionReport, Tex2PdfError> {
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        extract_blocking(&bytes, &dest, size_ceiling, expansion_factor)
    })
    .await
    .map_err(|e| Tex2PdfError::Internal(format!("Extraction task panicked: {e}")))?
}

/// Blocking implementation of [`extract`].
///
/// On error, files already written stay behind; the caller owns `dest` and
/// removes it wholesale.
pub fn extract_blocking(
    bytes: &[u8],
    dest: &Path,
    size_ceiling: u64,
    expansion_factor: u64,
) -> Result<ExtractionReport, Tex2PdfError> {
    let limit = size_ceiling.saturating_mul(expansion_factor);
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        Tex2PdfError::InvalidArchive {
            detail: e.to_string(),
        }
    })?;

    info!(
        "Extracting {} entries into {} (limit {} bytes)",
        archive.len(),
        dest.display(),
        limit
    );

    let mut declared_total: u64 = 0;
    let mut report = ExtractionReport::default();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Tex2PdfError::InvalidArchive {
                detail: format!("entry #{index}: {e}"),
            })?;
        let name = entry.name().to_string();

        declared_total = declared_total.saturating_add(entry.size());
        if declared_total > limit {
            warn!(
                "Archive declares {} uncompressed bytes at '{}', over the {}-byte limit",
                declared_total, name, limit
            );
            return Err(Tex2PdfError::SizeBudgetExceeded {
                total: declared_total,
                limit,
            });
        }

        let target = contained_target(dest, &name)?;

        if entry.is_dir() {
            create_dir_all(&target).map_err(|source| write_error(&name, &target, source))?;
            report.directories += 1;
            continue;
        }

        if target == dest {
            return Err(Tex2PdfError::InvalidArchive {
                detail: format!("entry '{name}' has no file name"),
            });
        }

        if let Some(parent) = target.parent() {
            create_dir_all(parent).map_err(|source| write_error(&name, parent, source))?;
        }

        let mode = entry
            .unix_mode()
            .map(|m| m & 0o777)
            .filter(|m| *m != 0)
            .unwrap_or(DEFAULT_FILE_MODE);
        let mut out =
            create_file(&target, mode).map_err(|source| write_error(&name, &target, source))?;

        let written = copy_bounded(
            &mut entry,
            &mut out,
            &name,
            &target,
            report.bytes_written,
            limit,
        )?;
        report.bytes_written += written;
        report.files += 1;
        debug!("Extracted '{}' ({} bytes, mode {:o})", name, written, mode);
    }

    info!(
        "Extracted {} files, {} directories, {} bytes",
        report.files, report.directories, report.bytes_written
    );
    Ok(report)
}

/// Read the central directory without decompressing anything.
pub fn list_entries(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, Tex2PdfError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        Tex2PdfError::InvalidArchive {
            detail: e.to_string(),
        }
    })?;

    (0..archive.len())
        .map(|index| {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| Tex2PdfError::InvalidArchive {
                    detail: format!("entry #{index}: {e}"),
                })?;
            let name = entry.name().to_string();
            let safe = normalize_entry_name(&name).is_some();
            Ok(ArchiveEntry {
                is_dir: entry.is_dir(),
                size: entry.size(),
                compressed_size: entry.compressed_size(),
                safe,
                name,
            })
        })
        .collect()
}

/// Normalise an archive entry name into a relative path.
///
/// Backslashes count as separators, `.` segments vanish and `..` consumes
/// the previous segment. Returns `None` when the name is absolute,
/// drive-qualified, contains NUL, or climbs above its root. The empty path
/// means "the root itself".
pub fn normalize_entry_name(name: &str) -> Option<PathBuf> {
    if name.contains(['\0', ':']) {
        return None;
    }
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.iter().collect())
}

/// Join `name` onto `root`, rejecting anything that lands outside it.
fn contained_target(root: &Path, name: &str) -> Result<PathBuf, Tex2PdfError> {
    let rejected = || {
        let entry = bounded_name(name).into_owned();
        warn!("Rejecting archive entry '{}': escapes workspace", entry);
        Tex2PdfError::PathTraversalRejected { entry }
    };

    let relative = normalize_entry_name(name).ok_or_else(rejected)?;
    let target = root.join(relative);
    if !is_contained(root, &target) {
        return Err(rejected());
    }
    Ok(target)
}

/// True if `target`, lexically resolved, equals `root` or lies beneath it.
pub fn is_contained(root: &Path, target: &Path) -> bool {
    match (lexical(root), lexical(target)) {
        (Some(root), Some(target)) => target.starts_with(&root),
        _ => false,
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

fn create_dir_all(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path)
}

/// A file where the archive wants a directory (or the reverse) is the
/// archive's fault; anything else is local I/O.
fn write_error(name: &str, path: &Path, source: io::Error) -> Tex2PdfError {
    match source.kind() {
        io::ErrorKind::AlreadyExists
        | io::ErrorKind::NotADirectory
        | io::ErrorKind::IsADirectory => {
            let name = bounded_name(name);
            warn!("Entry '{}' collides at {}: {}", name, path.display(), source);
            Tex2PdfError::InvalidArchive {
                detail: format!("entry '{name}' conflicts with an existing path"),
            }
        }
        _ => Tex2PdfError::ExtractionFailed {
            path: path.to_path_buf(),
            source,
        },
    }
}

fn create_file(path: &Path, mode: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Copy one entry, failing as soon as the running total passes `limit`.
///
/// Read errors mean the entry data is corrupt; write errors are local I/O.
fn copy_bounded(
    reader: &mut impl Read,
    out: &mut impl Write,
    name: &str,
    target: &Path,
    written_before: u64,
    limit: u64,
) -> Result<u64, Tex2PdfError> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut written: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Tex2PdfError::InvalidArchive {
                    detail: format!("failed to decompress '{name}': {e}"),
                })
            }
        };

        written += n as u64;
        let total = written_before.saturating_add(written);
        if total > limit {
            warn!(
                "Entry '{}' decompressed past the {}-byte limit",
                name, limit
            );
            return Err(Tex2PdfError::SizeBudgetExceeded { total, limit });
        }

        out.write_all(&buf[..n])
            .map_err(|source| Tex2PdfError::ExtractionFailed {
                path: target.to_path_buf(),
                source,
            })?;
    }

    out.flush().map_err(|source| Tex2PdfError::ExtractionFailed {
        path: target.to_path_buf(),
        source,
    })?;
    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::FaultClass;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Build an in-memory ZIP. Names ending in `/` become directory entries.
    pub(crate) fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            for (name, data) in entries {
                if name.ends_with('/') {
                    zip.add_directory(*name, options).unwrap();
                } else {
                    zip.start_file(*name, options).unwrap();
                    zip.write_all(data.as_bytes()).unwrap();
                }
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    /// A parent dir with an empty `ws/` inside, so escapes are observable.
    fn sandbox() -> (TempDir, PathBuf) {
        let parent = TempDir::new().unwrap();
        let dest = parent.path().join("ws");
        fs::create_dir(&dest).unwrap();
        (parent, dest)
    }

    fn parent_entries(parent: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(parent.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(
            normalize_entry_name("a/./b/../c.tex"),
            Some(PathBuf::from("a/c.tex"))
        );
        assert_eq!(
            normalize_entry_name("figs\\plot.png"),
            Some(PathBuf::from("figs/plot.png"))
        );
        assert_eq!(normalize_entry_name("a/.."), Some(PathBuf::new()));
    }

    #[test]
    fn rejects_escaping_names() {
        for bad in [
            "../evil.tex",
            "a/../../evil.tex",
            "/etc/passwd",
            "\\windows\\evil",
            "C:/evil.tex",
            "c:evil.tex",
            "..\\..\\evil",
            "nul\0byte",
        ] {
            assert_eq!(normalize_entry_name(bad), None, "{bad:?} should be rejected");
        }
    }

    #[test]
    fn containment_is_checked_on_joined_path() {
        let root = Path::new("/tmp/latex-abc");
        assert!(is_contained(root, Path::new("/tmp/latex-abc")));
        assert!(is_contained(root, Path::new("/tmp/latex-abc/sub/doc.tex")));
        assert!(!is_contained(root, Path::new("/tmp/latex-abc/../x")));
        assert!(!is_contained(root, Path::new("/tmp/latex-abcdef/doc.tex")));
        assert!(!is_contained(root, Path::new("/etc/passwd")));
    }

    #[test]
    fn extracts_files_and_directories() {
        let (_parent, dest) = sandbox();
        let bytes = zip_of(&[
            ("document.tex", "\\documentclass{article}"),
            ("figures/", ""),
            ("chapters/intro.tex", "Hello"),
        ]);

        let report = extract_blocking(&bytes, &dest, 1024 * 1024, 5).unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.directories, 1);
        assert_eq!(report.bytes_written, 23 + 5);
        assert!(dest.join("figures").is_dir());
        assert_eq!(
            fs::read_to_string(dest.join("chapters/intro.tex")).unwrap(),
            "Hello"
        );
    }

    #[test]
    fn traversal_entry_is_rejected_without_escaping() {
        let (parent, dest) = sandbox();
        let bytes = zip_of(&[("../evil.txt", "pwned")]);

        let err = extract_blocking(&bytes, &dest, 1024 * 1024, 5).unwrap_err();

        assert_eq!(err.kind(), "path_traversal_rejected");
        assert_eq!(parent_entries(&parent), vec!["ws".to_string()]);
    }

    #[test]
    fn rejected_entry_name_is_bounded() {
        let (_parent, dest) = sandbox();
        let name = format!("{}evil.tex", "../".repeat(5_000));
        let bytes = zip_of(&[(name.as_str(), "x")]);

        let err = extract_blocking(&bytes, &dest, 1024 * 1024, 5).unwrap_err();

        match err {
            Tex2PdfError::PathTraversalRejected { entry } => {
                assert!(entry.len() < 300, "{} bytes kept", entry.len());
                assert!(entry.starts_with("../"));
            }
            other => panic!("expected PathTraversalRejected, got {other:?}"),
        }
    }

    #[test]
    fn absolute_and_drive_entries_are_rejected() {
        for name in ["/abs.txt", "C:/drive.txt"] {
            let (parent, dest) = sandbox();
            let bytes = zip_of(&[(name, "x")]);
            let err = extract_blocking(&bytes, &dest, 1024 * 1024, 5).unwrap_err();
            assert!(
                matches!(err, Tex2PdfError::PathTraversalRejected { .. }),
                "{name}: got {err:?}"
            );
            assert_eq!(parent_entries(&parent), vec!["ws".to_string()]);
        }
    }

    #[test]
    fn declared_size_over_budget_aborts_before_copy() {
        let (_parent, dest) = sandbox();
        let text = "a".repeat(3000);
        let zeros = "0".repeat(3000);
        let bytes = zip_of(&[("ok.tex", text.as_str()), ("big.bin", zeros.as_str())]);

        // 1000 × 5 = 5000 < 6000
        let err = extract_blocking(&bytes, &dest, 1000, 5).unwrap_err();

        match err {
            Tex2PdfError::SizeBudgetExceeded { total, limit } => {
                assert_eq!(total, 6000);
                assert_eq!(limit, 5000);
            }
            other => panic!("expected SizeBudgetExceeded, got {other:?}"),
        }
        assert!(dest.join("ok.tex").exists());
        assert!(!dest.join("big.bin").exists());
    }

    #[test]
    fn actual_bytes_are_bounded_too() {
        let mut reader = Cursor::new(vec![7u8; 200]);
        let mut out = Vec::new();

        let err = copy_bounded(
            &mut reader,
            &mut out,
            "liar.bin",
            Path::new("liar.bin"),
            50,
            100,
        )
        .unwrap_err();

        assert!(matches!(err, Tex2PdfError::SizeBudgetExceeded { limit: 100, .. }));
        assert!(out.len() <= 100);
    }

    #[test]
    fn corrupt_archive_is_invalid() {
        let (_parent, dest) = sandbox();
        let err = extract_blocking(b"definitely not a zip", &dest, 1024, 5).unwrap_err();
        assert_eq!(err.kind(), "invalid_archive");
    }

    #[test]
    fn file_and_directory_collisions_are_the_archives_fault() {
        let cases: [&[(&str, &str)]; 4] = [
            &[("document.tex", "x"), ("a", "file"), ("a/b.tex", "y")],
            &[("a", "file"), ("a/b/c.tex", "y")],
            &[("a", "file"), ("a/", "")],
            &[("a/", ""), ("a", "file")],
        ];
        for entries in cases {
            let (_parent, dest) = sandbox();
            let bytes = zip_of(entries);

            let err = extract_blocking(&bytes, &dest, 1024 * 1024, 5).unwrap_err();

            assert_eq!(err.kind(), "invalid_archive", "{entries:?}: got {err:?}");
            assert_eq!(err.fault(), FaultClass::Input);
            assert_eq!(err.status_code(), 400);
        }
    }

    #[cfg(unix)]
    #[test]
    fn preserves_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let (_parent, dest) = sandbox();
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default().unix_permissions(0o700);
            zip.start_file("build.sh", options).unwrap();
            zip.write_all(b"#!/bin/sh\n").unwrap();
            zip.finish().unwrap();
        }

        extract_blocking(&buf.into_inner(), &dest, 1024 * 1024, 5).unwrap();

        let mode = fs::metadata(dest.join("build.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn listing_marks_unsafe_names() {
        let bytes = zip_of(&[
            ("document.tex", "hello"),
            ("figs/", ""),
            ("../escape.txt", "x"),
        ]);

        let entries = list_entries(&bytes).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "document.tex");
        assert_eq!(entries[0].size, 5);
        assert!(entries[0].safe);
        assert!(entries[1].is_dir);
        assert!(!entries[2].safe);
    }

    #[tokio::test]
    async fn async_extract_runs_on_blocking_pool() {
        let (_parent, dest) = sandbox();
        let bytes = zip_of(&[("document.tex", "x")]);
        let report = extract(bytes, &dest, 1024, 5).await.unwrap();
        assert_eq!(report.files, 1);
    }
}
