//! Upload loading: turn a user-supplied path or URL into archive bytes.
//!
//! ## Why check the size before reading?
//!
//! The upload ceiling is the first line of defence against oversized input.
//! For local files the length comes from metadata; for URLs from
//! `Content-Length` when the server sends one, and otherwise from a running
//! count while the body streams in. Either way nothing larger than the
//! ceiling is ever buffered.
//!
//! Only the file name is validated here (it must end in `.zip`). Whether the
//! bytes really are a ZIP archive is decided by the extractor.

use crate::error::Tex2PdfError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tracing::{debug, info};

/// An upload held in memory, ready for extraction.
#[derive(Debug, Clone)]
pub struct Upload {
    /// File name the upload arrived under (no directory part).
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// True if `name` carries the `.zip` suffix, in any letter case.
pub fn has_zip_suffix(name: &str) -> bool {
    name.len() > 4
        && name
            .get(name.len() - 4..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".zip"))
}

/// Load the upload named by `input`, refusing anything over `max_bytes`.
pub async fn load_upload(
    input: &str,
    max_bytes: u64,
    timeout_secs: u64,
) -> Result<Upload, Tex2PdfError> {
    let upload = if is_url(input) {
        download_url(input, max_bytes, timeout_secs).await?
    } else {
        read_local(input, max_bytes).await?
    };
    validate_upload(&upload.name, upload.bytes.len() as u64, max_bytes)?;
    Ok(upload)
}

/// Name and size checks shared by every upload source.
pub fn validate_upload(name: &str, len: u64, max_bytes: u64) -> Result<(), Tex2PdfError> {
    if !has_zip_suffix(name) {
        return Err(invalid("Invalid file type. Please upload a ZIP file."));
    }
    if len == 0 {
        return Err(invalid("Upload is empty"));
    }
    check_size(len, max_bytes)
}

fn check_size(len: u64, max_bytes: u64) -> Result<(), Tex2PdfError> {
    if len > max_bytes {
        return Err(invalid(format!(
            "Upload is {len} bytes; the limit is {max_bytes} bytes"
        )));
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> Tex2PdfError {
    Tex2PdfError::InvalidUpload {
        reason: reason.into(),
    }
}

async fn read_local(path_str: &str, max_bytes: u64) -> Result<Upload, Tex2PdfError> {
    let path = PathBuf::from(path_str);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !has_zip_suffix(&name) {
        return Err(invalid("Invalid file type. Please upload a ZIP file."));
    }

    let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => invalid(format!("File not found: {}", path.display())),
        std::io::ErrorKind::PermissionDenied => {
            invalid(format!("Permission denied: {}", path.display()))
        }
        _ => invalid(format!("Cannot read {}: {e}", path.display())),
    })?;
    if !meta.is_file() {
        return Err(invalid(format!("Not a regular file: {}", path.display())));
    }
    check_size(meta.len(), max_bytes)?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| invalid(format!("Cannot read {}: {e}", path.display())))?;

    debug!("Loaded local upload {} ({} bytes)", path.display(), bytes.len());
    Ok(Upload { name, bytes })
}

async fn download_url(
    url: &str,
    max_bytes: u64,
    timeout_secs: u64,
) -> Result<Upload, Tex2PdfError> {
    info!("Downloading archive from: {}", url);

    let failed = |reason: String| invalid(format!("Download of {url} failed: {reason}"));

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let mut response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let name = extract_filename(url, &response);
    if !has_zip_suffix(&name) {
        return Err(invalid("Invalid file type. Please upload a ZIP file."));
    }

    if let Some(len) = response.content_length() {
        check_size(len, max_bytes)?;
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
        check_size((bytes.len() + chunk.len()) as u64, max_bytes)?;
        bytes.extend_from_slice(&chunk);
    }

    info!("Downloaded {} ({} bytes)", name, bytes.len());
    Ok(Upload { name, bytes })
}

static RE_DISPOSITION_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)filename\s*=\s*"?([^";]+)"?"#).unwrap());

/// Pick a file name from `Content-Disposition`, falling back to the URL path.
fn extract_filename(url: &str, response: &reqwest::Response) -> String {
    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok());
    filename_from(url, disposition)
}

fn filename_from(url: &str, disposition: Option<&str>) -> String {
    if let Some(caps) = disposition.and_then(|d| RE_DISPOSITION_FILENAME.captures(d)) {
        let raw = caps[1].trim();
        // Keep the last path segment only.
        if let Some(last) = raw.rsplit(['/', '\\']).next().filter(|s| !s.is_empty()) {
            return last.to_string();
        }
    }

    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/paper.zip"));
        assert!(is_url("http://example.com/paper.zip"));
        assert!(!is_url("/tmp/paper.zip"));
        assert!(!is_url("paper.zip"));
        assert!(!is_url(""));
    }

    #[test]
    fn zip_suffix_is_case_insensitive() {
        assert!(has_zip_suffix("paper.zip"));
        assert!(has_zip_suffix("PAPER.ZIP"));
        assert!(has_zip_suffix("thesis.v2.Zip"));
        assert!(!has_zip_suffix(".zip"));
        assert!(!has_zip_suffix("paper.tar.gz"));
        assert!(!has_zip_suffix("paper.zipx"));
        assert!(!has_zip_suffix("zip"));
        assert!(!has_zip_suffix("é.zi"));
    }

    #[test]
    fn validate_rejects_wrong_suffix_empty_and_oversized() {
        let err = validate_upload("paper.pdf", 10, 100).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid upload: Invalid file type. Please upload a ZIP file."
        );
        assert_eq!(err.status_code(), 400);

        assert!(validate_upload("paper.zip", 0, 100).is_err());
        assert!(validate_upload("paper.zip", 101, 100).is_err());
        assert!(validate_upload("paper.zip", 100, 100).is_ok());
    }

    #[test]
    fn filename_prefers_content_disposition() {
        assert_eq!(
            filename_from(
                "https://host/download?id=7",
                Some(r#"attachment; filename="paper.zip""#)
            ),
            "paper.zip"
        );
        assert_eq!(
            filename_from("https://host/x", Some("attachment; filename=../../evil.zip")),
            "evil.zip"
        );
        assert_eq!(filename_from("https://host/files/paper.zip", None), "paper.zip");
        assert_eq!(filename_from("https://host/", None), "");
    }

    #[test]
    fn local_upload_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.zip");
        std::fs::write(&path, b"PK\x05\x06").unwrap();

        let upload =
            tokio_test::block_on(load_upload(path.to_str().unwrap(), 1024, 5)).unwrap();

        assert_eq!(upload.name, "paper.zip");
        assert_eq!(upload.bytes, b"PK\x05\x06");
    }

    #[test]
    fn local_upload_checks() {
        let dir = TempDir::new().unwrap();
        let big = dir.path().join("big.zip");
        std::fs::write(&big, vec![0u8; 2048]).unwrap();
        let wrong = dir.path().join("paper.tar");
        std::fs::write(&wrong, b"x").unwrap();
        let missing = dir.path().join("missing.zip");

        for path in [&big, &wrong, &missing] {
            let err = tokio_test::block_on(load_upload(path.to_str().unwrap(), 1024, 5))
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_upload", "{}", path.display());
        }
    }
}
