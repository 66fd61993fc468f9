// Mismatch artifacts: unresolved items written to disk as
// EditionCreatorInput JSON for operator review.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::{domain::models::BookMismatch, error::AbsHardcoverResult};

const DEFAULT_EDITION_FORMAT: &str = "Audible Audio";
const MAX_TITLE_STEM: usize = 60;

/// Shape reviewers feed back into Hardcover's edition creation.
#[derive(Debug, Serialize)]
struct EditionCreatorInput<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    author: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    isbn: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    asin: &'a str,
    edition_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cover_url: Option<&'a str>,
    edition_info: EditionInfo<'a>,
}

/// Lookup trace carried alongside the creator fields.
#[derive(Debug, Serialize)]
struct EditionInfo<'a> {
    reason: &'a str,
    attempts: u32,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    book_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    edition_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    canonical_id: Option<i64>,
    /// The cover points at a private host; the target cannot fetch it.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    cover_url_private: bool,
}

pub struct MismatchRecorder {
    out_dir: PathBuf,
}

impl MismatchRecorder {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        MismatchRecorder {
            out_dir: out_dir.into(),
        }
    }

    /// Write one artifact as `<sanitized_title>-<timestamp>.json` via a
    /// temp file and rename, so readers never observe a partial file.
    pub fn record(&self, mismatch: &BookMismatch) -> AbsHardcoverResult<PathBuf> {
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("creating {}", self.out_dir.display()))?;

        let cover_url = mismatch.cover_url.as_deref().filter(|u| !u.is_empty());
        let artifact = EditionCreatorInput {
            title: &mismatch.title,
            author: &mismatch.author,
            isbn: &mismatch.isbn,
            asin: &mismatch.asin,
            edition_format: DEFAULT_EDITION_FORMAT,
            audio_seconds: (mismatch.duration_seconds > 0.0)
                .then(|| mismatch.duration_seconds.round() as i64),
            cover_url,
            edition_info: EditionInfo {
                reason: &mismatch.reason,
                attempts: mismatch.attempts,
                timestamp: mismatch.timestamp,
                book_id: mismatch.book_id,
                edition_id: mismatch.edition_id,
                canonical_id: mismatch.canonical_id,
                cover_url_private: cover_url.map(is_private_url).unwrap_or(false),
            },
        };

        let stem = sanitize_title(&mismatch.title);
        let path = self
            .out_dir
            .join(format!("{}-{}.json", stem, mismatch.timestamp));
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&artifact)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        tracing::info!(path = %path.display(), reason = %mismatch.reason, "wrote mismatch artifact");
        Ok(path)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

pub fn sanitize_title(title: &str) -> String {
    let mut stem: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    while stem.contains("--") {
        stem = stem.replace("--", "-");
    }
    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.chars().take(MAX_TITLE_STEM).collect()
    }
}

/// Hosts the target service could never fetch from: loopback, RFC1918
/// ranges, and mDNS `.local` names.
pub fn is_private_url(raw: &str) -> bool {
    let Ok(url) = url::Url::parse(raw) else {
        return false;
    };
    match url.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".local")
        }
        Some(url::Host::Ipv4(ip)) => ip.is_private() || ip.is_loopback() || ip.is_link_local(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mismatch() -> BookMismatch {
        BookMismatch {
            title: "The Fifth Season".to_string(),
            author: "N. K. Jemisin".to_string(),
            isbn: "9780316229296".to_string(),
            asin: "B012EC4XM2".to_string(),
            reason: "asin lookup found no audiobook edition (B012EC4XM2)".to_string(),
            timestamp: 1_700_000_000,
            attempts: 4,
            book_id: None,
            edition_id: None,
            canonical_id: None,
            cover_url: Some("http://abs.local:13378/api/items/li_1/cover".to_string()),
            duration_seconds: 55_440.4,
        }
    }

    #[test]
    fn sanitize_collapses_and_trims() {
        assert_eq!(sanitize_title("The Fifth Season"), "the-fifth-season");
        assert_eq!(sanitize_title("Dune: Messiah (Unabridged)"), "dune-messiah-unabridged");
        assert_eq!(sanitize_title("!!!"), "untitled");
        assert!(sanitize_title(&"x".repeat(200)).len() <= MAX_TITLE_STEM);
    }

    #[test]
    fn private_hosts_are_detected() {
        assert!(is_private_url("http://abs.local:13378/cover"));
        assert!(is_private_url("http://192.168.1.10/cover"));
        assert!(is_private_url("http://10.0.0.2/cover"));
        assert!(is_private_url("http://172.16.5.5/cover"));
        assert!(is_private_url("http://127.0.0.1:8080/cover"));
        assert!(is_private_url("http://localhost/cover"));
        assert!(!is_private_url("https://covers.example.com/cover.jpg"));
        assert!(!is_private_url("http://172.32.0.1/cover"));
        assert!(!is_private_url("not a url"));
    }

    #[test]
    fn record_writes_edition_creator_input() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MismatchRecorder::new(dir.path());
        let path = recorder.record(&sample_mismatch()).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "the-fifth-season-1700000000.json"
        );
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["title"], "The Fifth Season");
        assert_eq!(value["edition_format"], "Audible Audio");
        assert_eq!(value["audio_seconds"], 55_440);
        assert_eq!(value["edition_info"]["attempts"], 4);
        // Private ABS cover URL is preserved but flagged.
        assert_eq!(
            value["cover_url"],
            "http://abs.local:13378/api/items/li_1/cover"
        );
        assert_eq!(value["edition_info"]["cover_url_private"], true);
        // No leftover temp file.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn record_omits_empty_optionals() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MismatchRecorder::new(dir.path());
        let mismatch = BookMismatch {
            isbn: String::new(),
            asin: String::new(),
            cover_url: None,
            duration_seconds: 0.0,
            ..sample_mismatch()
        };
        let path = recorder.record(&mismatch).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(value.get("isbn").is_none());
        assert!(value.get("asin").is_none());
        assert!(value.get("cover_url").is_none());
        assert!(value.get("audio_seconds").is_none());
        assert!(value["edition_info"].get("cover_url_private").is_none());
    }
}
