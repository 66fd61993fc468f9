// Domain models mapping ABS items and Hardcover identities into the shapes
// the sync pipeline works with.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One candidate item from the source library, flattened from the ABS item
/// and the user's media progress for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceItem {
    pub id: String,
    pub library_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub asin: Option<String>,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub cover_url: Option<String>,
    pub language: Option<String>,
    pub total_duration_seconds: f64,
    pub current_time_seconds: f64,
    /// Fraction in 0..1 as reported by the source.
    pub progress: f64,
    pub is_finished: bool,
    pub last_updated_ms: i64,
    pub is_ebook: bool,
}

impl SourceItem {
    pub fn primary_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// A resolved Hardcover identity. `edition_id` is the audiobook edition;
/// items without one are reported as mismatches and never mutated, so a
/// populated identity always carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookIdentity {
    pub book_id: i64,
    pub edition_id: i64,
}

/// Hardcover `user_books.status_id` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingStatus {
    WantToRead,
    CurrentlyReading,
    Read,
}

impl ReadingStatus {
    pub fn as_id(self) -> i64 {
        match self {
            ReadingStatus::WantToRead => 1,
            ReadingStatus::CurrentlyReading => 2,
            ReadingStatus::Read => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(ReadingStatus::WantToRead),
            2 => Some(ReadingStatus::CurrentlyReading),
            3 => Some(ReadingStatus::Read),
            _ => None,
        }
    }
}

/// An item the resolver could not pin to a (book, edition) pair. Persisted
/// as a reviewable JSON artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMismatch {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub asin: String,
    pub reason: String,
    /// UNIX seconds when the failure was observed.
    pub timestamp: i64,
    pub attempts: u32,
    pub book_id: Option<i64>,
    pub edition_id: Option<i64>,
    pub canonical_id: Option<i64>,
    pub cover_url: Option<String>,
    pub duration_seconds: f64,
}

/// Per-run counters. Producers mutate behind a mutex; observers only ever
/// get a snapshot clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub total_books_processed: u64,
    pub books_synced: u64,
    pub books_not_found: Vec<String>,
    pub mismatches: Vec<BookMismatch>,
}

/// Library include/exclude sets. Empty include means "all libraries".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryFilter {
    pub include: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
}

impl LibraryFilter {
    pub fn allows(&self, library_id: &str) -> bool {
        if self.exclude.contains(library_id) {
            return false;
        }
        self.include.is_empty() || self.include.contains(library_id)
    }
}

/// Per-profile sync behavior knobs, stored serialized in the profile config
/// row and overlaid onto the global defaults at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub incremental: bool,
    pub state_file_override: String,
    pub min_change_threshold_seconds: i64,
    pub libraries: LibraryFilter,
    /// Duration string, e.g. "1h" or "30m". Empty inherits the global value.
    pub sync_interval: String,
    pub minimum_progress: f64,
    pub sync_want_to_read: bool,
    pub process_unread_books: bool,
    pub sync_owned: bool,
    pub include_ebooks: bool,
    pub dry_run: bool,
    /// Case-insensitive title substring; only matching items are synced.
    pub test_book_filter: String,
    /// 0 = unlimited.
    pub test_book_limit: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            incremental: false,
            state_file_override: String::new(),
            min_change_threshold_seconds: 30,
            libraries: LibraryFilter::default(),
            sync_interval: String::new(),
            minimum_progress: 0.01,
            sync_want_to_read: true,
            process_unread_books: false,
            sync_owned: true,
            include_ebooks: false,
            dry_run: false,
            test_book_filter: String::new(),
            test_book_limit: 0,
        }
    }
}

/// Partial update for `SyncOptions`. `None` means "not provided, keep the
/// existing value", which keeps an explicit `false` distinguishable from an
/// absent field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptionsPatch {
    pub incremental: Option<bool>,
    pub state_file_override: Option<String>,
    pub min_change_threshold_seconds: Option<i64>,
    pub libraries: Option<LibraryFilter>,
    pub sync_interval: Option<String>,
    pub minimum_progress: Option<f64>,
    pub sync_want_to_read: Option<bool>,
    pub process_unread_books: Option<bool>,
    pub sync_owned: Option<bool>,
    pub include_ebooks: Option<bool>,
    pub dry_run: Option<bool>,
    pub test_book_filter: Option<String>,
    pub test_book_limit: Option<usize>,
}

impl SyncOptions {
    /// Apply a patch: provided booleans replace (including explicit
    /// `false`), while empty strings and zero numerics are treated as
    /// unset and leave the existing value intact.
    pub fn merge(&mut self, patch: &SyncOptionsPatch) {
        if let Some(v) = patch.incremental {
            self.incremental = v;
        }
        if let Some(v) = &patch.state_file_override {
            if !v.is_empty() {
                self.state_file_override = v.clone();
            }
        }
        if let Some(v) = patch.min_change_threshold_seconds {
            if v != 0 {
                self.min_change_threshold_seconds = v;
            }
        }
        if let Some(v) = &patch.libraries {
            if !v.include.is_empty() || !v.exclude.is_empty() {
                self.libraries = v.clone();
            }
        }
        if let Some(v) = &patch.sync_interval {
            if !v.is_empty() {
                self.sync_interval = v.clone();
            }
        }
        if let Some(v) = patch.minimum_progress {
            if v != 0.0 {
                self.minimum_progress = v;
            }
        }
        if let Some(v) = patch.sync_want_to_read {
            self.sync_want_to_read = v;
        }
        if let Some(v) = patch.process_unread_books {
            self.process_unread_books = v;
        }
        if let Some(v) = patch.sync_owned {
            self.sync_owned = v;
        }
        if let Some(v) = patch.include_ebooks {
            self.include_ebooks = v;
        }
        if let Some(v) = patch.dry_run {
            self.dry_run = v;
        }
        if let Some(v) = &patch.test_book_filter {
            if !v.is_empty() {
                self.test_book_filter = v.clone();
            }
        }
        if let Some(v) = patch.test_book_limit {
            if v != 0 {
                self.test_book_limit = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = SyncOptions::default();
        assert_eq!(opts.min_change_threshold_seconds, 30);
        assert_eq!(opts.minimum_progress, 0.01);
        assert!(opts.sync_want_to_read);
        assert!(opts.sync_owned);
        assert_eq!(opts.test_book_limit, 0);
    }

    #[test]
    fn merge_replaces_explicit_false_booleans() {
        let mut opts = SyncOptions::default();
        assert!(opts.sync_want_to_read);
        opts.merge(&SyncOptionsPatch {
            sync_want_to_read: Some(false),
            ..Default::default()
        });
        assert!(!opts.sync_want_to_read);
    }

    #[test]
    fn merge_ignores_empty_strings_and_zero_numerics() {
        let mut opts = SyncOptions {
            test_book_filter: "dune".into(),
            minimum_progress: 0.05,
            ..Default::default()
        };
        opts.merge(&SyncOptionsPatch {
            test_book_filter: Some(String::new()),
            minimum_progress: Some(0.0),
            min_change_threshold_seconds: Some(0),
            ..Default::default()
        });
        assert_eq!(opts.test_book_filter, "dune");
        assert_eq!(opts.minimum_progress, 0.05);
        assert_eq!(opts.min_change_threshold_seconds, 30);
    }

    #[test]
    fn merge_leaves_absent_fields_alone() {
        let mut opts = SyncOptions {
            dry_run: true,
            ..Default::default()
        };
        opts.merge(&SyncOptionsPatch::default());
        assert!(opts.dry_run);
    }

    #[test]
    fn options_round_trip_through_json() {
        let opts = SyncOptions {
            incremental: true,
            test_book_limit: 5,
            ..Default::default()
        };
        let blob = serde_json::to_string(&opts).unwrap();
        let back: SyncOptions = serde_json::from_str(&blob).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn options_deserialize_from_sparse_blob() {
        // Older rows may carry only a few fields; the rest take defaults.
        let opts: SyncOptions = serde_json::from_str(r#"{"incremental":true}"#).unwrap();
        assert!(opts.incremental);
        assert_eq!(opts.minimum_progress, 0.01);
    }

    #[test]
    fn library_filter_exclude_wins() {
        let filter = LibraryFilter {
            include: BTreeSet::from(["a".to_string(), "b".to_string()]),
            exclude: BTreeSet::from(["b".to_string()]),
        };
        assert!(filter.allows("a"));
        assert!(!filter.allows("b"));
        assert!(!filter.allows("c"));
        assert!(LibraryFilter::default().allows("anything"));
    }

    #[test]
    fn reading_status_ids_round_trip() {
        for status in [
            ReadingStatus::WantToRead,
            ReadingStatus::CurrentlyReading,
            ReadingStatus::Read,
        ] {
            assert_eq!(ReadingStatus::from_id(status.as_id()), Some(status));
        }
        assert_eq!(ReadingStatus::from_id(4), None);
    }
}
