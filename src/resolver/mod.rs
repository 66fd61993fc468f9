// Identity resolution: ABS item → Hardcover (book, audiobook edition)
// through an ordered strategy chain, with dedup-follow and a soft cache of
// name-keyed search results.

pub mod cache;

use std::sync::Arc;

use crate::{
    domain::models::{BookIdentity, SourceItem},
    error::AbsHardcoverResult,
    hardcover::{BOOK_STATUS_DEDUPED, BookRow, EditionRow, HardcoverOps},
};
use cache::{PersonCache, PersonKind};

/// Title/author scoring: exact title match, author substring, audiobook
/// edition available. A candidate is accepted at `ACCEPT_SCORE` if it leads
/// the runner-up by at least `UNIQUE_MARGIN`.
const TITLE_EXACT_SCORE: i32 = 100;
const AUTHOR_MATCH_SCORE: i32 = 30;
const AUDIOBOOK_SCORE: i32 = 20;
const ACCEPT_SCORE: i32 = 80;
const UNIQUE_MARGIN: i32 = 20;

// Accepted duration drift between source audio and a candidate edition.
const DURATION_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identity: BookIdentity,
    pub edition: EditionRow,
}

/// A resolution dead end: which strategy gave up and any partial identity
/// that was seen on the way (kept for the mismatch artifact).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveFailure {
    pub reason: String,
    pub attempts: u32,
    pub book_id: Option<i64>,
    pub canonical_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(Resolution),
    Mismatch(ResolveFailure),
}

/// Substitute canonical ids for deduplicated records. A deduplicated row
/// without a canonical id cannot be written to safely and is dropped.
pub fn follow_canonical(rows: Vec<BookRow>) -> (Vec<BookRow>, Option<i64>) {
    let mut dropped_dedup = None;
    let mut followed = Vec::with_capacity(rows.len());
    for mut row in rows {
        if row.book_status_id == Some(BOOK_STATUS_DEDUPED) {
            match row.canonical_id {
                Some(canonical) => {
                    tracing::debug!(from = row.id, to = canonical, "following canonical book id");
                    row.id = canonical;
                }
                None => {
                    dropped_dedup = Some(row.id);
                    continue;
                }
            }
        }
        followed.push(row);
    }
    (followed, dropped_dedup)
}

pub struct Resolver {
    ops: Arc<dyn HardcoverOps>,
    cache: Arc<PersonCache>,
}

impl Resolver {
    pub fn new(ops: Arc<dyn HardcoverOps>, cache: Arc<PersonCache>) -> Self {
        Resolver { ops, cache }
    }

    /// Walk the strategy chain, stopping at the first hit. Only lookup
    /// *failures* fall through; transport errors propagate to the caller.
    pub async fn resolve(&self, item: &SourceItem) -> AbsHardcoverResult<ResolveOutcome> {
        let mut attempts = 0u32;
        let mut last_reason = "no usable identifiers on source item".to_string();
        let mut dropped_dedup = None;

        if let Some(asin) = item.asin.as_deref() {
            attempts += 1;
            let rows = self.ops.lookup_by_asin(asin).await?;
            let (rows, dropped) = follow_canonical(rows);
            dropped_dedup = dropped_dedup.or(dropped);
            if let Some(resolution) = pick_edition(&rows, item, Some(asin)) {
                return Ok(ResolveOutcome::Resolved(resolution));
            }
            last_reason = format!("asin lookup found no audiobook edition ({asin})");
        }

        if let Some(isbn) = item.isbn13.as_deref() {
            attempts += 1;
            let rows = self.ops.lookup_by_isbn13(isbn).await?;
            let (rows, dropped) = follow_canonical(rows);
            dropped_dedup = dropped_dedup.or(dropped);
            if let Some(resolution) = pick_edition(&rows, item, item.asin.as_deref()) {
                return Ok(ResolveOutcome::Resolved(resolution));
            }
            last_reason = format!("isbn13 lookup found no audiobook edition ({isbn})");
        }

        if let Some(isbn) = item.isbn10.as_deref() {
            attempts += 1;
            let rows = self.ops.lookup_by_isbn10(isbn).await?;
            let (rows, dropped) = follow_canonical(rows);
            dropped_dedup = dropped_dedup.or(dropped);
            if let Some(resolution) = pick_edition(&rows, item, item.asin.as_deref()) {
                return Ok(ResolveOutcome::Resolved(resolution));
            }
            last_reason = format!("isbn10 lookup found no audiobook edition ({isbn})");
        }

        if let Some(author) = item.primary_author() {
            attempts += 1;
            // Soft cache first; a hit that does not score is not final,
            // the live search below still runs.
            if let Some(cached) = self.cache.get_cross_role(PersonKind::Author, author).await {
                let (rows, dropped) = follow_canonical(cached);
                dropped_dedup = dropped_dedup.or(dropped);
                if let Some(resolution) = score_search(&rows, item) {
                    return Ok(ResolveOutcome::Resolved(resolution));
                }
            }

            let rows = self.ops.search_by_title_author(&item.title, author).await?;
            self.cache
                .put(PersonKind::Author, author, rows.clone())
                .await;
            let (rows, dropped) = follow_canonical(rows);
            dropped_dedup = dropped_dedup.or(dropped);
            match score_search(&rows, item) {
                Some(resolution) => return Ok(ResolveOutcome::Resolved(resolution)),
                None => {
                    last_reason = format!(
                        "title/author search had no confident match ({} / {author})",
                        item.title
                    );
                }
            }
        } else if attempts == 0 {
            last_reason = "item has neither identifiers nor an author to search by".to_string();
        }

        if let Some(dedup_id) = dropped_dedup {
            last_reason = format!("book {dedup_id} is deduplicated with no canonical id");
        }

        Ok(ResolveOutcome::Mismatch(ResolveFailure {
            reason: last_reason,
            attempts,
            book_id: dropped_dedup,
            canonical_id: None,
        }))
    }
}

/// Choose the best audiobook edition across candidate books. Ranking:
/// ASIN match, then duration within tolerance, then language match, then
/// lowest edition id for stability.
fn pick_edition(rows: &[BookRow], item: &SourceItem, asin: Option<&str>) -> Option<Resolution> {
    let mut best: Option<(EditionRank, i64, EditionRow)> = None;
    for row in rows {
        for edition in &row.editions {
            if !edition.is_audiobook() {
                continue;
            }
            let rank = EditionRank::for_edition(edition, item, asin);
            let candidate = (rank, row.id, edition.clone());
            best = match best {
                None => Some(candidate),
                Some(current) if candidate.0.beats(&current.0, candidate.2.id, current.2.id) => {
                    Some(candidate)
                }
                Some(current) => Some(current),
            };
        }
    }
    best.map(|(_, book_id, edition)| Resolution {
        identity: BookIdentity {
            book_id,
            edition_id: edition.id,
        },
        edition,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EditionRank {
    asin_match: bool,
    duration_match: bool,
    language_match: bool,
}

impl EditionRank {
    fn for_edition(edition: &EditionRow, item: &SourceItem, asin: Option<&str>) -> Self {
        let asin_match = match (asin, edition.asin.as_deref()) {
            (Some(wanted), Some(have)) => wanted.eq_ignore_ascii_case(have),
            _ => false,
        };
        let duration_match = match edition.audio_seconds {
            Some(secs) if item.total_duration_seconds > 0.0 => {
                let drift =
                    (secs as f64 - item.total_duration_seconds).abs() / item.total_duration_seconds;
                drift <= DURATION_TOLERANCE
            }
            _ => false,
        };
        let language_match = match (item.language.as_deref(), edition.language.as_deref()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        };
        EditionRank {
            asin_match,
            duration_match,
            language_match,
        }
    }

    fn beats(&self, other: &EditionRank, self_id: i64, other_id: i64) -> bool {
        let lhs = (self.asin_match, self.duration_match, self.language_match);
        let rhs = (other.asin_match, other.duration_match, other.language_match);
        if lhs != rhs {
            return lhs > rhs;
        }
        self_id < other_id
    }
}

/// Score title/author search candidates; accept only a confident, clearly
/// unique winner that also has an audiobook edition to pin.
fn score_search(rows: &[BookRow], item: &SourceItem) -> Option<Resolution> {
    let wanted_title = item.title.trim().to_lowercase();
    let wanted_author = item.primary_author().map(|a| a.trim().to_lowercase());

    let mut scored: Vec<(i32, &BookRow)> = rows
        .iter()
        .map(|row| {
            let mut score = 0;
            if let Some(title) = &row.title {
                if title.trim().to_lowercase() == wanted_title {
                    score += TITLE_EXACT_SCORE;
                }
            }
            if let Some(wanted) = &wanted_author {
                let matched = row.author_names().any(|name| {
                    let name = name.trim().to_lowercase();
                    name.contains(wanted.as_str()) || wanted.contains(name.as_str())
                });
                if matched {
                    score += AUTHOR_MATCH_SCORE;
                }
            }
            if row.editions.iter().any(EditionRow::is_audiobook) {
                score += AUDIOBOOK_SCORE;
            }
            (score, row)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let (top_score, top_row) = scored.first().copied()?;
    if top_score < ACCEPT_SCORE {
        return None;
    }
    if let Some((second_score, _)) = scored.get(1) {
        if top_score - second_score < UNIQUE_MARGIN {
            return None;
        }
    }
    pick_edition(std::slice::from_ref(top_row), item, item.asin.as_deref())
}
