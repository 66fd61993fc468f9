// Mapping from ABS DTOs to the domain SourceItem the pipeline consumes.

use std::collections::HashMap;

use super::models::SourceItem;
use crate::abs_client::{LibraryItem, MediaProgress};

/// Normalize an ISBN and classify it by length. Hyphens and spaces are
/// stripped; anything that is not 10 or 13 characters afterwards is dropped.
pub fn split_isbn(raw: &str) -> (Option<String>, Option<String>) {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    match cleaned.len() {
        10 => (Some(cleaned), None),
        13 => (None, Some(cleaned)),
        _ => (None, None),
    }
}

/// Flatten one ABS item plus the user's progress for it into a SourceItem.
/// Best-effort extraction: items without media metadata still map, they
/// just carry fewer lookup keys.
pub fn map_source_item(
    abs_base_url: &str,
    item: &LibraryItem,
    progress: Option<&MediaProgress>,
) -> SourceItem {
    let media = item.media.as_ref();
    let meta = media.and_then(|m| m.metadata.as_ref());

    let title = meta
        .and_then(|m| m.title.clone())
        .unwrap_or_else(|| "Untitled".into());
    let authors: Vec<String> = meta
        .and_then(|m| m.author_name.as_ref())
        .map(|names| {
            names
                .split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let asin = meta
        .and_then(|m| m.asin.clone())
        .filter(|a| !a.is_empty());
    let (isbn10, isbn13) = meta
        .and_then(|m| m.isbn.as_deref())
        .map(split_isbn)
        .unwrap_or((None, None));

    let cover_url = Some(format!(
        "{}/api/items/{}/cover",
        abs_base_url.trim_end_matches('/'),
        item.id
    ));

    let media_duration = media.and_then(|m| m.duration).unwrap_or(0.0);
    let total_duration_seconds = progress
        .map(|p| p.duration)
        .filter(|d| *d > 0.0)
        .unwrap_or(media_duration);

    let is_ebook = media
        .map(|m| m.ebook_format.is_some() && media_duration == 0.0)
        .unwrap_or(false);

    SourceItem {
        id: item.id.clone(),
        library_id: item.library_id.clone(),
        title,
        authors,
        asin,
        isbn10,
        isbn13,
        cover_url,
        language: meta.and_then(|m| m.language.clone()),
        total_duration_seconds,
        current_time_seconds: progress.map(|p| p.current_time).unwrap_or(0.0),
        progress: progress.map(|p| p.progress).unwrap_or(0.0),
        is_finished: progress.map(|p| p.is_finished).unwrap_or(false),
        last_updated_ms: progress
            .map(|p| p.last_update)
            .filter(|ms| *ms > 0)
            .or(item.updated_at)
            .unwrap_or(0),
        is_ebook,
    }
}

/// Join a library listing against the `/api/me` progress array, keyed by
/// library item id.
pub fn join_items_with_progress(
    abs_base_url: &str,
    items: &[LibraryItem],
    progress: &[MediaProgress],
) -> Vec<SourceItem> {
    let by_item: HashMap<&str, &MediaProgress> = progress
        .iter()
        .map(|p| (p.library_item_id.as_str(), p))
        .collect();
    items
        .iter()
        .map(|item| map_source_item(abs_base_url, item, by_item.get(item.id.as_str()).copied()))
        .collect()
}
