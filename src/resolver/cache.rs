use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::RwLock, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::hardcover::BookRow;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// What a cached name was looked up as. Cross-role hits let an author
/// lookup reuse results cached from a narrator lookup of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonKind {
    Author,
    Narrator,
}

impl PersonKind {
    fn other(self) -> PersonKind {
        match self {
            PersonKind::Author => PersonKind::Narrator,
            PersonKind::Narrator => PersonKind::Author,
        }
    }
}

struct CachedSearch {
    stored_at: Instant,
    results: Vec<BookRow>,
}

struct CachedPublisher {
    stored_at: Instant,
    id: i64,
}

/// Process-wide TTL cache of name-keyed lookup results. Soft state only:
/// a hit is a shortcut, a miss or an evicted entry is never an error, and
/// nothing here is authoritative for resolution decisions.
pub struct PersonCache {
    ttl: Duration,
    entries: RwLock<HashMap<(PersonKind, String), CachedSearch>>,
    publishers: RwLock<HashMap<String, CachedPublisher>>,
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PersonCache {
    pub fn new(ttl: Duration) -> Self {
        PersonCache {
            ttl,
            entries: RwLock::new(HashMap::new()),
            publishers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, kind: PersonKind, name: &str) -> Option<Vec<BookRow>> {
        let key = (kind, normalize_name(name));
        let entries = self.entries.read().await;
        entries
            .get(&key)
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.results.clone())
    }

    pub async fn put(&self, kind: PersonKind, name: &str, results: Vec<BookRow>) {
        let key = (kind, normalize_name(name));
        self.entries.write().await.insert(
            key,
            CachedSearch {
                stored_at: Instant::now(),
                results,
            },
        );
    }

    /// Like `get`, but falls back to results stored under the other role
    /// for the same normalized name.
    pub async fn get_cross_role(&self, kind: PersonKind, name: &str) -> Option<Vec<BookRow>> {
        if let Some(hit) = self.get(kind, name).await {
            return Some(hit);
        }
        self.get(kind.other(), name).await
    }

    pub async fn get_publisher(&self, name: &str) -> Option<i64> {
        let publishers = self.publishers.read().await;
        publishers
            .get(&normalize_name(name))
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.id)
    }

    pub async fn put_publisher(&self, name: &str, id: i64) {
        self.publishers.write().await.insert(
            normalize_name(name),
            CachedPublisher {
                stored_at: Instant::now(),
                id,
            },
        );
    }

    pub async fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, e| e.stored_at.elapsed() < ttl);
            removed += before - entries.len();
        }
        {
            let mut publishers = self.publishers.write().await;
            let before = publishers.len();
            publishers.retain(|_, e| e.stored_at.elapsed() < ttl);
            removed += before - publishers.len();
        }
        removed
    }

    /// Background sweep at TTL/4 cadence until shutdown.
    pub fn spawn_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.ttl / 4;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired().await;
                        if removed > 0 {
                            tracing::debug!(removed, "person cache sweep");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> BookRow {
        BookRow {
            id,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_put_round_trip_with_normalization() {
        let cache = PersonCache::new(DEFAULT_TTL);
        cache
            .put(PersonKind::Author, "  Andy Weir ", vec![row(1)])
            .await;
        let hit = cache.get(PersonKind::Author, "andy weir").await.unwrap();
        assert_eq!(hit[0].id, 1);
        assert!(cache.get(PersonKind::Narrator, "andy weir").await.is_none());
    }

    #[tokio::test]
    async fn cross_role_falls_back_to_other_kind() {
        let cache = PersonCache::new(DEFAULT_TTL);
        cache
            .put(PersonKind::Narrator, "Robin Miles", vec![row(2)])
            .await;
        assert!(cache.get(PersonKind::Author, "robin miles").await.is_none());
        let hit = cache
            .get_cross_role(PersonKind::Author, "Robin Miles")
            .await
            .unwrap();
        assert_eq!(hit[0].id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = PersonCache::new(Duration::from_secs(60));
        cache.put(PersonKind::Author, "a", vec![row(1)]).await;
        cache.put_publisher("Hachette", 77).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(PersonKind::Author, "a").await.is_some());
        assert_eq!(cache.get_publisher("hachette").await, Some(77));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(PersonKind::Author, "a").await.is_none());
        assert_eq!(cache.get_publisher("hachette").await, None);
        assert_eq!(cache.purge_expired().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_sweeps_and_stops_on_cancel() {
        let cache = Arc::new(PersonCache::new(Duration::from_secs(60)));
        cache.put(PersonKind::Author, "a", vec![row(1)]).await;

        let cancel = CancellationToken::new();
        let handle = cache.spawn_cleanup(cancel.clone());

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(cache.entries.read().await.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
