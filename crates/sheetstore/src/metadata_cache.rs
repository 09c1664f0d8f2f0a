//! TTL cache of spreadsheet tab listings
//!
//! Entries are keyed by spreadsheet id and credential context, since two
//! credentials may see different tabs. An entry is served only while it is
//! younger than the TTL. Any structural change to a spreadsheet drops every
//! entry for it and bumps its generation; a fetch that overlapped such a
//! change is returned to its caller but never cached.

use crate::api::TabInfo;
use crate::credentials::{Connection, CredentialContext};
use crate::error::Result;
use diagnostics::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

type CacheKey = (String, CredentialContext);

struct CachedListing {
    tabs: Arc<Vec<TabInfo>>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    listings: HashMap<CacheKey, CachedListing>,
    /// Bumped by every invalidation of a spreadsheet
    generations: HashMap<String, u64>,
    /// Bumped by `clear`
    epoch: u64,
}

impl CacheState {
    fn generation(&self, spreadsheet_id: &str) -> (u64, u64) {
        (
            self.epoch,
            self.generations.get(spreadsheet_id).copied().unwrap_or(0),
        )
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

pub struct MetadataCache {
    ttl: Duration,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl MetadataCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Tabs of `spreadsheet_id` ordered by index, fetched at most once per TTL
    pub async fn tabs(&self, conn: &Connection, spreadsheet_id: &str) -> Result<Arc<Vec<TabInfo>>> {
        let key = (spreadsheet_id.to_string(), conn.context.clone());

        let generation = {
            let state = self.state.read().await;
            if let Some(entry) = state.listings.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    _ = self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Metadata cache hit for {spreadsheet_id}", spreadsheet_id: spreadsheet_id);
                    return Ok(entry.tabs.clone());
                }
            }
            state.generation(spreadsheet_id)
        };

        _ = self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Metadata cache miss for {spreadsheet_id}", spreadsheet_id: spreadsheet_id);

        let mut tabs = conn.api.get_spreadsheet_metadata(spreadsheet_id).await?;
        tabs.sort_by_key(|t| t.index);
        let tabs = Arc::new(tabs);

        let mut state = self.state.write().await;
        if state.generation(spreadsheet_id) == generation {
            _ = state.listings.insert(
                key,
                CachedListing {
                    tabs: tabs.clone(),
                    fetched_at: Instant::now(),
                },
            );
        } else {
            debug!("Metadata for {spreadsheet_id} changed during fetch, not caching", spreadsheet_id: spreadsheet_id);
        }
        Ok(tabs)
    }

    /// Drop every listing of one spreadsheet, whatever credential fetched it
    pub async fn invalidate(&self, spreadsheet_id: &str) {
        let mut state = self.state.write().await;
        *state.generations.entry(spreadsheet_id.to_string()).or_default() += 1;
        let before = state.listings.len();
        state.listings.retain(|(id, _), _| id != spreadsheet_id);
        if state.listings.len() != before {
            _ = self.invalidations.fetch_add(1, Ordering::Relaxed);
            debug!("Metadata cache invalidated for {spreadsheet_id}", spreadsheet_id: spreadsheet_id);
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.listings.clear();
        state.epoch += 1;
        debug!("Metadata cache cleared");
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{SheetsApi, StructuralRequest, ValueRange};
    use crate::memory::{MemoryClient, MemorySheets};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Returns the listing it read only once released, so a structural
    /// change can land between the read and the cache insert.
    struct GatedMetadata {
        inner: Arc<MemoryClient>,
        fetched: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SheetsApi for GatedMetadata {
        async fn get_spreadsheet_metadata(&self, spreadsheet_id: &str) -> Result<Vec<TabInfo>> {
            let tabs = self.inner.get_spreadsheet_metadata(spreadsheet_id).await?;
            self.fetched.notify_one();
            self.release.notified().await;
            Ok(tabs)
        }

        async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
            self.inner.get_values(spreadsheet_id, range).await
        }

        async fn update_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()> {
            self.inner.update_values(spreadsheet_id, range, values).await
        }

        async fn append_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()> {
            self.inner.append_values(spreadsheet_id, range, values).await
        }

        async fn batch_update_values(&self, spreadsheet_id: &str, data: Vec<ValueRange>) -> Result<()> {
            self.inner.batch_update_values(spreadsheet_id, data).await
        }

        async fn batch_structural_update(&self, spreadsheet_id: &str, requests: Vec<StructuralRequest>) -> Result<()> {
            self.inner.batch_structural_update(spreadsheet_id, requests).await
        }
    }

    #[tokio::test]
    async fn test_fetch_overlapping_invalidation_is_not_cached() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s1", &["Notes"]);
        let gate = Arc::new(GatedMetadata {
            inner: sheets.client(crate::memory::SERVICE_PRINCIPAL),
            fetched: Notify::new(),
            release: Notify::new(),
        });
        let gated = Connection {
            api: gate.clone(),
            context: CredentialContext::service(),
        };
        let writer = sheets.service_connection();
        let cache = MetadataCache::new(Duration::from_secs(60));

        let (stale, added) = tokio::join!(cache.tabs(&gated, "s1"), async {
            gate.fetched.notified().await;
            let added = writer
                .api
                .batch_structural_update(
                    "s1",
                    vec![StructuralRequest::AddTab {
                        title: "FEB 25".to_string(),
                    }],
                )
                .await;
            cache.invalidate("s1").await;
            gate.release.notify_one();
            added
        });
        added.unwrap();
        assert_eq!(stale.unwrap().len(), 1);

        let fresh = cache.tabs(&writer, "s1").await.unwrap();
        let titles: Vec<_> = fresh.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Notes", "FEB 25"]);
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s1", &["Notes"]);
        let conn = sheets.service_connection();
        let cache = MetadataCache::new(Duration::from_secs(60));
        assert_eq!(cache.ttl(), Duration::from_secs(60));

        _ = cache.tabs(&conn, "s1").await.unwrap();
        cache.clear().await;
        _ = cache.tabs(&conn, "s1").await.unwrap();
        assert_eq!(sheets.metadata_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_refresh_happens_once() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s1", &["Notes", "Projects"]);
        let conn = sheets.service_connection();
        let cache = MetadataCache::new(Duration::from_secs(60));

        let first = cache.tabs(&conn, "s1").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = cache.tabs(&conn, "s1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(sheets.metadata_calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let third = cache.tabs(&conn, "s1").await.unwrap();
        let fourth = cache.tabs(&conn, "s1").await.unwrap();
        assert_eq!(sheets.metadata_calls(), 2);
        assert!(Arc::ptr_eq(&third, &fourth));
        assert_eq!(third.len(), 2);

        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_at_exact_ttl_is_stale() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s1", &["Notes"]);
        let conn = sheets.service_connection();
        let cache = MetadataCache::new(Duration::from_secs(60));

        _ = cache.tabs(&conn, "s1").await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        _ = cache.tabs(&conn, "s1").await.unwrap();
        assert_eq!(sheets.metadata_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_drops_all_contexts_for_spreadsheet() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s1", &["Notes"]);
        sheets.add_spreadsheet("s2", &["Other"]);
        let service = sheets.service_connection();
        let delegated = sheets.delegated_connection("user-token");
        let cache = MetadataCache::new(Duration::from_secs(60));

        _ = cache.tabs(&service, "s1").await.unwrap();
        _ = cache.tabs(&delegated, "s1").await.unwrap();
        _ = cache.tabs(&service, "s2").await.unwrap();
        assert_eq!(sheets.metadata_calls(), 3);

        cache.invalidate("s1").await;
        _ = cache.tabs(&service, "s1").await.unwrap();
        _ = cache.tabs(&delegated, "s1").await.unwrap();
        _ = cache.tabs(&service, "s2").await.unwrap();
        assert_eq!(sheets.metadata_calls(), 5);
        assert_eq!(cache.stats().invalidations, 1);
    }
}
