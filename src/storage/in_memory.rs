use crate::app::ports::{MappingStorePort, WatchlistStorePort};
use crate::domain::{CatalogId, CatalogMatch, MediaType, WatchlistRow};
use crate::error::{ImportError, Result};
use crate::pipeline::mapping_cache::MappingKey;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    mappings: Arc<Mutex<HashMap<String, CatalogMatch>>>,
    watchlist: Arc<Mutex<HashMap<(String, CatalogId, MediaType), WatchlistRow>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            mappings: Arc::new(Mutex::new(HashMap::new())),
            watchlist: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Every watchlist row stored for a user, oldest first.
    pub fn watchlist_for(&self, user_id: &str) -> Result<Vec<WatchlistRow>> {
        let watchlist = lock(&self.watchlist)?;
        let mut rows: Vec<WatchlistRow> = watchlist
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.catalog_id.cmp(&b.catalog_id)));
        Ok(rows)
    }

    pub fn mapping_count(&self) -> Result<usize> {
        Ok(lock(&self.mappings)?.len())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ImportError::Storage("in-memory store lock poisoned".to_string()))
}

#[async_trait]
impl MappingStorePort for InMemoryStorage {
    async fn batch_lookup(&self, keys: &[MappingKey]) -> Result<HashMap<MappingKey, CatalogMatch>> {
        let mappings = lock(&self.mappings)?;
        let found: HashMap<MappingKey, CatalogMatch> = keys
            .iter()
            .filter_map(|key| mappings.get(&key.storage_key()).map(|m| (key.clone(), *m)))
            .collect();
        debug!("Mapping lookup: {} of {} keys found", found.len(), keys.len());
        Ok(found)
    }

    async fn batch_insert(&self, entries: &[(MappingKey, CatalogMatch)]) -> Result<()> {
        let mut mappings = lock(&self.mappings)?;
        for (key, found) in entries {
            mappings.insert(key.storage_key(), *found);
        }
        debug!("Stored {} mapping entries", entries.len());
        Ok(())
    }
}

#[async_trait]
impl WatchlistStorePort for InMemoryStorage {
    async fn existing_entries(
        &self,
        user_id: &str,
        catalog_ids: &[CatalogId],
    ) -> Result<HashSet<(CatalogId, MediaType)>> {
        let wanted: HashSet<CatalogId> = catalog_ids.iter().copied().collect();
        let watchlist = lock(&self.watchlist)?;
        Ok(watchlist
            .keys()
            .filter(|(user, id, _)| user == user_id && wanted.contains(id))
            .map(|(_, id, media_type)| (*id, *media_type))
            .collect())
    }

    async fn insert_rows(&self, rows: &[WatchlistRow]) -> Result<usize> {
        let mut watchlist = lock(&self.watchlist)?;
        let mut inserted = 0;
        for row in rows {
            let key = (row.user_id.clone(), row.catalog_id, row.media_type);
            if watchlist.contains_key(&key) {
                continue;
            }
            watchlist.insert(key, row.clone());
            inserted += 1;
        }
        debug!("Inserted {} of {} watchlist rows", inserted, rows.len());
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WatchlistItem;
    use chrono::Utc;

    fn row(user: &str, id: CatalogId, media_type: MediaType) -> WatchlistRow {
        let item = WatchlistItem {
            catalog_id: id,
            media_type,
            title: format!("Title {}", id),
        };
        WatchlistRow::plan_to_watch(user, &item, Utc::now())
    }

    #[tokio::test]
    async fn test_mapping_upsert_last_write_wins() {
        let storage = InMemoryStorage::new();
        let key = MappingKey::external("tt0133093");
        let first = CatalogMatch {
            catalog_id: 1,
            media_type: MediaType::Movie,
        };
        let second = CatalogMatch {
            catalog_id: 603,
            media_type: MediaType::Movie,
        };
        storage.batch_insert(&[(key.clone(), first)]).await.unwrap();
        storage.batch_insert(&[(key.clone(), second)]).await.unwrap();

        let found = storage
            .batch_lookup(&[key.clone(), MappingKey::external("tt0000000")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&key], second);
        assert_eq!(storage.mapping_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_watchlist_rows_unique_per_user_and_type() {
        let storage = InMemoryStorage::new();
        let inserted = storage
            .insert_rows(&[
                row("u1", 1, MediaType::Movie),
                row("u1", 1, MediaType::Tv),
                row("u1", 1, MediaType::Movie),
                row("u2", 1, MediaType::Movie),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let existing = storage.existing_entries("u1", &[1, 2]).await.unwrap();
        assert_eq!(existing.len(), 2);
        assert!(existing.contains(&(1, MediaType::Tv)));
        assert_eq!(storage.watchlist_for("u2").unwrap().len(), 1);
    }
}
