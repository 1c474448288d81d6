use crate::app::ports::MappingStorePort;
use crate::config::CacheProbeOrder;
use crate::domain::{CatalogMatch, MediaType};
use crate::observability::metrics;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// Lowercases and collapses punctuation/whitespace so that "Amélie!" and
/// "amélie" share a key.
pub fn normalize_title(title: &str) -> String {
    NON_ALNUM_RE
        .replace_all(&title.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Key into the mapping cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MappingKey {
    /// External id as found in the export, e.g. `tt0133093`.
    External(String),
    Title {
        normalized_title: String,
        year: Option<i32>,
        media_type: MediaType,
    },
}

impl MappingKey {
    pub fn external(id: &str) -> Self {
        MappingKey::External(id.to_string())
    }

    pub fn title(title: &str, year: Option<i32>, media_type: MediaType) -> Self {
        MappingKey::Title {
            normalized_title: normalize_title(title),
            year,
            media_type,
        }
    }

    /// Stable string form used as the storage primary key.
    pub fn storage_key(&self) -> String {
        match self {
            MappingKey::External(id) => format!("imdb:{}", id),
            MappingKey::Title {
                normalized_title,
                year,
                media_type,
            } => {
                let year = year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string());
                format!("title:{}:{}:{}", media_type, year, normalized_title)
            }
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Cache-first lookup layer over a [`MappingStorePort`].
///
/// Reads and writes are best-effort: a failing lookup counts as all-miss and
/// a failing insert is logged and dropped. Nothing here is ever deleted.
#[derive(Clone)]
pub struct MappingCache {
    store: Arc<dyn MappingStorePort>,
    probe_order: CacheProbeOrder,
}

impl MappingCache {
    pub fn new(store: Arc<dyn MappingStorePort>, probe_order: CacheProbeOrder) -> Self {
        Self { store, probe_order }
    }

    /// Both media-type variants of a title key, in probe order.
    pub fn title_probe_keys(&self, title: &str, year: Option<i32>) -> Vec<MappingKey> {
        let order = match self.probe_order {
            CacheProbeOrder::MovieFirst => [MediaType::Movie, MediaType::Tv],
            CacheProbeOrder::TvFirst => [MediaType::Tv, MediaType::Movie],
        };
        order
            .iter()
            .map(|media_type| MappingKey::title(title, year, *media_type))
            .collect()
    }

    pub async fn batch_lookup(&self, keys: &[MappingKey]) -> HashMap<MappingKey, CatalogMatch> {
        if keys.is_empty() {
            return HashMap::new();
        }
        match self.store.batch_lookup(keys).await {
            Ok(found) => {
                debug!("Mapping cache: {}/{} keys found", found.len(), keys.len());
                found
            }
            Err(e) => {
                warn!("Mapping cache lookup failed, treating as miss: {}", e);
                metrics::cache::lookup_failed();
                HashMap::new()
            }
        }
    }

    pub async fn batch_insert(&self, entries: &[(MappingKey, CatalogMatch)]) {
        if entries.is_empty() {
            return;
        }
        match self.store.batch_insert(entries).await {
            Ok(()) => {
                debug!("Mapping cache: stored {} entries", entries.len());
                metrics::cache::entries_written(entries.len());
            }
            Err(e) => {
                warn!("Failed to write {} mapping cache entries: {}", entries.len(), e);
                metrics::cache::write_failed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ImportError, Result};
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl MappingStorePort for BrokenStore {
        async fn batch_lookup(
            &self,
            _keys: &[MappingKey],
        ) -> Result<HashMap<MappingKey, CatalogMatch>> {
            Err(ImportError::Storage("down".to_string()))
        }

        async fn batch_insert(&self, _entries: &[(MappingKey, CatalogMatch)]) -> Result<()> {
            Err(ImportError::Storage("down".to_string()))
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  The Matrix: Reloaded! "), "the matrix reloaded");
        assert_eq!(normalize_title("Amélie"), "amélie");
        assert_eq!(normalize_title("WALL·E"), "wall e");
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(MappingKey::external("tt0133093").storage_key(), "imdb:tt0133093");
        assert_eq!(
            MappingKey::title("Heat", Some(1995), MediaType::Movie).storage_key(),
            "title:movie:1995:heat"
        );
        assert_eq!(
            MappingKey::title("Heat", None, MediaType::Tv).storage_key(),
            "title:tv:-:heat"
        );
    }

    #[test]
    fn test_probe_order_policy() {
        let store = Arc::new(InMemoryStorage::new());
        let movie_first = MappingCache::new(store.clone(), CacheProbeOrder::MovieFirst);
        let keys = movie_first.title_probe_keys("Heat", Some(1995));
        assert_eq!(keys[0], MappingKey::title("Heat", Some(1995), MediaType::Movie));
        assert_eq!(keys[1], MappingKey::title("Heat", Some(1995), MediaType::Tv));

        let tv_first = MappingCache::new(store, CacheProbeOrder::TvFirst);
        let keys = tv_first.title_probe_keys("Heat", Some(1995));
        assert_eq!(keys[0], MappingKey::title("Heat", Some(1995), MediaType::Tv));
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let cache = MappingCache::new(Arc::new(InMemoryStorage::new()), CacheProbeOrder::MovieFirst);
        let key = MappingKey::title("Heat", Some(1995), MediaType::Movie);
        let entry = CatalogMatch {
            catalog_id: 949,
            media_type: MediaType::Movie,
        };
        cache.batch_insert(&[(key.clone(), entry)]).await;

        let missing = MappingKey::external("tt9999999");
        let found = cache.batch_lookup(&[key.clone(), missing.clone()]).await;
        assert_eq!(found.get(&key), Some(&entry));
        assert!(!found.contains_key(&missing));
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let cache = MappingCache::new(Arc::new(BrokenStore), CacheProbeOrder::MovieFirst);
        let key = MappingKey::external("tt0133093");
        let entry = CatalogMatch {
            catalog_id: 603,
            media_type: MediaType::Movie,
        };
        cache.batch_insert(&[(key.clone(), entry)]).await;
        assert!(cache.batch_lookup(&[key]).await.is_empty());
    }
}
