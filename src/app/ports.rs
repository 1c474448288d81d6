use crate::domain::{CatalogId, CatalogMatch, MediaType, WatchlistRow};
use crate::error::Result;
use crate::pipeline::mapping_cache::MappingKey;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// One candidate returned by the metadata search service, in ranking order.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub catalog_id: CatalogId,
    pub media_type: MediaType,
    pub title: String,
    pub year: Option<i32>,
}

impl SearchHit {
    pub fn as_match(&self) -> CatalogMatch {
        CatalogMatch {
            catalog_id: self.catalog_id,
            media_type: self.media_type,
        }
    }
}

/// External metadata search. Each call owns its own timeout and retry policy.
#[async_trait]
pub trait MetadataSearchPort: Send + Sync {
    /// Cross-reference lookup by IMDb id; may return both movie and tv hits.
    async fn find_by_imdb_id(&self, imdb_id: &str) -> Result<Vec<SearchHit>>;

    /// Title search within one media type, first results page only.
    /// `year == None` means no year filter.
    async fn search_titles(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchHit>>;
}

/// Persistent key -> catalog entry table shared by every import.
#[async_trait]
pub trait MappingStorePort: Send + Sync {
    /// Returns only the keys that were found.
    async fn batch_lookup(&self, keys: &[MappingKey]) -> Result<HashMap<MappingKey, CatalogMatch>>;

    /// Upserts entries; concurrent writers resolve last-write-wins.
    async fn batch_insert(&self, entries: &[(MappingKey, CatalogMatch)]) -> Result<()>;
}

#[async_trait]
pub trait WatchlistStorePort: Send + Sync {
    /// Existing `(catalog_id, media_type)` pairs for this user among `catalog_ids`.
    async fn existing_entries(
        &self,
        user_id: &str,
        catalog_ids: &[CatalogId],
    ) -> Result<HashSet<(CatalogId, MediaType)>>;

    /// Inserts rows, ignoring rows that already exist. Returns how many were inserted.
    async fn insert_rows(&self, rows: &[WatchlistRow]) -> Result<usize>;
}

/// Resolves the authenticated user for a request; never authenticates itself.
pub trait IdentityPort: Send + Sync {
    fn user_id(&self, headers: &axum::http::HeaderMap) -> Option<String>;
}
