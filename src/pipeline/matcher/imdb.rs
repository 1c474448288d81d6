use super::ladder::resolve_by_title;
use super::{Batching, RecordMatcher};
use crate::app::ports::{MetadataSearchPort, SearchHit};
use crate::domain::{CatalogMatch, MediaType, RawImportRecord};
use crate::pipeline::mapping_cache::{MappingCache, MappingKey};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Matcher for exports that carry IMDb ids (and a title type).
///
/// Tries the id cross-reference first, then falls back to a title search
/// restricted to the media type inferred from the row's title type.
pub struct IdAwareMatcher {
    search: Arc<dyn MetadataSearchPort>,
    batching: Batching,
}

impl IdAwareMatcher {
    pub fn new(
        search: Arc<dyn MetadataSearchPort>,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            search,
            batching: Batching {
                size: batch_size,
                delay: batch_delay,
            },
        }
    }

    async fn cross_reference(&self, imdb_id: &str) -> Option<CatalogMatch> {
        match self.search.find_by_imdb_id(imdb_id).await {
            Ok(hits) => pick_cross_reference(&hits),
            Err(e) => {
                warn!(imdb_id, "Cross-reference lookup failed: {}", e);
                None
            }
        }
    }
}

/// First tv hit, otherwise first movie hit.
fn pick_cross_reference(hits: &[SearchHit]) -> Option<CatalogMatch> {
    hits.iter()
        .find(|h| h.media_type == MediaType::Tv)
        .or_else(|| hits.iter().find(|h| h.media_type == MediaType::Movie))
        .map(SearchHit::as_match)
}

/// Id-bearing rows are keyed by id; the rest by title in the inferred type.
fn record_key(record: &RawImportRecord) -> MappingKey {
    match record.external_id() {
        Some(id) => MappingKey::external(id),
        None => MappingKey::title(record.title(), record.year(), inferred_media_type(record)),
    }
}

fn inferred_media_type(record: &RawImportRecord) -> MediaType {
    match record {
        RawImportRecord::Imdb(r) => r.media_type(),
        RawImportRecord::Letterboxd(_) => MediaType::Movie,
    }
}

#[async_trait]
impl RecordMatcher for IdAwareMatcher {
    fn name(&self) -> &'static str {
        "id_aware"
    }

    fn batching(&self) -> Batching {
        self.batching
    }

    fn cache_keys(&self, record: &RawImportRecord, _cache: &MappingCache) -> Vec<MappingKey> {
        vec![record_key(record)]
    }

    async fn resolve(&self, record: &RawImportRecord) -> Option<CatalogMatch> {
        if let Some(imdb_id) = record.external_id() {
            if let Some(found) = self.cross_reference(imdb_id).await {
                debug!(imdb_id, catalog_id = found.catalog_id, "Matched by cross-reference");
                return Some(found);
            }
        }

        let media_type = inferred_media_type(record);
        resolve_by_title(self.search.as_ref(), media_type, record.title(), record.year())
            .await
            .map(|hit| hit.as_match())
    }

    fn cache_entries(
        &self,
        record: &RawImportRecord,
        found: CatalogMatch,
    ) -> Vec<(MappingKey, CatalogMatch)> {
        vec![(record_key(record), found)]
    }

    fn fallback_media_type(&self, record: &RawImportRecord) -> MediaType {
        inferred_media_type(record)
    }
}
