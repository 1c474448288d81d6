use super::ladder::resolve_by_title;
use super::{Batching, RecordMatcher};
use crate::app::ports::{MetadataSearchPort, SearchHit};
use crate::domain::{CatalogMatch, MediaType, RawImportRecord};
use crate::pipeline::mapping_cache::{MappingCache, MappingKey};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Matcher for exports with nothing but a title and year.
///
/// Searches movies and tv independently, each with the full year ladder,
/// and keeps whichever candidate's year is closer to the target.
pub struct TitleOnlyMatcher {
    search: Arc<dyn MetadataSearchPort>,
    batch_size: usize,
}

impl TitleOnlyMatcher {
    pub fn new(search: Arc<dyn MetadataSearchPort>, batch_size: usize) -> Self {
        Self { search, batch_size }
    }
}

/// Combines the per-type winners. With both present the closer year wins;
/// ties, missing years and a missing target all go to the movie.
pub fn pick_closer(
    movie: Option<SearchHit>,
    tv: Option<SearchHit>,
    target_year: Option<i32>,
) -> Option<SearchHit> {
    match (movie, tv) {
        (Some(movie), Some(tv)) => {
            let Some(target) = target_year else {
                return Some(movie);
            };
            let distance = |hit: &SearchHit| {
                hit.year
                    .map(|y| (y - target).abs())
                    .unwrap_or(i32::MAX)
            };
            if distance(&tv) < distance(&movie) {
                Some(tv)
            } else {
                Some(movie)
            }
        }
        (movie, tv) => movie.or(tv),
    }
}

#[async_trait]
impl RecordMatcher for TitleOnlyMatcher {
    fn name(&self) -> &'static str {
        "title_only"
    }

    fn batching(&self) -> Batching {
        Batching {
            size: self.batch_size,
            delay: Duration::ZERO,
        }
    }

    fn cache_keys(&self, record: &RawImportRecord, cache: &MappingCache) -> Vec<MappingKey> {
        cache.title_probe_keys(record.title(), record.year())
    }

    async fn resolve(&self, record: &RawImportRecord) -> Option<CatalogMatch> {
        let search = self.search.as_ref();
        let (movie, tv) = tokio::join!(
            resolve_by_title(search, MediaType::Movie, record.title(), record.year()),
            resolve_by_title(search, MediaType::Tv, record.title(), record.year()),
        );
        let picked = pick_closer(movie, tv, record.year())?;
        debug!(
            title = record.title(),
            catalog_id = picked.catalog_id,
            media_type = %picked.media_type,
            "Matched by title"
        );
        Some(picked.as_match())
    }

    fn cache_entries(
        &self,
        record: &RawImportRecord,
        found: CatalogMatch,
    ) -> Vec<(MappingKey, CatalogMatch)> {
        vec![(
            MappingKey::title(record.title(), record.year(), found.media_type),
            found,
        )]
    }

    fn fallback_media_type(&self, _record: &RawImportRecord) -> MediaType {
        MediaType::Movie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LetterboxdRecord;
    use crate::pipeline::matcher::test_support::{hit, ScriptedSearch};

    fn record(title: &str, year: Option<i32>) -> RawImportRecord {
        RawImportRecord::Letterboxd(LetterboxdRecord {
            title: title.to_string(),
            year,
            letterboxd_uri: None,
            rating: None,
            date_added: None,
        })
    }

    #[test]
    fn test_pick_closer() {
        let movie = hit(1, MediaType::Movie, "X", Some(2000));
        let tv = hit(2, MediaType::Tv, "X", Some(2001));

        assert_eq!(pick_closer(Some(movie.clone()), Some(tv.clone()), Some(2001)).unwrap().catalog_id, 2);
        assert_eq!(pick_closer(Some(movie.clone()), Some(tv.clone()), Some(2000)).unwrap().catalog_id, 1);
        // equidistant: movie wins
        let tv_1999 = hit(3, MediaType::Tv, "X", Some(1999));
        assert_eq!(pick_closer(Some(movie.clone()), Some(tv_1999), Some(2000)).unwrap().catalog_id, 1);
        assert_eq!(pick_closer(Some(movie.clone()), Some(tv.clone()), None).unwrap().catalog_id, 1);
        assert_eq!(pick_closer(None, Some(tv), Some(1950)).unwrap().catalog_id, 2);
        assert!(pick_closer(None, None, Some(2000)).is_none());
    }

    #[tokio::test]
    async fn test_tv_wins_when_closer() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with_title(MediaType::Movie, "Fargo", None, vec![hit(275, MediaType::Movie, "Fargo", Some(1996))])
                .with_title(MediaType::Tv, "Fargo", Some(2014), vec![hit(60622, MediaType::Tv, "Fargo", Some(2014))]),
        );
        let matcher = TitleOnlyMatcher::new(search, 20);
        let found = matcher.resolve(&record("Fargo", Some(2014))).await.unwrap();
        assert_eq!(found.catalog_id, 60622);
        assert_eq!(found.media_type, MediaType::Tv);
    }

    #[tokio::test]
    async fn test_movie_wins_on_exact_year() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with_title(MediaType::Movie, "Fargo", Some(1996), vec![hit(275, MediaType::Movie, "Fargo", Some(1996))])
                .with_title(MediaType::Tv, "Fargo", None, vec![hit(60622, MediaType::Tv, "Fargo", Some(2014))]),
        );
        let matcher = TitleOnlyMatcher::new(search, 20);
        let found = matcher.resolve(&record("Fargo", Some(1996))).await.unwrap();
        assert_eq!(found.catalog_id, 275);
    }

    #[test]
    fn test_cache_entry_uses_matched_media_type() {
        let matcher = TitleOnlyMatcher::new(Arc::new(ScriptedSearch::default()), 20);
        let found = CatalogMatch {
            catalog_id: 60622,
            media_type: MediaType::Tv,
        };
        let entries = matcher.cache_entries(&record("Fargo", Some(2014)), found);
        assert_eq!(entries, vec![(MappingKey::title("Fargo", Some(2014), MediaType::Tv), found)]);
    }
}
