//! Resolving raw records to catalog ids.
//!
//! A [`RecordMatcher`] knows how one source's records map to cache keys and
//! how to query the search service; [`MatchRunner`] drives it over a whole
//! import in fixed-size concurrent batches, consulting the mapping cache
//! first and reporting progress over a channel.

mod imdb;
mod ladder;
mod title;

pub use imdb::IdAwareMatcher;
pub use ladder::{closest_by_year, resolve_by_title};
pub use title::{pick_closer, TitleOnlyMatcher};

use crate::domain::{CatalogMatch, MatchResult, MediaType, RawImportRecord};
use crate::observability::metrics;
use crate::pipeline::mapping_cache::{MappingCache, MappingKey};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

/// How a matcher's records are grouped for concurrent resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batching {
    pub size: usize,
    /// Pause between consecutive batches, to stay under external rate limits.
    pub delay: Duration,
}

#[async_trait]
pub trait RecordMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn batching(&self) -> Batching;

    /// Cache keys to probe for this record; the first key found wins.
    fn cache_keys(&self, record: &RawImportRecord, cache: &MappingCache) -> Vec<MappingKey>;

    /// Resolves a record against the search service. `None` once every
    /// fallback is exhausted; search failures are absorbed here.
    async fn resolve(&self, record: &RawImportRecord) -> Option<CatalogMatch>;

    /// Entries to remember after a successful external resolution.
    fn cache_entries(
        &self,
        record: &RawImportRecord,
        found: CatalogMatch,
    ) -> Vec<(MappingKey, CatalogMatch)>;

    /// Media type reported for a record that matched nothing.
    fn fallback_media_type(&self, record: &RawImportRecord) -> MediaType;
}

/// Emitted once per completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchProgress {
    pub processed: usize,
    pub total: usize,
    pub cache_hits: usize,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub results: Vec<MatchResult>,
    pub cache_hits: usize,
    /// The progress receiver went away before every batch ran.
    pub cancelled: bool,
}

impl MatchOutcome {
    pub fn matched_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_matched()).count()
    }
}

struct BatchOutcome {
    results: Vec<MatchResult>,
    cache_hits: usize,
}

#[derive(Clone)]
pub struct MatchRunner {
    matcher: Arc<dyn RecordMatcher>,
    cache: MappingCache,
}

impl MatchRunner {
    pub fn new(matcher: Arc<dyn RecordMatcher>, cache: MappingCache) -> Self {
        Self { matcher, cache }
    }

    /// Matches a single record, cache first.
    pub async fn match_one(&self, record: RawImportRecord) -> MatchResult {
        let fallback = record.clone();
        let outcome = self.run_batch(vec![record]).await;
        outcome.results.into_iter().next().unwrap_or_else(|| {
            let media_type = self.matcher.fallback_media_type(&fallback);
            MatchResult::unmatched(fallback, media_type)
        })
    }

    /// Matches every record in order, one batch at a time.
    ///
    /// Stops before the next batch once `progress` is closed; the batch in
    /// flight always runs to completion.
    #[instrument(skip_all, fields(matcher = self.matcher.name(), total = records.len()))]
    pub async fn match_all(
        &self,
        records: Vec<RawImportRecord>,
        progress: mpsc::Sender<MatchProgress>,
    ) -> MatchOutcome {
        let total = records.len();
        let batching = self.matcher.batching();
        let batch_size = batching.size.max(1);

        let mut results = Vec::with_capacity(total);
        let mut cache_hits = 0usize;
        let mut cancelled = false;

        let mut remaining = records.into_iter();
        let mut batch_index = 0usize;
        loop {
            let batch: Vec<RawImportRecord> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            if progress.is_closed() {
                info!(
                    "Progress receiver closed; stopping after {} of {} records",
                    results.len(),
                    total
                );
                cancelled = true;
                break;
            }
            if batch_index > 0 && !batching.delay.is_zero() {
                tokio::time::sleep(batching.delay).await;
            }

            let outcome = self.run_batch(batch).await;
            cache_hits += outcome.cache_hits;
            results.extend(outcome.results);
            batch_index += 1;

            debug!("Matched {}/{} records ({} cache hits)", results.len(), total, cache_hits);
            let _ = progress
                .send(MatchProgress {
                    processed: results.len(),
                    total,
                    cache_hits,
                })
                .await;
        }

        metrics::cache::hits(cache_hits);
        MatchOutcome {
            results,
            cache_hits,
            cancelled,
        }
    }

    async fn run_batch(&self, batch: Vec<RawImportRecord>) -> BatchOutcome {
        let keys_per_record: Vec<Vec<MappingKey>> = batch
            .iter()
            .map(|record| self.matcher.cache_keys(record, &self.cache))
            .collect();

        let mut seen = HashSet::new();
        let lookup_keys: Vec<MappingKey> = keys_per_record
            .iter()
            .flatten()
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect();
        let cached = self.cache.batch_lookup(&lookup_keys).await;

        let pending = batch.into_iter().zip(keys_per_record).map(|(record, keys)| {
            let hit = keys.iter().find_map(|key| cached.get(key).copied());
            async move {
                if let Some(found) = hit {
                    debug!(title = record.title(), catalog_id = found.catalog_id, "Cache hit");
                    return (MatchResult::matched(record, found), true, Vec::new());
                }
                match self.matcher.resolve(&record).await {
                    Some(found) => {
                        let entries = self.matcher.cache_entries(&record, found);
                        (MatchResult::matched(record, found), false, entries)
                    }
                    None => {
                        debug!(title = record.title(), "No match");
                        let media_type = self.matcher.fallback_media_type(&record);
                        (MatchResult::unmatched(record, media_type), false, Vec::new())
                    }
                }
            }
        });
        let resolved = join_all(pending).await;

        let mut results = Vec::with_capacity(resolved.len());
        let mut cache_hits = 0usize;
        let mut new_entries = Vec::new();
        for (result, from_cache, entries) in resolved {
            if from_cache {
                cache_hits += 1;
            }
            new_entries.extend(entries);
            results.push(result);
        }
        self.cache.batch_insert(&new_entries).await;

        BatchOutcome { results, cache_hits }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{hit, ScriptedSearch};
    use super::*;
    use crate::config::CacheProbeOrder;
    use crate::domain::LetterboxdRecord;
    use crate::storage::InMemoryStorage;

    fn letterboxd(title: &str, year: i32) -> RawImportRecord {
        RawImportRecord::Letterboxd(LetterboxdRecord {
            title: title.to_string(),
            year: Some(year),
            letterboxd_uri: None,
            rating: None,
            date_added: None,
        })
    }

    fn runner(search: Arc<ScriptedSearch>, store: Arc<InMemoryStorage>, batch: usize) -> MatchRunner {
        let matcher = TitleOnlyMatcher::new(search, batch);
        MatchRunner::new(
            Arc::new(matcher),
            MappingCache::new(store, CacheProbeOrder::MovieFirst),
        )
    }

    #[tokio::test]
    async fn test_cached_titles_make_no_search_calls() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with_title(MediaType::Movie, "Heat", Some(1995), vec![hit(949, MediaType::Movie, "Heat", Some(1995))])
                .with_title(MediaType::Movie, "Alien", Some(1979), vec![hit(348, MediaType::Movie, "Alien", Some(1979))]),
        );
        let store = Arc::new(InMemoryStorage::new());
        let runner = runner(search.clone(), store, 20);
        let records = vec![letterboxd("Heat", 1995), letterboxd("Alien", 1979)];

        let (tx, _rx) = mpsc::channel(16);
        let first = runner.match_all(records.clone(), tx).await;
        assert_eq!(first.matched_count(), 2);
        assert_eq!(first.cache_hits, 0);
        let calls_after_first = search.call_count();
        assert!(calls_after_first > 0);

        let (tx, _rx) = mpsc::channel(16);
        let second = runner.match_all(records, tx).await;
        assert_eq!(second.matched_count(), 2);
        assert_eq!(second.cache_hits, 2);
        assert_eq!(search.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn test_match_one_uses_cache_then_search() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with_title(MediaType::Movie, "Heat", Some(1995), vec![hit(949, MediaType::Movie, "Heat", Some(1995))]),
        );
        let runner = runner(search.clone(), Arc::new(InMemoryStorage::new()), 20);

        let resolved = runner.match_one(letterboxd("Heat", 1995)).await;
        assert_eq!(resolved.catalog_id, Some(949));
        assert_eq!(resolved.title, "Heat");
        let calls = search.call_count();

        let cached = runner.match_one(letterboxd("Heat", 1995)).await;
        assert_eq!(cached.catalog_id, Some(949));
        assert_eq!(search.call_count(), calls);

        let missing = runner.match_one(letterboxd("Nope", 2001)).await;
        assert_eq!(missing.catalog_id, None);
        assert_eq!(missing.media_type, MediaType::Movie);
        assert_eq!(missing.title, "Nope");
    }

    #[tokio::test]
    async fn test_progress_reported_per_batch() {
        let search = Arc::new(ScriptedSearch::default());
        let runner = runner(search, Arc::new(InMemoryStorage::new()), 2);
        let records: Vec<_> = (0..5).map(|i| letterboxd(&format!("Film {}", i), 2000)).collect();

        let (tx, mut rx) = mpsc::channel(16);
        let outcome = runner.match_all(records, tx).await;
        assert_eq!(outcome.results.len(), 5);
        assert!(!outcome.cancelled);

        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p.processed);
        }
        assert_eq!(seen, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_closed_receiver_stops_between_batches() {
        let search = Arc::new(ScriptedSearch::default());
        let runner = runner(search, Arc::new(InMemoryStorage::new()), 2);
        let records: Vec<_> = (0..6).map(|i| letterboxd(&format!("Film {}", i), 2000)).collect();

        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let outcome = runner.match_all(records, tx).await;
        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with_title(MediaType::Movie, "B", Some(2000), vec![hit(2, MediaType::Movie, "B", Some(2000))]),
        );
        let runner = runner(search, Arc::new(InMemoryStorage::new()), 3);
        let records = vec![letterboxd("A", 2000), letterboxd("B", 2000), letterboxd("C", 2000)];

        let (tx, _rx) = mpsc::channel(16);
        let outcome = runner.match_all(records, tx).await;
        let titles: Vec<_> = outcome.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(outcome.results[1].catalog_id, Some(2));
        assert_eq!(outcome.results[0].catalog_id, None);
    }
}
