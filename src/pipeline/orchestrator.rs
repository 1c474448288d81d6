use crate::app::ports::{MappingStorePort, MetadataSearchPort, WatchlistStorePort};
use crate::config::ImportConfig;
use crate::constants::PROGRESS_CHANNEL_CAPACITY;
use crate::domain::{ImportSource, WatchlistItem};
use crate::error::{ImportError, Result};
use crate::observability::metrics;
use crate::pipeline::batch_writer::WatchlistBatchWriter;
use crate::pipeline::csv_parser::CsvParser;
use crate::pipeline::mapping_cache::MappingCache;
use crate::pipeline::matcher::{IdAwareMatcher, MatchRunner, RecordMatcher, TitleOnlyMatcher};
use crate::pipeline::progress::{ImportSummary, ProgressEvent, ProgressReporter, ReporterSettings};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// One upload to import for one user.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub user_id: String,
    pub source: ImportSource,
    pub content: String,
}

/// Sequences parse -> match -> save for one import and reports progress.
#[derive(Clone)]
pub struct ImportPipeline {
    search: Arc<dyn MetadataSearchPort>,
    cache: MappingCache,
    writer: WatchlistBatchWriter,
    config: ImportConfig,
}

impl ImportPipeline {
    pub fn new(
        search: Arc<dyn MetadataSearchPort>,
        mappings: Arc<dyn MappingStorePort>,
        watchlist: Arc<dyn WatchlistStorePort>,
        config: ImportConfig,
    ) -> Self {
        Self {
            search,
            cache: MappingCache::new(mappings, config.cache_probe_order),
            writer: WatchlistBatchWriter::new(watchlist, config.save_batch_size),
            config,
        }
    }

    fn matcher_for(&self, source: ImportSource) -> Arc<dyn RecordMatcher> {
        match source {
            ImportSource::Imdb => Arc::new(IdAwareMatcher::new(
                Arc::clone(&self.search),
                self.config.id_aware_batch_size,
                Duration::from_millis(self.config.id_aware_batch_delay_ms),
            )),
            ImportSource::Letterboxd => Arc::new(TitleOnlyMatcher::new(
                Arc::clone(&self.search),
                self.config.title_only_batch_size,
            )),
        }
    }

    fn reporter_settings(&self) -> ReporterSettings {
        ReporterSettings {
            every_items: self.config.progress_every_items.max(1),
            interval: Duration::from_millis(self.config.progress_interval_ms),
        }
    }

    /// Starts the import on a background task and returns its event stream.
    ///
    /// The stream always ends with exactly one `complete` or `error` event,
    /// including when the import fails or panics. Dropping the receiver
    /// stops the import at the next batch boundary.
    pub fn start(&self, request: ImportRequest) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let pipeline = self.clone();
        tokio::spawn(async move {
            let mut reporter = ProgressReporter::new(tx, pipeline.reporter_settings());
            pipeline.execute(request, &mut reporter).await;
        });
        rx
    }

    /// Runs the import to completion, emitting the terminal event on `reporter`.
    pub async fn execute(&self, request: ImportRequest, reporter: &mut ProgressReporter) {
        let source = request.source;
        let started = Instant::now();
        metrics::import::run_started(source.as_str());

        let result = AssertUnwindSafe(self.run(&request, reporter))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(summary)) => {
                reporter.complete(&summary).await;
                "complete"
            }
            Ok(Err(ImportError::Cancelled)) => {
                info!(user_id = %request.user_id, "Import cancelled by client disconnect");
                "cancelled"
            }
            Ok(Err(e)) => {
                warn!(user_id = %request.user_id, "Import failed: {}", e);
                reporter.error(e.to_string()).await;
                "error"
            }
            Err(_) => {
                error!(user_id = %request.user_id, "Import task panicked");
                reporter.error("Import failed unexpectedly").await;
                "error"
            }
        };
        metrics::import::run_finished(source.as_str(), outcome, started.elapsed().as_secs_f64());
    }

    #[instrument(skip_all, fields(run_id = %Uuid::new_v4(), user_id = %request.user_id, source = %request.source))]
    async fn run(
        &self,
        request: &ImportRequest,
        reporter: &mut ProgressReporter,
    ) -> Result<ImportSummary> {
        reporter.parsing_started().await;
        let records = CsvParser::parse(request.source, &request.content);
        metrics::import::records_parsed(records.len());
        if records.is_empty() {
            return Err(ImportError::EmptyImport);
        }
        let total = records.len();
        reporter.parsing_finished(total).await;
        info!("Parsed {} records", total);

        reporter.matching_started(total).await;
        let runner = MatchRunner::new(self.matcher_for(request.source), self.cache.clone());
        let (match_tx, mut match_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let forward = {
            let reporter = &mut *reporter;
            async move {
                while let Some(update) = match_rx.recv().await {
                    reporter.matching(update).await;
                    if reporter.is_closed() {
                        break;
                    }
                }
            }
        };
        let (matched, ()) = tokio::join!(runner.match_all(records, match_tx), forward);
        if matched.cancelled || reporter.is_closed() {
            return Err(ImportError::Cancelled);
        }
        info!(
            "Matched {} of {} records ({} from cache)",
            matched.matched_count(),
            total,
            matched.cache_hits
        );

        let items: Vec<WatchlistItem> = matched
            .results
            .iter()
            .filter_map(WatchlistItem::from_match)
            .collect();
        let unmatched: Vec<String> = matched
            .results
            .iter()
            .filter(|r| !r.is_matched())
            .map(|r| r.title.clone())
            .collect();

        reporter.saving_started(items.len()).await;
        let (save_tx, mut save_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let forward = {
            let reporter = &mut *reporter;
            async move {
                while let Some(update) = save_rx.recv().await {
                    reporter.saving(update).await;
                }
            }
        };
        let (saved, ()) = tokio::join!(
            self.writer.batch_add(&request.user_id, &items, Some(save_tx)),
            forward
        );

        let summary = ImportSummary {
            total,
            added: saved.added,
            skipped: saved.skipped,
            failed: unmatched.len(),
            cache_hits: matched.cache_hits,
            unmatched,
        };
        metrics::import::items_saved(summary.added, summary.skipped, summary.failed);
        info!(
            "Import finished: {} added, {} skipped, {} unmatched",
            summary.added, summary.skipped, summary.failed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::SearchHit;
    use crate::domain::MediaType;
    use crate::pipeline::matcher::test_support::{hit, ScriptedSearch};
    use async_trait::async_trait;
    use crate::pipeline::progress::{Phase, PhaseDetail};
    use crate::storage::InMemoryStorage;

    fn pipeline(search: Arc<ScriptedSearch>, store: Arc<InMemoryStorage>) -> ImportPipeline {
        let config = ImportConfig {
            id_aware_batch_delay_ms: 0,
            ..ImportConfig::default()
        };
        ImportPipeline::new(search, store.clone(), store, config)
    }

    struct PanickingSearch;

    #[async_trait]
    impl MetadataSearchPort for PanickingSearch {
        async fn find_by_imdb_id(&self, _imdb_id: &str) -> Result<Vec<SearchHit>> {
            panic!("search backend exploded");
        }

        async fn search_titles(
            &self,
            _media_type: MediaType,
            _query: &str,
            _year: Option<i32>,
        ) -> Result<Vec<SearchHit>> {
            panic!("search backend exploded");
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_empty_upload_ends_in_single_error() {
        let store = Arc::new(InMemoryStorage::new());
        let pipeline = pipeline(Arc::new(ScriptedSearch::default()), store);
        let rx = pipeline.start(ImportRequest {
            user_id: "u1".to_string(),
            source: ImportSource::Imdb,
            content: "Const,Title,Year\n".to_string(),
        });

        let events = collect(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.phase(), Phase::Error);
        assert_eq!(last.message, "No valid entries found in the uploaded file");
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_letterboxd_import_completes() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with_title(MediaType::Movie, "Heat", Some(1995), vec![hit(949, MediaType::Movie, "Heat", Some(1995))]),
        );
        let store = Arc::new(InMemoryStorage::new());
        let pipeline = pipeline(search, store.clone());
        let rx = pipeline.start(ImportRequest {
            user_id: "u1".to_string(),
            source: ImportSource::Letterboxd,
            content: "Date,Name,Year,Letterboxd URI\n2024-01-01,Heat,1995,https://boxd.it/a\n2024-01-02,Nope,2001,https://boxd.it/b\n"
                .to_string(),
        });

        let events = collect(rx).await;
        match &events.last().unwrap().detail {
            PhaseDetail::Complete {
                added,
                skipped,
                failed,
                unmatched,
            } => {
                assert_eq!((*added, *skipped, *failed), (1, 0, 1));
                assert_eq!(unmatched, &vec!["Nope".to_string()]);
            }
            other => panic!("expected complete, got {:?}", other),
        }
        assert_eq!(store.watchlist_for("u1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_during_matching_ends_in_single_error() {
        let store = Arc::new(InMemoryStorage::new());
        let pipeline = ImportPipeline::new(
            Arc::new(PanickingSearch),
            store.clone(),
            store.clone(),
            ImportConfig::default(),
        );
        let rx = pipeline.start(ImportRequest {
            user_id: "u1".to_string(),
            source: ImportSource::Letterboxd,
            content: "Name,Year\nHeat,1995\n".to_string(),
        });

        let events = collect(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.phase(), Phase::Error);
        assert_eq!(last.message, "Import failed unexpectedly");
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.iter().any(|e| e.phase() == Phase::Matching));
        assert!(store.watchlist_for("u1").unwrap().is_empty());
    }
}
