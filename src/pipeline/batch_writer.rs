use crate::app::ports::WatchlistStorePort;
use crate::domain::{CatalogId, MediaType, WatchlistItem, WatchlistRow};
use crate::observability::metrics;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub added: usize,
    pub skipped: usize,
}

/// Emitted after each insert batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveProgress {
    pub processed: usize,
    pub total: usize,
    pub added: usize,
    pub skipped: usize,
}

/// Adds matched items to a user's watchlist in fixed-size batches.
///
/// Items already on the watchlist, repeated within the call, or rejected by
/// the store's uniqueness constraint count as skipped. A failed batch is
/// logged and its items count as skipped; later batches still run.
#[derive(Clone)]
pub struct WatchlistBatchWriter {
    store: Arc<dyn WatchlistStorePort>,
    batch_size: usize,
}

impl WatchlistBatchWriter {
    pub fn new(store: Arc<dyn WatchlistStorePort>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    #[instrument(skip_all, fields(user_id = %user_id, items = items.len()))]
    pub async fn batch_add(
        &self,
        user_id: &str,
        items: &[WatchlistItem],
        progress: Option<mpsc::Sender<SaveProgress>>,
    ) -> SaveOutcome {
        let total = items.len();
        if total == 0 {
            return SaveOutcome::default();
        }

        let catalog_ids: Vec<CatalogId> = {
            let mut seen = HashSet::new();
            items
                .iter()
                .map(|item| item.catalog_id)
                .filter(|id| seen.insert(*id))
                .collect()
        };
        let mut known: HashSet<(CatalogId, MediaType)> =
            match self.store.existing_entries(user_id, &catalog_ids).await {
                Ok(existing) => existing,
                Err(e) => {
                    // the insert's conflict handling still keeps rows unique
                    warn!("Existing-entry lookup failed: {}", e);
                    HashSet::new()
                }
            };

        let mut outcome = SaveOutcome::default();
        let mut fresh = Vec::with_capacity(total);
        for item in items {
            if known.insert((item.catalog_id, item.media_type)) {
                fresh.push(item);
            } else {
                outcome.skipped += 1;
            }
        }
        debug!(
            "{} new items, {} already present or repeated",
            fresh.len(),
            outcome.skipped
        );

        let mut processed = outcome.skipped;
        let added_at = Utc::now();
        for chunk in fresh.chunks(self.batch_size) {
            let rows: Vec<WatchlistRow> = chunk
                .iter()
                .map(|item| WatchlistRow::plan_to_watch(user_id, item, added_at))
                .collect();
            match self.store.insert_rows(&rows).await {
                Ok(inserted) => {
                    let inserted = inserted.min(rows.len());
                    outcome.added += inserted;
                    outcome.skipped += rows.len() - inserted;
                }
                Err(e) => {
                    warn!("Watchlist batch of {} rows failed: {}", rows.len(), e);
                    metrics::writer::batch_failed();
                    outcome.skipped += rows.len();
                }
            }
            processed += rows.len();

            if let Some(tx) = &progress {
                let _ = tx
                    .send(SaveProgress {
                        processed,
                        total,
                        added: outcome.added,
                        skipped: outcome.skipped,
                    })
                    .await;
            }
        }

        info!(
            "Saved watchlist items: {} added, {} skipped",
            outcome.added, outcome.skipped
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ImportError, Result};
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(id: CatalogId, media_type: MediaType) -> WatchlistItem {
        WatchlistItem {
            catalog_id: id,
            media_type,
            title: format!("Title {}", id),
        }
    }

    #[tokio::test]
    async fn test_second_call_adds_nothing() {
        let store = Arc::new(InMemoryStorage::new());
        let writer = WatchlistBatchWriter::new(store.clone(), 2);
        let items = vec![
            item(1, MediaType::Movie),
            item(2, MediaType::Movie),
            item(3, MediaType::Tv),
        ];

        let first = writer.batch_add("u1", &items, None).await;
        assert_eq!(first, SaveOutcome { added: 3, skipped: 0 });

        let second = writer.batch_add("u1", &items, None).await;
        assert_eq!(second, SaveOutcome { added: 0, skipped: 3 });
        assert_eq!(store.watchlist_for("u1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_repeats_within_call_are_skipped() {
        let store = Arc::new(InMemoryStorage::new());
        let writer = WatchlistBatchWriter::new(store.clone(), 100);
        let items = vec![
            item(1, MediaType::Movie),
            item(1, MediaType::Movie),
            item(1, MediaType::Tv),
        ];
        let outcome = writer.batch_add("u1", &items, None).await;
        assert_eq!(outcome, SaveOutcome { added: 2, skipped: 1 });
    }

    #[tokio::test]
    async fn test_progress_per_batch() {
        let writer = WatchlistBatchWriter::new(Arc::new(InMemoryStorage::new()), 2);
        let items: Vec<_> = (1..=5).map(|id| item(id, MediaType::Movie)).collect();
        let (tx, mut rx) = mpsc::channel(16);
        writer.batch_add("u1", &items, Some(tx)).await;

        let mut processed = Vec::new();
        while let Ok(p) = rx.try_recv() {
            processed.push(p.processed);
        }
        assert_eq!(processed, vec![2, 4, 5]);
    }

    /// Fails every other insert call.
    struct FlakyStore {
        inner: InMemoryStorage,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WatchlistStorePort for FlakyStore {
        async fn existing_entries(
            &self,
            user_id: &str,
            catalog_ids: &[CatalogId],
        ) -> Result<HashSet<(CatalogId, MediaType)>> {
            self.inner.existing_entries(user_id, catalog_ids).await
        }

        async fn insert_rows(&self, rows: &[WatchlistRow]) -> Result<usize> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Err(ImportError::Storage("disk full".to_string()));
            }
            self.inner.insert_rows(rows).await
        }
    }

    #[tokio::test]
    async fn test_failed_batch_counts_as_skipped_and_continues() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStorage::new(),
            calls: AtomicUsize::new(0),
        });
        let writer = WatchlistBatchWriter::new(store, 2);
        let items: Vec<_> = (1..=4).map(|id| item(id, MediaType::Movie)).collect();

        let outcome = writer.batch_add("u1", &items, None).await;
        assert_eq!(outcome, SaveOutcome { added: 2, skipped: 2 });
    }
}
