use crate::app::ports::{MappingStorePort, WatchlistStorePort};
use crate::domain::{CatalogId, CatalogMatch, MediaType, WatchlistRow};
use crate::error::{ImportError, Result};
use crate::pipeline::mapping_cache::MappingKey;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS mapping_cache (
        cache_key   TEXT PRIMARY KEY,
        catalog_id  INTEGER NOT NULL,
        media_type  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS watchlist (
        user_id     TEXT NOT NULL,
        catalog_id  INTEGER NOT NULL,
        media_type  TEXT NOT NULL,
        title       TEXT NOT NULL,
        status      TEXT NOT NULL,
        added_at    TEXT NOT NULL,
        UNIQUE (user_id, catalog_id, media_type)
    );
    CREATE INDEX IF NOT EXISTS idx_watchlist_user ON watchlist (user_id);
"#;

/// SQLite-backed mapping cache and watchlist.
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened SQLite storage at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ImportError::Storage("SQLite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await?
    }

    /// Every watchlist row stored for a user, oldest first.
    pub async fn watchlist_for(&self, user_id: &str) -> Result<Vec<WatchlistRow>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT catalog_id, media_type, title, status, added_at FROM watchlist
                 WHERE user_id = ?1 ORDER BY added_at, catalog_id",
            )?;
            let mut rows = stmt.query(params![user_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let catalog_id: i64 = row.get(0)?;
                let media_type: String = row.get(1)?;
                let title: String = row.get(2)?;
                let status: String = row.get(3)?;
                let added_at: String = row.get(4)?;
                let added_at = chrono::DateTime::parse_from_rfc3339(&added_at)
                    .map_err(|e| {
                        ImportError::Storage(format!("bad added_at '{}': {}", added_at, e))
                    })?
                    .with_timezone(&Utc);
                out.push(WatchlistRow {
                    user_id: user_id.clone(),
                    catalog_id: catalog_id as CatalogId,
                    media_type: media_type.parse()?,
                    title,
                    status: status.parse()?,
                    added_at,
                });
            }
            Ok(out)
        })
        .await
    }
}

fn placeholders(count: usize, offset: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl MappingStorePort for SqliteStorage {
    async fn batch_lookup(&self, keys: &[MappingKey]) -> Result<HashMap<MappingKey, CatalogMatch>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let by_storage_key: HashMap<String, MappingKey> =
            keys.iter().map(|k| (k.storage_key(), k.clone())).collect();

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT cache_key, catalog_id, media_type FROM mapping_cache WHERE cache_key IN ({})",
                placeholders(by_storage_key.len(), 0)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(by_storage_key.keys()))?;
            let mut found = HashMap::new();
            while let Some(row) = rows.next()? {
                let cache_key: String = row.get(0)?;
                let catalog_id: i64 = row.get(1)?;
                let media_type: String = row.get(2)?;
                if let Some(key) = by_storage_key.get(&cache_key) {
                    found.insert(
                        key.clone(),
                        CatalogMatch {
                            catalog_id: catalog_id as CatalogId,
                            media_type: media_type.parse()?,
                        },
                    );
                }
            }
            debug!("Mapping lookup: {} of {} keys found", found.len(), by_storage_key.len());
            Ok(found)
        })
        .await
    }

    async fn batch_insert(&self, entries: &[(MappingKey, CatalogMatch)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let entries: Vec<(String, CatalogMatch)> =
            entries.iter().map(|(k, m)| (k.storage_key(), *m)).collect();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO mapping_cache (cache_key, catalog_id, media_type, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(cache_key) DO UPDATE SET catalog_id=excluded.catalog_id,
                         media_type=excluded.media_type, updated_at=excluded.updated_at",
                )?;
                for (key, found) in &entries {
                    stmt.execute(params![
                        key,
                        found.catalog_id as i64,
                        found.media_type.as_str(),
                        now
                    ])?;
                }
            }
            tx.commit()?;
            debug!("Stored {} mapping entries", entries.len());
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl WatchlistStorePort for SqliteStorage {
    async fn existing_entries(
        &self,
        user_id: &str,
        catalog_ids: &[CatalogId],
    ) -> Result<HashSet<(CatalogId, MediaType)>> {
        if catalog_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let user_id = user_id.to_string();
        let ids: Vec<i64> = catalog_ids.iter().map(|id| *id as i64).collect();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT catalog_id, media_type FROM watchlist WHERE user_id = ?1 AND catalog_id IN ({})",
                placeholders(ids.len(), 1)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(ids.len() + 1);
            values.push(user_id.into());
            values.extend(ids.into_iter().map(rusqlite::types::Value::from));
            let mut rows = stmt.query(params_from_iter(values))?;
            let mut existing = HashSet::new();
            while let Some(row) = rows.next()? {
                let catalog_id: i64 = row.get(0)?;
                let media_type: String = row.get(1)?;
                existing.insert((catalog_id as CatalogId, media_type.parse()?));
            }
            Ok(existing)
        })
        .await
    }

    async fn insert_rows(&self, rows: &[WatchlistRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO watchlist (user_id, catalog_id, media_type, title, status, added_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(user_id, catalog_id, media_type) DO NOTHING",
                )?;
                for row in &rows {
                    inserted += stmt.execute(params![
                        row.user_id,
                        row.catalog_id as i64,
                        row.media_type.as_str(),
                        row.title,
                        row.status.as_str(),
                        row.added_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()?;
            debug!("Inserted {} of {} watchlist rows", inserted, rows.len());
            Ok(inserted)
        })
        .await
    }
}
