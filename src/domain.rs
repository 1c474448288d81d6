use crate::constants::{IMDB_SOURCE, LETTERBOXD_SOURCE};
use crate::error::ImportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalog identifier assigned by the metadata service.
pub type CatalogId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }

    /// Infers the media type from a source type tag such as "TV Series" or "movie".
    pub fn from_type_tag(tag: &str) -> Self {
        let tag = tag.to_lowercase();
        if tag.contains("series") || tag.contains("tv") || tag.contains("mini") {
            MediaType::Tv
        } else {
            MediaType::Movie
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => Err(ImportError::Storage(format!("unknown media type '{}'", other))),
        }
    }
}

/// The export format an upload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportSource {
    /// IMDb list export; rows carry `tt` ids and a title type.
    Imdb,
    /// Letterboxd export; rows carry only title and year.
    Letterboxd,
}

impl ImportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportSource::Imdb => IMDB_SOURCE,
            ImportSource::Letterboxd => LETTERBOXD_SOURCE,
        }
    }
}

impl FromStr for ImportSource {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            IMDB_SOURCE => Ok(ImportSource::Imdb),
            LETTERBOXD_SOURCE => Ok(ImportSource::Letterboxd),
            other => Err(ImportError::UnsupportedSource(other.to_string())),
        }
    }
}

impl fmt::Display for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImdbRecord {
    /// Recognized `tt` id, if the row had one.
    pub imdb_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub title_type: Option<String>,
    pub your_rating: Option<f32>,
    pub date_added: Option<String>,
}

impl ImdbRecord {
    pub fn media_type(&self) -> MediaType {
        self.title_type
            .as_deref()
            .map(MediaType::from_type_tag)
            .unwrap_or(MediaType::Movie)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LetterboxdRecord {
    pub title: String,
    pub year: Option<i32>,
    pub letterboxd_uri: Option<String>,
    pub rating: Option<f32>,
    pub date_added: Option<String>,
}

/// One parsed CSV row, before matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum RawImportRecord {
    Imdb(ImdbRecord),
    Letterboxd(LetterboxdRecord),
}

impl RawImportRecord {
    pub fn title(&self) -> &str {
        match self {
            RawImportRecord::Imdb(r) => &r.title,
            RawImportRecord::Letterboxd(r) => &r.title,
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            RawImportRecord::Imdb(r) => r.year,
            RawImportRecord::Letterboxd(r) => r.year,
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            RawImportRecord::Imdb(r) => r.imdb_id.as_deref(),
            RawImportRecord::Letterboxd(_) => None,
        }
    }
}

/// A resolved catalog entry: what the mapping cache stores and what the
/// matcher produces on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogMatch {
    pub catalog_id: CatalogId,
    pub media_type: MediaType,
}

/// Outcome of matching one record. `catalog_id == None` means every
/// strategy was exhausted without a hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub source_record: RawImportRecord,
    pub catalog_id: Option<CatalogId>,
    pub media_type: MediaType,
    pub title: String,
}

impl MatchResult {
    pub fn matched(record: RawImportRecord, found: CatalogMatch) -> Self {
        let title = record.title().to_string();
        Self {
            source_record: record,
            catalog_id: Some(found.catalog_id),
            media_type: found.media_type,
            title,
        }
    }

    pub fn unmatched(record: RawImportRecord, media_type: MediaType) -> Self {
        let title = record.title().to_string();
        Self {
            source_record: record,
            catalog_id: None,
            media_type,
            title,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.catalog_id.is_some()
    }
}

/// An item handed to the batch writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistItem {
    pub catalog_id: CatalogId,
    pub media_type: MediaType,
    pub title: String,
}

impl WatchlistItem {
    pub fn from_match(result: &MatchResult) -> Option<Self> {
        result.catalog_id.map(|catalog_id| Self {
            catalog_id,
            media_type: result.media_type,
            title: result.title.clone(),
        })
    }
}

/// Status column of the shared `watchlist` table.
///
/// Imports only ever write `PlanToWatch`; the other states are set by the
/// application that owns the watchlist and are read back as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    PlanToWatch,
    Watching,
    Completed,
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchStatus::PlanToWatch => "plan_to_watch",
            WatchStatus::Watching => "watching",
            WatchStatus::Completed => "completed",
        }
    }
}

impl FromStr for WatchStatus {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan_to_watch" => Ok(WatchStatus::PlanToWatch),
            "watching" => Ok(WatchStatus::Watching),
            "completed" => Ok(WatchStatus::Completed),
            other => Err(ImportError::Storage(format!("unknown watch status '{}'", other))),
        }
    }
}

/// Persisted watchlist entry, unique per `(user_id, catalog_id, media_type)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchlistRow {
    pub user_id: String,
    pub catalog_id: CatalogId,
    pub media_type: MediaType,
    pub title: String,
    pub status: WatchStatus,
    pub added_at: DateTime<Utc>,
}

impl WatchlistRow {
    pub fn plan_to_watch(user_id: &str, item: &WatchlistItem, added_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            catalog_id: item.catalog_id,
            media_type: item.media_type,
            title: item.title.clone(),
            status: WatchStatus::PlanToWatch,
            added_at,
        }
    }
}
