use crate::app::ports::{MetadataSearchPort, SearchHit};
use crate::config::TmdbConfig;
use crate::domain::MediaType;
use crate::error::{ImportError, Result};
use crate::infra::rate_limiter::{Limits, RateLimiter};
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest server-requested pause honoured before a retry.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);
/// Cap on simultaneous requests to the API.
const MAX_IN_FLIGHT: u32 = 20;

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<MovieResult>,
    #[serde(default)]
    tv_results: Vec<TvResult>,
}

#[derive(Debug, Deserialize)]
struct SearchPage<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct MovieResult {
    id: u64,
    #[serde(default)]
    title: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvResult {
    id: u64,
    #[serde(default)]
    name: String,
    first_air_date: Option<String>,
}

impl From<MovieResult> for SearchHit {
    fn from(r: MovieResult) -> Self {
        SearchHit {
            catalog_id: r.id,
            media_type: MediaType::Movie,
            title: r.title,
            year: year_of(r.release_date.as_deref()),
        }
    }
}

impl From<TvResult> for SearchHit {
    fn from(r: TvResult) -> Self {
        SearchHit {
            catalog_id: r.id,
            media_type: MediaType::Tv,
            title: r.name,
            year: year_of(r.first_air_date.as_deref()),
        }
    }
}

/// Year from a `YYYY-MM-DD` date; TMDB sends `""` for unknown dates.
fn year_of(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

fn retry_delay(retry_after: Option<&str>, attempt: u32) -> Duration {
    retry_after
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(1 << attempt.min(3)))
        .min(MAX_RETRY_AFTER)
}

/// TMDB v3 client behind [`MetadataSearchPort`].
///
/// Every call is rate limited, bounded by the configured timeout and
/// retried on HTTP 429.
pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: RateLimiter,
    max_retries: u32,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            warn!("TMDB API key is not set; every search will fail and rows will be unmatched");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .gzip(true)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            limiter: RateLimiter::new(Limits {
                requests_per_min: Some(config.requests_per_min),
                concurrency: Some(MAX_IN_FLIGHT),
            }),
            max_retries: config.max_retries,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            let response = {
                let _permit = self.limiter.acquire().await;
                self.http
                    .get(&url)
                    .query(&[("api_key", self.api_key.as_str())])
                    .query(query)
                    .send()
                    .await
            };
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    metrics::search::request(kind, "error", started.elapsed().as_secs_f64());
                    return Err(e.into());
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                metrics::search::rate_limited();
                let delay = retry_delay(
                    response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
                    attempt,
                );
                debug!(kind, ?delay, attempt, "Rate limited by search API; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                metrics::search::request(kind, "error", started.elapsed().as_secs_f64());
                let message = response.text().await.unwrap_or_default();
                return Err(ImportError::Search {
                    status: status.as_u16(),
                    message: message.chars().take(200).collect(),
                });
            }

            let parsed = response.json::<T>().await;
            let outcome = if parsed.is_ok() { "ok" } else { "error" };
            metrics::search::request(kind, outcome, started.elapsed().as_secs_f64());
            return Ok(parsed?);
        }
    }
}

#[async_trait]
impl MetadataSearchPort for TmdbClient {
    async fn find_by_imdb_id(&self, imdb_id: &str) -> Result<Vec<SearchHit>> {
        let path = format!("/find/{}", imdb_id);
        let found: FindResponse = self
            .get_json("find", &path, &[("external_source", "imdb_id".to_string())])
            .await?;
        let hits: Vec<SearchHit> = found
            .movie_results
            .into_iter()
            .map(SearchHit::from)
            .chain(found.tv_results.into_iter().map(SearchHit::from))
            .collect();
        debug!(imdb_id, hits = hits.len(), "Cross-reference lookup");
        Ok(hits)
    }

    async fn search_titles(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchHit>> {
        let mut params = vec![
            ("query", query.to_string()),
            ("include_adult", "false".to_string()),
            ("page", "1".to_string()),
        ];
        let hits = match media_type {
            MediaType::Movie => {
                if let Some(y) = year {
                    params.push(("year", y.to_string()));
                }
                let page: SearchPage<MovieResult> =
                    self.get_json("search_movie", "/search/movie", &params).await?;
                page.results.into_iter().map(SearchHit::from).collect::<Vec<_>>()
            }
            MediaType::Tv => {
                if let Some(y) = year {
                    params.push(("first_air_date_year", y.to_string()));
                }
                let page: SearchPage<TvResult> =
                    self.get_json("search_tv", "/search/tv", &params).await?;
                page.results.into_iter().map(SearchHit::from).collect::<Vec<_>>()
            }
        };
        debug!(query, %media_type, ?year, hits = hits.len(), "Title search");
        Ok(hits)
    }
}
