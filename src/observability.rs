//! Metric helpers for the import pipeline.
//!
//! Call sites use these functions instead of raw metric names so that every
//! series is declared in one place.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Installs the Prometheus recorder with an HTTP scrape listener.
pub fn install_prometheus(addr: &str) -> Result<(), String> {
    let sock_addr: SocketAddr = addr
        .parse()
        .map_err(|e| format!("Invalid metrics address '{}': {}", addr, e))?;
    PrometheusBuilder::new()
        .with_http_listener(sock_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))?;
    info!("Prometheus exporter listening at http://{}/metrics", sock_addr);
    Ok(())
}

pub mod metrics {
    pub mod import {
        pub fn run_started(source: &str) {
            ::metrics::counter!("watchlist_import_runs_total", "source" => source.to_string())
                .increment(1);
        }

        pub fn run_finished(source: &str, outcome: &'static str, duration_secs: f64) {
            ::metrics::counter!(
                "watchlist_import_runs_finished_total",
                "source" => source.to_string(),
                "outcome" => outcome
            )
            .increment(1);
            ::metrics::histogram!("watchlist_import_duration_seconds", "source" => source.to_string())
                .record(duration_secs);
        }

        pub fn records_parsed(count: usize) {
            ::metrics::histogram!("watchlist_import_records_per_run").record(count as f64);
        }

        pub fn items_saved(added: usize, skipped: usize, failed: usize) {
            ::metrics::counter!("watchlist_import_items_added_total").increment(added as u64);
            ::metrics::counter!("watchlist_import_items_skipped_total").increment(skipped as u64);
            ::metrics::counter!("watchlist_import_items_unmatched_total").increment(failed as u64);
        }
    }

    pub mod cache {
        pub fn hits(count: usize) {
            ::metrics::counter!("watchlist_import_cache_hits_total").increment(count as u64);
        }

        pub fn entries_written(count: usize) {
            ::metrics::counter!("watchlist_import_cache_writes_total").increment(count as u64);
        }

        pub fn write_failed() {
            ::metrics::counter!("watchlist_import_cache_write_errors_total").increment(1);
        }

        pub fn lookup_failed() {
            ::metrics::counter!("watchlist_import_cache_lookup_errors_total").increment(1);
        }
    }

    pub mod search {
        /// `kind` is one of `find`, `search_movie`, `search_tv`.
        pub fn request(kind: &'static str, outcome: &'static str, duration_secs: f64) {
            ::metrics::counter!(
                "watchlist_import_search_requests_total",
                "kind" => kind,
                "outcome" => outcome
            )
            .increment(1);
            ::metrics::histogram!("watchlist_import_search_duration_seconds", "kind" => kind)
                .record(duration_secs);
        }

        pub fn rate_limited() {
            ::metrics::counter!("watchlist_import_search_rate_limited_total").increment(1);
        }
    }

    pub mod writer {
        pub fn batch_failed() {
            ::metrics::counter!("watchlist_import_insert_batch_errors_total").increment(1);
        }
    }
}
