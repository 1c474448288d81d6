//! Phase-ordered progress events for a running import.
//!
//! Every event is self-contained. Phases run `parsing -> matching -> saving`
//! and end in exactly one terminal `complete` or `error` event. Each phase
//! owns a fixed band of the overall percentage, and the reported percentage
//! never goes backwards.

use crate::constants::{MATCHING_BAND, PARSING_BAND, SAVING_BAND};
use crate::pipeline::batch_writer::SaveProgress;
use crate::pipeline::matcher::MatchProgress;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Parsing,
    Matching,
    Saving,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseDetail {
    Parsing,
    #[serde(rename_all = "camelCase")]
    Matching {
        cache_hits: usize,
        items_per_second: f64,
        eta_seconds: u64,
    },
    #[serde(rename_all = "camelCase")]
    Saving {
        added: usize,
        skipped: usize,
        items_per_second: f64,
        eta_seconds: u64,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        added: usize,
        skipped: usize,
        failed: usize,
        /// Titles of rows that matched nothing.
        unmatched: Vec<String>,
    },
    Error,
}

impl PhaseDetail {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseDetail::Parsing => Phase::Parsing,
            PhaseDetail::Matching { .. } => Phase::Matching,
            PhaseDetail::Saving { .. } => Phase::Saving,
            PhaseDetail::Complete { .. } => Phase::Complete,
            PhaseDetail::Error => Phase::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub detail: PhaseDetail,
    /// Overall percentage, 0..=100.
    pub progress: u8,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn phase(&self) -> Phase {
        self.detail.phase()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase(), Phase::Complete | Phase::Error)
    }

    pub fn error(message: impl Into<String>, progress: u8) -> Self {
        Self {
            detail: PhaseDetail::Error,
            progress,
            current: 0,
            total: 0,
            message: message.into(),
        }
    }

    /// JSON body for one event-stream frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"phase":"error","progress":0,"current":0,"total":0,"message":"failed to encode progress"}"#
                .to_string()
        })
    }
}

/// Final counts carried by the `complete` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total: usize,
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub unmatched: Vec<String>,
}

/// Items/second and remaining seconds for a phase.
///
/// The rate is 0 until time has elapsed and items were processed; the ETA is
/// 0 whenever the rate is 0 and is never negative.
pub fn throughput(processed: usize, total: usize, elapsed: Duration) -> (f64, u64) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 && processed > 0 {
        (processed as f64 / secs * 10.0).round() / 10.0
    } else {
        0.0
    };
    // ETA follows the reported (rounded) rate
    let remaining = total.saturating_sub(processed) as f64;
    let eta = if rate > 0.0 { (remaining / rate).ceil() as u64 } else { 0 };
    (rate, eta)
}

fn band_progress(band: (u8, u8), current: usize, total: usize) -> u8 {
    let (start, end) = band;
    if total == 0 {
        return end;
    }
    let fraction = (current.min(total) as f64) / (total as f64);
    start + ((end - start) as f64 * fraction).floor() as u8
}

#[derive(Debug, Clone, Copy)]
pub struct ReporterSettings {
    /// Emit after at least this many newly processed items...
    pub every_items: usize,
    /// ...or once this much time passed since the last event.
    pub interval: Duration,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            every_items: 10,
            interval: Duration::from_millis(500),
        }
    }
}

/// Turns pipeline milestones into rate-limited [`ProgressEvent`]s on a channel.
///
/// Phase boundaries and terminal events are always sent; in-phase updates
/// are throttled. Once the receiver is gone, sends stop and
/// [`ProgressReporter::is_closed`] reports it.
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressEvent>,
    settings: ReporterSettings,
    phase: Option<Phase>,
    phase_started: Instant,
    last_emit_at: Instant,
    last_emit_count: usize,
    last_progress: u8,
    closed: bool,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>, settings: ReporterSettings) -> Self {
        let now = Instant::now();
        Self {
            tx,
            settings,
            phase: None,
            phase_started: now,
            last_emit_at: now,
            last_emit_count: 0,
            last_progress: 0,
            closed: false,
            finished: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.tx.is_closed()
    }

    pub async fn parsing_started(&mut self) {
        self.enter_phase(Phase::Parsing);
        let event = self.event(PhaseDetail::Parsing, PARSING_BAND.0, 0, 0, "Parsing CSV file...");
        self.send(event).await;
    }

    pub async fn parsing_finished(&mut self, total: usize) {
        self.enter_phase(Phase::Parsing);
        let message = format!("Found {} entries", total);
        let event = self.event(PhaseDetail::Parsing, PARSING_BAND.1, total, total, message);
        self.send(event).await;
    }

    pub async fn matching_started(&mut self, total: usize) {
        self.enter_phase(Phase::Matching);
        let detail = PhaseDetail::Matching {
            cache_hits: 0,
            items_per_second: 0.0,
            eta_seconds: 0,
        };
        let message = format!("Matching {} titles...", total);
        let event = self.event(detail, MATCHING_BAND.0, 0, total, message);
        self.send(event).await;
    }

    pub async fn matching(&mut self, update: MatchProgress) {
        if !self.should_emit(update.processed, update.total) {
            return;
        }
        let (items_per_second, eta_seconds) =
            throughput(update.processed, update.total, self.phase_started.elapsed());
        let detail = PhaseDetail::Matching {
            cache_hits: update.cache_hits,
            items_per_second,
            eta_seconds,
        };
        let progress = band_progress(MATCHING_BAND, update.processed, update.total);
        let message = format!("Matched {} of {} titles", update.processed, update.total);
        let event = self.event(detail, progress, update.processed, update.total, message);
        self.send(event).await;
    }

    pub async fn saving_started(&mut self, total: usize) {
        self.enter_phase(Phase::Saving);
        let detail = PhaseDetail::Saving {
            added: 0,
            skipped: 0,
            items_per_second: 0.0,
            eta_seconds: 0,
        };
        let message = format!("Saving {} titles to your watchlist...", total);
        let event = self.event(detail, SAVING_BAND.0, 0, total, message);
        self.send(event).await;
    }

    pub async fn saving(&mut self, update: SaveProgress) {
        if !self.should_emit(update.processed, update.total) {
            return;
        }
        let (items_per_second, eta_seconds) =
            throughput(update.processed, update.total, self.phase_started.elapsed());
        let detail = PhaseDetail::Saving {
            added: update.added,
            skipped: update.skipped,
            items_per_second,
            eta_seconds,
        };
        let progress = band_progress(SAVING_BAND, update.processed, update.total);
        let message = format!("Saved {} of {} titles", update.processed, update.total);
        let event = self.event(detail, progress, update.processed, update.total, message);
        self.send(event).await;
    }

    pub async fn complete(&mut self, summary: &ImportSummary) {
        self.enter_phase(Phase::Complete);
        let message = format!(
            "Import complete: {} added, {} already on your watchlist, {} not found",
            summary.added, summary.skipped, summary.failed
        );
        let detail = PhaseDetail::Complete {
            added: summary.added,
            skipped: summary.skipped,
            failed: summary.failed,
            unmatched: summary.unmatched.clone(),
        };
        let event = self.event(detail, 100, summary.total, summary.total, message);
        self.send(event).await;
        self.finished = true;
    }

    pub async fn error(&mut self, message: impl Into<String>) {
        self.enter_phase(Phase::Error);
        let event = ProgressEvent::error(message, self.last_progress);
        self.send(event).await;
        self.finished = true;
    }

    fn enter_phase(&mut self, phase: Phase) {
        if self.phase != Some(phase) {
            self.phase = Some(phase);
            self.phase_started = Instant::now();
            self.last_emit_count = 0;
        }
    }

    fn should_emit(&self, processed: usize, total: usize) -> bool {
        processed >= total
            || processed.saturating_sub(self.last_emit_count) >= self.settings.every_items
            || self.last_emit_at.elapsed() >= self.settings.interval
    }

    fn event(
        &self,
        detail: PhaseDetail,
        progress: u8,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> ProgressEvent {
        ProgressEvent {
            detail,
            progress: progress.max(self.last_progress).min(100),
            current,
            total,
            message: message.into(),
        }
    }

    async fn send(&mut self, event: ProgressEvent) {
        if self.finished || self.closed {
            return;
        }
        self.last_progress = event.progress;
        self.last_emit_at = Instant::now();
        self.last_emit_count = event.current;
        if self.tx.send(event).await.is_err() {
            debug!("Progress receiver dropped; suppressing further events");
            self.closed = true;
        }
    }
}
