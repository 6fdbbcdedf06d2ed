// Pipeline tick: fetch a batch of unanalyzed items, classify, persist.
//
// A tick walks Idle -> Fetching -> Classifying(i) -> Aggregating(i) ->
// Persisting(i) -> Idle. Items run with bounded parallelism, but each item's
// future does classify, aggregate and persist in that order, so no verdict
// is written before its own classification finished. A failure stays inside
// the item that raised it; only a failed fetch aborts the whole tick.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::aggregate::aggregate;
use crate::classify::{ImageClassifier, ImageVerdict, PatternDetector, TextClassifier, TextVerdict};
use crate::db::models::{AttachedFile, ContentItem};
use crate::db::ContentStore;
use crate::error::{ModerationError, Result};

/// State key holding the RFC 3339 start time of the last completed tick.
pub const LAST_TICK_AT: &str = "last_tick_at";
/// State key holding the JSON-encoded report of the last completed tick.
pub const LAST_TICK_SUMMARY: &str = "last_tick_summary";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Max items fetched per tick
    pub batch_size: u32,
    /// Items classified at the same time
    pub concurrency: usize,
    /// Tries per item within one tick when a classifier is unavailable
    pub item_attempts: u32,
    /// Delay before the first in-tick retry; doubles after each one
    pub retry_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            item_attempts: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Where the pipeline currently is. With parallel items this is the most
/// recent transition of any item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "item_id", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Fetching,
    Classifying(i64),
    Aggregating(i64),
    Persisting(i64),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Fetching => write!(f, "fetching"),
            Phase::Classifying(id) => write!(f, "classifying item {id}"),
            Phase::Aggregating(id) => write!(f, "aggregating item {id}"),
            Phase::Persisting(id) => write!(f, "persisting item {id}"),
        }
    }
}

/// What happened to one fetched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Result persisted and watermark set.
    Analyzed { result_id: i64 },
    /// Left unanalyzed; the next tick picks it up again.
    Deferred { reason: String },
    /// Permanently skipped for invalid input.
    Flagged { reason: String },
    /// A stop was requested before the item started.
    NotDispatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_id: i64,
    pub outcome: ItemOutcome,
}

/// Summary of one completed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub fetched: usize,
    pub analyzed: usize,
    pub deferred: usize,
    pub flagged: usize,
    pub not_dispatched: usize,
    /// Per-item outcomes in completion order
    pub items: Vec<ItemReport>,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>, elapsed: Duration, items: Vec<ItemReport>) -> Self {
        let count = |pred: fn(&ItemOutcome) -> bool| items.iter().filter(|r| pred(&r.outcome)).count();
        Self {
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            fetched: items.len(),
            analyzed: count(|o| matches!(o, ItemOutcome::Analyzed { .. })),
            deferred: count(|o| matches!(o, ItemOutcome::Deferred { .. })),
            flagged: count(|o| matches!(o, ItemOutcome::Flagged { .. })),
            not_dispatched: count(|o| matches!(o, ItemOutcome::NotDispatched)),
            items,
        }
    }

    pub fn outcome_for(&self, item_id: i64) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|r| r.item_id == item_id)
            .map(|r| &r.outcome)
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {}, analyzed {}, deferred {}, flagged {}, not dispatched {} ({}ms)",
            self.fetched,
            self.analyzed,
            self.deferred,
            self.flagged,
            self.not_dispatched,
            self.duration_ms
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another run was already in flight; nothing was fetched.
    Suppressed,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Pipeline {
    store: Arc<dyn ContentStore>,
    text: Arc<dyn TextClassifier>,
    image: Arc<dyn ImageClassifier>,
    detector: PatternDetector,
    config: PipelineConfig,
    in_flight: AtomicBool,
    halted: AtomicBool,
    phase: watch::Sender<Phase>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ContentStore>,
        text: Arc<dyn TextClassifier>,
        image: Arc<dyn ImageClassifier>,
        config: PipelineConfig,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            store,
            text,
            image,
            detector: PatternDetector,
            config,
            in_flight: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            phase,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// True while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop dispatching items. Items already started run to completion.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    /// Run one tick. Returns `Suppressed` without touching the store if
    /// another run is in flight.
    pub async fn run_once(&self) -> Result<TickOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Pipeline run already in flight, skipping");
            return Ok(TickOutcome::Suppressed);
        }
        let _guard = RunGuard(&self.in_flight);

        let started_at = Utc::now();
        let clock = Instant::now();

        let items = if self.is_halted() {
            debug!("Pipeline halted, not fetching");
            Vec::new()
        } else {
            self.set_phase(Phase::Fetching);
            match self.store.fetch_unanalyzed(self.config.batch_size).await {
                Ok(items) => items,
                Err(err) => {
                    self.set_phase(Phase::Idle);
                    return Err(err);
                }
            }
        };

        if !items.is_empty() {
            info!(items = items.len(), "Fetched unanalyzed items");
        }

        let outcomes: Vec<ItemReport> = stream::iter(items)
            .map(|item| async move {
                let outcome = self.process_item(&item).await;
                ItemReport {
                    item_id: item.id,
                    outcome,
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        self.set_phase(Phase::Idle);

        let report = TickReport::new(started_at, clock.elapsed(), outcomes);
        self.record_tick(&report).await;

        info!(
            fetched = report.fetched,
            analyzed = report.analyzed,
            deferred = report.deferred,
            flagged = report.flagged,
            not_dispatched = report.not_dispatched,
            duration_ms = report.duration_ms,
            "Pipeline tick complete"
        );

        Ok(TickOutcome::Completed(report))
    }

    /// Drive one item to an outcome, retrying unavailable classifiers
    /// within the tick when configured to.
    async fn process_item(&self, item: &ContentItem) -> ItemOutcome {
        if self.is_halted() {
            debug!(item_id = item.id, "Stop requested, not dispatching");
            return ItemOutcome::NotDispatched;
        }

        let mut attempt: u32 = 1;
        loop {
            match self.analyze(item).await {
                Ok(result_id) => return ItemOutcome::Analyzed { result_id },
                Err(ModerationError::InvalidInput(reason)) => return self.flag(item, reason).await,
                Err(err @ ModerationError::ClassifierUnavailable(_))
                    if attempt < self.config.item_attempts && !self.is_halted() =>
                {
                    let delay = self
                        .config
                        .retry_backoff
                        .saturating_mul(1u32 << (attempt - 1).min(16));
                    warn!(
                        item_id = item.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Classifier unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(item_id = item.id, error = %err, "Item deferred to next tick");
                    return ItemOutcome::Deferred {
                        reason: err.to_string(),
                    };
                }
            }
        }
    }

    async fn analyze(&self, item: &ContentItem) -> Result<i64> {
        self.set_phase(Phase::Classifying(item.id));

        let text = self.detector.normalize_parts(item.text_parts());
        let files = self.store.files_for(item.id).await?;

        // Both calls always run to completion so the outcome doesn't depend
        // on which one fails first.
        let (text_verdict, image_verdict) =
            match tokio::join!(self.classify_text(&text), self.classify_images(&files)) {
                (Ok(text), Ok(images)) => (text, images),
                (Err(err), Ok(_)) | (Ok(_), Err(err)) => return Err(err),
                (Err(text_err), Err(image_err)) => {
                    return Err(prefer_retryable(text_err, image_err))
                }
            };
        let pattern = self.detector.detect(&text);

        self.set_phase(Phase::Aggregating(item.id));
        let result = aggregate(item, &text_verdict, image_verdict.as_ref(), &pattern);

        self.set_phase(Phase::Persisting(item.id));
        let result_id = self.store.record_analysis(&result).await?;

        info!(
            item_id = item.id,
            result_id,
            profanity = result.contains_profanity,
            nsfw = result.is_nsfw,
            phone = result.contains_phone_pattern,
            "Item analyzed"
        );

        Ok(result_id)
    }

    async fn classify_text(&self, text: &str) -> Result<TextVerdict> {
        // Markup-only bodies (an image post with no caption) have nothing to score
        if text.is_empty() {
            return Ok(TextVerdict {
                contains_profanity: false,
                confidence: 0.0,
            });
        }
        self.text.classify_text(text).await
    }

    async fn classify_images(&self, files: &[AttachedFile]) -> Result<Option<ImageVerdict>> {
        let mut verdicts = Vec::new();
        for file in files.iter().filter(|f| f.is_image()) {
            let verdict = self
                .image
                .classify_image(&file.payload, &file.mime_type)
                .await?;
            debug!(
                file_id = file.id,
                is_nsfw = verdict.is_nsfw,
                confidence = verdict.confidence,
                "Image scored"
            );
            verdicts.push(verdict);
        }
        Ok(ImageVerdict::combine(&verdicts))
    }

    async fn flag(&self, item: &ContentItem, reason: String) -> ItemOutcome {
        match self.store.flag_invalid(item.id, &reason).await {
            Ok(()) => {
                warn!(item_id = item.id, reason = %reason, "Invalid input, item flagged and skipped");
                ItemOutcome::Flagged { reason }
            }
            Err(err) => {
                warn!(item_id = item.id, error = %err, "Could not flag item, deferring");
                ItemOutcome::Deferred {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Bookkeeping for status displays. Failure here doesn't fail the tick.
    async fn record_tick(&self, report: &TickReport) {
        if let Err(err) = self
            .store
            .set_state(LAST_TICK_AT, &report.started_at.to_rfc3339())
            .await
        {
            warn!(error = %err, "Failed to record tick time");
        }

        match serde_json::to_string(report) {
            Ok(summary) => {
                if let Err(err) = self.store.set_state(LAST_TICK_SUMMARY, &summary).await {
                    warn!(error = %err, "Failed to record tick summary");
                }
            }
            Err(err) => warn!(error = %err, "Failed to encode tick summary"),
        }
    }
}

/// When text and images both fail, an item that can be retried later is
/// never flagged: the retryable error wins.
fn prefer_retryable(first: ModerationError, second: ModerationError) -> ModerationError {
    if !first.is_retryable() && second.is_retryable() {
        second
    } else {
        first
    }
}
