//! Fetch → merge → translate → persist, on demand or on a timer.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::fetch::{FetchOrchestrator, Fetcher, SourceSpec, SyncOutcome};
use crate::merge::{LabeledSource, MergeEngine, MergedDocument};
use crate::storage::{DocumentSlot, DocumentStore, StorageError};
use crate::translate::TranslationOverlay;

/// Pipeline phase boundaries where cancellation is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    Fetch,
    Merge,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Fetch => write!(f, "fetch"),
            SyncPhase::Merge => write!(f, "merge"),
        }
    }
}

/// Pipeline-level failure; per-source failures are reported in outcomes instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Sync cancelled after {phase} phase")]
    Cancelled { phase: SyncPhase },
    #[error("Failed to persist document: {0}")]
    Persist(#[from] StorageError),
}

/// Sender half: request cooperative cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

/// Receiver half, checked between phases and between periodic runs.
#[derive(Debug, Clone)]
pub struct CancelToken(Option<watch::Receiver<bool>>);

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelToken(Some(rx)))
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Only fails when every token is gone, in which case nobody is listening.
        let _ = self.0.send(true);
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        CancelToken(None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested; never resolves if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.0.as_mut() else {
            return std::future::pending().await;
        };
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    #[serde(skip)]
    pub merged: Option<MergedDocument>,
    pub merged_ics: String,
    pub translated_ics: Option<String>,
    pub outcomes: Vec<SyncOutcome>,
    pub events_merged: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub malformed_events: usize,
    pub unterminated_events: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// How the most recent run ended.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    pub report: Option<SyncReport>,
}

pub struct SyncPipeline<F: Fetcher> {
    orchestrator: FetchOrchestrator<F>,
    engine: MergeEngine,
    translation: Option<TranslationOverlay>,
    store: Arc<dyn DocumentStore>,
    sources: Vec<SourceSpec>,
    // Runs are serialised so an older fetch never overwrites a newer document
    run_lock: AsyncMutex<()>,
    last_status: Mutex<Option<SyncStatus>>,
}

impl<F: Fetcher> SyncPipeline<F> {
    pub fn new(
        orchestrator: FetchOrchestrator<F>,
        engine: MergeEngine,
        store: Arc<dyn DocumentStore>,
        sources: Vec<SourceSpec>,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            translation: None,
            store,
            sources,
            run_lock: AsyncMutex::new(()),
            last_status: Mutex::new(None),
        }
    }

    pub fn with_translation(mut self, overlay: TranslationOverlay) -> Self {
        self.translation = Some(overlay);
        self
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Outcome of the last finished run, if any.
    pub fn status(&self) -> Option<SyncStatus> {
        self.last_status.lock().ok().and_then(|status| status.clone())
    }

    /// One full run over the configured sources.
    pub async fn run(&self, cancel: &CancelToken) -> Result<SyncReport, SyncError> {
        self.run_sources(&self.sources, cancel).await
    }

    /// One full run over `sources`. Failed sources contribute nothing to the
    /// merge; only cancellation or a persistence failure fails the run itself.
    ///
    /// Concurrent callers wait for the run in progress to finish first.
    pub async fn run_sources(&self, sources: &[SourceSpec], cancel: &CancelToken) -> Result<SyncReport, SyncError> {
        let _guard = self.run_lock.lock().await;
        let result = self.run_locked(sources, cancel).await;

        let status = SyncStatus {
            finished_at: Utc::now(),
            error: result.as_ref().err().map(|e| e.to_string()),
            report: result.as_ref().ok().cloned(),
        };
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(status);
        }
        result
    }

    async fn run_locked(&self, sources: &[SourceSpec], cancel: &CancelToken) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();

        let reports = self.orchestrator.fetch_all(sources).await;
        if cancel.is_cancelled() {
            info!("Sync cancelled after fetch");
            return Err(SyncError::Cancelled { phase: SyncPhase::Fetch });
        }

        let labeled: Vec<LabeledSource> = reports
            .iter()
            .map(|report| {
                let text = match &report.document {
                    Some(doc) => {
                        if !doc.looks_like_calendar() {
                            warn!("Source '{}' does not look like an iCalendar feed", doc.origin);
                        }
                        doc.text()
                    }
                    None => String::new(),
                };
                LabeledSource::new(report.outcome.origin.clone(), text)
            })
            .collect();

        let merged = self.engine.merge(&labeled);
        let merged_ics = merged.to_ics();
        let translated_ics = self.translation.as_ref().map(|overlay| overlay.translate_document(&merged));
        if cancel.is_cancelled() {
            info!("Sync cancelled after merge");
            return Err(SyncError::Cancelled { phase: SyncPhase::Merge });
        }

        self.store.replace(DocumentSlot::Merged, &merged_ics)?;
        if let Some(translated) = &translated_ics {
            self.store.replace(DocumentSlot::Translated, translated)?;
        }

        let outcomes: Vec<SyncOutcome> = reports
            .into_iter()
            .enumerate()
            .map(|(idx, report)| {
                let mut outcome = report.outcome;
                if outcome.success {
                    outcome.event_count = merged.stats.per_origin.get(idx).map_or(0, |s| s.events);
                }
                outcome
            })
            .collect();

        let sources_succeeded = outcomes.iter().filter(|o| o.success).count();
        let report = SyncReport {
            events_merged: merged.len(),
            sources_succeeded,
            sources_failed: outcomes.len() - sources_succeeded,
            malformed_events: merged.stats.malformed_events,
            unterminated_events: merged.stats.unterminated_events,
            merged_ics,
            translated_ics,
            outcomes,
            merged: Some(merged),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "Sync finished: {} events merged, {}/{} sources succeeded",
            report.events_merged,
            report.sources_succeeded,
            report.outcomes.len()
        );
        Ok(report)
    }
}

/// Run `pipeline` every `interval` until `cancel` fires.
///
/// The first run starts immediately. Cancellation is only observed while
/// waiting and at the pipeline's own phase checks; a run in progress is
/// never interrupted mid-fetch or mid-write.
pub async fn run_periodic<F: Fetcher>(pipeline: Arc<SyncPipeline<F>>, interval: Duration, mut cancel: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => {
                info!("Periodic sync stopped");
                return;
            }
        }

        match pipeline.run(&cancel).await {
            Ok(report) => info!(
                "Periodic sync: {} events, {} source(s) failed",
                report.events_merged, report.sources_failed
            ),
            Err(SyncError::Cancelled { phase }) => {
                info!("Periodic sync cancelled after {} phase", phase);
                return;
            }
            Err(err) => warn!("Periodic sync failed: {}", err),
        }
    }
}
