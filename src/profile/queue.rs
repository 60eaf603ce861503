//! Per-owner FIFO serialization of trait extraction.
//!
//! One detached worker task per trait-collection owner, fed over a flume
//! channel, so a later extraction always observes the merge result of an
//! earlier one. The worker loads the owner's traits from the store at
//! dequeue time, merges the extractor's proposals, persists traits plus
//! recomputed summary, and emits an advisory event. Cancelling an owner
//! drains that owner's queued jobs without effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::database::StudioDatabase;
use crate::events::{StudioEvent, TRAIT_HIGHLIGHT_MS};
use crate::profile::extractor::TraitExtractor;
use crate::profile::{merge_proposals, summarize};

/// One queued extraction: the exchange to mine and the owner whose trait
/// set it lands in.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub owner_id: String,
    pub user_turn: String,
    pub assistant_turn: String,
    pub turn_index: usize,
}

struct OwnerWorker {
    tx: flume::Sender<ExtractionJob>,
    cancelled: Arc<AtomicBool>,
}

pub struct ExtractionQueue {
    extractor: Arc<TraitExtractor>,
    db: Arc<StudioDatabase>,
    events: flume::Sender<StudioEvent>,
    workers: Mutex<HashMap<String, OwnerWorker>>,
}

impl ExtractionQueue {
    pub fn new(
        extractor: Arc<TraitExtractor>,
        db: Arc<StudioDatabase>,
        events: flume::Sender<StudioEvent>,
    ) -> Self {
        Self {
            extractor,
            db,
            events,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Queue one extraction behind any still pending for the same owner.
    /// Never blocks the caller.
    pub fn enqueue(&self, job: ExtractionJob) {
        let mut workers = match self.workers.lock() {
            Ok(workers) => workers,
            Err(e) => {
                tracing::error!("Extraction worker registry poisoned: {}", e);
                return;
            }
        };

        let job = match workers.get(&job.owner_id) {
            Some(worker) => match worker.tx.send(job) {
                Ok(()) => return,
                // The worker task is gone; replace it.
                Err(flume::SendError(job)) => {
                    workers.remove(&job.owner_id);
                    job
                }
            },
            None => job,
        };

        let owner_id = job.owner_id.clone();
        let worker = self.spawn_worker();
        let _ = worker.tx.send(job);
        workers.insert(owner_id, worker);
    }

    /// Drop any jobs still queued for this owner. Work already in flight
    /// finishes normally.
    pub fn cancel(&self, owner_id: &str) {
        if let Ok(mut workers) = self.workers.lock() {
            if let Some(worker) = workers.remove(owner_id) {
                worker.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }

    fn spawn_worker(&self) -> OwnerWorker {
        let (tx, rx) = flume::unbounded::<ExtractionJob>();
        let cancelled = Arc::new(AtomicBool::new(false));

        let context = WorkerContext {
            extractor: self.extractor.clone(),
            db: self.db.clone(),
            events: self.events.clone(),
            cancelled: cancelled.clone(),
        };
        tokio::spawn(async move {
            while let Ok(job) = rx.recv_async().await {
                if context.cancelled.load(Ordering::SeqCst) {
                    continue;
                }
                context.process(job).await;
            }
        });

        OwnerWorker { tx, cancelled }
    }
}

struct WorkerContext {
    extractor: Arc<TraitExtractor>,
    db: Arc<StudioDatabase>,
    events: flume::Sender<StudioEvent>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerContext {
    async fn process(&self, job: ExtractionJob) {
        // Dequeue-time state: the previous job's merge is already persisted.
        let existing = match self.db.load_traits(&job.owner_id) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!("Failed to load traits for {}: {}", job.owner_id, e);
                self.report_failure(&job, &e.to_string());
                return;
            }
        };

        let proposals = match self
            .extractor
            .propose(&job.user_turn, &job.assistant_turn, job.turn_index, &existing)
            .await
        {
            Ok(proposals) => proposals,
            Err(e) => {
                tracing::warn!("Trait extraction for turn {} failed: {}", job.turn_index, e);
                self.report_failure(&job, &e.to_string());
                return;
            }
        };

        if proposals.is_empty() {
            return;
        }

        let outcome = merge_proposals(
            &existing,
            &proposals.updated_traits,
            &proposals.new_traits,
            job.turn_index,
            Utc::now(),
        );
        if !outcome.changed() {
            return;
        }

        let summary = summarize(&outcome.traits);
        if let Err(e) = self.db.save_traits(&job.owner_id, &outcome.traits, &summary) {
            tracing::error!("Failed to persist traits for {}: {}", job.owner_id, e);
            self.report_failure(&job, &e.to_string());
            return;
        }

        let _ = self.events.send(StudioEvent::TraitsChanged {
            owner_id: job.owner_id,
            traits: outcome.traits,
            new_ids: outcome.new_ids,
            updated_ids: outcome.updated_ids,
            highlight_ms: TRAIT_HIGHLIGHT_MS,
        });
    }

    fn report_failure(&self, job: &ExtractionJob, error: &str) {
        let _ = self.events.send(StudioEvent::ExtractionFailed {
            owner_id: job.owner_id.clone(),
            turn_index: job.turn_index,
            error: error.to_string(),
        });
    }
}
