//! Full-batch reprocessing.
//!
//! Every pass bumps the generation and snapshots the spec under one lock, so a
//! pass never mixes two watermark assets. Items render concurrently and settle
//! in any order; a result is written back only while its pass is still the
//! newest one.

use super::{PipelineState, RenderRequest, Renderer, SharedState};
use crate::error::PipelineError;
use bytes::Bytes;
use image::ImageFormat;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Settle counter for the newest pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    pub generation: u64,
    /// Items whose latest write belongs to `generation`
    pub settled: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn is_complete(&self) -> bool {
        self.settled >= self.total
    }
}

/// Work captured for one item when a pass starts.
struct ItemJob {
    id: Uuid,
    filename: String,
    format: ImageFormat,
    original: Bytes,
}

#[derive(Debug, Clone)]
pub struct BatchPipeline {
    state: SharedState,
    renderer: Renderer,
    progress: Arc<watch::Sender<BatchProgress>>,
}

impl BatchPipeline {
    pub fn new(state: SharedState, renderer: Renderer) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            state,
            renderer,
            progress: Arc::new(progress),
        }
    }

    /// Progress updates; the current value is always the newest pass.
    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> BatchProgress {
        *self.progress.borrow()
    }

    /// Start a pass over every item with the current spec.
    ///
    /// Returns the new generation. Passes still in flight keep running but
    /// their writes are discarded on arrival.
    pub fn reprocess_all(&self) -> u64 {
        let (request, jobs) = {
            let mut state = self.state.lock();
            state.generation += 1;
            let request = RenderRequest {
                target_generation: state.generation,
                spec: Arc::clone(&state.spec),
            };
            let jobs: Vec<ItemJob> = state
                .collection
                .items()
                .iter()
                .map(|item| ItemJob {
                    id: item.id(),
                    filename: item.filename().to_string(),
                    format: item.format(),
                    original: item.original().clone(),
                })
                .collect();

            // Published under the lock so progress never goes back a generation
            self.progress.send_replace(BatchProgress {
                generation: request.target_generation,
                settled: 0,
                total: jobs.len(),
            });
            (request, jobs)
        };

        let generation = request.target_generation;
        let total = jobs.len();
        info!(generation, items = total, "Starting batch pass");

        for job in jobs {
            let state = Arc::clone(&self.state);
            let renderer = self.renderer.clone();
            let progress = Arc::clone(&self.progress);
            let spec = Arc::clone(&request.spec);

            tokio::spawn(async move {
                let outcome = renderer
                    .render_encoded(&job.filename, job.format, job.original, spec)
                    .await;
                settle(&state, &progress, generation, total, job.id, &job.filename, outcome);
            });
        }

        generation
    }

    /// Wait until the newest pass has settled every item.
    ///
    /// A pass started while waiting extends the wait to that pass.
    pub async fn wait_until_settled(&self) -> BatchProgress {
        let mut rx = self.progress.subscribe();
        loop {
            let progress = *rx.borrow_and_update();
            let current = self.state.lock().generation;
            if progress.is_complete() && progress.generation == current {
                return progress;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

/// Write one item's result back if its pass is still current.
fn settle(
    state: &SharedState,
    progress: &watch::Sender<BatchProgress>,
    generation: u64,
    total: usize,
    id: Uuid,
    filename: &str,
    outcome: Result<Bytes, PipelineError>,
) {
    let mut guard = state.lock();
    let state: &mut PipelineState = &mut guard;

    if state.generation != generation {
        debug!(
            generation,
            current = state.generation,
            filename,
            "Discarding stale batch result"
        );
        return;
    }

    let item = match state.collection.find_mut(id) {
        Some(item) => item,
        None => {
            debug!(generation, item_id = %id, "Item removed before result arrived");
            return;
        }
    };

    match outcome {
        Ok(bytes) => {
            debug!(generation, item_id = %id, filename, size = bytes.len(), "Item rendered");
            item.settle_ready(generation, bytes);
        }
        Err(e) => {
            warn!(generation, item_id = %id, filename, error = %e, "Item failed");
            item.settle_failed(generation, e.to_string());
        }
    }

    let settled = state
        .collection
        .items()
        .iter()
        .filter(|item| item.generation() == generation)
        .count();
    progress.send_replace(BatchProgress {
        generation,
        settled,
        total,
    });

    if settled == total {
        info!(generation, items = total, "Batch pass settled");
    }
}
