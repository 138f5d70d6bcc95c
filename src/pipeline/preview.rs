//! Live preview of one image.
//!
//! Each `show` takes a fresh token. When the render finishes, it is published
//! only if no newer `show` has been issued since; otherwise it is dropped.

use super::{Renderer, SharedState};
use crate::error::PipelineError;
use crate::watermark::WatermarkSpec;
use bytes::Bytes;
use image::{ImageFormat, RgbaImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

/// A published preview render.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub token: u64,
    pub index: usize,
    pub item_id: Uuid,
    pub filename: String,
    pub image: Arc<RgbaImage>,
}

/// What happened to a `show` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// The render is on the preview surface
    Published(u64),
    /// A newer request was issued first; the render was dropped
    Superseded(u64),
    /// Nothing is loaded; the preview was cleared
    Empty,
}

/// One image exported on its own.
#[derive(Debug, Clone)]
pub struct SingleExport {
    pub name: String,
    pub format: ImageFormat,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct PreviewController {
    state: SharedState,
    renderer: Renderer,
    latest: Arc<AtomicU64>,
    frames: Arc<watch::Sender<Option<PreviewFrame>>>,
}

impl PreviewController {
    pub fn new(state: SharedState, renderer: Renderer) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            state,
            renderer,
            latest: Arc::new(AtomicU64::new(0)),
            frames: Arc::new(frames),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PreviewFrame>> {
        self.frames.subscribe()
    }

    /// Frame currently on the preview surface.
    pub fn current(&self) -> Option<PreviewFrame> {
        self.frames.borrow().clone()
    }

    /// Token of the newest request.
    pub fn latest_token(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    fn is_latest(&self, token: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == token
    }

    /// Render item `index` with `spec` and publish it unless superseded.
    ///
    /// The index is clamped to the collection. A decode failure clears the
    /// preview (if still current) and is returned to the caller.
    pub async fn show(
        &self,
        index: usize,
        spec: Arc<WatermarkSpec>,
    ) -> Result<PreviewOutcome, PipelineError> {
        self.render_and_publish(index, Some(spec)).await
    }

    /// Like `show`, with the spec currently in the shared state.
    ///
    /// The token and the spec are read under the same lock that guards spec
    /// updates, so the newest token always carries the newest spec.
    pub async fn refresh(&self, index: usize) -> Result<PreviewOutcome, PipelineError> {
        self.render_and_publish(index, None).await
    }

    async fn render_and_publish(
        &self,
        index: usize,
        spec: Option<Arc<WatermarkSpec>>,
    ) -> Result<PreviewOutcome, PipelineError> {
        let (token, spec, target) = {
            let state = self.state.lock();
            let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            let spec = spec.unwrap_or_else(|| Arc::clone(&state.spec));
            let index = index.min(state.collection.len().saturating_sub(1));
            let target = state
                .collection
                .get(index)
                .map(|item| (index, item.id(), item.filename().to_string(), item.original().clone()));
            (token, spec, target)
        };

        let (index, item_id, filename, original) = match target {
            Some(target) => target,
            None => {
                self.frames.send_if_modified(|current| {
                    if !self.is_latest(token) {
                        return false;
                    }
                    current.take().is_some()
                });
                return Ok(PreviewOutcome::Empty);
            }
        };

        debug!(token, index, filename = %filename, "Rendering preview");
        let result = self.renderer.composite(&filename, original, spec).await;

        // The check and the publish must not interleave with a newer publish
        let mut outcome = PreviewOutcome::Superseded(token);
        let mut failure = None;
        self.frames.send_if_modified(|current| {
            if !self.is_latest(token) {
                return false;
            }
            match result {
                Ok(image) => {
                    *current = Some(PreviewFrame {
                        token,
                        index,
                        item_id,
                        filename: filename.clone(),
                        image: Arc::new(image),
                    });
                    outcome = PreviewOutcome::Published(token);
                }
                Err(e) => {
                    *current = None;
                    failure = Some(e);
                }
            }
            true
        });

        if let Some(e) = failure {
            return Err(e);
        }
        if outcome == PreviewOutcome::Superseded(token) {
            debug!(token, latest = self.latest_token(), "Dropping superseded preview");
        }
        Ok(outcome)
    }

    /// Render one item for single-image export, bypassing the preview surface.
    pub async fn render_single(
        &self,
        index: usize,
        spec: Arc<WatermarkSpec>,
    ) -> Result<SingleExport, PipelineError> {
        let (name, format, filename, original) = {
            let state = self.state.lock();
            let len = state.collection.len();
            let item = state
                .collection
                .get(index)
                .ok_or(PipelineError::IndexOutOfRange { index, len })?;
            (
                item.export_name(),
                item.format(),
                item.filename().to_string(),
                item.original().clone(),
            )
        };

        let bytes = self
            .renderer
            .render_encoded(&filename, format, original, spec)
            .await?;
        Ok(SingleExport {
            name,
            format,
            bytes,
        })
    }
}
