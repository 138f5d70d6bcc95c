//! Batch and preview synchronization.
//!
//! All mutable session data lives in one `PipelineState` behind a mutex. Render
//! work runs outside the lock and only re-acquires it to publish, at which point
//! the result is checked against the generation (batch) or token (preview) it
//! was issued for. Late results for superseded requests are dropped.

pub mod batch;
pub mod debounce;
pub mod export;
pub mod preview;

pub use batch::{BatchPipeline, BatchProgress};
pub use debounce::{Debouncer, DEFAULT_DEBOUNCE};
pub use export::{ExportAssembler, ExportedArchive};
pub use preview::{PreviewController, PreviewFrame, PreviewOutcome, SingleExport};

use crate::codec::ImageCodec;
use crate::collection::ImageCollection;
use crate::error::PipelineError;
use crate::watermark::{Compositor, WatermarkSpec};
use bytes::Bytes;
use image::{ImageFormat, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything a session mutates: settings, images and the pass counter.
#[derive(Debug, Default)]
pub struct PipelineState {
    /// Settings in effect, asset included
    pub spec: Arc<WatermarkSpec>,
    pub collection: ImageCollection,
    /// Bumped by every batch pass
    pub generation: u64,
}

impl PipelineState {
    pub fn new(spec: WatermarkSpec, collection: ImageCollection) -> Self {
        Self {
            spec: Arc::new(spec),
            collection,
            generation: 0,
        }
    }
}

pub type SharedState = Arc<Mutex<PipelineState>>;

/// Snapshot taken when a pass starts.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub target_generation: u64,
    pub spec: Arc<WatermarkSpec>,
}

/// Decode, composite and encode one source image.
#[derive(Clone)]
pub struct Renderer {
    codec: Arc<dyn ImageCodec>,
    compositor: Arc<Compositor>,
}

impl Renderer {
    pub fn new(codec: Arc<dyn ImageCodec>, compositor: Arc<Compositor>) -> Self {
        Self { codec, compositor }
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Decode `original` and draw the mark on it.
    pub async fn composite(
        &self,
        filename: &str,
        original: Bytes,
        spec: Arc<WatermarkSpec>,
    ) -> Result<RgbaImage, PipelineError> {
        let source = self
            .codec
            .decode(original)
            .await
            .map_err(|e| PipelineError::decode(filename, e))?;

        let compositor = Arc::clone(&self.compositor);
        tokio::task::spawn_blocking(move || compositor.render(&source, &spec))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))
    }

    /// Composite and re-encode in the source container.
    pub async fn render_encoded(
        &self,
        filename: &str,
        format: ImageFormat,
        original: Bytes,
        spec: Arc<WatermarkSpec>,
    ) -> Result<Bytes, PipelineError> {
        let composited = self.composite(filename, original, spec).await?;
        self.codec
            .encode(composited, format)
            .await
            .map_err(|e| PipelineError::encode(filename, e))
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("compositor", &self.compositor)
            .finish_non_exhaustive()
    }
}
