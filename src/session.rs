//! Session controller.
//!
//! A `Session` owns the shared pipeline state and is the only place that
//! mutates the spec or the collection. Every accepted change is persisted and
//! followed by a preview refresh and a batch pass.

use crate::archive::ArchiveWriter;
use crate::codec::{ImageCodec, RasterCodec, SourceFile};
use crate::collection::{ImageCollection, ImageItem, LoadReport};
use crate::config::Config;
use crate::error::PipelineError;
use crate::pipeline::{
    BatchPipeline, BatchProgress, Debouncer, ExportAssembler, ExportedArchive, PipelineState,
    PreviewController, PreviewFrame, PreviewOutcome, Renderer, SharedState, SingleExport,
};
use crate::settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};
use crate::watermark::{Compositor, GlyphSource, MarkMode, TextRenderer, WatermarkAsset, WatermarkSpec};
use bytes::Bytes;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Construction parameters for a `Session`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Spec used when the store has none
    pub default_spec: WatermarkSpec,
    pub page_size: usize,
    pub settings_debounce: Duration,
    pub glyphs: GlyphSource,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let config = Config::default();
        Self {
            default_spec: config.watermark,
            page_size: config.gallery.page_size,
            settings_debounce: config.pipeline.settings_debounce(),
            glyphs: GlyphSource::Bitmap,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Ok(Self {
            default_spec: config.watermark.clone(),
            page_size: config.gallery.page_size,
            settings_debounce: config.pipeline.settings_debounce(),
            glyphs: config.font.glyph_source().map_err(PipelineError::Config)?,
        })
    }
}

struct SessionInner {
    state: SharedState,
    codec: Arc<dyn ImageCodec>,
    store: Arc<dyn SettingsStore>,
    batch: BatchPipeline,
    preview: PreviewController,
    export: ExportAssembler,
    debouncer: Debouncer,
    /// Held for the whole of a settings or asset change, so changes install
    /// and persist in the order they were made
    settings_lock: tokio::sync::Mutex<()>,
}

/// Handle to one editing session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("items", &state.collection.len())
            .field("generation", &state.generation)
            .field("spec", &state.spec)
            .finish()
    }
}

impl Session {
    /// Build a session from configuration with the production collaborators.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let options = SessionOptions::from_config(config)?;
        let encode = config.pipeline.encode_settings().map_err(PipelineError::Config)?;
        let codec: Arc<dyn ImageCodec> = Arc::new(RasterCodec::new(encode));
        let store: Arc<dyn SettingsStore> = match &config.storage.state_dir {
            Some(dir) => Arc::new(FileSettingsStore::new(dir)),
            None => Arc::new(MemorySettingsStore::new()),
        };
        Self::start(options, codec, store).await
    }

    /// Restore persisted settings and asset, then build the pipeline.
    ///
    /// Missing or unreadable persisted data falls back to the defaults; a
    /// persisted asset that no longer decodes is cleared.
    pub async fn start(
        options: SessionOptions,
        codec: Arc<dyn ImageCodec>,
        store: Arc<dyn SettingsStore>,
    ) -> Result<Self, PipelineError> {
        let mut spec = match store.load_settings().await {
            Ok(Some(spec)) => {
                debug!("Restored persisted watermark settings");
                spec
            }
            Ok(None) => options.default_spec.clone(),
            Err(e) => {
                warn!(error = %e, "Could not read persisted settings, using defaults");
                options.default_spec.clone()
            }
        };
        spec.asset = None;

        let stored_asset = match store.load_watermark_asset().await {
            Ok(asset) => asset,
            Err(e) => {
                warn!(error = %e, "Could not read persisted watermark image");
                None
            }
        };
        if let Some(bytes) = stored_asset {
            match decode_asset(codec.as_ref(), bytes).await {
                Ok(asset) => spec.asset = Some(asset),
                Err(e) => {
                    warn!(error = %e, "Persisted watermark image is invalid, clearing it");
                    spec.mode = MarkMode::Text;
                    if let Err(e) = store.clear_watermark_asset().await {
                        warn!(error = %e, "Could not remove persisted watermark image");
                    }
                }
            }
        }

        let state: SharedState = Arc::new(Mutex::new(PipelineState::new(
            spec,
            ImageCollection::new(options.page_size),
        )));
        let compositor = Arc::new(Compositor::new(TextRenderer::new(options.glyphs)));
        let renderer = Renderer::new(Arc::clone(&codec), compositor);
        let batch = BatchPipeline::new(Arc::clone(&state), renderer.clone());
        let preview = PreviewController::new(Arc::clone(&state), renderer);
        let export = ExportAssembler::new(Arc::clone(&state), batch.clone());

        info!(
            page_size = options.page_size,
            debounce_ms = options.settings_debounce.as_millis() as u64,
            "Session started"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                state,
                codec,
                store,
                batch,
                preview,
                export,
                debouncer: Debouncer::new(options.settings_debounce),
                settings_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Settings in effect.
    pub fn spec(&self) -> Arc<WatermarkSpec> {
        Arc::clone(&self.inner.state.lock().spec)
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Snapshot of the loaded items in load order.
    pub fn items(&self) -> Vec<ImageItem> {
        self.inner.state.lock().collection.items().to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn preview_frames(&self) -> watch::Receiver<Option<PreviewFrame>> {
        self.inner.preview.subscribe()
    }

    pub fn current_preview(&self) -> Option<PreviewFrame> {
        self.inner.preview.current()
    }

    pub fn batch_progress(&self) -> watch::Receiver<BatchProgress> {
        self.inner.batch.subscribe()
    }

    pub async fn wait_until_settled(&self) -> BatchProgress {
        self.inner.batch.wait_until_settled().await
    }

    /// Replace the loaded images, preview the first one and start a batch pass.
    pub async fn load_files(&self, files: Vec<SourceFile>) -> LoadReport {
        let report = self.inner.state.lock().collection.load(files);
        info!(
            accepted = report.accepted,
            rejected = report.rejected.len(),
            "Loaded images"
        );

        self.refresh().await;
        report
    }

    /// Apply new settings immediately.
    ///
    /// The current watermark image is kept. Out-of-range numbers are applied
    /// anyway (renders become plain copies) but are not persisted, and the
    /// error is returned.
    pub async fn apply_settings(&self, mut spec: WatermarkSpec) -> Result<(), PipelineError> {
        let _guard = self.inner.settings_lock.lock().await;
        let numeric = spec.check_numeric();
        {
            let mut state = self.inner.state.lock();
            spec.asset = state.spec.asset.clone();
            state.spec = Arc::new(spec.clone());
        }

        self.refresh().await;

        if let Err(e) = numeric {
            warn!(error = %e, "Settings applied without watermark");
            return Err(e.into());
        }
        self.inner.store.save_settings(&spec).await?;
        Ok(())
    }

    /// Apply new settings after the debounce delay, replacing any pending edit.
    pub fn schedule_settings(&self, spec: WatermarkSpec) {
        let session = self.clone();
        self.inner.debouncer.schedule(async move {
            if let Err(e) = session.apply_settings(spec).await {
                warn!(error = %e, "Debounced settings change failed");
            }
        });
    }

    /// Whether a debounced settings change is still waiting to run.
    pub fn has_pending_settings(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Drop a debounced settings change that has not run yet.
    pub fn cancel_pending_settings(&self) {
        self.inner.debouncer.cancel();
    }

    /// Decode and install a new watermark image, switching to image mode.
    ///
    /// Bytes that do not decode clear the current image and leave the session
    /// in text mode.
    pub async fn set_watermark_asset(&self, bytes: Bytes) -> Result<(), PipelineError> {
        let _guard = self.inner.settings_lock.lock().await;
        match decode_asset(self.inner.codec.as_ref(), bytes.clone()).await {
            Ok(asset) => {
                let spec = self.replace_spec(|spec| spec.with_asset(asset));
                info!(size = bytes.len(), "Watermark image installed");

                self.refresh().await;
                self.inner.store.save_watermark_asset(&bytes).await?;
                self.inner.store.save_settings(&spec).await?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Rejected watermark image");
                self.remove_asset().await?;
                Err(e)
            }
        }
    }

    /// Remove the watermark image and return to text mode.
    pub async fn clear_watermark_asset(&self) -> Result<(), PipelineError> {
        let _guard = self.inner.settings_lock.lock().await;
        self.remove_asset().await
    }

    /// Caller holds `settings_lock`.
    async fn remove_asset(&self) -> Result<(), PipelineError> {
        let spec = self.replace_spec(WatermarkSpec::without_asset);
        debug!("Watermark image cleared");

        self.refresh().await;
        self.inner.store.clear_watermark_asset().await?;
        self.inner.store.save_settings(&spec).await?;
        Ok(())
    }

    /// Show a different image in the preview.
    pub async fn select_preview(&self, index: usize) -> Result<PreviewOutcome, PipelineError> {
        let index = self.inner.state.lock().collection.set_active_preview(index);
        self.inner.preview.refresh(index).await
    }

    pub fn active_preview(&self) -> usize {
        self.inner.state.lock().collection.active_preview()
    }

    /// Move the thumbnail window; returns the new window start.
    pub fn scroll_thumbnails(&self, delta: isize) -> usize {
        self.inner.state.lock().collection.scroll_thumbnails(delta)
    }

    /// Jump the thumbnail window to a one-based page.
    pub fn go_to_page(&self, page: usize) -> usize {
        self.inner.state.lock().collection.go_to_page(page)
    }

    /// Indices inside the thumbnail window.
    pub fn visible_thumbnails(&self) -> Range<usize> {
        self.inner.state.lock().collection.visible_range()
    }

    pub fn page_count(&self) -> usize {
        self.inner.state.lock().collection.page_count()
    }

    /// Render everything afresh and package it into `archive`.
    pub async fn export_all(
        &self,
        archive: &mut dyn ArchiveWriter,
    ) -> Result<ExportedArchive, PipelineError> {
        self.inner.export.export_all(archive).await
    }

    /// Render the previewed image on its own with the current settings.
    pub async fn export_preview(&self) -> Result<SingleExport, PipelineError> {
        let (index, spec, empty) = {
            let state = self.inner.state.lock();
            (
                state.collection.active_preview(),
                Arc::clone(&state.spec),
                state.collection.is_empty(),
            )
        };
        if empty {
            return Err(PipelineError::EmptyBatch);
        }
        self.inner.preview.render_single(index, spec).await
    }

    /// Swap the spec under the lock and return the new value.
    fn replace_spec<F>(&self, update: F) -> WatermarkSpec
    where
        F: FnOnce(WatermarkSpec) -> WatermarkSpec,
    {
        let mut state = self.inner.state.lock();
        let spec = update((*state.spec).clone());
        state.spec = Arc::new(spec.clone());
        spec
    }

    /// Start a batch pass and re-render the preview with the current spec.
    async fn refresh(&self) {
        self.inner.batch.reprocess_all();
        let index = self.inner.state.lock().collection.active_preview();
        if let Err(e) = self.inner.preview.refresh(index).await {
            warn!(index, error = %e, "Preview render failed");
        }
    }
}

/// Decode a watermark image once, off the async threads.
async fn decode_asset(codec: &dyn ImageCodec, bytes: Bytes) -> Result<WatermarkAsset, PipelineError> {
    let decoded = codec
        .decode(bytes.clone())
        .await
        .map_err(|e| PipelineError::InvalidWatermarkAsset(e.to_string()))?;
    Ok(WatermarkAsset::from_decoded(bytes, decoded.to_rgba8())?)
}
