//! Ordered store of loaded images.
//!
//! Each item keeps its original bytes untouched for the whole session; the
//! composited bytes are derived from them and overwritten on every reprocess.
//! The collection also owns the live-preview index and the thumbnail window.

use crate::codec::{detect_format, is_image_media_type, SourceFile};
use crate::error::PipelineError;
use bytes::Bytes;
use image::ImageFormat;
use std::ops::Range;
use tracing::warn;
use uuid::Uuid;

/// Default number of thumbnails per page (4x2 grid)
pub const DEFAULT_PAGE_SIZE: usize = 8;

/// Processing state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Not yet rendered
    Pending,
    /// Composited bytes are available
    Ready,
    /// The last pass could not decode or encode this item
    Failed(String),
}

/// One loaded image.
#[derive(Debug, Clone)]
pub struct ImageItem {
    id: Uuid,
    filename: String,
    format: ImageFormat,
    original: Bytes,
    composited: Option<Bytes>,
    generation: u64,
    status: ItemStatus,
}

impl ImageItem {
    fn new(filename: String, format: ImageFormat, original: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename,
            format,
            original,
            composited: None,
            generation: 0,
            status: ItemStatus::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Container format of the original file.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn original(&self) -> &Bytes {
        &self.original
    }

    pub fn composited(&self) -> Option<&Bytes> {
        self.composited.as_ref()
    }

    /// Generation of the pass that last settled this item.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> &ItemStatus {
        &self.status
    }

    pub fn export_name(&self) -> String {
        rename_for_export(&self.filename)
    }

    /// Record a successful render for `generation`.
    pub(crate) fn settle_ready(&mut self, generation: u64, composited: Bytes) {
        self.composited = Some(composited);
        self.generation = generation;
        self.status = ItemStatus::Ready;
    }

    /// Record a failed render for `generation`.
    pub(crate) fn settle_failed(&mut self, generation: u64, reason: String) {
        self.composited = None;
        self.generation = generation;
        self.status = ItemStatus::Failed(reason);
    }
}

/// Outcome of a batch load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: usize,
    pub rejected: Vec<PipelineError>,
}

/// Ordered collection with preview and thumbnail-window state.
#[derive(Debug, Clone)]
pub struct ImageCollection {
    items: Vec<ImageItem>,
    active_preview: usize,
    thumbnail_start: usize,
    page_size: usize,
}

impl Default for ImageCollection {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl ImageCollection {
    pub fn new(page_size: usize) -> Self {
        Self {
            items: Vec::new(),
            active_preview: 0,
            thumbnail_start: 0,
            page_size: page_size.max(1),
        }
    }

    /// Replace all items with `files`.
    ///
    /// Non-image media types are rejected one by one; the rest are loaded in
    /// the order given.
    pub fn load(&mut self, files: Vec<SourceFile>) -> LoadReport {
        let mut report = LoadReport::default();
        self.items.clear();
        self.active_preview = 0;
        self.thumbnail_start = 0;

        for file in files {
            if !is_image_media_type(&file.media_type) {
                warn!(
                    filename = %file.filename,
                    media_type = %file.media_type,
                    "Skipping unsupported file type"
                );
                report.rejected.push(PipelineError::UnsupportedFileType {
                    filename: file.filename,
                    media_type: file.media_type,
                });
                continue;
            }

            // Undetectable containers are still loaded; decoding reports them per item
            let format = detect_format(&file.bytes, &file.filename).unwrap_or(ImageFormat::Png);
            self.items.push(ImageItem::new(file.filename, format, file.bytes));
            report.accepted += 1;
        }

        report
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        self.items.clear();
        self.active_preview = 0;
        self.thumbnail_start = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&ImageItem> {
        self.items.get(index)
    }

    pub fn find(&self, id: Uuid) -> Option<&ImageItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: Uuid) -> Option<&mut ImageItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn active_preview(&self) -> usize {
        self.active_preview
    }

    /// Select the previewed item, clamped to the valid range.
    pub fn set_active_preview(&mut self, index: usize) -> usize {
        self.active_preview = index.min(self.items.len().saturating_sub(1));
        self.active_preview
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn thumbnail_start(&self) -> usize {
        self.thumbnail_start
    }

    fn max_thumbnail_start(&self) -> usize {
        self.items.len().saturating_sub(self.page_size)
    }

    /// Move the thumbnail window by `delta`, clamped to `[0, len - page_size]`.
    pub fn scroll_thumbnails(&mut self, delta: isize) -> usize {
        let target = self.thumbnail_start as isize + delta;
        self.thumbnail_start = target.clamp(0, self.max_thumbnail_start() as isize) as usize;
        self.thumbnail_start
    }

    /// Indices currently inside the thumbnail window.
    pub fn visible_range(&self) -> Range<usize> {
        let end = (self.thumbnail_start + self.page_size).min(self.items.len());
        self.thumbnail_start..end
    }

    /// Number of thumbnail pages (at least one).
    pub fn page_count(&self) -> usize {
        ((self.items.len() + self.page_size - 1) / self.page_size).max(1)
    }

    /// One-based page shown by the thumbnail window.
    ///
    /// A window pinned to the end of the collection is the last page, even
    /// when its start is not page aligned.
    pub fn current_page(&self) -> usize {
        if !self.items.is_empty() && self.thumbnail_start == self.max_thumbnail_start() {
            return self.page_count();
        }
        self.thumbnail_start / self.page_size + 1
    }

    /// Jump the window to a one-based page, clamped to the available pages.
    pub fn go_to_page(&mut self, page: usize) -> usize {
        let page = page.clamp(1, self.page_count());
        self.thumbnail_start = ((page - 1) * self.page_size).min(self.max_thumbnail_start());
        self.current_page()
    }
}

/// Name used for an exported copy: `{name}_marked{ext}`.
///
/// The split happens at the last `.`; a name without one gets no extension.
pub fn rename_for_export(filename: &str) -> String {
    match filename.rfind('.') {
        Some(dot) => format!("{}_marked{}", &filename[..dot], &filename[dot..]),
        None => format!("{}_marked", filename),
    }
}
