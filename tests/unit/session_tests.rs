// Session tests
//
// End-to-end scenarios through the Session controller: loading, settings
// changes, watermark image upload and removal, persistence and export.

use super::support::*;
use bulk_watermarker::archive::{ArchiveWriter, MemoryArchive};
use bulk_watermarker::codec::{ImageCodec, RasterCodec, SourceFile};
use bulk_watermarker::collection::ItemStatus;
use async_trait::async_trait;
use bulk_watermarker::settings::{
    FileSettingsStore, MemorySettingsStore, SettingsError, SettingsStore,
};
use bulk_watermarker::watermark::{Anchor, MarkMode, WatermarkSpec};
use bulk_watermarker::{PipelineError, Session, SessionOptions};
use bytes::Bytes;
use image::ImageFormat;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

async fn start_with(store: Arc<dyn SettingsStore>, options: SessionOptions) -> Session {
    let codec: Arc<dyn ImageCodec> = Arc::new(RasterCodec::default());
    Session::start(options, codec, store).await.unwrap()
}

async fn memory_session() -> (Session, Arc<MemorySettingsStore>) {
    let store = Arc::new(MemorySettingsStore::new());
    let session = start_with(store.clone(), SessionOptions::default()).await;
    (session, store)
}

// Test: Three images with a text mark export in load order under renamed entries
#[tokio::test]
async fn test_end_to_end_text_mark_export() {
    let (session, _) = memory_session().await;
    let spec = WatermarkSpec::text("SAMPLE")
        .with_anchor(Anchor::BottomRight)
        .with_margins(10, 10)
        .with_opacity(0.5);
    assert_ok!(session.apply_settings(spec).await);

    let files = vec![png_file("first.png", 1), jpeg_file("second.jpg", 2), png_file("third.png", 3)];
    let report = session.load_files(files.clone()).await;
    assert_eq!(report.accepted, 3);
    session.wait_until_settled().await;

    for (item, file) in session.items().iter().zip(&files) {
        let composited = item.composited().expect("composited bytes");
        assert_ne!(composited, &file.bytes);
        assert_ne!(decode_rgba(composited), decode_rgba(&file.bytes));
    }

    let mut archive = MemoryArchive::new();
    let exported = session.export_all(&mut archive).await.unwrap();
    assert_eq!(
        exported.entries,
        vec!["first_marked.png", "second_marked.jpg", "third_marked.png"]
    );
    assert_eq!(archive.names(), exported.entries);
    assert!(archive.is_finalized());
    assert!(exported.skipped.is_empty());

    // Each entry keeps its source container
    let formats: Vec<ImageFormat> = archive
        .entries()
        .iter()
        .map(|(_, bytes)| image::guess_format(bytes).unwrap())
        .collect();
    assert_eq!(formats, vec![ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Png]);
}

// Test: Export renders with the settings in effect when it was requested
#[tokio::test]
async fn test_export_reflects_latest_settings() {
    let (session, _) = memory_session().await;
    let file = png_file("photo.png", 9);
    session.load_files(vec![file.clone()]).await;
    session.wait_until_settled().await;

    let spec = visible_spec("LATE", Anchor::TopLeft);
    session.apply_settings(spec.clone()).await.unwrap();

    let mut archive = MemoryArchive::new();
    session.export_all(&mut archive).await.unwrap();
    let (_, bytes) = &archive.entries()[0];
    assert_eq!(decode_rgba(bytes), expected_render(&file, &spec));
}

// Test: Removing the watermark image falls back to text, and to plain copies without text
#[tokio::test]
async fn test_clear_asset_falls_back_to_text_then_plain_copy() {
    let (session, store) = memory_session().await;
    let files = vec![png_file("a.png", 1), png_file("b.png", 2)];
    session.load_files(files.clone()).await;

    assert_ok!(session.set_watermark_asset(logo_bytes()).await);
    assert_eq!(session.spec().mode, MarkMode::Image);
    assert!(session.spec().asset.is_some());
    assert!(store.load_watermark_asset().await.unwrap().is_some());

    let mut archive = MemoryArchive::new();
    session.export_all(&mut archive).await.unwrap();
    for ((_, bytes), file) in archive.entries().iter().zip(&files) {
        assert_ne!(decode_rgba(bytes), decode_rgba(&file.bytes));
    }

    // Text is empty by default, so clearing the image leaves nothing to draw
    assert_ok!(session.clear_watermark_asset().await);
    assert_eq!(session.spec().mode, MarkMode::Text);
    assert!(session.spec().asset.is_none());
    assert!(store.load_watermark_asset().await.unwrap().is_none());

    let mut archive = MemoryArchive::new();
    session.export_all(&mut archive).await.unwrap();
    for ((_, bytes), file) in archive.entries().iter().zip(&files) {
        assert_eq!(decode_rgba(bytes), decode_rgba(&file.bytes));
    }

    // With text set, the text mark comes back
    let spec = visible_spec("TEXT", Anchor::Center);
    session.apply_settings(spec.clone()).await.unwrap();
    session.wait_until_settled().await;
    let item = &session.items()[0];
    assert_eq!(decode_rgba(item.composited().unwrap()), expected_render(&files[0], &spec));
}

// Test: Settings changes keep the uploaded watermark image
#[tokio::test]
async fn test_apply_settings_keeps_asset() {
    let (session, _) = memory_session().await;
    session.set_watermark_asset(logo_bytes()).await.unwrap();

    let spec = WatermarkSpec {
        mode: MarkMode::Image,
        ..visible_spec("", Anchor::TopLeft)
    };
    session.apply_settings(spec).await.unwrap();
    assert!(session.spec().asset.is_some());
    assert_eq!(session.spec().anchor, Anchor::TopLeft);
}

// Test: An undecodable watermark image is rejected and the session stays in text mode
#[tokio::test]
async fn test_invalid_asset_degrades_to_text() {
    let (session, store) = memory_session().await;
    session.set_watermark_asset(logo_bytes()).await.unwrap();

    let result = session
        .set_watermark_asset(Bytes::from_static(b"this is not an image"))
        .await;
    assert!(matches!(result, Err(PipelineError::InvalidWatermarkAsset(_))));
    assert_eq!(session.spec().mode, MarkMode::Text);
    assert!(session.spec().asset.is_none());
    assert!(store.load_watermark_asset().await.unwrap().is_none());
}

// Test: Exporting nothing is an error and produces no archive
#[tokio::test]
async fn test_export_empty_batch() {
    let (session, _) = memory_session().await;
    let mut archive = MemoryArchive::new();

    let result = session.export_all(&mut archive).await;
    assert!(matches!(result, Err(PipelineError::EmptyBatch)));
    assert!(!archive.is_finalized());
    assert!(matches!(
        session.export_preview().await,
        Err(PipelineError::EmptyBatch)
    ));
}

// Test: Undecodable files are skipped in export, the rest are packaged
#[tokio::test]
async fn test_export_skips_decode_failures() {
    let (session, _) = memory_session().await;
    let broken = SourceFile::new("broken.png", "image/png", Bytes::from_static(b"garbage"));
    session
        .load_files(vec![png_file("a.png", 1), broken, png_file("c.png", 3)])
        .await;

    let mut archive = MemoryArchive::new();
    let exported = session.export_all(&mut archive).await.unwrap();
    assert_eq!(exported.entries, vec!["a_marked.png", "c_marked.png"]);
    assert_eq!(exported.skipped.len(), 1);
    assert_eq!(exported.skipped[0].0, "broken.png");

    let items = session.items();
    assert!(matches!(items[1].status(), ItemStatus::Failed(_)));
}

// Test: Non-image files are rejected one by one
#[tokio::test]
async fn test_load_rejects_non_images() {
    let (session, _) = memory_session().await;
    let notes = SourceFile::new("notes.txt", "text/plain", Bytes::from_static(b"hello"));

    let report = session
        .load_files(vec![png_file("a.png", 1), notes, png_file("b.png", 2)])
        .await;
    assert_eq!(report.accepted, 2);
    assert!(matches!(
        &report.rejected[..],
        [PipelineError::UnsupportedFileType { filename, .. }] if filename == "notes.txt"
    ));
    assert_eq!(session.len(), 2);
}

// Test: Out-of-range opacity renders plain copies and is not persisted
#[tokio::test]
async fn test_invalid_numeric_setting_is_fail_soft() {
    let (session, store) = memory_session().await;
    let file = png_file("a.png", 4);
    session.load_files(vec![file.clone()]).await;

    let result = session
        .apply_settings(visible_spec("X", Anchor::Center).with_opacity(1.0001))
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::InvalidNumericSetting { field: "opacity", .. })
    ));
    assert!(store.load_settings().await.unwrap().is_none());

    session.wait_until_settled().await;
    let item = &session.items()[0];
    assert_eq!(decode_rgba(item.composited().unwrap()), decode_rgba(&file.bytes));

    let frame = session.current_preview().unwrap();
    assert_eq!(*frame.image, decode_rgba(&file.bytes));
}

// Test: Loading shows the first image; selection moves and clamps the preview
#[tokio::test]
async fn test_preview_follows_selection() {
    let (session, _) = memory_session().await;
    session
        .load_files(vec![png_file("a.png", 1), jpeg_file("b.jpg", 2), png_file("c.png", 3)])
        .await;
    assert_eq!(session.current_preview().unwrap().filename, "a.png");

    session.select_preview(1).await.unwrap();
    assert_eq!(session.active_preview(), 1);
    assert_eq!(session.current_preview().unwrap().filename, "b.jpg");

    let single = session.export_preview().await.unwrap();
    assert_eq!(single.name, "b_marked.jpg");
    assert_eq!(image::guess_format(&single.bytes).unwrap(), ImageFormat::Jpeg);

    session.select_preview(42).await.unwrap();
    assert_eq!(session.active_preview(), 2);
    assert_eq!(session.current_preview().unwrap().filename, "c.png");
}

// Test: Thumbnail window and pagination follow the page size
#[tokio::test]
async fn test_thumbnail_window() {
    let store = Arc::new(MemorySettingsStore::new());
    let options = SessionOptions {
        page_size: 4,
        ..SessionOptions::default()
    };
    let session = start_with(store, options).await;
    let files = (0..10).map(|i| png_file(&format!("img{}.png", i), i as u8)).collect();
    session.load_files(files).await;

    assert_eq!(session.page_count(), 3);
    assert_eq!(session.visible_thumbnails(), 0..4);
    assert_eq!(session.scroll_thumbnails(3), 3);
    assert_eq!(session.scroll_thumbnails(50), 6);
    assert_eq!(session.visible_thumbnails(), 6..10);
    assert_eq!(session.scroll_thumbnails(-50), 0);
    assert_eq!(session.go_to_page(2), 2);
    assert_eq!(session.visible_thumbnails(), 4..8);
    assert_eq!(session.go_to_page(3), 3);
    assert_eq!(session.visible_thumbnails(), 6..10);
}

// Test: Rapid edits collapse into the last one after the debounce delay
#[tokio::test(start_paused = true)]
async fn test_schedule_settings_debounces() {
    let store = Arc::new(MemorySettingsStore::new());
    let options = SessionOptions {
        settings_debounce: Duration::from_millis(300),
        ..SessionOptions::default()
    };
    let session = start_with(store.clone(), options).await;

    session.schedule_settings(WatermarkSpec::text("one"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.schedule_settings(WatermarkSpec::text("two"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.schedule_settings(WatermarkSpec::text("three"));
    assert!(session.has_pending_settings());
    assert_eq!(session.spec().text, "");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!session.has_pending_settings());
    assert_eq!(session.spec().text, "three");
    assert_eq!(store.load_settings().await.unwrap().unwrap().text, "three");
}

// Test: Cancelled edits never apply
#[tokio::test(start_paused = true)]
async fn test_cancel_pending_settings() {
    let (session, store) = memory_session().await;
    session.schedule_settings(WatermarkSpec::text("never"));
    session.cancel_pending_settings();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.spec().text, "");
    assert!(store.load_settings().await.unwrap().is_none());
}

// Test: Settings and watermark image survive a restart
#[tokio::test]
async fn test_settings_persist_across_sessions() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(dir.path()));

    let session = start_with(Arc::clone(&store), SessionOptions::default()).await;
    session
        .apply_settings(visible_spec("KEEP", Anchor::TopRight))
        .await
        .unwrap();
    session.set_watermark_asset(logo_bytes()).await.unwrap();
    drop(session);

    let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(dir.path()));
    let restored = start_with(store, SessionOptions::default()).await;
    let spec = restored.spec();
    assert_eq!(spec.text, "KEEP");
    assert_eq!(spec.anchor, Anchor::TopRight);
    assert_eq!(spec.mode, MarkMode::Image);
    assert_eq!(spec.asset.as_ref().unwrap().bytes(), &logo_bytes());
}

// Test: A corrupt persisted watermark image is cleared at startup
#[tokio::test]
async fn test_corrupt_persisted_asset_is_cleared() {
    let store = Arc::new(MemorySettingsStore::new());
    let mut saved = WatermarkSpec::text("fallback");
    saved.mode = MarkMode::Image;
    store.save_settings(&saved).await.unwrap();
    store.save_watermark_asset(b"corrupt").await.unwrap();

    let session = start_with(store.clone(), SessionOptions::default()).await;
    assert_eq!(session.spec().mode, MarkMode::Text);
    assert_eq!(session.spec().text, "fallback");
    assert!(store.load_watermark_asset().await.unwrap().is_none());
}

/// Store whose watermark image can be read but never removed.
struct UndeletableAssetStore {
    inner: MemorySettingsStore,
}

#[async_trait]
impl SettingsStore for UndeletableAssetStore {
    async fn load_settings(&self) -> Result<Option<WatermarkSpec>, SettingsError> {
        self.inner.load_settings().await
    }

    async fn save_settings(&self, spec: &WatermarkSpec) -> Result<(), SettingsError> {
        self.inner.save_settings(spec).await
    }

    async fn load_watermark_asset(&self) -> Result<Option<Bytes>, SettingsError> {
        self.inner.load_watermark_asset().await
    }

    async fn save_watermark_asset(&self, bytes: &[u8]) -> Result<(), SettingsError> {
        self.inner.save_watermark_asset(bytes).await
    }

    async fn clear_watermark_asset(&self) -> Result<(), SettingsError> {
        Err(SettingsError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only state directory",
        )))
    }
}

// Test: Startup survives a corrupt watermark image that cannot be removed
#[tokio::test]
async fn test_start_with_undeletable_corrupt_asset() {
    let store = UndeletableAssetStore {
        inner: MemorySettingsStore::new(),
    };
    store.save_watermark_asset(b"corrupt").await.unwrap();

    let codec: Arc<dyn ImageCodec> = Arc::new(RasterCodec::default());
    let session = Session::start(SessionOptions::default(), codec, Arc::new(store)).await;
    let session = assert_ok!(session);
    assert_eq!(session.spec().mode, MarkMode::Text);
    assert!(session.spec().asset.is_none());
}

// Test: Overlapping settings changes persist in the order they were made
#[tokio::test]
async fn test_overlapping_settings_persist_in_order() {
    let codec = GatedCodec::new();
    let store = Arc::new(MemorySettingsStore::new());
    let session = Session::start(
        SessionOptions::default(),
        codec.clone() as Arc<dyn ImageCodec>,
        store.clone(),
    )
    .await
    .unwrap();
    session.load_files(vec![png_file("photo.png", 4)]).await;
    session.wait_until_settled().await;

    // The first change stalls in its preview decode
    let base = codec.decode_calls();
    codec.hold(base);
    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.apply_settings(WatermarkSpec::text("A")).await })
    };
    let gated = Arc::clone(&codec);
    wait_for(move || gated.decode_calls() > base).await;

    // The second change is made while the first is still in flight
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.apply_settings(WatermarkSpec::text("B")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    codec.open(base);
    assert_ok!(first.await.unwrap());
    assert_ok!(second.await.unwrap());

    assert_eq!(session.spec().text, "B");
    assert_eq!(store.load_settings().await.unwrap().unwrap().text, "B");
}

// Test: Defaults apply when nothing is persisted
#[tokio::test]
async fn test_default_spec_without_persisted_settings() {
    let options = SessionOptions {
        default_spec: WatermarkSpec::text("configured"),
        ..SessionOptions::default()
    };
    let session = start_with(Arc::new(MemorySettingsStore::new()), options).await;
    assert_eq!(session.spec().text, "configured");
    assert!(session.is_empty());
    assert_err!(session.export_preview().await);
}

// Test: A finalized archive cannot be reused for a second export
#[tokio::test]
async fn test_export_into_finalized_archive_fails() {
    let (session, _) = memory_session().await;
    session.load_files(vec![png_file("a.png", 1)]).await;

    let mut archive = MemoryArchive::new();
    archive.finalize().await.unwrap();
    assert!(matches!(
        session.export_all(&mut archive).await,
        Err(PipelineError::Archive(_))
    ));
}
