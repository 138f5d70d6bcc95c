// Shared fixtures for pipeline and session tests
#![allow(dead_code)]

use async_trait::async_trait;
use bulk_watermarker::codec::{CodecError, ImageCodec, RasterCodec, SourceFile};
use bulk_watermarker::collection::ImageCollection;
use bulk_watermarker::pipeline::{PipelineState, Renderer, SharedState};
use bulk_watermarker::watermark::{Anchor, Color, Compositor, WatermarkSpec};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Gradient test image, distinct per `seed`.
pub fn gradient(width: u32, height: u32, seed: u8) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            seed,
            255,
        ])
    })
}

pub fn encode(img: &RgbaImage, format: ImageFormat) -> Bytes {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgba8(img.clone())
            .to_rgb8()
            .write_to(&mut buffer, format)
            .unwrap(),
        _ => img.write_to(&mut buffer, format).unwrap(),
    }
    Bytes::from(buffer.into_inner())
}

pub fn png_file(name: &str, seed: u8) -> SourceFile {
    SourceFile::new(name, "image/png", encode(&gradient(120, 80, seed), ImageFormat::Png))
}

pub fn jpeg_file(name: &str, seed: u8) -> SourceFile {
    SourceFile::new(name, "image/jpeg", encode(&gradient(120, 80, seed), ImageFormat::Jpeg))
}

pub fn decode_rgba(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

/// Small solid logo for image-mode marks.
pub fn logo_bytes() -> Bytes {
    encode(&RgbaImage::from_pixel(20, 10, Rgba([0, 0, 255, 255])), ImageFormat::Png)
}

/// A text spec that is clearly visible on the gradient fixtures.
pub fn visible_spec(text: &str, anchor: Anchor) -> WatermarkSpec {
    WatermarkSpec::text(text)
        .with_anchor(anchor)
        .with_margins(4, 4)
        .with_font_size(16.0)
        .with_opacity(1.0)
        .with_color(Color::new(255, 0, 0))
}

/// Codec whose decodes can be held back per call.
///
/// Calls are numbered from 0 in the order they reach `decode`. A call with a
/// registered gate waits until the gate is opened.
#[derive(Default)]
pub struct GatedCodec {
    inner: RasterCodec,
    decode_calls: AtomicUsize,
    encodes_done: AtomicUsize,
    gates: Mutex<HashMap<usize, Arc<Semaphore>>>,
}

impl GatedCodec {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold back decode call number `call` until `open` is called.
    pub fn hold(&self, call: usize) {
        self.gates.lock().insert(call, Arc::new(Semaphore::new(0)));
    }

    pub fn open(&self, call: usize) {
        if let Some(gate) = self.gates.lock().get(&call) {
            gate.add_permits(1);
        }
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    pub fn encodes_done(&self) -> usize {
        self.encodes_done.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageCodec for GatedCodec {
    async fn decode(&self, data: Bytes) -> Result<DynamicImage, CodecError> {
        let call = self.decode_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().get(&call).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.inner.decode(data).await
    }

    async fn encode(&self, image: RgbaImage, format: ImageFormat) -> Result<Bytes, CodecError> {
        let result = self.inner.encode(image, format).await;
        self.encodes_done.fetch_add(1, Ordering::SeqCst);
        result
    }
}

pub fn shared_state(files: Vec<SourceFile>, spec: WatermarkSpec) -> SharedState {
    let mut collection = ImageCollection::default();
    collection.load(files);
    Arc::new(Mutex::new(PipelineState::new(spec, collection)))
}

pub fn renderer(codec: Arc<dyn ImageCodec>) -> Renderer {
    Renderer::new(codec, Arc::new(Compositor::default()))
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// The image the compositor produces for `file` under `spec`.
pub fn expected_render(file: &SourceFile, spec: &WatermarkSpec) -> RgbaImage {
    let source = image::load_from_memory(&file.bytes).unwrap();
    Compositor::default().render(&source, spec)
}
