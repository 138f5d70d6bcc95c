// Export tests with the real zip container

use super::support::*;
use bulk_watermarker::archive::ZipArchiveWriter;
use bulk_watermarker::codec::{ImageCodec, RasterCodec, SourceFile};
use bulk_watermarker::collection::rename_for_export;
use bulk_watermarker::settings::MemorySettingsStore;
use bulk_watermarker::watermark::Anchor;
use bulk_watermarker::{Session, SessionOptions};
use image::ImageFormat;
use rstest::rstest;
use std::io::{Cursor, Read};
use std::sync::Arc;

async fn session() -> Session {
    let codec: Arc<dyn ImageCodec> = Arc::new(RasterCodec::default());
    Session::start(
        SessionOptions::default(),
        codec,
        Arc::new(MemorySettingsStore::new()),
    )
    .await
    .unwrap()
}

fn read_zip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

// Test: Export names follow {stem}_marked{ext}
#[rstest]
#[case("photo.jpg", "photo_marked.jpg")]
#[case("a.b.png", "a.b_marked.png")]
#[case("IMG_0001.JPEG", "IMG_0001_marked.JPEG")]
#[case("noextension", "noextension_marked")]
fn test_rename_for_export(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(rename_for_export(input), expected);
}

// Test: The zip holds one decodable entry per image, flat and in load order
#[tokio::test]
async fn test_zip_export_round_trip() {
    let session = session().await;
    let spec = visible_spec("ZIP", Anchor::BottomLeft);
    session.apply_settings(spec.clone()).await.unwrap();

    let files = vec![png_file("one.png", 1), jpeg_file("two.jpeg", 2), png_file("three.png", 3)];
    session.load_files(files.clone()).await;

    let mut archive = ZipArchiveWriter::new();
    let exported = session.export_all(&mut archive).await.unwrap();
    let entries = read_zip(&exported.bytes);

    let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["one_marked.png", "two_marked.jpeg", "three_marked.png"]);
    assert!(names.iter().all(|name| !name.contains('/')));

    assert_eq!(decode_rgba(&entries[0].1), expected_render(&files[0], &spec));
    assert_eq!(image::guess_format(&entries[1].1).unwrap(), ImageFormat::Jpeg);
    assert_eq!(decode_rgba(&entries[2].1), expected_render(&files[2], &spec));
}

// Test: Files with the same name still get one entry each
#[tokio::test]
async fn test_zip_export_duplicate_names() {
    let session = session().await;
    session
        .load_files(vec![png_file("same.png", 1), png_file("same.png", 2)])
        .await;

    let mut archive = ZipArchiveWriter::new();
    let exported = session.export_all(&mut archive).await.unwrap();
    let names: Vec<String> = read_zip(&exported.bytes).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["same_marked.png", "same_marked (2).png"]);
}

// Test: Entries keep the container detected from the source content
#[tokio::test]
async fn test_zip_export_keeps_source_container() {
    let session = session().await;
    let gif = SourceFile::new(
        "anim.gif",
        "image/gif",
        encode(&gradient(16, 16, 5), ImageFormat::Gif),
    );
    let bmp = SourceFile::new(
        "scan.bmp",
        "image/bmp",
        encode(&gradient(16, 16, 6), ImageFormat::Png),
    );
    session.load_files(vec![gif, bmp]).await;

    let mut archive = ZipArchiveWriter::new();
    let exported = session.export_all(&mut archive).await.unwrap();
    let entries = read_zip(&exported.bytes);
    assert_eq!(image::guess_format(&entries[0].1).unwrap(), ImageFormat::Gif);
    // Content is detected by magic bytes, so this PNG named .bmp stays PNG
    assert_eq!(entries[1].0, "scan_marked.bmp");
    assert_eq!(image::guess_format(&entries[1].1).unwrap(), ImageFormat::Png);
}
