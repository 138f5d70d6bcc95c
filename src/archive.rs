//! Archive container for batch export.
//!
//! Entries are flat: a name and a blob, no directories, no manifest.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{Cursor, Write};
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive already finalized")]
    Finalized,

    #[error("Archive task failed: {0}")]
    Task(String),
}

/// Opaque "add named blob" / "finalize" interface.
#[async_trait]
pub trait ArchiveWriter: Send {
    async fn add_entry(&mut self, name: &str, data: Bytes) -> Result<(), ArchiveError>;

    /// Close the archive and return its bytes. Further calls fail.
    async fn finalize(&mut self) -> Result<Bytes, ArchiveError>;
}

/// Zip archive built in memory with deflate compression.
pub struct ZipArchiveWriter {
    writer: Option<ZipWriter<Cursor<Vec<u8>>>>,
    entries: usize,
}

impl Default for ZipArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipArchiveWriter {
    pub fn new() -> Self {
        Self {
            writer: Some(ZipWriter::new(Cursor::new(Vec::new()))),
            entries: 0,
        }
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    fn options() -> FileOptions {
        FileOptions::default().compression_method(CompressionMethod::Deflated)
    }
}

#[async_trait]
impl ArchiveWriter for ZipArchiveWriter {
    async fn add_entry(&mut self, name: &str, data: Bytes) -> Result<(), ArchiveError> {
        let mut writer = self.writer.take().ok_or(ArchiveError::Finalized)?;
        let name = name.to_string();

        // Deflate is CPU-bound
        let (writer, result) = tokio::task::spawn_blocking(move || {
            let result = writer
                .start_file(name, Self::options())
                .map_err(ArchiveError::from)
                .and_then(|_| writer.write_all(&data).map_err(ArchiveError::from));
            (writer, result)
        })
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?;

        self.writer = Some(writer);
        result?;
        self.entries += 1;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<Bytes, ArchiveError> {
        let mut writer = self.writer.take().ok_or(ArchiveError::Finalized)?;
        let cursor = tokio::task::spawn_blocking(move || writer.finish())
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;
        Ok(Bytes::from(cursor.into_inner()))
    }
}

/// Archive that only records its entries.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: Vec<(String, Bytes)>,
    finalized: bool,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[(String, Bytes)] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[async_trait]
impl ArchiveWriter for MemoryArchive {
    async fn add_entry(&mut self, name: &str, data: Bytes) -> Result<(), ArchiveError> {
        if self.finalized {
            return Err(ArchiveError::Finalized);
        }
        self.entries.push((name.to_string(), data));
        Ok(())
    }

    async fn finalize(&mut self) -> Result<Bytes, ArchiveError> {
        if self.finalized {
            return Err(ArchiveError::Finalized);
        }
        self.finalized = true;
        let total: usize = self.entries.iter().map(|(_, data)| data.len()).sum();
        Ok(Bytes::from(vec![0u8; total]))
    }
}
