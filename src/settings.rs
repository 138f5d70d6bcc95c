//! Persistent settings storage.
//!
//! The pipeline saves the watermark settings and the uploaded watermark image
//! after every accepted change, and reads both back at startup. Missing data is
//! not an error: `load_*` return `None`.

use crate::watermark::WatermarkSpec;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const SETTINGS_FILE: &str = "settings.json";
const ASSET_FILE: &str = "watermark.bin";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value style persistence for settings and the watermark image.
#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    async fn load_settings(&self) -> Result<Option<WatermarkSpec>, SettingsError>;

    async fn save_settings(&self, spec: &WatermarkSpec) -> Result<(), SettingsError>;

    async fn load_watermark_asset(&self) -> Result<Option<Bytes>, SettingsError>;

    async fn save_watermark_asset(&self, bytes: &[u8]) -> Result<(), SettingsError>;

    async fn clear_watermark_asset(&self) -> Result<(), SettingsError>;
}

/// In-process store, used when no state directory is configured.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<WatermarkSpec>>,
    asset: Mutex<Option<Bytes>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load_settings(&self) -> Result<Option<WatermarkSpec>, SettingsError> {
        Ok(self.settings.lock().clone())
    }

    async fn save_settings(&self, spec: &WatermarkSpec) -> Result<(), SettingsError> {
        let mut stored = spec.clone();
        stored.asset = None;
        *self.settings.lock() = Some(stored);
        Ok(())
    }

    async fn load_watermark_asset(&self) -> Result<Option<Bytes>, SettingsError> {
        Ok(self.asset.lock().clone())
    }

    async fn save_watermark_asset(&self, bytes: &[u8]) -> Result<(), SettingsError> {
        *self.asset.lock() = Some(Bytes::copy_from_slice(bytes));
        Ok(())
    }

    async fn clear_watermark_asset(&self) -> Result<(), SettingsError> {
        *self.asset.lock() = None;
        Ok(())
    }
}

/// Store backed by a state directory holding `settings.json` and `watermark.bin`.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    dir: PathBuf,
}

impl FileSettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    fn asset_path(&self) -> PathBuf {
        self.dir.join(ASSET_FILE)
    }
}

/// Write file contents atomically (temp file + rename).
async fn write_file_atomic(path: &Path, data: &[u8]) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Unique per write so concurrent saves never share a temp file
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&temp_path, data).await?;
    tokio::fs::rename(&temp_path, path).await?;

    Ok(())
}

/// Read a file, mapping "not found" to `None`.
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, SettingsError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load_settings(&self) -> Result<Option<WatermarkSpec>, SettingsError> {
        match read_optional(&self.settings_path()).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn save_settings(&self, spec: &WatermarkSpec) -> Result<(), SettingsError> {
        let json = serde_json::to_vec_pretty(spec)?;
        write_file_atomic(&self.settings_path(), &json).await
    }

    async fn load_watermark_asset(&self) -> Result<Option<Bytes>, SettingsError> {
        Ok(read_optional(&self.asset_path()).await?.map(Bytes::from))
    }

    async fn save_watermark_asset(&self, bytes: &[u8]) -> Result<(), SettingsError> {
        write_file_atomic(&self.asset_path(), bytes).await
    }

    async fn clear_watermark_asset(&self) -> Result<(), SettingsError> {
        // Ignore error if file doesn't exist (idempotent)
        let _ = tokio::fs::remove_file(self.asset_path()).await;
        Ok(())
    }
}
