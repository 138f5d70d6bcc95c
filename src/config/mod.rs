// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{parse_format_name, EncodeSettings};
use crate::collection::DEFAULT_PAGE_SIZE;
use crate::watermark::{GlyphSource, WatermarkSpec};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings used when nothing has been persisted yet
    pub watermark: WatermarkSpec,
    pub gallery: GalleryConfig,
    pub pipeline: PipelineConfig,
    pub font: FontConfig,
    pub storage: StorageConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_fallback_format() -> String {
    "png".to_string()
}

fn default_archive_name() -> String {
    "watermarked_images.zip".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Thumbnail gallery layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryConfig {
    /// Thumbnails per page (default: 8)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Quiet period before an edited setting is applied (default: 300)
    #[serde(default = "default_debounce_ms")]
    pub settings_debounce_ms: u64,

    /// JPEG quality for re-encoded JPEG sources (default: 90)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Container for sources that cannot be re-encoded as-is (default: png)
    #[serde(default = "default_fallback_format")]
    pub fallback_format: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            settings_debounce_ms: default_debounce_ms(),
            jpeg_quality: default_jpeg_quality(),
            fallback_format: default_fallback_format(),
        }
    }
}

impl PipelineConfig {
    pub fn settings_debounce(&self) -> Duration {
        Duration::from_millis(self.settings_debounce_ms)
    }

    pub fn encode_settings(&self) -> Result<EncodeSettings, String> {
        let fallback_format = parse_format_name(&self.fallback_format).ok_or_else(|| {
            format!(
                "pipeline.fallback_format '{}' is not one of png, jpeg, gif",
                self.fallback_format
            )
        })?;
        Ok(EncodeSettings {
            jpeg_quality: self.jpeg_quality,
            fallback_format,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FontConfig {
    /// TTF/OTF file for text marks; the built-in bitmap font is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl FontConfig {
    pub fn glyph_source(&self) -> Result<GlyphSource, String> {
        match &self.path {
            Some(path) => GlyphSource::from_font_file(path).map_err(|e| e.to_string()),
            None => Ok(GlyphSource::Bitmap),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for persisted settings; in-memory only when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// File name of the batch archive (default: watermarked_images.zip)
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            archive_name: default_archive_name(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Filter directive, e.g. "info" or "bulk_watermarker=debug" (default: info)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        // An empty document is the default configuration
        if substituted.trim().is_empty() {
            return Ok(Config::default());
        }

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.watermark
            .check_numeric()
            .map_err(|e| format!("watermark: {}", e))?;

        if self.gallery.page_size == 0 {
            return Err("gallery.page_size must be at least 1".to_string());
        }

        if !(1..=100).contains(&self.pipeline.jpeg_quality) {
            return Err(format!(
                "pipeline.jpeg_quality must be between 1 and 100, got {}",
                self.pipeline.jpeg_quality
            ));
        }

        self.pipeline.encode_settings()?;

        let name = self.export.archive_name.trim();
        if name.is_empty() {
            return Err("export.archive_name cannot be empty".to_string());
        }
        if name.contains('/') || name.contains('\\') {
            return Err(format!(
                "export.archive_name '{}' must be a file name, not a path",
                name
            ));
        }

        Ok(())
    }
}
