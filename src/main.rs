use anyhow::{bail, Context};
use bulk_watermarker::archive::ZipArchiveWriter;
use bulk_watermarker::codec::SourceFile;
use bulk_watermarker::config::Config;
use bulk_watermarker::watermark::{parse_hex_color, Anchor, WatermarkSpec};
use bulk_watermarker::Session;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Bulk Watermarker - stamp a text or image watermark onto a batch of images
#[derive(Parser, Debug)]
#[command(name = "bulk-watermarker")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for persisted settings (overrides storage.state_dir)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(flatten)]
    mark: MarkArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Watermark overrides applied on top of the saved settings
#[derive(Args, Debug, Default)]
struct MarkArgs {
    /// Watermark text
    #[arg(long, global = true)]
    text: Option<String>,

    /// Watermark image file (switches to image mode)
    #[arg(long, global = true)]
    image: Option<PathBuf>,

    /// Remove the saved watermark image
    #[arg(long, global = true, conflicts_with = "image")]
    clear_image: bool,

    /// top-left, top-right, center, bottom-left or bottom-right
    #[arg(long, global = true)]
    anchor: Option<String>,

    /// Opacity between 0.0 and 1.0
    #[arg(long, global = true)]
    opacity: Option<f32>,

    /// Text size in pixels, also the height of an image mark
    #[arg(long, global = true)]
    font_size: Option<f32>,

    /// Fill color as #RGB, #RRGGBB or #RRGGBBAA
    #[arg(long, global = true)]
    color: Option<String>,

    #[arg(long, global = true)]
    margin_x: Option<u32>,

    #[arg(long, global = true)]
    margin_y: Option<u32>,
}

impl MarkArgs {
    /// Apply the style overrides; returns whether anything changed.
    fn apply(&self, spec: &mut WatermarkSpec) -> anyhow::Result<bool> {
        let before = spec.clone();
        if let Some(text) = &self.text {
            spec.text = text.clone();
        }
        if let Some(anchor) = &self.anchor {
            spec.anchor = Anchor::parse(anchor);
        }
        if let Some(opacity) = self.opacity {
            spec.opacity = opacity;
        }
        if let Some(font_size) = self.font_size {
            spec.font_size = font_size;
        }
        if let Some(color) = &self.color {
            spec.color = parse_hex_color(color)?;
        }
        if let Some(margin_x) = self.margin_x {
            spec.margin_x = margin_x;
        }
        if let Some(margin_y) = self.margin_y {
            spec.margin_y = margin_y;
        }
        Ok(*spec != before)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watermark every file and write a zip archive
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Archive path (default: export.archive_name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Watermark one file of the batch and write it on its own
    Preview {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Which file to render
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

async fn read_sources(paths: &[PathBuf]) -> anyhow::Result<Vec<SourceFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = SourceFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(file);
    }
    Ok(files)
}

async fn load(session: &Session, paths: &[PathBuf]) -> anyhow::Result<()> {
    let report = session.load_files(read_sources(paths).await?).await;
    for rejected in &report.rejected {
        tracing::warn!(error = %rejected, "Skipped file");
    }
    if report.accepted == 0 {
        bail!("None of the given files is an image");
    }
    Ok(())
}

async fn write_output(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).map_err(anyhow::Error::msg)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.state_dir {
        config.storage.state_dir = Some(dir.clone());
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    bulk_watermarker::logging::init_subscriber(&config.logging)?;

    tracing::info!(
        config_file = ?cli.config,
        state_dir = ?config.storage.state_dir,
        "Configuration loaded successfully"
    );

    let session = Session::from_config(&config).await?;

    let mut spec = (*session.spec()).clone();
    if cli.mark.apply(&mut spec)? {
        session.apply_settings(spec).await?;
    }
    if let Some(path) = &cli.mark.image {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        session.set_watermark_asset(bytes.into()).await?;
    } else if cli.mark.clear_image {
        session.clear_watermark_asset().await?;
    }

    match cli.command {
        Commands::Batch { files, output } => {
            load(&session, &files).await?;

            let mut archive = ZipArchiveWriter::new();
            let exported = session.export_all(&mut archive).await?;
            for (filename, reason) in &exported.skipped {
                eprintln!("skipped {}: {}", filename, reason);
            }

            let output = output.unwrap_or_else(|| PathBuf::from(&config.export.archive_name));
            write_output(&output, &exported.bytes).await?;
            println!(
                "Wrote {} ({} images)",
                output.display(),
                exported.entries.len()
            );
        }
        Commands::Preview {
            files,
            index,
            output,
        } => {
            load(&session, &files).await?;
            session.select_preview(index).await?;

            let single = session.export_preview().await?;
            let path = output.join(&single.name);
            write_output(&path, &single.bytes).await?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
