use agelens_core::canvas::decode_data_url;
use agelens_core::{
    CaptureSession, CaptureStore, CapturedRecord, DetectionPipeline, DetectorOptions, ModelLoader,
    OnnxModelSource,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod camera_source;
mod config;

use camera_source::V4lCamera;
use config::Config;

#[derive(Parser)]
#[command(
    name = "agelens",
    about = "Face detection and age estimation from a webcam or image files"
)]
struct Cli {
    /// TOML file overriding AGELENS_* settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write the capture history as JSON when done
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames from the webcam
    Capture {
        /// Number of frames to capture
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Pause between captures in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
        /// Directory for annotated PNGs
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Analyze image files
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Directory for annotated PNGs
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");
    let session = build_session(&config);

    match &cli.command {
        Commands::Capture {
            count,
            interval_ms,
            out_dir,
        } => {
            let result = capture_webcam(&session, *count, *interval_ms, out_dir.as_deref()).await;
            session.stop_webcam().await;
            result?;
        }
        Commands::Upload { paths, out_dir } => {
            for path in paths {
                let record = session
                    .capture_upload(path)
                    .await
                    .with_context(|| format!("processing {}", path.display()))?;
                if let Some(record) = record {
                    report(&record, out_dir.as_deref()).await?;
                }
            }
        }
        Commands::Devices => {
            list_devices();
            return Ok(());
        }
    }

    if let Some(path) = &cli.history {
        export_history(&session, path).await?;
    }

    Ok(())
}

fn build_session(config: &Config) -> CaptureSession {
    let options = DetectorOptions {
        max_faces: config.max_faces,
        min_confidence: config.min_confidence,
        ..DetectorOptions::default()
    };
    let models = OnnxModelSource::new(&config.model_dir, options);
    let loader = Arc::new(ModelLoader::new(Arc::new(models)));
    let camera = Arc::new(V4lCamera::new(&config.camera_device, config.warmup_frames));

    let session = CaptureSession::new(
        Arc::new(CaptureStore::new()),
        DetectionPipeline::new(loader),
        camera,
    );
    session.follow_store();
    session
}

async fn capture_webcam(
    session: &CaptureSession,
    count: usize,
    interval_ms: u64,
    out_dir: Option<&Path>,
) -> Result<()> {
    session.start_webcam().await;
    if !session.store().is_active() {
        bail!("camera unavailable, see log for details");
    }

    for i in 0..count {
        if i > 0 && interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
        if let Some(record) = session.capture().await? {
            report(&record, out_dir).await?;
        }
    }
    Ok(())
}

async fn report(record: &CapturedRecord, out_dir: Option<&Path>) -> Result<()> {
    if record.ages.is_empty() {
        println!("{}: no faces", record.id);
    }
    for (i, (age, face)) in record.ages.iter().zip(&record.faces).enumerate() {
        println!(
            "{}: face {i} age {age:.1} (score {:.2}) at [{:.0}, {:.0}, {:.0}, {:.0}]",
            record.id,
            face.score,
            face.bbox.x_min,
            face.bbox.y_min,
            face.bbox.x_max,
            face.bbox.y_max
        );
    }

    if let Some(dir) = out_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let image = decode_data_url(&record.image).context("record image is not a PNG data URL")?;
        let path = dir.join(format!("{}.png", record.id));
        image
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote annotated image");
    }
    Ok(())
}

async fn export_history(session: &CaptureSession, path: &Path) -> Result<()> {
    let state = session.store().state();
    let records: Vec<&CapturedRecord> = state.history.iter().map(|r| r.as_ref()).collect();
    let json = serde_json::to_string_pretty(&records)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing history {}", path.display()))?;
    tracing::info!(path = %path.display(), records = records.len(), "exported history");
    Ok(())
}

fn list_devices() {
    let devices = agelens_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}
