use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration, loaded from environment variables and an optional TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Upper bound on faces reported per frame.
    pub max_faces: usize,
    /// Detector score threshold.
    pub min_confidence: f32,
    /// Frames to discard after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
}

/// On-disk overlay. Every field is optional; present fields win over the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    max_faces: Option<usize>,
    min_confidence: Option<f32>,
    warmup_frames: Option<usize>,
}

impl Config {
    /// Load configuration from `AGELENS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("AGELENS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_model_dir());

        Self {
            camera_device: std::env::var("AGELENS_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            max_faces: env_usize("AGELENS_MAX_FACES", 2),
            min_confidence: env_f32("AGELENS_MIN_CONFIDENCE", 0.5),
            warmup_frames: env_usize("AGELENS_WARMUP_FRAMES", 4),
        }
    }

    /// Environment first, then the TOML file at `path` if one was given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_env();
        if let Some(path) = path {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            config
                .overlay_toml(&text)
                .with_context(|| format!("parsing config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "applied config file");
        }
        Ok(config)
    }

    fn overlay_toml(&mut self, text: &str) -> anyhow::Result<()> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.max_faces {
            self.max_faces = v;
        }
        if let Some(v) = file.min_confidence {
            self.min_confidence = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        Ok(())
    }
}

/// `$XDG_DATA_HOME/agelens/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("agelens")
        .join("models")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
