//! Capture sources: live camera streams and uploaded image files.

use crate::error::CaptureError;
use image::RgbaImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("could not acquire camera: {0}")]
    Acquire(String),
    #[error("could not read frame: {0}")]
    Read(String),
}

/// Which way the requested camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Front-facing, towards the user.
    User,
    Environment,
}

/// Preferred stream parameters. Devices may negotiate something else.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConstraints {
    pub aspect_ratio: f32,
    pub frame_rate: u32,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: Facing,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            aspect_ratio: 16.0 / 9.0,
            frame_rate: 30,
            ideal_width: 1280,
            ideal_height: 720,
            facing: Facing::User,
        }
    }
}

/// An acquired live stream holding hardware resources until stopped.
pub trait LiveStream: Send {
    fn read_frame(&mut self) -> Result<RgbaImage, SourceError>;

    /// Release every underlying hardware track. Safe to call more than once.
    fn stop(&mut self);
}

/// Something that can hand out live streams.
pub trait CameraDevice: Send + Sync {
    fn acquire(&self, constraints: &StreamConstraints) -> Result<Box<dyn LiveStream>, SourceError>;
}

/// Read an uploaded image file and decode it into a raster frame.
///
/// No type or size validation happens here; malformed input surfaces as
/// [`CaptureError::Image`].
pub async fn decode_upload(path: &Path) -> Result<RgbaImage, CaptureError> {
    let bytes = tokio::fs::read(path).await?;
    decode_image(&bytes)
}

/// Decode an in-memory encoded image.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, CaptureError> {
    let decoded = image::load_from_memory(bytes)?;
    tracing::debug!(width = decoded.width(), height = decoded.height(), "decoded upload");
    Ok(decoded.to_rgba8())
}
