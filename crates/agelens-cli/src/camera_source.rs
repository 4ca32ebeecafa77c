//! V4L2 camera behind the core `CameraDevice` seam.

use agelens_core::source::{CameraDevice, LiveStream, SourceError, StreamConstraints};
use agelens_hw::{Camera, CameraError, CaptureFormat};
use image::RgbaImage;

pub struct V4lCamera {
    device_path: String,
    warmup_frames: usize,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
        }
    }
}

impl CameraDevice for V4lCamera {
    fn acquire(&self, constraints: &StreamConstraints) -> Result<Box<dyn LiveStream>, SourceError> {
        let format = CaptureFormat {
            width: constraints.ideal_width,
            height: constraints.ideal_height,
            fps: constraints.frame_rate,
        };
        tracing::debug!(
            facing = ?constraints.facing,
            "V4L2 has no facing selection; using configured device"
        );

        let camera = Camera::open(&self.device_path, format).map_err(acquire_error)?;
        Ok(Box::new(V4lStream {
            camera: Some(camera),
            warmup_remaining: self.warmup_frames,
        }))
    }
}

fn acquire_error(err: CameraError) -> SourceError {
    SourceError::Acquire(err.to_string())
}

struct V4lStream {
    camera: Option<Camera>,
    warmup_remaining: usize,
}

impl LiveStream for V4lStream {
    fn read_frame(&mut self) -> Result<RgbaImage, SourceError> {
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| SourceError::Read("stream already stopped".into()))?;

        let frame = if self.warmup_remaining > 0 {
            let warmup = std::mem::take(&mut self.warmup_remaining);
            camera.capture_after_warmup(warmup)
        } else {
            camera.capture_frame()
        }
        .map_err(|e| SourceError::Read(e.to_string()))?;

        tracing::trace!(seq = frame.sequence, "captured frame");
        frame
            .to_rgba_image()
            .map_err(|e| SourceError::Read(e.to_string()))
    }

    fn stop(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.release();
        }
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}
