//! agelens-hw — V4L2 color camera capture.
//!
//! Opens a webcam, negotiates a capture mode near the requested size and
//! frame rate, and hands back packed RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureFormat, DeviceInfo, PixelFormat};
pub use frame::Frame;
