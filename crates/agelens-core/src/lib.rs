//! agelens-core — Face detection, age estimation and annotated capture history.
//!
//! Runs a MediaPipe BlazeFace detector and an age-bucket regressor via ONNX
//! Runtime, draws annotations onto an owned canvas, and records every capture
//! in an append-only store.

pub mod age;
pub mod annotate;
pub mod canvas;
pub mod detector;
pub mod error;
pub mod estimator;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use age::{decode_age, AgeDistribution, AGE_BUCKET_MIDPOINTS};
pub use detector::{DetectorOptions, FaceDetector};
pub use error::{CaptureError, ErrorPolicy};
pub use estimator::AgeEstimator;
pub use models::{ModelLoader, ModelSource, OnnxModelSource};
pub use pipeline::DetectionPipeline;
pub use session::CaptureSession;
pub use source::{CameraDevice, LiveStream, SourceError, StreamConstraints};
pub use store::{CaptureAction, CaptureState, CaptureStore};
pub use types::{BoundingBox, CapturedRecord, FaceDetection, FrameAnalysis, Keypoint};
