use crate::detector::DetectorError;
use crate::estimator::EstimatorError;
use crate::source::SourceError;
use thiserror::Error;

/// How a capture-level failure is handled by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Abort the current operation and propagate the error.
    Abort,
    /// Log, force the capture state back to inactive, do not propagate.
    ResetActive,
    /// Treat the operation as a silent no-op.
    Ignore,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera access failed: {0}")]
    DeviceAccessDenied(SourceError),
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),
    #[error("canvas has no drawing context")]
    MissingRenderContext,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame capture failed: {0}")]
    FrameCaptureFailed(SourceError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("reading upload: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            CaptureError::DeviceAccessDenied(_) => ErrorPolicy::ResetActive,
            CaptureError::MissingRenderContext => ErrorPolicy::Ignore,
            CaptureError::ModelLoadFailed(_)
            | CaptureError::InferenceFailed(_)
            | CaptureError::FrameCaptureFailed(_)
            | CaptureError::Image(_)
            | CaptureError::Io(_) => ErrorPolicy::Abort,
        }
    }
}

impl From<DetectorError> for CaptureError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::ModelNotFound(path) => {
                CaptureError::ModelLoadFailed(format!("detector model not found: {path}"))
            }
            other => CaptureError::InferenceFailed(format!("face detection: {other}")),
        }
    }
}

impl From<EstimatorError> for CaptureError {
    fn from(err: EstimatorError) -> Self {
        match err {
            EstimatorError::ModelNotFound(path) => {
                CaptureError::ModelLoadFailed(format!("age model not found: {path}"))
            }
            other => CaptureError::InferenceFailed(format!("age estimation: {other}")),
        }
    }
}
