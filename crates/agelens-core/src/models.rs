//! Lazy, de-duplicated loading of the two predictors.
//!
//! Each predictor is loaded at most once per [`ModelLoader`]. Callers that
//! arrive while a load is in flight wait on that same load. A failed load is
//! not memoized, so the next caller starts a fresh attempt.

use crate::detector::{BlazeFaceDetector, DetectorOptions, FaceDetector};
use crate::error::CaptureError;
use crate::estimator::{AgeEstimator, OnnxAgeEstimator};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

pub const DETECTOR_MODEL_FILE: &str = "face_detection_full_range.onnx";
pub const AGE_MODEL_FILE: &str = "age_model.onnx";

pub type SharedDetector = Arc<Mutex<Box<dyn FaceDetector>>>;
pub type SharedEstimator = Arc<Mutex<Box<dyn AgeEstimator>>>;

/// Where predictors come from. Loading may block.
pub trait ModelSource: Send + Sync + 'static {
    fn load_face_detector(&self) -> Result<Box<dyn FaceDetector>, CaptureError>;
    fn load_age_estimator(&self) -> Result<Box<dyn AgeEstimator>, CaptureError>;
}

/// ONNX models read from a directory.
pub struct OnnxModelSource {
    model_dir: PathBuf,
    options: DetectorOptions,
}

impl OnnxModelSource {
    pub fn new(model_dir: impl Into<PathBuf>, options: DetectorOptions) -> Self {
        Self {
            model_dir: model_dir.into(),
            options,
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn age_model_path(&self) -> PathBuf {
        self.model_dir.join(AGE_MODEL_FILE)
    }
}

impl ModelSource for OnnxModelSource {
    fn load_face_detector(&self) -> Result<Box<dyn FaceDetector>, CaptureError> {
        let detector = BlazeFaceDetector::load(&self.detector_path(), self.options)
            .map_err(|e| CaptureError::ModelLoadFailed(e.to_string()))?;
        Ok(Box::new(detector))
    }

    fn load_age_estimator(&self) -> Result<Box<dyn AgeEstimator>, CaptureError> {
        let estimator = OnnxAgeEstimator::load(&self.age_model_path())
            .map_err(|e| CaptureError::ModelLoadFailed(e.to_string()))?;
        Ok(Box::new(estimator))
    }
}

pub struct ModelLoader {
    source: Arc<dyn ModelSource>,
    detector: OnceCell<SharedDetector>,
    estimator: OnceCell<SharedEstimator>,
}

impl ModelLoader {
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            source,
            detector: OnceCell::new(),
            estimator: OnceCell::new(),
        }
    }

    pub async fn face_detector(&self) -> Result<SharedDetector, CaptureError> {
        self.detector
            .get_or_try_init(|| async {
                let source = Arc::clone(&self.source);
                let detector = load_blocking(move || source.load_face_detector()).await?;
                tracing::info!("face detector ready");
                Ok(Arc::new(Mutex::new(detector)))
            })
            .await
            .cloned()
    }

    pub async fn age_estimator(&self) -> Result<SharedEstimator, CaptureError> {
        self.estimator
            .get_or_try_init(|| async {
                let source = Arc::clone(&self.source);
                let estimator = load_blocking(move || source.load_age_estimator()).await?;
                tracing::info!("age estimator ready");
                Ok(Arc::new(Mutex::new(estimator)))
            })
            .await
            .cloned()
    }

    /// Whether (detector, estimator) have finished loading.
    pub fn is_loaded(&self) -> (bool, bool) {
        (self.detector.initialized(), self.estimator.initialized())
    }
}

async fn load_blocking<T, F>(load: F) -> Result<T, CaptureError>
where
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(load)
        .await
        .map_err(|e| CaptureError::ModelLoadFailed(format!("loader task: {e}")))?
}
