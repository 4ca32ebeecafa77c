//! Deterministic predictors, model sources and cameras for unit tests.

use crate::age::{AgeDistribution, AGE_BUCKETS};
use crate::detector::{DetectorError, FaceDetector};
use crate::error::CaptureError;
use crate::estimator::{AgeEstimator, EstimatorError};
use crate::models::ModelSource;
use crate::source::{CameraDevice, LiveStream, SourceError, StreamConstraints};
use crate::types::{BoundingBox, FaceDetection, Keypoint};
use image::{Rgba, RgbaImage};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn face_at(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> FaceDetection {
    let cx = (x_min + x_max) / 2.0;
    let cy = (y_min + y_max) / 2.0;
    let keypoints = (0..6)
        .map(|i| Keypoint {
            x: cx + i as f32 - 3.0,
            y: cy,
            name: None,
        })
        .collect();
    FaceDetection::new(BoundingBox::new(x_min, y_min, x_max, y_max), keypoints, 0.9)
}

pub fn gray_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]))
}

pub struct MockDetector {
    pub faces: Vec<FaceDetection>,
    pub fail: bool,
    /// Blocks the calling thread, like a real inference run.
    pub delay: Duration,
}

impl FaceDetector for MockDetector {
    fn detect_faces(&mut self, _image: &RgbaImage) -> Result<Vec<FaceDetection>, DetectorError> {
        std::thread::sleep(self.delay);
        if self.fail {
            return Err(DetectorError::InferenceFailed("mock detector failure".into()));
        }
        Ok(self.faces.clone())
    }
}

pub struct MockEstimator {
    pub distribution: AgeDistribution,
    pub inputs: Arc<Mutex<Vec<Array4<f32>>>>,
}

impl MockEstimator {
    pub fn one_hot(bucket: usize) -> AgeDistribution {
        let mut p = [0.0; AGE_BUCKETS];
        p[bucket] = 1.0;
        p
    }
}

impl AgeEstimator for MockEstimator {
    fn estimate_age_distribution(
        &mut self,
        crop: &Array4<f32>,
    ) -> Result<AgeDistribution, EstimatorError> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(crop.clone());
        }
        Ok(self.distribution)
    }
}

pub struct MockSource {
    faces: Vec<FaceDetection>,
    distribution: AgeDistribution,
    load_delay: Duration,
    inference_delay: Duration,
    failing_detector_loads: usize,
    failing_inference: bool,
    pub detector_loads: AtomicUsize,
    pub estimator_loads: AtomicUsize,
    pub estimator_inputs: Arc<Mutex<Vec<Array4<f32>>>>,
}

impl MockSource {
    pub fn new(faces: Vec<FaceDetection>, distribution: AgeDistribution) -> Self {
        Self {
            faces,
            distribution,
            load_delay: Duration::ZERO,
            inference_delay: Duration::ZERO,
            failing_detector_loads: 0,
            failing_inference: false,
            detector_loads: AtomicUsize::new(0),
            estimator_loads: AtomicUsize::new(0),
            estimator_inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_load_delay_ms(mut self, ms: u64) -> Self {
        self.load_delay = Duration::from_millis(ms);
        self
    }

    pub fn with_inference_delay_ms(mut self, ms: u64) -> Self {
        self.inference_delay = Duration::from_millis(ms);
        self
    }

    /// The first `n` detector loads fail.
    pub fn failing_detector_loads(mut self, n: usize) -> Self {
        self.failing_detector_loads = n;
        self
    }

    pub fn failing_inference(mut self) -> Self {
        self.failing_inference = true;
        self
    }
}

impl ModelSource for MockSource {
    fn load_face_detector(&self) -> Result<Box<dyn FaceDetector>, CaptureError> {
        std::thread::sleep(self.load_delay);
        let attempt = self.detector_loads.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_detector_loads {
            return Err(CaptureError::ModelLoadFailed("mock fetch failure".into()));
        }
        Ok(Box::new(MockDetector {
            faces: self.faces.clone(),
            fail: self.failing_inference,
            delay: self.inference_delay,
        }))
    }

    fn load_age_estimator(&self) -> Result<Box<dyn AgeEstimator>, CaptureError> {
        std::thread::sleep(self.load_delay);
        self.estimator_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEstimator {
            distribution: self.distribution,
            inputs: Arc::clone(&self.estimator_inputs),
        }))
    }
}

/// Camera whose streams yield a fixed frame and count releases.
///
/// A stream dropped without `stop` counts as a leak.
pub struct MockCamera {
    frame: RgbaImage,
    deny: bool,
    delay: Duration,
    pub acquisitions: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    pub leaks: Arc<AtomicUsize>,
}

impl MockCamera {
    pub fn new(frame: RgbaImage) -> Self {
        Self {
            frame,
            deny: false,
            delay: Duration::ZERO,
            acquisitions: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            leaks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::new(RgbaImage::new(0, 0))
        }
    }

    /// Opening the device and every frame read block for `ms`.
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }
}

impl CameraDevice for MockCamera {
    fn acquire(
        &self,
        _constraints: &StreamConstraints,
    ) -> Result<Box<dyn LiveStream>, SourceError> {
        std::thread::sleep(self.delay);
        if self.deny {
            return Err(SourceError::Acquire("permission denied".into()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            frame: Some(self.frame.clone()),
            delay: self.delay,
            releases: Arc::clone(&self.releases),
            leaks: Arc::clone(&self.leaks),
        }))
    }
}

struct MockStream {
    frame: Option<RgbaImage>,
    delay: Duration,
    releases: Arc<AtomicUsize>,
    leaks: Arc<AtomicUsize>,
}

impl LiveStream for MockStream {
    fn read_frame(&mut self) -> Result<RgbaImage, SourceError> {
        std::thread::sleep(self.delay);
        self.frame
            .clone()
            .ok_or_else(|| SourceError::Read("stream stopped".into()))
    }

    fn stop(&mut self) {
        if self.frame.take().is_some() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        if self.frame.is_some() {
            self.leaks.fetch_add(1, Ordering::SeqCst);
        }
    }
}
