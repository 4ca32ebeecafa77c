//! Detection pipeline: detect faces, sample each from the canvas, estimate ages.
//!
//! Inference runs on the blocking pool; predictors are shared handles, so only
//! the handle and the pixels it needs cross into the blocking task.

use crate::age::{decode_age, AgeDistribution};
use crate::error::CaptureError;
use crate::estimator::AGE_INPUT_SIZE;
use crate::models::ModelLoader;
use crate::types::{BoundingBox, FaceDetection, FrameAnalysis};
use image::RgbaImage;
use ndarray::Array4;
use std::sync::Arc;

pub struct DetectionPipeline {
    models: Arc<ModelLoader>,
}

impl DetectionPipeline {
    pub fn new(models: Arc<ModelLoader>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &ModelLoader {
        &self.models
    }

    /// Detect faces in `source` and estimate an age for each, sampling from `context`.
    ///
    /// Faces whose box covers no pixels are dropped from the result entirely,
    /// so `ages` and `faces` stay index-aligned.
    pub async fn process_frame(
        &self,
        context: &RgbaImage,
        source: &RgbaImage,
    ) -> Result<FrameAnalysis, CaptureError> {
        let detector = self.models.face_detector().await?;
        let estimator = self.models.age_estimator().await?;

        let frame = source.clone();
        let faces = infer_blocking(move || {
            let mut detector = detector
                .lock()
                .map_err(|_| CaptureError::InferenceFailed("face detector lock poisoned".into()))?;
            Ok(detector.detect_faces(&frame)?)
        })
        .await?;

        let mut analysis = FrameAnalysis::default();
        if faces.is_empty() {
            tracing::debug!("no faces detected");
            return Ok(analysis);
        }

        let mut kept: Vec<FaceDetection> = Vec::with_capacity(faces.len());
        let mut inputs: Vec<Array4<f32>> = Vec::with_capacity(faces.len());
        for (index, face) in faces.into_iter().enumerate() {
            match face_tensor(context, &face.bbox) {
                Some(input) => {
                    kept.push(face);
                    inputs.push(input);
                }
                None => tracing::debug!(index, bbox = ?face.bbox, "skipping zero-area face"),
            }
        }
        if kept.is_empty() {
            return Ok(analysis);
        }

        let distributions: Vec<AgeDistribution> = infer_blocking(move || {
            let mut estimator = estimator
                .lock()
                .map_err(|_| CaptureError::InferenceFailed("age estimator lock poisoned".into()))?;
            inputs
                .iter()
                .map(|input| {
                    estimator
                        .estimate_age_distribution(input)
                        .map_err(CaptureError::from)
                })
                .collect()
        })
        .await?;

        for (index, (face, distribution)) in kept.into_iter().zip(&distributions).enumerate() {
            let age = decode_age(distribution);
            tracing::debug!(index, age, score = face.score, "estimated age");
            analysis.push(face, age);
        }

        Ok(analysis)
    }
}

async fn infer_blocking<T, F>(run: F) -> Result<T, CaptureError>
where
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(run)
        .await
        .map_err(|e| CaptureError::InferenceFailed(format!("inference task: {e}")))?
}

/// Sample the box region of the canvas straight into the estimator input.
///
/// Equivalent to cropping the box and resizing the crop to 128x128 by
/// nearest neighbour: box coordinates truncate toward zero, output pixel
/// `d` reads crop pixel `floor(d * extent / 128)`, pixels outside the canvas
/// read as transparent black, alpha is dropped and channels scale to [0, 1].
/// Returns `None` for boxes with no width or height.
pub fn face_tensor(context: &RgbaImage, bbox: &BoundingBox) -> Option<Array4<f32>> {
    // i128 keeps the index arithmetic exact for any f32 box the detector emits.
    let sx = bbox.x_min as i64 as i128;
    let sy = bbox.y_min as i64 as i128;
    let sw = bbox.width() as i64 as i128;
    let sh = bbox.height() as i64 as i128;
    if sw <= 0 || sh <= 0 {
        return None;
    }

    let size = AGE_INPUT_SIZE;
    let (cw, ch) = (context.width() as i128, context.height() as i128);
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));

    for y in 0..size {
        let src_y = sy + y as i128 * sh / size as i128;
        if !(0..ch).contains(&src_y) {
            continue;
        }
        for x in 0..size {
            let src_x = sx + x as i128 * sw / size as i128;
            if !(0..cw).contains(&src_x) {
                continue;
            }
            let pixel = context.get_pixel(src_x as u32, src_y as u32);
            for c in 0..3 {
                tensor[[0, y, x, c]] = pixel[c] as f32 / 255.0;
            }
        }
    }

    Some(tensor)
}
