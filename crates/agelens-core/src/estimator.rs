//! Age estimation capability and its ONNX backend.
//!
//! The model takes a `[1, 128, 128, 3]` face crop scaled to [0, 1] and returns
//! a probability distribution over twenty five-year age buckets.

use crate::age::{AgeDistribution, AGE_BUCKETS};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Side length of the square crop the estimator consumes.
pub const AGE_INPUT_SIZE: usize = 128;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Age estimation capability: normalized crop in, bucket probabilities out.
pub trait AgeEstimator: Send {
    fn estimate_age_distribution(
        &mut self,
        crop: &Array4<f32>,
    ) -> Result<AgeDistribution, EstimatorError>;
}

/// Age regression model backed by an ONNX Runtime session.
pub struct OnnxAgeEstimator {
    session: Session,
}

impl OnnxAgeEstimator {
    /// Load the age model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EstimatorError> {
        if !model_path.exists() {
            return Err(EstimatorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded age estimation model"
        );

        Ok(Self { session })
    }
}

impl AgeEstimator for OnnxAgeEstimator {
    fn estimate_age_distribution(
        &mut self,
        crop: &Array4<f32>,
    ) -> Result<AgeDistribution, EstimatorError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(crop.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EstimatorError::InferenceFailed(format!("age distribution: {e}")))?;

        to_distribution(raw)
    }
}

/// Convert a raw model output into a fixed-size distribution.
fn to_distribution(raw: &[f32]) -> Result<AgeDistribution, EstimatorError> {
    raw.try_into().map_err(|_| {
        EstimatorError::InferenceFailed(format!(
            "expected {AGE_BUCKETS} age buckets, got {}",
            raw.len()
        ))
    })
}
