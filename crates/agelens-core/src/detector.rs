//! Face detection capability and the MediaPipe BlazeFace (full-range) backend.
//!
//! The backend letterboxes the frame into a 192x192 square, decodes the
//! single-stride anchor grid into boxes plus six keypoints, and averages
//! overlapping detections into one face each.

use crate::types::{BoundingBox, FaceDetection, Keypoint};
use image::imageops::FilterType;
use image::RgbaImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const BLAZEFACE_INPUT_SIZE: usize = 192;
const BLAZEFACE_STRIDE: usize = 4;
const BLAZEFACE_NUM_ANCHORS: usize = (BLAZEFACE_INPUT_SIZE / BLAZEFACE_STRIDE).pow(2);
const BLAZEFACE_NUM_KEYPOINTS: usize = 6;
/// Per anchor: [cx, cy, w, h] followed by (x, y) for each keypoint.
const BLAZEFACE_REGRESSOR_LEN: usize = 4 + 2 * BLAZEFACE_NUM_KEYPOINTS;
const BLAZEFACE_SCORE_CLIP: f32 = 100.0;
const BLAZEFACE_NMS_THRESHOLD: f32 = 0.3;

/// Keypoint names in the order the full-range model emits them.
pub const KEYPOINT_NAMES: [&str; BLAZEFACE_NUM_KEYPOINTS] = [
    "rightEye",
    "leftEye",
    "noseTip",
    "mouthCenter",
    "rightEarTragion",
    "leftEarTragion",
];

/// Identifier of the detection model this backend decodes.
pub const DETECTOR_MODEL_ID: &str = "mediapipe-face-detection-full-range";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face detection capability: raster in, faces out (detector order).
pub trait FaceDetector: Send {
    fn detect_faces(&mut self, image: &RgbaImage) -> Result<Vec<FaceDetection>, DetectorError>;
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, as exported from the TFLite graph.
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`.
    Nchw,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorOptions {
    /// Upper bound on faces returned per frame, highest scores first.
    pub max_faces: usize,
    pub min_confidence: f32,
    pub input_layout: TensorLayout,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            max_faces: 2,
            min_confidence: 0.5,
            input_layout: TensorLayout::Nhwc,
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    /// Map a point in normalized model space back to frame pixels.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        let size = BLAZEFACE_INPUT_SIZE as f32;
        ((x * size - self.pad_x) / self.scale, (y * size - self.pad_y) / self.scale)
    }
}

/// BlazeFace full-range detector backed by an ONNX Runtime session.
pub struct BlazeFaceDetector {
    session: Session,
    options: DetectorOptions,
    anchors: Vec<[f32; 2]>,
}

impl BlazeFaceDetector {
    /// Load the BlazeFace ONNX model from the given path.
    pub fn load(model_path: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = DETECTOR_MODEL_ID,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            max_faces = options.max_faces,
            "loaded face detection model"
        );

        Ok(Self {
            session,
            options,
            anchors: generate_anchors(),
        })
    }
}

impl FaceDetector for BlazeFaceDetector {
    fn detect_faces(&mut self, image: &RgbaImage) -> Result<Vec<FaceDetection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image, self.options.input_layout);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut tensors = Vec::with_capacity(outputs.len());
        for i in 0..outputs.len() {
            let (_, data) = outputs[i]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("output {i}: {e}")))?;
            tensors.push(data);
        }

        let lengths: Vec<usize> = tensors.iter().map(|t| t.len()).collect();
        let (reg_idx, score_idx) = discover_output_indices(&lengths).ok_or_else(|| {
            DetectorError::InferenceFailed(format!(
                "expected regressor ({} values) and score ({} values) outputs, got lengths {lengths:?}",
                BLAZEFACE_NUM_ANCHORS * BLAZEFACE_REGRESSOR_LEN,
                BLAZEFACE_NUM_ANCHORS
            ))
        })?;

        let candidates = decode_detections(
            tensors[reg_idx],
            tensors[score_idx],
            &self.anchors,
            &letterbox,
            self.options.min_confidence,
        );

        let mut faces = weighted_nms(candidates, BLAZEFACE_NMS_THRESHOLD);
        faces.truncate(self.options.max_faces);
        tracing::debug!(count = faces.len(), "face detection complete");

        Ok(faces)
    }
}

/// Identify (regressor, score) outputs by element count.
///
/// Exports name these tensors inconsistently ("regressors", "Identity", numeric ids),
/// so the element count is the only reliable discriminator.
fn discover_output_indices(lengths: &[usize]) -> Option<(usize, usize)> {
    let reg = lengths
        .iter()
        .position(|&n| n == BLAZEFACE_NUM_ANCHORS * BLAZEFACE_REGRESSOR_LEN)?;
    let score = lengths.iter().position(|&n| n == BLAZEFACE_NUM_ANCHORS)?;
    Some((reg, score))
}

/// Letterbox the frame into the model square and normalize to [-1, 1].
fn preprocess(image: &RgbaImage, layout: TensorLayout) -> (Array4<f32>, LetterboxInfo) {
    let size = BLAZEFACE_INPUT_SIZE;
    let (width, height) = (image.width() as f32, image.height() as f32);

    let scale = (size as f32 / width).min(size as f32 / height);
    let new_w = ((width * scale).round() as usize).clamp(1, size);
    let new_h = ((height * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;
    let letterbox = LetterboxInfo { scale, pad_x, pad_y };

    let resized = image::imageops::resize(image, new_w as u32, new_h as u32, FilterType::Triangle);

    let x0 = pad_x.floor() as usize;
    let y0 = pad_y.floor() as usize;

    // Padding is black, which normalizes to -1.0.
    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::from_elem((1, size, size, 3), -1.0),
        TensorLayout::Nchw => Array4::<f32>::from_elem((1, 3, size, size), -1.0),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            let value = pixel[c] as f32 / 127.5 - 1.0;
            match layout {
                TensorLayout::Nhwc => tensor[[0, ty, tx, c]] = value,
                TensorLayout::Nchw => tensor[[0, c, ty, tx]] = value,
            }
        }
    }

    (tensor, letterbox)
}

/// Anchor centers for the full-range model: one anchor per cell of a 48x48 grid.
fn generate_anchors() -> Vec<[f32; 2]> {
    let grid = BLAZEFACE_INPUT_SIZE / BLAZEFACE_STRIDE;
    let mut anchors = Vec::with_capacity(BLAZEFACE_NUM_ANCHORS);
    for y in 0..grid {
        for x in 0..grid {
            anchors.push([
                (x as f32 + 0.5) / grid as f32,
                (y as f32 + 0.5) / grid as f32,
            ]);
        }
    }
    anchors
}

fn decode_detections(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceDetection> {
    let size = BLAZEFACE_INPUT_SIZE as f32;
    let mut detections = Vec::new();

    for (idx, anchor) in anchors.iter().enumerate() {
        let Some(&raw) = scores.get(idx) else {
            break;
        };
        let score = sigmoid(raw.clamp(-BLAZEFACE_SCORE_CLIP, BLAZEFACE_SCORE_CLIP));
        if score < threshold {
            continue;
        }

        let off = idx * BLAZEFACE_REGRESSOR_LEN;
        let Some(reg) = regressors.get(off..off + BLAZEFACE_REGRESSOR_LEN) else {
            break;
        };

        let cx = reg[0] / size + anchor[0];
        let cy = reg[1] / size + anchor[1];
        let w = reg[2] / size;
        let h = reg[3] / size;

        let (x_min, y_min) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x_max, y_max) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

        let keypoints = KEYPOINT_NAMES
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let (x, y) = letterbox.unmap(
                    reg[4 + 2 * k] / size + anchor[0],
                    reg[5 + 2 * k] / size + anchor[1],
                );
                Keypoint {
                    x,
                    y,
                    name: Some((*name).to_string()),
                }
            })
            .collect();

        detections.push(FaceDetection::new(
            BoundingBox::new(x_min, y_min, x_max, y_max),
            keypoints,
            score,
        ));
    }

    detections
}

/// Non-maximum averaging: each group of overlapping detections collapses into
/// one face whose box and keypoints are the score-weighted mean of the group.
///
/// The highest-scoring member seeds the group and lends it its score and
/// keypoint names.
fn weighted_nms(mut detections: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
    // Ascending, so the best remaining candidate is always at the back.
    detections.sort_by(|a, b| a.score.total_cmp(&b.score));

    let mut merged = Vec::new();
    while let Some(seed) = detections.pop() {
        let mut overlapping = Vec::new();
        detections.retain(|other| {
            if seed.bbox.iou(&other.bbox) > iou_threshold {
                overlapping.push(other.clone());
                false
            } else {
                true
            }
        });
        merged.push(average_into(seed, &overlapping));
    }
    merged
}

fn average_into(mut seed: FaceDetection, overlapping: &[FaceDetection]) -> FaceDetection {
    let total = seed.score + overlapping.iter().map(|d| d.score).sum::<f32>();
    if overlapping.is_empty() || total <= 0.0 {
        return seed;
    }

    let w = seed.score;
    let mut bbox = scaled(&seed.bbox, w);
    for kp in &mut seed.keypoints {
        kp.x *= w;
        kp.y *= w;
    }

    for det in overlapping {
        let w = det.score;
        let b = scaled(&det.bbox, w);
        bbox.x_min += b.x_min;
        bbox.y_min += b.y_min;
        bbox.x_max += b.x_max;
        bbox.y_max += b.y_max;
        for (kp, other) in seed.keypoints.iter_mut().zip(&det.keypoints) {
            kp.x += other.x * w;
            kp.y += other.y * w;
        }
    }

    seed.bbox = scaled(&bbox, 1.0 / total);
    for kp in &mut seed.keypoints {
        kp.x /= total;
        kp.y /= total;
    }
    seed
}

fn scaled(b: &BoundingBox, factor: f32) -> BoundingBox {
    BoundingBox::new(
        b.x_min * factor,
        b.y_min * factor,
        b.x_max * factor,
        b.y_max * factor,
    )
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn square_letterbox() -> LetterboxInfo {
        LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    }

    fn face(x: f32, score: f32) -> FaceDetection {
        FaceDetection::new(BoundingBox::new(x, 0.0, x + 100.0, 100.0), vec![], score)
    }

    #[test]
    fn test_generate_anchors_count() {
        let anchors = generate_anchors();
        assert_eq!(anchors.len(), BLAZEFACE_NUM_ANCHORS);
        assert_eq!(anchors.len(), 2304);
    }

    #[test]
    fn test_anchors_in_unit_range() {
        for a in generate_anchors() {
            assert!(a[0] > 0.0 && a[0] < 1.0);
            assert!(a[1] > 0.0 && a[1] < 1.0);
        }
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!((sigmoid(10.0) - 1.0).abs() < 1e-3);
        assert!(sigmoid(-10.0) < 1e-3);
    }

    #[test]
    fn test_discover_output_indices_either_order() {
        let reg = BLAZEFACE_NUM_ANCHORS * BLAZEFACE_REGRESSOR_LEN;
        assert_eq!(discover_output_indices(&[reg, BLAZEFACE_NUM_ANCHORS]), Some((0, 1)));
        assert_eq!(discover_output_indices(&[BLAZEFACE_NUM_ANCHORS, reg]), Some((1, 0)));
    }

    #[test]
    fn test_discover_output_indices_unrecognized() {
        assert_eq!(discover_output_indices(&[896 * 16, 896]), None);
        assert_eq!(discover_output_indices(&[]), None);
    }

    #[test]
    fn test_preprocess_square_frame_fills_input() {
        let image = RgbaImage::from_pixel(96, 96, Rgba([255, 255, 255, 255]));
        let (tensor, letterbox) = preprocess(&image, TensorLayout::Nhwc);
        assert_eq!(tensor.shape(), &[1, 192, 192, 3]);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 191, 191, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_wide_frame_pads_vertically() {
        let image = RgbaImage::from_pixel(384, 192, Rgba([255, 255, 255, 255]));
        let (tensor, letterbox) = preprocess(&image, TensorLayout::Nchw);
        assert_eq!(tensor.shape(), &[1, 3, 192, 192]);
        assert!((letterbox.pad_y - 48.0).abs() < 1e-6);
        // Top padding row is black (-1), image center is white (+1).
        assert!((tensor[[0, 0, 0, 96]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 96, 96]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let letterbox = LetterboxInfo {
            scale: 0.15,
            pad_x: 0.0,
            pad_y: 42.0,
        };
        let (orig_x, orig_y) = (640.0f32, 360.0f32);
        let nx = (orig_x * letterbox.scale + letterbox.pad_x) / 192.0;
        let ny = (orig_y * letterbox.scale + letterbox.pad_y) / 192.0;
        let (x, y) = letterbox.unmap(nx, ny);
        assert!((x - orig_x).abs() < 0.1, "x: {x} vs {orig_x}");
        assert!((y - orig_y).abs() < 0.1, "y: {y} vs {orig_y}");
    }

    #[test]
    fn test_decode_single_anchor() {
        let anchors = generate_anchors();
        let mut scores = vec![-50.0f32; BLAZEFACE_NUM_ANCHORS];
        let mut regressors = vec![0.0f32; BLAZEFACE_NUM_ANCHORS * BLAZEFACE_REGRESSOR_LEN];

        // Anchor (row 24, col 24) sits at the square center: (24.5 / 48) * 192 = 98 px.
        let idx = 24 * 48 + 24;
        scores[idx] = 5.0;
        let reg = &mut regressors[idx * BLAZEFACE_REGRESSOR_LEN..][..BLAZEFACE_REGRESSOR_LEN];
        reg[2] = 40.0;
        reg[3] = 40.0;
        reg[4] = -10.0; // right eye 10px left of center

        let dets = decode_detections(&regressors, &scores, &anchors, &square_letterbox(), 0.5);
        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        assert!((det.bbox.x_min - 78.0).abs() < 1e-3);
        assert!((det.bbox.x_max - 118.0).abs() < 1e-3);
        assert!((det.bbox.height() - 40.0).abs() < 1e-3);
        assert_eq!(det.keypoints.len(), 6);
        assert!((det.keypoints[0].x - 88.0).abs() < 1e-3);
        assert_eq!(det.keypoints[2].name.as_deref(), Some("noseTip"));
        assert!(det.score > 0.99);
    }

    #[test]
    fn test_decode_below_threshold_is_empty() {
        let anchors = generate_anchors();
        let scores = vec![0.0f32; BLAZEFACE_NUM_ANCHORS]; // sigmoid(0) = 0.5
        let regressors = vec![0.0f32; BLAZEFACE_NUM_ANCHORS * BLAZEFACE_REGRESSOR_LEN];
        let dets = decode_detections(&regressors, &scores, &anchors, &square_letterbox(), 0.6);
        assert!(dets.is_empty());
    }

    #[test]
    fn test_nms_merges_overlapping_and_keeps_separate() {
        let result = weighted_nms(vec![face(5.0, 0.8), face(0.0, 0.9), face(300.0, 0.7)], 0.3);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
        assert_eq!(result[1].bbox.x_min, 300.0);
    }

    #[test]
    fn test_nms_averages_by_score() {
        let mut strong = face(0.0, 0.75);
        strong.keypoints = vec![Keypoint {
            x: 10.0,
            y: 20.0,
            name: Some("rightEye".into()),
        }];
        let mut weak = face(8.0, 0.25);
        weak.keypoints = vec![Keypoint {
            x: 18.0,
            y: 20.0,
            name: None,
        }];

        let result = weighted_nms(vec![weak, strong], 0.3);
        assert_eq!(result.len(), 1);
        let merged = &result[0];
        // 0.75 * 0 + 0.25 * 8 = 2
        assert!((merged.bbox.x_min - 2.0).abs() < 1e-4);
        assert!((merged.bbox.x_max - 102.0).abs() < 1e-4);
        assert!((merged.keypoints[0].x - 12.0).abs() < 1e-4);
        assert_eq!(merged.keypoints[0].name.as_deref(), Some("rightEye"));
        assert!((merged.score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_nms_single_detection_unchanged() {
        let result = weighted_nms(vec![face(42.0, 0.6)], 0.3);
        assert_eq!(result, vec![face(42.0, 0.6)]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(weighted_nms(vec![], 0.3).is_empty());
    }
}
