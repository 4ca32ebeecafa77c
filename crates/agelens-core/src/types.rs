use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis-aligned face box in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Horizontal midpoint, where the index label is anchored.
    pub fn center_x(&self) -> f32 {
        (self.x_min + self.x_max) / 2.0
    }

    /// Four corners in drawing order: top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [(f32, f32); 4] {
        [
            (self.x_min, self.y_min),
            (self.x_max, self.y_min),
            (self.x_max, self.y_max),
            (self.x_min, self.y_max),
        ]
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x_min.max(other.x_min);
        let y1 = self.y_min.max(other.y_min);
        let x2 = self.x_max.min(other.x_max);
        let y2 = self.y_max.min(other.y_max);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width() * self.height() + other.width() * other.height() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// A named landmark point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub name: Option<String>,
}

/// One face produced by a single detector invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Landmarks in detector order. The MediaPipe detector yields six:
    /// right eye, left eye, nose tip, mouth center, right ear, left ear.
    pub keypoints: Vec<Keypoint>,
    pub score: f32,
}

impl FaceDetection {
    pub fn new(bbox: BoundingBox, keypoints: Vec<Keypoint>, score: f32) -> Self {
        Self {
            bbox,
            keypoints,
            score,
        }
    }
}

/// Ages and faces from one frame, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnalysis {
    ages: Vec<f32>,
    faces: Vec<FaceDetection>,
}

impl FrameAnalysis {
    pub fn push(&mut self, face: FaceDetection, age: f32) {
        self.faces.push(face);
        self.ages.push(age);
    }

    pub fn ages(&self) -> &[f32] {
        &self.ages
    }

    pub fn faces(&self) -> &[FaceDetection] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn into_parts(self) -> (Vec<f32>, Vec<FaceDetection>) {
        (self.ages, self.faces)
    }
}

/// An annotated capture as kept in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRecord {
    pub id: Uuid,
    /// `data:image/png;base64,...` snapshot of the annotated canvas.
    pub image: String,
    pub ages: Vec<f32>,
    pub faces: Vec<FaceDetection>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRecord {
    pub fn new(image: String, analysis: FrameAnalysis, timestamp: DateTime<Utc>) -> Self {
        let (ages, faces) = analysis.into_parts();
        Self {
            id: Uuid::new_v4(),
            image,
            ages,
            faces,
            timestamp,
        }
    }
}
