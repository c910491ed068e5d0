mod labels;
pub mod camera;
pub mod decode;
pub mod model;
pub mod overlay;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use camera::{CameraConfig, CameraFeed, Frame, FrameSource, LiveCamera};
pub use decode::OutputLayout;
pub use labels::coco_labels;
pub use model::{ModelHandle, ModelVariant};

/// Class label that drives auto-recording and the warning color.
pub const PERSON: &str = "person";

/// Axis-aligned box in frame-pixel coordinates, top-left anchored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Reflect across the vertical midline of a canvas `canvas_width` wide.
    pub fn mirrored(self, canvas_width: f32) -> Self {
        Self { x: canvas_width - self.x - self.width, ..self }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix_a = self.x.max(other.x);
        let iy_a = self.y.max(other.y);
        let ix_b = (self.x + self.width).min(other.x + other.width);
        let iy_b = (self.y + self.height).min(other.y + other.height);

        let inter = (ix_b - ix_a).max(0.0) * (iy_b - iy_a).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn is_person(&self) -> bool {
        self.class == PERSON
    }
}

/// Settings for a model-backed detector.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub use_coral: bool,
    pub model_path_edgetpu: Option<PathBuf>,
    pub threads: i32,

    pub img_w: u32,
    pub img_h: u32,
    pub labels: Vec<String>,

    pub conf_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    pub output_layout: OutputLayout,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            use_coral: false,
            model_path_edgetpu: None,
            threads: 2,
            img_w: 300,
            img_h: 300,
            labels: coco_labels(),
            conf_threshold: 0.5,
            nms_iou_threshold: 0.5,
            max_detections: 20,
            output_layout: OutputLayout::Ssd,
        }
    }
}

/// A pretrained object detector. Implementations must treat the frame as
/// read-only and return boxes in the frame's own pixel coordinates.
pub trait Detector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}
