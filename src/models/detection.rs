use serde::{Deserialize, Serialize};

/// A decoded video frame in packed RGB.
pub type Frame = image::RgbImage;

/// Pixel-space box, corners inclusive of `(x1, y1)` and exclusive of `(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Build a box from floating point corners, clamped to a `width` x `height` frame.
    pub fn clamped(coords: [f32; 4], width: u32, height: u32) -> Self {
        let clamp = |v: f32, max: u32| v.max(0.0).min(max as f32).round() as u32;
        let (x1, x2) = (clamp(coords[0], width), clamp(coords[2], width));
        let (y1, y2) = (clamp(coords[1], height), clamp(coords[3], height));
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }
}

/// One labeled, localized detection on a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Whether any detection carries `label`.
pub fn contains_label(detections: &[Detection], label: &str) -> bool {
    detections.iter().any(|d| d.label == label)
}

/// Frame dimensions and rate of a video stream or segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoGeometry {
    /// Size in bytes of one packed rgb24 frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}
