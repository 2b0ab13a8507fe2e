//! Detection results and inference parameters

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, `[x1, y1, x2, y2]` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from floating-point corners, truncating toward zero and
    /// ordering the corners.
    pub fn from_xyxy(xyxy: [f32; 4]) -> Self {
        let [a, b, c, d] = xyxy.map(|v| v as i32);
        Self {
            x1: a.min(c),
            y1: b.min(d),
            x2: a.max(c),
            y2: b.max(d),
        }
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// A single detected dust storm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Confidence as a percentage, rounded to two decimals
    pub confidence: f64,
    /// Detected region
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    /// Build a detection from a raw `0..1` score
    pub fn from_score(score: f32, bbox: BoundingBox) -> Self {
        let percent = f64::from(score.clamp(0.0, 1.0)) * 100.0;
        Self {
            confidence: (percent * 100.0).round() / 100.0,
            bbox,
        }
    }
}

/// Parameters passed to the detector for a single inference call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Minimum score for a box to be reported
    pub confidence: f32,
    /// IoU threshold for non-maximum suppression
    pub iou: f32,
    /// Inference resolution; the detector default when unset
    pub image_size: Option<u32>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence: 0.2,
            iou: 0.45,
            image_size: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_from_xyxy() {
        let b = BoundingBox::from_xyxy([120.7, 40.2, 10.9, 300.0]);
        assert_eq!(b, BoundingBox::new(10, 40, 120, 300));
    }

    #[test]
    fn test_detection_wire_format() {
        let det = Detection::from_score(0.87654, BoundingBox::new(1, 2, 30, 40));
        assert_eq!(det.confidence, 87.65);

        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["confidence"], 87.65);
        assert_eq!(json["box"], serde_json::json!([1, 2, 30, 40]));

        let back: Detection = serde_json::from_value(json).unwrap();
        assert_eq!(back.bbox, det.bbox);
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(Detection::from_score(1.7, BoundingBox::new(0, 0, 1, 1)).confidence, 100.0);
        assert_eq!(Detection::from_score(-0.1, BoundingBox::new(0, 0, 1, 1)).confidence, 0.0);
    }

    #[test]
    fn test_default_params() {
        let params = DetectionParams::default();
        assert_eq!(params.confidence, 0.2);
        assert_eq!(params.iou, 0.45);
        assert!(params.image_size.is_none());
    }
}
