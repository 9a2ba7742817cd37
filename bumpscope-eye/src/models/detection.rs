//! Detection records and the detector boundary

use crate::error::VisionError;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Axis-aligned box in pixel units, stored as center and size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(center_x: f32, center_y: f32, width: f32, height: f32) -> Self {
        Self {
            center_x,
            center_y,
            width,
            height,
        }
    }

    /// Build from top-left corner and size
    pub fn from_corner(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self::new(left + width / 2.0, top + height / 2.0, width, height)
    }

    /// (left, top, right, bottom)
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;
        (
            self.center_x - half_w,
            self.center_y - half_h,
            self.center_x + half_w,
            self.center_y + half_h,
        )
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_valid(&self) -> bool {
        self.center_x.is_finite()
            && self.center_y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Intersection over union; 0 for invalid boxes
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        if !self.is_valid() || !other.is_valid() {
            return 0.0;
        }

        let (l1, t1, r1, b1) = self.corners();
        let (l2, t2, r2, b2) = other.corners();

        let inter_w = r1.min(r2) - l1.max(l2);
        let inter_h = b1.min(b2) - t1.max(t2);
        if inter_w <= 0.0 || inter_h <= 0.0 {
            return 0.0;
        }

        let inter_area = inter_w * inter_h;
        let union_area = self.area() + other.area() - inter_area;
        if union_area <= 0.0 || !union_area.is_finite() {
            return 0.0;
        }

        (inter_area / union_area).clamp(0.0, 1.0)
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }

    /// `"<class> <confidence>"` with two decimals
    pub fn class_label(&self) -> String {
        format!("{} {:.2}", self.class_name, self.confidence)
    }
}

/// Detector score thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub nms: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            nms: 0.45,
        }
    }
}

/// Channel order a detector expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Tensor layout a detector expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLayout {
    /// Network input size; `None` keeps the frame size
    pub size: Option<(u32, u32)>,
    pub channel_order: ChannelOrder,
}

impl Default for InputLayout {
    fn default() -> Self {
        Self {
            size: None,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

/// Frame converted for a detector
#[derive(Debug, Clone)]
pub struct DetectorInput {
    /// `[1, 3, H, W]`, values in [0, 1]
    pub tensor: Array4<f32>,
    /// Size of the frame the tensor was made from; boxes are reported in it
    pub source_size: (u32, u32),
}

impl DetectorInput {
    /// (width, height) of the tensor
    pub fn tensor_size(&self) -> (u32, u32) {
        let shape = self.tensor.shape();
        (shape[3] as u32, shape[2] as u32)
    }
}

/// Object detector consumed by the pipeline.
///
/// Implementations return boxes in `input.source_size` pixel coordinates,
/// sorted by descending confidence.
pub trait Detector: Send {
    fn input_layout(&self) -> InputLayout;

    fn detect(
        &mut self,
        input: &DetectorInput,
        thresholds: Thresholds,
    ) -> Result<Vec<Detection>, VisionError>;
}

/// Drop unusable detections and order the rest by descending confidence.
///
/// The sort is stable, so equal scores keep the detector's order.
pub fn finalize_detections(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.retain(|d| {
        d.confidence.is_finite() && (0.0..=1.0).contains(&d.confidence) && d.bbox.is_valid()
    });
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    detections
}

/// Greedy non-maximum suppression.
///
/// Keeps the highest scoring box and drops every later box of the same class
/// overlapping it by more than `iou_threshold`.
pub fn non_max_suppression(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let detections = finalize_detections(detections);
    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }

        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[j].class_name != detections[i].class_name {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }

        keep.push(detections[i].clone());
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_name: &str, confidence: f32, bbox: (f32, f32, f32, f32)) -> Detection {
        Detection::new(class_name, confidence, BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3))
    }

    #[test]
    fn test_corners() {
        let b = BoundingBox::new(100.0, 50.0, 40.0, 20.0);
        assert_eq!(b.corners(), (80.0, 40.0, 120.0, 60.0));
        assert_eq!(BoundingBox::from_corner(80.0, 40.0, 40.0, 20.0), b);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(10.0, 10.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let b = BoundingBox::new(15.0, 10.0, 10.0, 10.0);
        // overlap 5x10 = 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);

        let far = BoundingBox::new(100.0, 100.0, 10.0, 10.0);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_iou_nan_protection() {
        let a = BoundingBox::new(f32::NAN, 10.0, 50.0, 50.0);
        let b = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_class_label() {
        let d = det("speed bump", 0.876, (0.0, 0.0, 1.0, 1.0));
        assert_eq!(d.class_label(), "speed bump 0.88");
    }

    #[test]
    fn test_finalize_orders_and_filters() {
        let out = finalize_detections(vec![
            det("a", 0.3, (10.0, 10.0, 5.0, 5.0)),
            det("b", 0.9, (10.0, 10.0, 5.0, 5.0)),
            det("c", f32::NAN, (10.0, 10.0, 5.0, 5.0)),
            det("d", 0.6, (10.0, 10.0, 0.0, 5.0)),
            det("e", 1.5, (10.0, 10.0, 5.0, 5.0)),
            det("f", 0.6, (10.0, 10.0, 5.0, 5.0)),
        ]);
        let names: Vec<&str> = out.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["b", "f", "a"]);
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let out = non_max_suppression(
            vec![
                det("bump", 0.7, (12.0, 10.0, 10.0, 10.0)),
                det("bump", 0.9, (10.0, 10.0, 10.0, 10.0)),
                det("car", 0.8, (10.0, 10.0, 10.0, 10.0)),
                det("bump", 0.6, (200.0, 200.0, 10.0, 10.0)),
            ],
            0.45,
        );
        let kept: Vec<(&str, f32)> = out
            .iter()
            .map(|d| (d.class_name.as_str(), d.confidence))
            .collect();
        assert_eq!(kept, vec![("bump", 0.9), ("car", 0.8), ("bump", 0.6)]);
    }
}
