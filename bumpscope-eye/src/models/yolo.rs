//! YOLO object detection through ONNX Runtime

use crate::error::VisionError;
use crate::models::detection::{
    non_max_suppression, BoundingBox, ChannelOrder, Detection, Detector, DetectorInput,
    InputLayout, Thresholds,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, info};

/// Rows past this many candidates are ignored
const MAX_CANDIDATES: usize = 25_200;

/// YOLO model with `[1, N, 5 + classes]` output rows of
/// `[cx, cy, w, h, objectness, class scores...]` in network input pixels
pub struct YoloDetector {
    session: Session,
    input_size: (u32, u32),
    class_names: Vec<String>,
}

impl YoloDetector {
    /// Load a YOLO model
    pub fn new(
        model_path: &Path,
        input_size: (u32, u32),
        class_names: Vec<String>,
    ) -> Result<Self, VisionError> {
        let session = Session::builder()
            .map_err(|e| VisionError::Ort(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| VisionError::Ort(format!("Failed to set optimization level: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| VisionError::Ort(format!("Failed to load YOLO model: {}", e)))?;

        info!("YOLO model loaded from {:?}", model_path);

        Ok(Self {
            session,
            input_size,
            class_names,
        })
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    /// Decode raw output rows into source-frame detections
    fn postprocess(
        &self,
        shape: &[i64],
        data: &[f32],
        input: &DetectorInput,
        thresholds: Thresholds,
    ) -> Result<Vec<Detection>, VisionError> {
        if shape.len() != 3 || shape[0] != 1 || shape[2] < 6 {
            return Err(VisionError::Detector(format!(
                "Unexpected YOLO output shape {:?}",
                shape
            )));
        }

        let rows = (shape[1] as usize).min(MAX_CANDIDATES);
        let stride = shape[2] as usize;
        if data.len() < rows * stride {
            return Err(VisionError::Detector(
                "YOLO output shorter than its shape".to_string(),
            ));
        }

        let (tensor_w, tensor_h) = input.tensor_size();
        let scale_x = input.source_size.0 as f32 / tensor_w as f32;
        let scale_y = input.source_size.1 as f32 / tensor_h as f32;

        let mut detections = Vec::new();
        for row in data.chunks_exact(stride).take(rows) {
            let objectness = row[4];
            if !objectness.is_finite() || objectness < thresholds.confidence {
                continue;
            }

            let Some((class_id, class_score)) = row[5..]
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, s)| s.is_finite())
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };

            let confidence = objectness * class_score;
            if confidence < thresholds.confidence {
                continue;
            }

            let bbox = BoundingBox::new(
                row[0] * scale_x,
                row[1] * scale_y,
                row[2] * scale_x,
                row[3] * scale_y,
            );
            if !bbox.is_valid() {
                continue;
            }

            detections.push(Detection::new(self.class_name(class_id), confidence, bbox));
        }

        let detections = non_max_suppression(detections, thresholds.nms);
        debug!("YOLO detected {} objects", detections.len());
        Ok(detections)
    }
}

impl Detector for YoloDetector {
    fn input_layout(&self) -> InputLayout {
        InputLayout {
            size: Some(self.input_size),
            channel_order: ChannelOrder::Rgb,
        }
    }

    fn detect(
        &mut self,
        input: &DetectorInput,
        thresholds: Thresholds,
    ) -> Result<Vec<Detection>, VisionError> {
        let tensor = Tensor::from_array(input.tensor.clone())
            .map_err(|e| VisionError::Ort(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| VisionError::Ort(format!("YOLO inference failed: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::Ort(format!("Failed to extract output tensor: {}", e)))?;

        let shape: Vec<i64> = shape.iter().copied().collect();
        self.postprocess(&shape, data, input, thresholds)
    }
}
