//! Detector that replays pre-computed detections
//!
//! The file is a JSON array with one entry per processed frame, each entry an
//! array of detections. Frames past the end of the recording have none.

use crate::error::VisionError;
use crate::models::detection::{
    non_max_suppression, Detection, Detector, DetectorInput, InputLayout, Thresholds,
};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub struct ReplayDetector {
    frames: VecDeque<Vec<Detection>>,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, VisionError> {
        let frames: Vec<Vec<Detection>> = serde_json::from_str(json)?;
        Ok(Self::new(frames))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let detector = Self::from_json(&content)?;
        info!(
            "Loaded {} recorded frames of detections from {}",
            detector.remaining(),
            path.display()
        );
        Ok(detector)
    }

    /// Recorded frames not yet served
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl Detector for ReplayDetector {
    fn input_layout(&self) -> InputLayout {
        InputLayout::default()
    }

    fn detect(
        &mut self,
        _input: &DetectorInput,
        thresholds: Thresholds,
    ) -> Result<Vec<Detection>, VisionError> {
        let Some(recorded) = self.frames.pop_front() else {
            debug!("Replay exhausted, no detections");
            return Ok(Vec::new());
        };

        let above: Vec<Detection> = recorded
            .into_iter()
            .filter(|d| d.confidence >= thresholds.confidence)
            .collect();
        Ok(non_max_suppression(above, thresholds.nms))
    }
}
