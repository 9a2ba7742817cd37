//! Configuration for bumpscope-eye
//!
//! Everything here is fixed at startup. Defaults reproduce the reference
//! deployment: a 640x360 fisheye camera looking at the road ahead.

use crate::error::VisionError;
use crate::palette::ColorKeying;
use crate::pipeline::SkipPolicy;
use crate::projection::DistanceMetric;
use crate::render::LabelMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run the full pipeline on every n-th captured frame
    pub process_every_n_frames: u32,
    /// What happens to frames that are not processed
    pub skip_policy: SkipPolicy,
    /// Frame rate the per-frame budget is derived from
    pub target_fps: u32,
    /// Image plane to ground plane homography (row-major)
    pub ground_transform: [[f64; 3]; 3],
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub render: RenderConfig,
}

/// Fisheye camera calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture device index (OpenCV backend only)
    pub camera_id: u32,
    /// Target resolution (width, height)
    pub resolution: (u32, u32),
    /// 0 keeps the focal length of the tightest edge, 1 the widest
    pub balance: f64,
    /// Intrinsic matrix K (row-major)
    pub intrinsics: [[f64; 3]; 3],
    /// Fisheye coefficients k1..k4
    pub distortion: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Network class names, indexed by class id
    pub class_names: Vec<String>,
    /// ONNX model (onnx feature)
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub label_mode: LabelMode,
    pub color_keying: ColorKeying,
    pub distance_metric: DistanceMetric,
    /// Label font size in pixels
    pub font_size: f32,
    /// TrueType font for labels; without one only label backgrounds are drawn
    pub font_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            process_every_n_frames: 1,
            skip_policy: SkipPolicy::PassThrough,
            target_fps: 30,
            ground_transform: [
                [1.99889264, -1.37652546e-01, -6.08656029e+02],
                [5.26897553e-02, -1.18095947e-01, 4.95524903e+02],
                [-7.42909750e-02, 2.36055954e+00, -4.17259832e+02],
            ],
            camera: CameraConfig::default(),
            detection: DetectionConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            resolution: (640, 360),
            balance: 1.0,
            intrinsics: [
                [276.4375427291772, 0.0, 313.6263575113481],
                [0.0, 275.41723500085385, 179.6311970659696],
                [0.0, 0.0, 1.0],
            ],
            distortion: vec![
                -0.02851433608691995,
                0.014295456531162357,
                -0.02846891799622809,
                0.015314864345745591,
            ],
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            class_names: vec!["speed bump".to_string()],
            model_path: None,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            label_mode: LabelMode::Distance,
            color_keying: ColorKeying::Positional,
            distance_metric: DistanceMetric::Forward,
            font_size: 20.0,
            font_path: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Per-frame latency budget in seconds
    pub fn frame_budget_secs(&self) -> f64 {
        1.0 / self.target_fps.max(1) as f64
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), VisionError> {
        if self.process_every_n_frames == 0 {
            return Err(VisionError::Config(
                "process_every_n_frames must be at least 1".to_string(),
            ));
        }

        if self.target_fps == 0 || self.target_fps > 240 {
            return Err(VisionError::Config(
                "Target frame rate must be between 1 and 240".to_string(),
            ));
        }

        if self.ground_transform.iter().flatten().any(|v| !v.is_finite()) {
            return Err(VisionError::Config(
                "Ground transform contains non-finite values".to_string(),
            ));
        }
        if self.ground_transform.iter().flatten().all(|v| *v == 0.0) {
            return Err(VisionError::Config("Ground transform is all zeros".to_string()));
        }

        self.camera.validate()?;
        self.detection.validate()?;
        self.render.validate()
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), VisionError> {
        let (width, height) = self.resolution;
        if width == 0 || height == 0 {
            return Err(VisionError::Config("Resolution must be non-zero".to_string()));
        }

        if width > 7680 || height > 4320 {
            return Err(VisionError::Config("Resolution too large (max 8K)".to_string()));
        }

        if !(0.0..=1.0).contains(&self.balance) {
            return Err(VisionError::Config(format!(
                "Balance must be in [0, 1], got {}",
                self.balance
            )));
        }

        let k = &self.intrinsics;
        if k.iter().flatten().any(|v| !v.is_finite()) {
            return Err(VisionError::Config(
                "Camera matrix contains non-finite values".to_string(),
            ));
        }
        if k[0][0] <= 0.0 || k[1][1] <= 0.0 {
            return Err(VisionError::Config(
                "Camera focal lengths must be positive".to_string(),
            ));
        }
        if k[2] != [0.0, 0.0, 1.0] {
            return Err(VisionError::Config(
                "Camera matrix bottom row must be [0, 0, 1]".to_string(),
            ));
        }

        if self.distortion.len() != 4 {
            return Err(VisionError::Config(format!(
                "Fisheye model needs 4 distortion coefficients, got {}",
                self.distortion.len()
            )));
        }
        if self.distortion.iter().any(|v| !v.is_finite()) {
            return Err(VisionError::Config(
                "Distortion coefficients contain non-finite values".to_string(),
            ));
        }

        Ok(())
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), VisionError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(VisionError::Config(
                "Confidence threshold must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(VisionError::Config("NMS threshold must be in [0, 1]".to_string()));
        }
        Ok(())
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), VisionError> {
        if !self.font_size.is_finite() || self.font_size <= 0.0 || self.font_size > 512.0 {
            return Err(VisionError::Config(
                "Font size must be in (0, 512]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.camera.resolution, (640, 360));
        assert_eq!(config.camera.balance, 1.0);
        assert_eq!(config.process_every_n_frames, 1);
        assert_eq!(config.skip_policy, SkipPolicy::PassThrough);
        assert_eq!(config.render.label_mode, LabelMode::Distance);
        assert_eq!(config.render.color_keying, ColorKeying::Positional);
        assert_eq!(config.render.distance_metric, DistanceMetric::Forward);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frame_budget() {
        let config = PipelineConfig::default();
        assert!((config.frame_budget_secs() - 1.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation_every_n_zero() {
        let mut config = PipelineConfig::default();
        config.process_every_n_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_resolution_zero() {
        let mut config = PipelineConfig::default();
        config.camera.resolution = (0, 360);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_balance_out_of_range() {
        let mut config = PipelineConfig::default();
        config.camera.balance = 1.5;
        assert!(config.validate().is_err());
        config.camera.balance = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_malformed_intrinsics() {
        let mut config = PipelineConfig::default();
        config.camera.intrinsics[0][0] = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.camera.intrinsics[1][1] = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.camera.intrinsics[2] = [0.0, 0.0, 2.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_distortion_length() {
        let mut config = PipelineConfig::default();
        config.camera.distortion = vec![0.1, 0.2];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_thresholds() {
        let mut config = PipelineConfig::default();
        config.detection.confidence_threshold = 1.2;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.detection.nms_threshold = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_transform() {
        let mut config = PipelineConfig::default();
        config.ground_transform = [[0.0; 3]; 3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            process_every_n_frames = 3

            [camera]
            balance = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.process_every_n_frames, 3);
        assert_eq!(config.camera.balance, 0.5);
        assert_eq!(config.camera.resolution, (640, 360));
        assert_eq!(config.detection.nms_threshold, 0.45);
        assert!(config.validate().is_ok());
    }
}
