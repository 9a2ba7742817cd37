//! Bumpscope Eye - road-hazard vision pipeline
//!
//! Undistorts fisheye frames, runs an object detector on them, projects each
//! detection onto the ground plane and draws boxes with distance labels.
//!
//! Frames are `image::RgbImage` throughout. The detector sits behind the
//! [`Detector`] trait; frames come from a [`FrameSource`] and go to a
//! [`FrameSink`]. The OpenCV camera/window adapters and the ONNX YOLO
//! detector are behind the `opencv` and `onnx` features.

pub mod camera;
pub mod config;
pub mod error;
pub mod lens;
pub mod models;
pub mod palette;
pub mod pipeline;
pub mod projection;
pub mod render;
pub mod sink;
pub mod utils;

pub use camera::{FrameSource, ImageSequenceSource};
pub use config::{CameraConfig, DetectionConfig, PipelineConfig, RenderConfig};
pub use error::{Result, VisionError};
pub use lens::{CameraModel, LensCorrector, RemapTable};
pub use models::{BoundingBox, Detection, Detector, DetectorInput, ReplayDetector, Thresholds};
pub use palette::{ColorAssigner, ColorKeying, ColorTable};
pub use pipeline::{
    FrameProcessor, PipelineOrchestrator, PipelineState, PipelineStats, SkipPolicy, StopHandle,
    StopReason,
};
pub use projection::{DistanceMetric, GroundPoint, GroundProjector};
pub use render::{AnnotatedRenderer, Annotation, LabelFont, LabelMode, RenderedFrame};
pub use sink::{FrameSink, ImageDirSink, SinkControl};

#[cfg(feature = "opencv")]
pub use camera::{CameraCapture, CaptureTarget};
#[cfg(feature = "onnx")]
pub use models::YoloDetector;
#[cfg(feature = "opencv")]
pub use sink::WindowSink;
