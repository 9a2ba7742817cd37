//! Detector boundary and detector adapters

pub mod detection;
pub mod replay;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use detection::{
    finalize_detections, non_max_suppression, BoundingBox, ChannelOrder, Detection, Detector,
    DetectorInput, InputLayout, Thresholds,
};
pub use replay::ReplayDetector;
#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;
