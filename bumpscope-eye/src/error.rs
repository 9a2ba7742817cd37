//! Error types for bumpscope-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Degenerate projection: homogeneous denominator {denominator:e} is too close to zero")]
    ProjectionDegenerate { denominator: f64 },

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Display error: {0}")]
    Display(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    #[error("OpenCV error: {0}")]
    OpenCv(String),
}

impl VisionError {
    /// Whether the error must stop the pipeline (startup or capture failures).
    ///
    /// Everything else is scoped to a single frame or a single detection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VisionError::Config(_)
                | VisionError::ConfigParse(_)
                | VisionError::Capture(_)
                | VisionError::Io(_)
        )
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Capture("device unplugged".to_string());
        assert!(err.to_string().contains("Capture error"));
        assert!(err.to_string().contains("device unplugged"));
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        match vision_err {
            VisionError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_degenerate_projection_display() {
        let err = VisionError::ProjectionDegenerate { denominator: 0.0 };
        assert!(err.to_string().contains("Degenerate projection"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(VisionError::Config("bad K".to_string()).is_fatal());
        assert!(VisionError::Capture("eof".to_string()).is_fatal());
        assert!(!VisionError::ProjectionDegenerate { denominator: 1e-12 }.is_fatal());
        assert!(!VisionError::Detector("timeout".to_string()).is_fatal());
        assert!(!VisionError::Processing("tensor".to_string()).is_fatal());
    }
}
