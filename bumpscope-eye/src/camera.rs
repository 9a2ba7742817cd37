//! Frame sources: image sequences on disk and (with `opencv`) live cameras

use crate::error::VisionError;
use image::RgbImage;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Source of RGB frames.
///
/// `Ok(None)` is a clean end of stream. `Err` is a capture failure; the
/// pipeline stops on it.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError>;

    /// Release the underlying device or handles. Called exactly once when the loop ends.
    fn release(&mut self) {}
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Frames read from an image directory in file name order
pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
    frames_read: usize,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, VisionError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(VisionError::Capture(format!(
                "Frame directory {} does not exist",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        paths.sort();

        info!("Image source {} opened with {} frames", dir.display(), paths.len());
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into(),
            frames_read: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };

        let frame = image::open(&path)
            .map_err(|e| VisionError::Capture(format!("Failed to read {}: {}", path.display(), e)))?
            .to_rgb8();
        self.frames_read += 1;
        debug!("Read frame {} from {}", self.frames_read, path.display());
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.paths.clear();
        info!("Image source released after {} frames", self.frames_read);
    }
}

#[cfg(feature = "opencv")]
pub use capture::{CameraCapture, CaptureTarget};

#[cfg(feature = "opencv")]
mod capture {
    use super::FrameSource;
    use crate::config::CameraConfig;
    use crate::error::VisionError;
    use crate::utils::rgb_from_bgr;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
    };
    use std::path::PathBuf;
    use tracing::{info, warn};

    /// Where a capture reads from
    #[derive(Debug, Clone)]
    pub enum CaptureTarget {
        Device(u32),
        File(PathBuf),
    }

    /// Camera or video file read through OpenCV
    pub struct CameraCapture {
        capture: Option<VideoCapture>,
        target: CaptureTarget,
    }

    impl CameraCapture {
        pub fn open(target: CaptureTarget, config: &CameraConfig) -> Result<Self, VisionError> {
            let mut capture = match &target {
                CaptureTarget::Device(id) => VideoCapture::new(*id as i32, CAP_ANY).map_err(|e| {
                    VisionError::Capture(format!("Failed to open camera {}: {}", id, e))
                })?,
                CaptureTarget::File(path) => {
                    VideoCapture::from_file(&path.to_string_lossy(), CAP_ANY).map_err(|e| {
                        VisionError::Capture(format!("Failed to open {}: {}", path.display(), e))
                    })?
                }
            };

            if !capture
                .is_opened()
                .map_err(|e| VisionError::Capture(format!("{:?} not opened: {}", target, e)))?
            {
                return Err(VisionError::Capture(format!("{:?} failed to open", target)));
            }

            if let CaptureTarget::Device(_) = target {
                let (width, height) = config.resolution;
                capture
                    .set(CAP_PROP_FRAME_WIDTH, width as f64)
                    .map_err(|e| VisionError::Capture(format!("Failed to set width: {}", e)))?;
                capture
                    .set(CAP_PROP_FRAME_HEIGHT, height as f64)
                    .map_err(|e| VisionError::Capture(format!("Failed to set height: {}", e)))?;
            }

            info!(
                "Capture {:?} opened at {}x{}",
                target, config.resolution.0, config.resolution.1
            );
            Ok(Self {
                capture: Some(capture),
                target,
            })
        }
    }

    impl FrameSource for CameraCapture {
        fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError> {
            let capture = self
                .capture
                .as_mut()
                .ok_or_else(|| VisionError::Capture("Capture already released".to_string()))?;

            let mut frame = Mat::default();
            let grabbed = capture
                .read(&mut frame)
                .map_err(|e| VisionError::Capture(format!("Failed to read frame: {}", e)))?;

            if !grabbed || frame.empty() {
                return match self.target {
                    CaptureTarget::File(_) => Ok(None),
                    CaptureTarget::Device(id) => Err(VisionError::Capture(format!(
                        "Camera {} returned no frame",
                        id
                    ))),
                };
            }

            let width = frame.cols() as u32;
            let height = frame.rows() as u32;
            let data = frame
                .data_bytes()
                .map_err(|e| VisionError::Capture(format!("Frame is not contiguous: {}", e)))?
                .to_vec();
            rgb_from_bgr(width, height, data).map(Some)
        }

        fn release(&mut self) {
            if let Some(mut capture) = self.capture.take() {
                if let Err(e) = capture.release() {
                    warn!("Failed to release capture: {}", e);
                }
                info!("Capture {:?} released", self.target);
            }
        }
    }

    impl Drop for CameraCapture {
        fn drop(&mut self) {
            self.release();
        }
    }
}
