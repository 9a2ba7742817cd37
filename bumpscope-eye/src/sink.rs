//! Frame sinks: where annotated frames go

use crate::error::VisionError;
use image::RgbImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sink reply after a frame or a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    /// The user asked to quit
    Stop,
}

pub trait FrameSink: Send {
    /// Present a frame. `processed` is false for pass-through frames.
    fn show(&mut self, frame: &RgbImage, processed: bool) -> Result<SinkControl, VisionError>;

    /// Check for a quit request without presenting anything
    fn poll(&mut self) -> Result<SinkControl, VisionError> {
        Ok(SinkControl::Continue)
    }

    /// Tear down the output. Called exactly once when the loop ends.
    fn close(&mut self) {}
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn show(&mut self, frame: &RgbImage, processed: bool) -> Result<SinkControl, VisionError> {
        (**self).show(frame, processed)
    }

    fn poll(&mut self) -> Result<SinkControl, VisionError> {
        (**self).poll()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Writes every shown frame as `frame_000000.png`, `frame_000001.png`, ...
pub struct ImageDirSink {
    dir: PathBuf,
    written: usize,
    processed_only: bool,
}

impl ImageDirSink {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, VisionError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("Writing frames to {}", dir.display());
        Ok(Self {
            dir,
            written: 0,
            processed_only: false,
        })
    }

    /// Skip pass-through frames
    pub fn processed_only(mut self, processed_only: bool) -> Self {
        self.processed_only = processed_only;
        self
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

/// Write failures surface as io errors, which end the run
fn write_error(path: &Path, err: image::ImageError) -> VisionError {
    match err {
        image::ImageError::IoError(e) => VisionError::Io(e),
        other => VisionError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to write {}: {}", path.display(), other),
        )),
    }
}

impl FrameSink for ImageDirSink {
    fn show(&mut self, frame: &RgbImage, processed: bool) -> Result<SinkControl, VisionError> {
        if self.processed_only && !processed {
            return Ok(SinkControl::Continue);
        }

        let path = self.dir.join(format!("frame_{:06}.png", self.written));
        frame.save(&path).map_err(|e| write_error(&path, e))?;
        self.written += 1;
        debug!("Wrote {}", path.display());
        Ok(SinkControl::Continue)
    }

    fn close(&mut self) {
        info!("Wrote {} frames to {}", self.written, self.dir.display());
    }
}

#[cfg(feature = "opencv")]
pub use window::WindowSink;

#[cfg(feature = "opencv")]
mod window {
    use super::{FrameSink, SinkControl};
    use crate::error::VisionError;
    use crate::utils::bgr_bytes;
    use image::RgbImage;
    use opencv::{core, highgui, prelude::*};
    use tracing::{info, warn};

    const QUIT_KEY: i32 = 'q' as i32;

    /// Desktop window; pressing `q` stops the pipeline
    pub struct WindowSink {
        name: String,
        open: bool,
    }

    impl WindowSink {
        pub fn open(name: &str) -> Result<Self, VisionError> {
            highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
            info!("Display window '{}' opened", name);
            Ok(Self {
                name: name.to_string(),
                open: true,
            })
        }

        fn wait_key(&self) -> Result<SinkControl, VisionError> {
            let key = highgui::wait_key(1)?;
            if key & 0xFF == QUIT_KEY {
                info!("Quit key pressed");
                return Ok(SinkControl::Stop);
            }
            Ok(SinkControl::Continue)
        }
    }

    impl FrameSink for WindowSink {
        fn show(&mut self, frame: &RgbImage, _processed: bool) -> Result<SinkControl, VisionError> {
            let (width, height) = frame.dimensions();
            let bytes = bgr_bytes(frame);
            let flat = Mat::from_slice(&bytes)?;
            let mat = flat.reshape(3, height as i32)?;
            if mat.cols() != width as i32 {
                return Err(VisionError::Display(format!(
                    "Frame reshape produced {} columns, expected {}",
                    mat.cols(),
                    width
                )));
            }
            let mut owned = core::Mat::default();
            mat.copy_to(&mut owned)?;
            highgui::imshow(&self.name, &owned)?;
            self.wait_key()
        }

        fn poll(&mut self) -> Result<SinkControl, VisionError> {
            self.wait_key()
        }

        fn close(&mut self) {
            if self.open {
                if let Err(e) = highgui::destroy_window(&self.name) {
                    warn!("Failed to close window '{}': {}", self.name, e);
                }
                self.open = false;
            }
        }
    }

    impl Drop for WindowSink {
        fn drop(&mut self) {
            self.close();
        }
    }
}
