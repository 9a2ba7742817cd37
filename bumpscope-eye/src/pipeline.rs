//! Capture -> correct -> detect -> render -> display loop

use crate::camera::FrameSource;
use crate::config::PipelineConfig;
use crate::error::VisionError;
use crate::lens::{CameraModel, LensCorrector};
use crate::models::{Detection, Detector, Thresholds};
use crate::palette::{ColorAssigner, ColorKeying};
use crate::projection::GroundProjector;
use crate::render::{AnnotatedRenderer, RenderedFrame};
use crate::sink::{FrameSink, SinkControl};
use crate::utils::frame_to_tensor;
use image::RgbImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// What happens to frames that fall between processed ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Show the raw frame
    #[default]
    PassThrough,
    /// Show nothing; the sink is still polled for a quit request
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    CapturingFrame,
    Correcting,
    Detecting,
    Rendering,
    Displaying,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SourceExhausted,
    StopRequested,
    SinkClosed,
}

/// Cloneable stop flag, checked between frames
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<RwLock<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *self.stopped.write() = true;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.read()
    }
}

/// Counters for one `run()`
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_passed_through: u64,
    pub frames_dropped: u64,
    pub detections: u64,
    pub degenerate_projections: u64,
    pub detector_failures: u64,
    pub frames_over_budget: u64,
    pub processing_time: Duration,
    pub stop_reason: Option<StopReason>,
}

impl PipelineStats {
    pub fn average_processing_time(&self) -> Duration {
        if self.frames_processed == 0 {
            return Duration::ZERO;
        }
        self.processing_time / self.frames_processed as u32
    }
}

/// Frame `counter` (0-based) is processed iff it is a multiple of `every_n`
pub fn should_process(counter: u64, every_n: u32) -> bool {
    every_n <= 1 || counter % every_n as u64 == 0
}

/// The per-frame stages, owned by the orchestrator
pub struct FrameProcessor {
    corrector: LensCorrector,
    detector: Box<dyn Detector>,
    renderer: AnnotatedRenderer,
    colors: ColorAssigner,
    thresholds: Thresholds,
}

impl FrameProcessor {
    pub fn new(
        corrector: LensCorrector,
        detector: Box<dyn Detector>,
        renderer: AnnotatedRenderer,
        colors: ColorAssigner,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            corrector,
            detector,
            renderer,
            colors,
            thresholds,
        }
    }

    /// Build every stage from configuration. The remap table is computed here.
    pub fn from_config(
        config: &PipelineConfig,
        detector: Box<dyn Detector>,
    ) -> Result<Self, VisionError> {
        config.validate()?;

        let camera = CameraModel::from_config(&config.camera)?;
        let corrector = LensCorrector::new(&camera)?;
        let projector = GroundProjector::from_rows(&config.ground_transform);
        let renderer = AnnotatedRenderer::from_config(projector, &config.render)?;
        let colors = match config.render.color_keying {
            ColorKeying::Positional => ColorAssigner::new(),
            ColorKeying::ByClass => ColorAssigner::with_classes(&config.detection.class_names),
        };
        let thresholds = Thresholds {
            confidence: config.detection.confidence_threshold,
            nms: config.detection.nms_threshold,
        };

        Ok(Self::new(corrector, detector, renderer, colors, thresholds))
    }

    pub fn colors(&self) -> &ColorAssigner {
        &self.colors
    }

    pub fn correct(&self, frame: &RgbImage) -> RgbImage {
        self.corrector.apply(frame)
    }

    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        let input = frame_to_tensor(frame, &self.detector.input_layout())?;
        self.detector.detect(&input, self.thresholds)
    }

    pub fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> RenderedFrame {
        self.renderer.render(frame, detections, &self.colors)
    }

    /// Correct, detect and render one frame
    pub fn process(&mut self, frame: &RgbImage) -> Result<RenderedFrame, VisionError> {
        let corrected = self.correct(frame);
        let detections = self.detect(&corrected)?;
        Ok(self.annotate(&corrected, &detections))
    }
}

pub struct PipelineOrchestrator<S: FrameSource, K: FrameSink> {
    source: S,
    sink: K,
    processor: FrameProcessor,
    every_n: u32,
    skip_policy: SkipPolicy,
    frame_budget: Duration,
    stop: StopHandle,
    state: PipelineState,
    frame_counter: u64,
}

impl<S: FrameSource, K: FrameSink> PipelineOrchestrator<S, K> {
    pub fn new(
        source: S,
        sink: K,
        processor: FrameProcessor,
        config: &PipelineConfig,
    ) -> Result<Self, VisionError> {
        if config.process_every_n_frames == 0 {
            return Err(VisionError::Config(
                "process_every_n_frames must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            source,
            sink,
            processor,
            every_n: config.process_every_n_frames,
            skip_policy: config.skip_policy,
            frame_budget: Duration::from_secs_f64(config.frame_budget_secs()),
            stop: StopHandle::new(),
            state: PipelineState::Idle,
            frame_counter: 0,
        })
    }

    pub fn from_config(
        config: &PipelineConfig,
        source: S,
        sink: K,
        detector: Box<dyn Detector>,
    ) -> Result<Self, VisionError> {
        let processor = FrameProcessor::from_config(config, detector)?;
        Self::new(source, sink, processor, config)
    }

    /// Share an existing stop flag (e.g. one wired to Ctrl+C)
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that ends `run()` at the next frame boundary
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn processor(&self) -> &FrameProcessor {
        &self.processor
    }

    fn transition(&mut self, state: PipelineState) {
        trace!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Run until the source ends, a stop is requested or the sink quits.
    ///
    /// Fatal errors (capture failures, output io errors) are returned after the
    /// source and sink are released.
    pub fn run(&mut self) -> Result<PipelineStats, VisionError> {
        info!(
            "Pipeline started: every {} frame(s), {:?} budget, skip policy {:?}",
            self.every_n, self.frame_budget, self.skip_policy
        );

        let mut stats = PipelineStats::default();
        let result = self.run_loop(&mut stats);

        self.source.release();
        self.sink.close();
        self.transition(PipelineState::Stopped);

        match result {
            Ok(reason) => {
                stats.stop_reason = Some(reason);
                info!(
                    "Pipeline stopped ({:?}): {} captured, {} processed, {} detections, avg {:?}",
                    reason,
                    stats.frames_captured,
                    stats.frames_processed,
                    stats.detections,
                    stats.average_processing_time()
                );
                Ok(stats)
            }
            Err(e) => {
                error!("Pipeline stopped on fatal error: {}", e);
                Err(e)
            }
        }
    }

    fn run_loop(&mut self, stats: &mut PipelineStats) -> Result<StopReason, VisionError> {
        loop {
            if self.stop.is_stopped() {
                return Ok(StopReason::StopRequested);
            }

            self.transition(PipelineState::CapturingFrame);
            let frame = match self.source.next_frame()? {
                Some(frame) => frame,
                None => return Ok(StopReason::SourceExhausted),
            };
            stats.frames_captured += 1;

            let index = self.frame_counter;
            self.frame_counter += 1;

            let control = if should_process(index, self.every_n) {
                self.process_frame(index, &frame, stats)
            } else {
                match self.skip_policy {
                    SkipPolicy::PassThrough => {
                        stats.frames_passed_through += 1;
                        self.transition(PipelineState::Displaying);
                        self.display(&frame, false)
                    }
                    SkipPolicy::Drop => {
                        stats.frames_dropped += 1;
                        self.poll_sink()
                    }
                }
            };

            if control? == SinkControl::Stop {
                return Ok(StopReason::SinkClosed);
            }
        }
    }

    fn process_frame(
        &mut self,
        index: u64,
        frame: &RgbImage,
        stats: &mut PipelineStats,
    ) -> Result<SinkControl, VisionError> {
        let started = Instant::now();

        self.transition(PipelineState::Correcting);
        let corrected = self.processor.correct(frame);

        self.transition(PipelineState::Detecting);
        let shown = match self.processor.detect(&corrected) {
            Ok(detections) => {
                self.transition(PipelineState::Rendering);
                let rendered = self.processor.annotate(&corrected, &detections);
                stats.detections += rendered.annotations.len() as u64;
                stats.degenerate_projections += rendered.degenerate_count() as u64;
                debug!("Frame {}: {} detections", index, rendered.annotations.len());
                Some(rendered.image)
            }
            Err(e) => {
                error!("Frame processing error: {}", e);
                stats.detector_failures += 1;
                None
            }
        };

        let elapsed = started.elapsed();
        stats.frames_processed += 1;
        stats.processing_time += elapsed;
        if elapsed > self.frame_budget {
            stats.frames_over_budget += 1;
            warn!(
                "Frame {} took {:?}, over the {:?} budget",
                index, elapsed, self.frame_budget
            );
        }

        self.transition(PipelineState::Displaying);
        match shown {
            Some(image) => self.display(&image, true),
            None => self.display(frame, false),
        }
    }

    fn display(&mut self, frame: &RgbImage, processed: bool) -> Result<SinkControl, VisionError> {
        match self.sink.show(frame, processed) {
            Ok(control) => Ok(control),
            Err(e) if !e.is_fatal() => {
                error!("Display error: {}", e);
                Ok(SinkControl::Continue)
            }
            Err(e) => Err(e),
        }
    }

    fn poll_sink(&mut self) -> Result<SinkControl, VisionError> {
        match self.sink.poll() {
            Ok(control) => Ok(control),
            Err(e) if !e.is_fatal() => {
                error!("Display error: {}", e);
                Ok(SinkControl::Continue)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_process_every_frame() {
        assert!((0..5).all(|i| should_process(i, 1)));
    }

    #[test]
    fn test_should_process_every_third() {
        let processed: Vec<u64> = (0..10).filter(|&i| should_process(i, 3)).collect();
        assert_eq!(processed, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_stop_handle_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_average_processing_time() {
        let mut stats = PipelineStats::default();
        assert_eq!(stats.average_processing_time(), Duration::ZERO);
        stats.frames_processed = 4;
        stats.processing_time = Duration::from_millis(40);
        assert_eq!(stats.average_processing_time(), Duration::from_millis(10));
    }

    #[test]
    fn test_skip_policy_serde() {
        let policy: SkipPolicy = serde_json::from_str("\"drop\"").unwrap();
        assert_eq!(policy, SkipPolicy::Drop);
        assert_eq!(SkipPolicy::default(), SkipPolicy::PassThrough);
    }
}
