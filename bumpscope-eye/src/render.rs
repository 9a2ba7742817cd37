//! Box, label and distance rendering

use crate::config::RenderConfig;
use crate::error::VisionError;
use crate::models::{BoundingBox, Detection};
use crate::palette::{ColorAssigner, ColorKeying};
use crate::projection::{DistanceMetric, GroundPoint, GroundProjector};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, trace, warn};

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Which label is drawn above each box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// `distance:<ground y>`
    #[default]
    Distance,
    /// `<class> <confidence>`
    ClassScore,
    /// Class label followed by the distance label
    Both,
}

/// TrueType font used for labels
pub struct LabelFont {
    font: Font<'static>,
    scale: Scale,
}

impl LabelFont {
    pub fn from_bytes(bytes: Vec<u8>, size: f32) -> Result<Self, VisionError> {
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| VisionError::Config("Invalid TrueType font data".to_string()))?;
        Ok(Self {
            font,
            scale: Scale::uniform(size),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P, size: f32) -> Result<Self, VisionError> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(bytes, size)
    }
}

/// Integer box in frame pixels, edges inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelRect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Box corners clamped to `[0, width] x [0, height]`.
///
/// Corners are truncated toward zero before clamping.
pub fn clamp_box(bbox: &BoundingBox, width: u32, height: u32) -> PixelRect {
    let (left, top, right, bottom) = bbox.corners();
    let (w, h) = (width as i32, height as i32);
    let rect = PixelRect {
        left: (left as i32).clamp(0, w),
        top: (top as i32).clamp(0, h),
        right: (right as i32).clamp(0, w),
        bottom: (bottom as i32).clamp(0, h),
    };
    if rect.left as f32 != left.trunc()
        || rect.top as f32 != top.trunc()
        || rect.right as f32 != right.trunc()
        || rect.bottom as f32 != bottom.trunc()
    {
        trace!("Box {:?} clamped to {:?}", bbox, rect);
    }
    rect
}

/// Outline thickness for a frame size
pub fn line_thickness(width: u32, height: u32) -> u32 {
    ((width + height) / 300).max(1)
}

/// `distance:<value>`, or `distance:n/a` when the projection failed
pub fn distance_label(distance: Option<f64>) -> String {
    match distance {
        Some(d) => format!("distance:{}", d),
        None => "distance:n/a".to_string(),
    }
}

/// What was drawn for one detection
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub slot: usize,
    pub color: Rgb<u8>,
    pub rect: PixelRect,
    pub class_label: String,
    pub ground: Option<GroundPoint>,
    pub distance: Option<f64>,
    /// Text actually drawn
    pub text: String,
    pub text_origin: (i32, i32),
}

#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub image: RgbImage,
    pub annotations: Vec<Annotation>,
}

impl RenderedFrame {
    /// Detections whose distance could not be computed
    pub fn degenerate_count(&self) -> usize {
        self.annotations.iter().filter(|a| a.distance.is_none()).count()
    }
}

/// Draws detections onto frames. Keeps no state between calls.
pub struct AnnotatedRenderer {
    projector: GroundProjector,
    font: Option<LabelFont>,
    font_size: f32,
    label_mode: LabelMode,
    color_keying: ColorKeying,
    distance_metric: DistanceMetric,
}

impl AnnotatedRenderer {
    pub fn new(projector: GroundProjector) -> Self {
        Self {
            projector,
            font: None,
            font_size: 20.0,
            label_mode: LabelMode::default(),
            color_keying: ColorKeying::default(),
            distance_metric: DistanceMetric::default(),
        }
    }

    /// Renderer configured from the `[render]` section; loads the font if one is set
    pub fn from_config(
        projector: GroundProjector,
        config: &RenderConfig,
    ) -> Result<Self, VisionError> {
        let font = match &config.font_path {
            Some(path) => Some(LabelFont::load(path, config.font_size)?),
            None => None,
        };
        Ok(Self {
            projector,
            font,
            font_size: config.font_size,
            label_mode: config.label_mode,
            color_keying: config.color_keying,
            distance_metric: config.distance_metric,
        })
    }

    pub fn with_font(mut self, font: LabelFont) -> Self {
        self.font_size = font.scale.y;
        self.font = Some(font);
        self
    }

    pub fn with_label_mode(mut self, label_mode: LabelMode) -> Self {
        self.label_mode = label_mode;
        self
    }

    pub fn with_color_keying(mut self, color_keying: ColorKeying) -> Self {
        self.color_keying = color_keying;
        self
    }

    pub fn with_distance_metric(mut self, distance_metric: DistanceMetric) -> Self {
        self.distance_metric = distance_metric;
        self
    }

    pub fn projector(&self) -> &GroundProjector {
        &self.projector
    }

    fn text_extent(&self, text: &str) -> (i32, i32) {
        match &self.font {
            Some(font) => text_size(font.scale, &font.font, text),
            None => (
                (text.chars().count() as f32 * self.font_size * 0.6).ceil() as i32,
                self.font_size.ceil() as i32,
            ),
        }
    }

    fn label_text(&self, class_label: &str, distance: Option<f64>) -> String {
        match self.label_mode {
            LabelMode::Distance => distance_label(distance),
            LabelMode::ClassScore => class_label.to_string(),
            LabelMode::Both => format!("{} {}", class_label, distance_label(distance)),
        }
    }

    /// Draw `detections` (in the given order) onto a copy of `frame`
    pub fn render(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        colors: &ColorAssigner,
    ) -> RenderedFrame {
        let mut image = frame.clone();
        let (width, height) = image.dimensions();
        let thickness = line_thickness(width, height) as i32;

        let slots: Vec<usize> = match self.color_keying {
            ColorKeying::Positional => (0..detections.len()).collect(),
            ColorKeying::ByClass => detections
                .iter()
                .map(|d| colors.slot_for_class(&d.class_name))
                .collect(),
        };
        let needed = slots.iter().map(|s| s + 1).max().unwrap_or(0);
        let table = match self.color_keying {
            ColorKeying::Positional => colors.ensure_capacity(needed),
            ColorKeying::ByClass => colors.ensure_class_capacity(needed),
        };

        let mut annotations = Vec::with_capacity(detections.len());
        for (index, (detection, &slot)) in detections.iter().zip(&slots).enumerate() {
            let rect = clamp_box(&detection.bbox, width, height);

            let center_x = detection.bbox.center_x as f64;
            let center_y = detection.bbox.center_y as f64;
            let ground = match self.projector.project(center_x, center_y) {
                Ok(point) => {
                    debug!(
                        "center=({:.1}, {:.1}) ground=({:.3}, {:.3})",
                        center_x, center_y, point.x, point.y
                    );
                    Some(point)
                }
                Err(e) => {
                    warn!("No distance for detection {}: {}", index, e);
                    None
                }
            };
            let distance = ground.map(|p| p.distance(self.distance_metric));

            let class_label = detection.class_label();
            let text = self.label_text(&class_label, distance);
            let (text_w, text_h) = self.text_extent(&text);
            let text_origin = if rect.top - text_h >= 0 {
                (rect.left, rect.top - text_h)
            } else {
                (rect.left, rect.top + 1)
            };

            let color = table.get(slot).unwrap_or(TEXT_COLOR);

            for i in 0..thickness {
                let (l, t, r, b) = (rect.left + i, rect.top + i, rect.right - i, rect.bottom - i);
                if r < l || b < t {
                    break;
                }
                draw_hollow_rect_mut(
                    &mut image,
                    Rect::at(l, t).of_size((r - l + 1) as u32, (b - t + 1) as u32),
                    color,
                );
            }

            draw_filled_rect_mut(
                &mut image,
                Rect::at(text_origin.0, text_origin.1)
                    .of_size(text_w.max(0) as u32 + 1, text_h.max(0) as u32 + 1),
                color,
            );
            if let Some(font) = &self.font {
                draw_text_mut(
                    &mut image,
                    TEXT_COLOR,
                    text_origin.0,
                    text_origin.1,
                    font.scale,
                    &font.font,
                    &text,
                );
            }

            annotations.push(Annotation {
                slot,
                color,
                rect,
                class_label,
                ground,
                distance,
                text,
                text_origin,
            });
        }

        RenderedFrame { image, annotations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside_is_untouched() {
        let rect = clamp_box(&BoundingBox::new(100.0, 50.0, 40.0, 20.0), 640, 360);
        assert_eq!(
            rect,
            PixelRect {
                left: 80,
                top: 40,
                right: 120,
                bottom: 60
            }
        );
        assert_eq!(rect.width(), 40);
        assert_eq!(rect.height(), 20);
    }

    #[test]
    fn test_clamp_truncates_toward_zero() {
        let rect = clamp_box(&BoundingBox::new(10.7, 10.2, 5.0, 5.0), 640, 360);
        assert_eq!(rect.left, 8);
        assert_eq!(rect.top, 7);
        assert_eq!(rect.right, 13);
        assert_eq!(rect.bottom, 12);
    }

    #[test]
    fn test_clamp_nan_box() {
        let rect = clamp_box(&BoundingBox::new(f32::NAN, 10.0, 5.0, 5.0), 64, 36);
        assert_eq!(rect.left, 0);
        assert_eq!(rect.right, 0);
    }

    #[test]
    fn test_line_thickness() {
        assert_eq!(line_thickness(640, 360), 3);
        assert_eq!(line_thickness(1920, 1080), 10);
        assert_eq!(line_thickness(32, 32), 1);
    }

    #[test]
    fn test_distance_label() {
        assert_eq!(distance_label(Some(12.5)), "distance:12.5");
        assert_eq!(distance_label(None), "distance:n/a");
    }

    #[test]
    fn test_label_modes() {
        let renderer = AnnotatedRenderer::new(GroundProjector::identity());
        assert_eq!(renderer.label_text("bump 0.90", Some(3.0)), "distance:3");
        let renderer = renderer.with_label_mode(LabelMode::ClassScore);
        assert_eq!(renderer.label_text("bump 0.90", Some(3.0)), "bump 0.90");
        let renderer = renderer.with_label_mode(LabelMode::Both);
        assert_eq!(renderer.label_text("bump 0.90", None), "bump 0.90 distance:n/a");
    }

    #[test]
    fn test_invalid_font_rejected() {
        assert!(LabelFont::from_bytes(vec![0, 1, 2, 3], 20.0).is_err());
    }
}
