//! Tests for AnnotatedRenderer

use bumpscope_eye::models::{BoundingBox, Detection};
use bumpscope_eye::palette::{ColorAssigner, ColorKeying};
use bumpscope_eye::projection::GroundProjector;
use bumpscope_eye::render::{clamp_box, AnnotatedRenderer, LabelMode, PixelRect};
use image::{Rgb, RgbImage};

fn bump(cx: f32, cy: f32, w: f32, h: f32) -> Detection {
    Detection::new("speed bump", 0.9, BoundingBox::new(cx, cy, w, h))
}

#[test]
fn test_box_past_frame_edge_is_clamped() {
    let renderer = AnnotatedRenderer::new(GroundProjector::identity());
    let frame = RgbImage::new(100, 80);
    let colors = ColorAssigner::new();

    let rendered = renderer.render(&frame, &[bump(95.0, 5.0, 30.0, 30.0)], &colors);
    let annotation = &rendered.annotations[0];
    assert_eq!(
        annotation.rect,
        PixelRect {
            left: 80,
            top: 0,
            right: 100,
            bottom: 20
        }
    );
    // No room above the box, so the label goes inside it
    assert_eq!(annotation.text_origin, (80, 1));
    assert_eq!(rendered.image.dimensions(), (100, 80));
}

#[test]
fn test_box_entirely_outside_does_not_panic() {
    let rect = clamp_box(&BoundingBox::new(-500.0, 900.0, 10.0, 10.0), 64, 48);
    assert_eq!(rect.left, 0);
    assert_eq!(rect.right, 0);
    assert_eq!(rect.top, 48);
    assert_eq!(rect.bottom, 48);

    let renderer = AnnotatedRenderer::new(GroundProjector::identity());
    let rendered = renderer.render(
        &RgbImage::new(64, 48),
        &[bump(-500.0, 900.0, 10.0, 10.0)],
        &ColorAssigner::new(),
    );
    assert_eq!(rendered.annotations.len(), 1);
}

#[test]
fn test_distance_label_uses_ground_y() {
    let renderer = AnnotatedRenderer::new(GroundProjector::identity());
    let rendered = renderer.render(
        &RgbImage::new(100, 100),
        &[bump(50.0, 40.0, 10.0, 10.0)],
        &ColorAssigner::new(),
    );
    let annotation = &rendered.annotations[0];
    assert_eq!(annotation.text, "distance:40");
    assert_eq!(annotation.distance, Some(40.0));
    assert_eq!(rendered.degenerate_count(), 0);
}

#[test]
fn test_degenerate_projection_still_draws_box() {
    let projector = GroundProjector::from_rows(&[
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0],
    ]);
    let renderer = AnnotatedRenderer::new(projector);
    let colors = ColorAssigner::new();
    let rendered = renderer.render(
        &RgbImage::new(100, 100),
        &[bump(50.0, 50.0, 20.0, 20.0)],
        &colors,
    );

    let annotation = &rendered.annotations[0];
    assert_eq!(annotation.text, "distance:n/a");
    assert!(annotation.ground.is_none());
    assert_eq!(rendered.degenerate_count(), 1);
    assert_eq!(*rendered.image.get_pixel(60, 52), annotation.color);
}

#[test]
fn test_positional_colors_follow_detection_order() {
    let renderer = AnnotatedRenderer::new(GroundProjector::identity());
    let colors = ColorAssigner::new();
    let frame = RgbImage::new(100, 100);
    let detections = [bump(50.0, 50.0, 20.0, 20.0), bump(20.0, 80.0, 10.0, 10.0)];

    let rendered = renderer.render(&frame, &detections, &colors);
    let table = colors.table();
    assert_eq!(rendered.annotations[0].color, table.get(0).unwrap());
    assert_eq!(rendered.annotations[1].color, table.get(1).unwrap());

    // Right edge of the first box, left edge of the second
    assert_eq!(*rendered.image.get_pixel(60, 52), table.get(0).unwrap());
    assert_eq!(*rendered.image.get_pixel(15, 80), table.get(1).unwrap());
    // Box interior is untouched
    assert_eq!(*rendered.image.get_pixel(50, 52), Rgb([0, 0, 0]));
    // Input frame is not modified
    assert_eq!(*frame.get_pixel(60, 52), Rgb([0, 0, 0]));
}

#[test]
fn test_by_class_colors_are_stable() {
    let renderer =
        AnnotatedRenderer::new(GroundProjector::identity()).with_color_keying(ColorKeying::ByClass);
    let colors = ColorAssigner::new();
    let frame = RgbImage::new(200, 200);
    let car = Detection::new("car", 0.8, BoundingBox::new(100.0, 100.0, 20.0, 20.0));

    let first = renderer.render(&frame, &[bump(50.0, 50.0, 10.0, 10.0), car.clone()], &colors);
    let second = renderer.render(&frame, &[car, bump(150.0, 150.0, 10.0, 10.0)], &colors);

    assert_eq!(first.annotations[0].color, second.annotations[1].color);
    assert_eq!(first.annotations[1].color, second.annotations[0].color);
    assert_ne!(first.annotations[0].color, first.annotations[1].color);
}

#[test]
fn test_by_class_colors_survive_a_new_class() {
    let renderer =
        AnnotatedRenderer::new(GroundProjector::identity()).with_color_keying(ColorKeying::ByClass);
    let colors = ColorAssigner::with_classes(&["speed bump", "car", "person"]);
    let frame = RgbImage::new(200, 200);
    let unknown = Detection::new("class_7", 0.7, BoundingBox::new(150.0, 150.0, 10.0, 10.0));

    let before = renderer.render(&frame, &[bump(50.0, 50.0, 10.0, 10.0)], &colors);
    let after = renderer.render(&frame, &[bump(50.0, 50.0, 10.0, 10.0), unknown], &colors);

    assert_eq!(before.annotations[0].color, after.annotations[0].color);
    assert_ne!(after.annotations[1].color, after.annotations[0].color);
    assert_eq!(colors.class_count(), 4);
}

#[test]
fn test_class_score_label_mode() {
    let renderer =
        AnnotatedRenderer::new(GroundProjector::identity()).with_label_mode(LabelMode::ClassScore);
    let rendered = renderer.render(
        &RgbImage::new(100, 100),
        &[bump(50.0, 50.0, 20.0, 20.0)],
        &ColorAssigner::new(),
    );
    assert_eq!(rendered.annotations[0].text, "speed bump 0.90");
}

#[test]
fn test_no_detections_leaves_frame_unchanged() {
    let renderer = AnnotatedRenderer::new(GroundProjector::identity());
    let frame = RgbImage::from_pixel(32, 32, Rgb([5, 6, 7]));
    let rendered = renderer.render(&frame, &[], &ColorAssigner::new());
    assert!(rendered.annotations.is_empty());
    assert_eq!(rendered.image, frame);
}
