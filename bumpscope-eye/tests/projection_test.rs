//! Tests for GroundProjector

use approx::assert_relative_eq;
use bumpscope_eye::config::PipelineConfig;
use bumpscope_eye::error::VisionError;
use bumpscope_eye::projection::{DistanceMetric, GroundProjector};
use proptest::prelude::*;

#[test]
fn test_identity_projection_keeps_pixel() {
    let projector = GroundProjector::identity();
    let point = projector.project(100.0, 50.0).unwrap();
    assert_relative_eq!(point.x, 100.0);
    assert_relative_eq!(point.y, 50.0);
    assert_relative_eq!(projector.distance(100.0, 50.0, DistanceMetric::Forward).unwrap(), 50.0);
}

#[test]
fn test_zero_bottom_row_is_degenerate() {
    let projector = GroundProjector::from_rows(&[
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0],
    ]);
    match projector.project(320.0, 200.0) {
        Err(VisionError::ProjectionDegenerate { denominator }) => assert_eq!(denominator, 0.0),
        other => panic!("expected degenerate projection, got {:?}", other),
    }
}

#[test]
fn test_euclidean_distance() {
    let projector = GroundProjector::identity();
    let d = projector.distance(3.0, 4.0, DistanceMetric::Euclidean).unwrap();
    assert_relative_eq!(d, 5.0);
}

#[test]
fn test_reference_transform_projects_road_pixels() {
    let config = PipelineConfig::default();
    let projector = GroundProjector::from_rows(&config.ground_transform);
    let near = projector.project(320.0, 340.0).unwrap();
    let far = projector.project(320.0, 250.0).unwrap();
    assert!(near.y.is_finite() && far.y.is_finite());
    assert_ne!(near.y, far.y);
}

proptest! {
    #[test]
    fn prop_identity_is_exact(x in -1.0e4f64..1.0e4, y in -1.0e4f64..1.0e4) {
        let point = GroundProjector::identity().project(x, y).unwrap();
        prop_assert_eq!(point.x, x);
        prop_assert_eq!(point.y, y);
    }

    #[test]
    fn prop_uniform_scale_cancels(
        x in -1.0e3f64..1.0e3,
        y in -1.0e3f64..1.0e3,
        s in 0.1f64..100.0,
    ) {
        let projector = GroundProjector::from_rows(&[
            [s, 0.0, 0.0],
            [0.0, s, 0.0],
            [0.0, 0.0, s],
        ]);
        let point = projector.project(x, y).unwrap();
        prop_assert!((point.x - x).abs() <= 1e-9 * x.abs().max(1.0));
        prop_assert!((point.y - y).abs() <= 1e-9 * y.abs().max(1.0));
    }

    #[test]
    fn prop_results_are_finite_or_degenerate(
        x in -1.0e3f64..1.0e3,
        y in -1.0e3f64..1.0e3,
        row in prop::array::uniform3(-10.0f64..10.0),
    ) {
        let projector = GroundProjector::from_rows(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], row]);
        match projector.project(x, y) {
            Ok(point) => prop_assert!(point.x.is_finite() && point.y.is_finite()),
            Err(VisionError::ProjectionDegenerate { .. }) => {}
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }
}
