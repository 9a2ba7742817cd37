//! Image plane to ground plane projection

use crate::error::VisionError;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Smallest accepted homogeneous denominator
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// Which quantity is reported as the object distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Projected ground Y coordinate (distance along the forward axis)
    #[default]
    Forward,
    /// Norm of the projected ground point
    Euclidean,
}

/// Point on the ground plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundPoint {
    pub x: f64,
    pub y: f64,
}

impl GroundPoint {
    pub fn distance(&self, metric: DistanceMetric) -> f64 {
        match metric {
            DistanceMetric::Forward => self.y,
            DistanceMetric::Euclidean => self.x.hypot(self.y),
        }
    }
}

/// Apply `transform` to `(x, y, 1)` and divide by the homogeneous coordinate
pub fn project(
    image_x: f64,
    image_y: f64,
    transform: &Matrix3<f64>,
    epsilon: f64,
) -> Result<GroundPoint, VisionError> {
    let h = transform * Vector3::new(image_x, image_y, 1.0);
    if !h.z.is_finite() || h.z.abs() < epsilon {
        return Err(VisionError::ProjectionDegenerate { denominator: h.z });
    }

    let point = GroundPoint {
        x: h.x / h.z,
        y: h.y / h.z,
    };
    if !point.x.is_finite() || !point.y.is_finite() {
        return Err(VisionError::ProjectionDegenerate { denominator: h.z });
    }
    Ok(point)
}

/// Fixed homography from undistorted image pixels to ground coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct GroundProjector {
    transform: Matrix3<f64>,
    epsilon: f64,
}

impl GroundProjector {
    pub fn new(transform: Matrix3<f64>) -> Self {
        Self {
            transform,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn from_rows(rows: &[[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn transform(&self) -> &Matrix3<f64> {
        &self.transform
    }

    pub fn project(&self, image_x: f64, image_y: f64) -> Result<GroundPoint, VisionError> {
        project(image_x, image_y, &self.transform, self.epsilon)
    }

    pub fn distance(
        &self,
        image_x: f64,
        image_y: f64,
        metric: DistanceMetric,
    ) -> Result<f64, VisionError> {
        self.project(image_x, image_y).map(|p| p.distance(metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perspective_division() {
        let projector = GroundProjector::from_rows(&[
            [2.0, 0.0, 0.0],
            [0.0, 4.0, 0.0],
            [0.0, 0.0, 2.0],
        ]);
        let p = projector.project(10.0, 5.0).unwrap();
        assert_relative_eq!(p.x, 10.0);
        assert_relative_eq!(p.y, 10.0);
    }

    #[test]
    fn test_translation_row() {
        let projector = GroundProjector::from_rows(&[
            [1.0, 0.0, 3.0],
            [0.0, 1.0, -2.0],
            [0.0, 0.0, 1.0],
        ]);
        let p = projector.project(1.0, 1.0).unwrap();
        assert_relative_eq!(p.x, 4.0);
        assert_relative_eq!(p.y, -1.0);
    }

    #[test]
    fn test_near_zero_denominator_is_degenerate() {
        // z' = x - 100 vanishes on the line x = 100
        let projector = GroundProjector::from_rows(&[
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, -100.0],
        ]);
        assert!(matches!(
            projector.project(100.0, 7.0),
            Err(VisionError::ProjectionDegenerate { .. })
        ));
        assert!(projector.project(101.0, 7.0).is_ok());
    }

    #[test]
    fn test_epsilon_is_configurable() {
        let projector = GroundProjector::from_rows(&[
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1e-3],
        ]);
        assert!(projector.project(1.0, 1.0).is_ok());
        assert!(projector.with_epsilon(1e-2).project(1.0, 1.0).is_err());
    }

    #[test]
    fn test_distance_metrics() {
        let point = GroundPoint { x: 3.0, y: 4.0 };
        assert_relative_eq!(point.distance(DistanceMetric::Forward), 4.0);
        assert_relative_eq!(point.distance(DistanceMetric::Euclidean), 5.0);
    }

    #[test]
    fn test_reference_homography_is_finite_in_lower_frame() {
        let rows = crate::config::PipelineConfig::default().ground_transform;
        let projector = GroundProjector::from_rows(&rows);
        let d = projector.distance(320.0, 300.0, DistanceMetric::Forward).unwrap();
        assert!(d.is_finite());
    }
}
