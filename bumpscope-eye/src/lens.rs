//! Fisheye lens correction
//!
//! The remap table is derived once from the calibration and reused for every
//! frame. The camera model is the equidistant fisheye model with four radial
//! coefficients: `theta_d = theta * (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)`.

use crate::config::CameraConfig;
use crate::error::VisionError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Vector2, Vector3};
use std::f64::consts::FRAC_PI_2;
use std::time::Instant;
use tracing::{debug, info};

/// Number of fisheye distortion coefficients (k1..k4)
pub const FISHEYE_COEFFICIENTS: usize = 4;

const NEWTON_ITERATIONS: usize = 10;
const NEWTON_EPSILON: f64 = 1e-8;

/// Fixed camera calibration
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    intrinsics: Matrix3<f64>,
    distortion: [f64; FISHEYE_COEFFICIENTS],
    size: (u32, u32),
    balance: f64,
}

impl CameraModel {
    /// Create a camera model, rejecting malformed calibration data
    pub fn new(
        intrinsics: Matrix3<f64>,
        distortion: &[f64],
        size: (u32, u32),
        balance: f64,
    ) -> Result<Self, VisionError> {
        if intrinsics.iter().any(|v| !v.is_finite()) {
            return Err(VisionError::Config(
                "Camera matrix contains non-finite values".to_string(),
            ));
        }
        if intrinsics[(0, 0)] <= 0.0 || intrinsics[(1, 1)] <= 0.0 {
            return Err(VisionError::Config(
                "Camera focal lengths must be positive".to_string(),
            ));
        }
        if intrinsics[(1, 0)] != 0.0
            || intrinsics[(2, 0)] != 0.0
            || intrinsics[(2, 1)] != 0.0
            || intrinsics[(2, 2)] != 1.0
        {
            return Err(VisionError::Config(
                "Camera matrix must be upper triangular with K[2][2] = 1".to_string(),
            ));
        }

        let distortion: [f64; FISHEYE_COEFFICIENTS] = distortion.try_into().map_err(|_| {
            VisionError::Config(format!(
                "Fisheye model needs {} distortion coefficients, got {}",
                FISHEYE_COEFFICIENTS,
                distortion.len()
            ))
        })?;
        if distortion.iter().any(|v| !v.is_finite()) {
            return Err(VisionError::Config(
                "Distortion coefficients contain non-finite values".to_string(),
            ));
        }

        if size.0 == 0 || size.1 == 0 {
            return Err(VisionError::Config("Output size must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&balance) {
            return Err(VisionError::Config(format!(
                "Balance must be in [0, 1], got {}",
                balance
            )));
        }

        Ok(Self {
            intrinsics,
            distortion,
            size,
            balance,
        })
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self, VisionError> {
        let k = Matrix3::from_fn(|r, c| config.intrinsics[r][c]);
        Self::new(k, &config.distortion, config.resolution, config.balance)
    }

    pub fn intrinsics(&self) -> &Matrix3<f64> {
        &self.intrinsics
    }

    pub fn distortion(&self) -> &[f64; FISHEYE_COEFFICIENTS] {
        &self.distortion
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    fn skew(&self) -> f64 {
        self.intrinsics[(0, 1)] / self.intrinsics[(0, 0)]
    }

    /// Distorted angle for an incidence angle `theta`
    pub fn distort_theta(&self, theta: f64) -> f64 {
        let [k1, k2, k3, k4] = self.distortion;
        let t2 = theta * theta;
        let t4 = t2 * t2;
        let t6 = t4 * t2;
        let t8 = t4 * t4;
        theta * (1.0 + k1 * t2 + k2 * t4 + k3 * t6 + k4 * t8)
    }

    /// Project a normalized undistorted point back into the distorted image
    pub fn distort_normalized(&self, point: Vector2<f64>) -> Vector2<f64> {
        let r = point.norm();
        let theta_d = self.distort_theta(r.atan());
        let scale = if r == 0.0 { 1.0 } else { theta_d / r };
        let xd = point.x * scale;
        let yd = point.y * scale;
        let k = &self.intrinsics;
        Vector2::new(
            k[(0, 0)] * (xd + self.skew() * yd) + k[(0, 2)],
            k[(1, 1)] * yd + k[(1, 2)],
        )
    }

    /// Undistort a pixel into normalized camera coordinates.
    ///
    /// Inverts the distortion polynomial with Newton iterations.
    pub fn undistort_pixel(&self, u: f64, v: f64) -> Vector2<f64> {
        let k = &self.intrinsics;
        let y = (v - k[(1, 2)]) / k[(1, 1)];
        let x = (u - k[(0, 2)]) / k[(0, 0)] - self.skew() * y;

        let theta_d = (x * x + y * y).sqrt().min(FRAC_PI_2);
        if theta_d <= NEWTON_EPSILON {
            return Vector2::new(x, y);
        }

        let [k1, k2, k3, k4] = self.distortion;
        let mut theta = theta_d;
        for _ in 0..NEWTON_ITERATIONS {
            let t2 = theta * theta;
            let t4 = t2 * t2;
            let t6 = t4 * t2;
            let t8 = t4 * t4;
            let value = theta * (1.0 + k1 * t2 + k2 * t4 + k3 * t6 + k4 * t8) - theta_d;
            let slope = 1.0 + 3.0 * k1 * t2 + 5.0 * k2 * t4 + 7.0 * k3 * t6 + 9.0 * k4 * t8;
            let fix = value / slope;
            theta -= fix;
            if fix.abs() < NEWTON_EPSILON {
                break;
            }
        }

        let scale = theta.tan() / theta_d;
        Vector2::new(x * scale, y * scale)
    }

    /// Camera matrix of the rectified output image.
    ///
    /// The four edge midpoints are undistorted; each yields the focal length
    /// that would put it exactly on the output border. `balance` interpolates
    /// between the smallest (everything visible) and the largest (no black
    /// border) of those focal lengths.
    pub fn estimate_new_camera_matrix(&self) -> Result<Matrix3<f64>, VisionError> {
        let (w, h) = (self.size.0 as f64, self.size.1 as f64);
        let edges = [(w / 2.0, 0.0), (w, h / 2.0), (w / 2.0, h), (0.0, h / 2.0)];

        let aspect = self.intrinsics[(0, 0)] / self.intrinsics[(1, 1)];
        let mut points: Vec<Vector2<f64>> = edges
            .iter()
            .map(|&(u, v)| self.undistort_pixel(u, v))
            .collect();

        let mut center = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / 4.0;
        center.y *= aspect;
        for p in points.iter_mut() {
            p.y *= aspect;
        }

        let min_x = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let min_y = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_y = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

        let candidates = [
            w * 0.5 / (center.x - min_x),
            w * 0.5 / (max_x - center.x),
            h * 0.5 * aspect / (center.y - min_y),
            h * 0.5 * aspect / (max_y - center.y),
        ];
        if candidates.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(VisionError::Config(
                "Calibration produces a degenerate undistorted field of view".to_string(),
            ));
        }

        let f_min = candidates.iter().copied().fold(f64::INFINITY, f64::min);
        let f_max = candidates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let f = self.balance * f_min + (1.0 - self.balance) * f_max;

        let new_c = -center * f + Vector2::new(w * 0.5, h * 0.5 * aspect);

        Ok(Matrix3::new(
            f,
            0.0,
            new_c.x,
            0.0,
            f / aspect,
            new_c.y / aspect,
            0.0,
            0.0,
            1.0,
        ))
    }

    /// Derive the per-pixel remap table for this calibration
    pub fn remap_table(&self) -> Result<RemapTable, VisionError> {
        let new_k = self.estimate_new_camera_matrix()?;
        let inverse = new_k.try_inverse().ok_or_else(|| {
            VisionError::Config("Undistorted camera matrix is not invertible".to_string())
        })?;

        let (width, height) = self.size;
        let len = width as usize * height as usize;
        let mut map_x = Vec::with_capacity(len);
        let mut map_y = Vec::with_capacity(len);

        for row in 0..height {
            for col in 0..width {
                let ray = inverse * Vector3::new(col as f64, row as f64, 1.0);
                let source = self.distort_normalized(Vector2::new(ray.x / ray.z, ray.y / ray.z));
                map_x.push(source.x as f32);
                map_y.push(source.y as f32);
            }
        }

        Ok(RemapTable {
            width,
            height,
            map_x,
            map_y,
            camera_matrix: new_k,
        })
    }
}

/// Build the undistortion remap table for a fisheye calibration.
///
/// Fails with [`VisionError::Config`] on malformed inputs; callers are
/// expected to abort startup in that case.
pub fn build_remap(
    intrinsics: &Matrix3<f64>,
    distortion: &[f64],
    output_size: (u32, u32),
    balance: f64,
) -> Result<RemapTable, VisionError> {
    CameraModel::new(*intrinsics, distortion, output_size, balance)?.remap_table()
}

/// Output pixel to source pixel lookup
#[derive(Debug, Clone)]
pub struct RemapTable {
    width: u32,
    height: u32,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
    camera_matrix: Matrix3<f64>,
}

impl RemapTable {
    /// Table that samples every pixel from itself
    pub fn identity(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        let mut map_x = Vec::with_capacity(len);
        let mut map_y = Vec::with_capacity(len);
        for row in 0..height {
            for col in 0..width {
                map_x.push(col as f32);
                map_y.push(row as f32);
            }
        }
        Self {
            width,
            height,
            map_x,
            map_y,
            camera_matrix: Matrix3::identity(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Camera matrix of the undistorted image
    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    /// Source coordinate sampled for output pixel `(x, y)`
    pub fn source_coordinate(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        Some((self.map_x[idx], self.map_y[idx]))
    }
}

/// Applies a precomputed remap table to frames
#[derive(Debug, Clone)]
pub struct LensCorrector {
    table: RemapTable,
    border: Rgb<u8>,
}

impl LensCorrector {
    /// Build the remap table for `model`
    pub fn new(model: &CameraModel) -> Result<Self, VisionError> {
        let start = Instant::now();
        let table = model.remap_table()?;
        info!(
            "Remap table built for {}x{} (balance {}) in {:?}",
            table.width,
            table.height,
            model.balance(),
            start.elapsed()
        );
        Ok(Self::from_table(table))
    }

    pub fn from_table(table: RemapTable) -> Self {
        Self {
            table,
            border: Rgb([0, 0, 0]),
        }
    }

    /// Color used for samples that fall outside the source frame
    pub fn with_border(mut self, border: Rgb<u8>) -> Self {
        self.border = border;
        self
    }

    pub fn table(&self) -> &RemapTable {
        &self.table
    }

    /// Undistort a frame.
    ///
    /// Frames whose size differs from the table are resized first.
    pub fn apply(&self, frame: &RgbImage) -> RgbImage {
        let start = Instant::now();
        let (width, height) = self.table.dimensions();

        let resized;
        let source = if frame.dimensions() != (width, height) {
            resized = imageops::resize(frame, width, height, FilterType::Triangle);
            &resized
        } else {
            frame
        };

        let mut corrected = RgbImage::new(width, height);
        for (i, pixel) in corrected.pixels_mut().enumerate() {
            *pixel = sample_bilinear(source, self.table.map_x[i], self.table.map_y[i], self.border);
        }

        debug!("undistort {:?}", start.elapsed());
        corrected
    }
}

/// Bilinear sample with a constant border
fn sample_bilinear(source: &RgbImage, x: f32, y: f32, border: Rgb<u8>) -> Rgb<u8> {
    if !x.is_finite() || !y.is_finite() {
        return border;
    }

    let (width, height) = (source.width() as i64, source.height() as i64);
    let x0 = x.floor();
    let y0 = y.floor();
    let (ix, iy) = (x0 as i64, y0 as i64);
    if ix < -1 || iy < -1 || ix >= width || iy >= height {
        return border;
    }

    let tap = |px: i64, py: i64| -> [f32; 3] {
        let p = if px >= 0 && py >= 0 && px < width && py < height {
            source.get_pixel(px as u32, py as u32).0
        } else {
            border.0
        };
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let fx = x - x0;
    let fy = y - y0;
    let p00 = tap(ix, iy);
    let p10 = tap(ix + 1, iy);
    let p01 = tap(ix, iy + 1);
    let p11 = tap(ix + 1, iy + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
