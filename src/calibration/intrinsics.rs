// SPDX-License-Identifier: GPL-3.0-only

//! Camera intrinsics and lens distortion models

use crate::constants::UNDISTORT_ITERATIONS;
use serde::{Deserialize, Serialize};

/// Lens distortion model attached to a stream's intrinsics
///
/// Coefficients are stored as `[k1, k2, p1, p2, k3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Distortion {
    /// Rectilinear image, no distortion
    #[default]
    None,
    /// Brown-Conrady with tangential terms evaluated after radial scaling
    /// (forward model, used when projecting into the image)
    ModifiedBrownConrady,
    /// Inverse of the modified model (used when deprojecting out of the image)
    InverseBrownConrady,
    /// Classic Brown-Conrady, usable in both directions
    BrownConrady,
    /// F-Theta fisheye
    FTheta,
    /// Kannala-Brandt fisheye with four coefficients
    KannalaBrandt4,
}

impl Distortion {
    /// All models, in wire order
    pub const ALL: [Distortion; 6] = [
        Distortion::None,
        Distortion::ModifiedBrownConrady,
        Distortion::InverseBrownConrady,
        Distortion::BrownConrady,
        Distortion::FTheta,
        Distortion::KannalaBrandt4,
    ];

    /// Whether [`Intrinsics::distort`] applies this model
    pub fn supports_projection(self) -> bool {
        matches!(
            self,
            Distortion::None | Distortion::ModifiedBrownConrady | Distortion::BrownConrady
        )
    }

    /// Whether [`Intrinsics::pixel_to_ray`] inverts this model
    pub fn supports_deprojection(self) -> bool {
        matches!(
            self,
            Distortion::None | Distortion::InverseBrownConrady | Distortion::BrownConrady
        )
    }

    /// Numeric tag shared with the GPU shader
    pub fn as_index(self) -> u32 {
        match self {
            Distortion::None => 0,
            Distortion::ModifiedBrownConrady => 1,
            Distortion::InverseBrownConrady => 2,
            Distortion::BrownConrady => 3,
            Distortion::FTheta => 4,
            Distortion::KannalaBrandt4 => 5,
        }
    }
}

impl std::fmt::Display for Distortion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Distortion::None => "None",
            Distortion::ModifiedBrownConrady => "Modified Brown Conrady",
            Distortion::InverseBrownConrady => "Inverse Brown Conrady",
            Distortion::BrownConrady => "Brown Conrady",
            Distortion::FTheta => "F-Theta",
            Distortion::KannalaBrandt4 => "Kannala Brandt4",
        };
        write!(f, "{}", name)
    }
}

/// Pinhole intrinsics plus a distortion model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Principal point X (pixels)
    pub ppx: f32,
    /// Principal point Y (pixels)
    pub ppy: f32,
    /// Focal length X (pixels)
    pub fx: f32,
    /// Focal length Y (pixels)
    pub fy: f32,
    /// Distortion model
    pub model: Distortion,
    /// Distortion coefficients `[k1, k2, p1, p2, k3]`
    pub coeffs: [f32; 5],
}

impl Intrinsics {
    /// Undistorted pinhole intrinsics
    pub fn pinhole(width: u32, height: u32, fx: f32, fy: f32, ppx: f32, ppy: f32) -> Self {
        Self {
            width,
            height,
            ppx,
            ppy,
            fx,
            fy,
            model: Distortion::None,
            coeffs: [0.0; 5],
        }
    }

    /// Replace the distortion model and coefficients
    pub fn with_distortion(mut self, model: Distortion, coeffs: [f32; 5]) -> Self {
        self.model = model;
        self.coeffs = coeffs;
        self
    }

    /// Number of pixels in the image
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Normalized camera ray `(x, y)` through pixel `(u, v)`; `(x, y, 1)`
    /// scaled by depth is the camera-space point.
    ///
    /// Inverse models run exactly [`UNDISTORT_ITERATIONS`] fixed-point steps.
    /// Models that cannot be inverted here leave the naive ray unchanged.
    pub fn pixel_to_ray(&self, u: f32, v: f32) -> [f32; 2] {
        let x0 = (u - self.ppx) / self.fx;
        let y0 = (v - self.ppy) / self.fy;
        let [k1, k2, p1, p2, k3] = self.coeffs;

        match self.model {
            Distortion::InverseBrownConrady => {
                let (mut x, mut y) = (x0, y0);
                for _ in 0..UNDISTORT_ITERATIONS {
                    let r2 = x * x + y * y;
                    let icdist = 1.0 / (1.0 + ((k3 * r2 + k2) * r2 + k1) * r2);
                    // Tangential terms act on the radially scaled point
                    let xq = x / icdist;
                    let yq = y / icdist;
                    let delta_x = 2.0 * p1 * xq * yq + p2 * (r2 + 2.0 * xq * xq);
                    let delta_y = 2.0 * p2 * xq * yq + p1 * (r2 + 2.0 * yq * yq);
                    x = (x0 - delta_x) * icdist;
                    y = (y0 - delta_y) * icdist;
                }
                [x, y]
            }
            Distortion::BrownConrady => {
                let (mut x, mut y) = (x0, y0);
                for _ in 0..UNDISTORT_ITERATIONS {
                    let r2 = x * x + y * y;
                    let icdist = 1.0 / (1.0 + ((k3 * r2 + k2) * r2 + k1) * r2);
                    let delta_x = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                    let delta_y = 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
                    x = (x0 - delta_x) * icdist;
                    y = (y0 - delta_y) * icdist;
                }
                [x, y]
            }
            _ => [x0, y0],
        }
    }

    /// Camera-space point for a pixel at a given depth (meters)
    pub fn deproject_pixel(&self, pixel: [f32; 2], depth: f32) -> [f32; 3] {
        let [x, y] = self.pixel_to_ray(pixel[0], pixel[1]);
        [x * depth, y * depth, depth]
    }

    /// Apply the forward distortion model to a normalized image point
    ///
    /// The SIMD backends mirror this expression term by term; keep the
    /// operation order in sync with them.
    pub fn distort(&self, x: f32, y: f32) -> [f32; 2] {
        let [k1, k2, p1, p2, k3] = self.coeffs;
        match self.model {
            Distortion::ModifiedBrownConrady => {
                let r2 = x * x + y * y;
                let f = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
                let x = x * f;
                let y = y * f;
                let dx = x + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let dy = y + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
                [dx, dy]
            }
            Distortion::BrownConrady => {
                let r2 = x * x + y * y;
                let f = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
                let xf = x * f;
                let yf = y * f;
                let dx = xf + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let dy = yf + 2.0 * p2 * x * y + p1 * (r2 + 2.0 * y * y);
                [dx, dy]
            }
            _ => [x, y],
        }
    }

    /// Pixel coordinate of a camera-space point. The caller guarantees `z > 0`.
    pub fn project_point(&self, point: [f32; 3]) -> [f32; 2] {
        let x = point[0] / point[2];
        let y = point[1] / point[2];
        let [x, y] = self.distort(x, y);
        [x * self.fx + self.ppx, y * self.fy + self.ppy]
    }

    /// Normalize a pixel coordinate by the image size
    pub fn pixel_to_texcoord(&self, pixel: [f32; 2]) -> [f32; 2] {
        [pixel[0] / self.width as f32, pixel[1] / self.height as f32]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d415_like() -> Intrinsics {
        Intrinsics::pinhole(640, 480, 615.2, 615.8, 318.4, 241.1)
    }

    #[test]
    fn test_naive_ray_through_principal_point() {
        let intr = d415_like();
        let [x, y] = intr.pixel_to_ray(intr.ppx, intr.ppy);
        assert_eq!(x, 0.0);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn test_deproject_project_round_trip() {
        let intr = d415_like();
        for &(u, v, d) in &[(0.0, 0.0, 0.5), (320.0, 240.0, 1.0), (639.0, 479.0, 4.2)] {
            let p = intr.deproject_pixel([u, v], d);
            assert_eq!(p[2], d);
            let px = intr.project_point(p);
            assert!((px[0] - u).abs() < 1e-3, "u {} vs {}", px[0], u);
            assert!((px[1] - v).abs() < 1e-3, "v {} vs {}", px[1], v);
        }
    }

    #[test]
    fn test_inverse_brown_conrady_inverts_modified_model() {
        let coeffs = [0.08, -0.03, 0.001, -0.0015, 0.004];
        let depth = d415_like().with_distortion(Distortion::InverseBrownConrady, coeffs);
        let color = d415_like().with_distortion(Distortion::ModifiedBrownConrady, coeffs);

        for &(u, v) in &[(10.0, 12.0), (320.0, 240.0), (600.0, 400.0)] {
            let p = depth.deproject_pixel([u, v], 2.0);
            let px = color.project_point(p);
            assert!((px[0] - u).abs() < 0.05, "u {} vs {}", px[0], u);
            assert!((px[1] - v).abs() < 0.05, "v {} vs {}", px[1], v);
        }
    }

    #[test]
    fn test_brown_conrady_round_trip() {
        let intr =
            d415_like().with_distortion(Distortion::BrownConrady, [0.05, -0.01, 0.0005, 0.0007, 0.0]);
        let p = intr.deproject_pixel([500.0, 60.0], 1.5);
        let px = intr.project_point(p);
        assert!((px[0] - 500.0).abs() < 0.05);
        assert!((px[1] - 60.0).abs() < 0.05);
    }

    #[test]
    fn test_unsupported_models_are_identity() {
        let coeffs = [0.3, 0.2, 0.1, 0.1, 0.1];
        for model in [Distortion::FTheta, Distortion::KannalaBrandt4] {
            let intr = d415_like().with_distortion(model, coeffs);
            assert_eq!(intr.distort(0.2, -0.1), [0.2, -0.1]);
            assert!(!model.supports_projection());
            assert!(!model.supports_deprojection());
        }
        // Direction-mismatched variants are skipped too
        let intr = d415_like().with_distortion(Distortion::InverseBrownConrady, coeffs);
        assert_eq!(intr.distort(0.2, -0.1), [0.2, -0.1]);
    }

    #[test]
    fn test_texcoord_normalization() {
        let intr = d415_like();
        assert_eq!(intr.pixel_to_texcoord([320.0, 120.0]), [0.5, 0.25]);
    }
}
