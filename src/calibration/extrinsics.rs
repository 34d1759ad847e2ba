// SPDX-License-Identifier: GPL-3.0-only

//! Rigid transforms between sensors

use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform from one sensor's frame to another's
///
/// The rotation is stored column-major so the SIMD and GPU kernels can
/// broadcast it directly; `p' = R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    /// Column-major 3x3 rotation
    pub rotation: [f32; 9],
    /// Translation in meters
    pub translation: [f32; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Extrinsics {
    /// Identity transform
    pub const IDENTITY: Extrinsics = Extrinsics {
        rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        translation: [0.0, 0.0, 0.0],
    };

    /// Build from nalgebra parts
    pub fn from_parts(rotation: &Matrix3<f32>, translation: &Vector3<f32>) -> Self {
        let mut r = [0.0; 9];
        r.copy_from_slice(rotation.as_slice());
        Self {
            rotation: r,
            translation: [translation.x, translation.y, translation.z],
        }
    }

    /// Pure translation
    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Rotation of `angle` radians about `axis`, followed by `translation`
    pub fn from_axis_angle(axis: [f32; 3], angle: f32, translation: [f32; 3]) -> Self {
        let axis = Unit::new_normalize(Vector3::from(axis));
        let rotation = Rotation3::from_axis_angle(&axis, angle);
        Self::from_parts(rotation.matrix(), &Vector3::from(translation))
    }

    /// Rotation as a matrix
    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        Matrix3::from_column_slice(&self.rotation)
    }

    /// Translation as a vector
    pub fn translation_vector(&self) -> Vector3<f32> {
        Vector3::from(self.translation)
    }

    /// Inverse transform: rotation transposed, translation negated and rotated
    pub fn inverse(&self) -> Self {
        let rt = self.rotation_matrix().transpose();
        let t = -(rt * self.translation_vector());
        Self::from_parts(&rt, &t)
    }

    /// Composition that applies `self` first and `next` second
    pub fn then(&self, next: &Extrinsics) -> Self {
        let r = next.rotation_matrix() * self.rotation_matrix();
        let t = next.rotation_matrix() * self.translation_vector() + next.translation_vector();
        Self::from_parts(&r, &t)
    }

    /// Transform a point: rotate, then translate
    ///
    /// Written out with a fixed evaluation order that the SIMD backends
    /// reproduce lane by lane.
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0] * p[0] + r[3] * p[1] + r[6] * p[2] + t[0],
            r[1] * p[0] + r[4] * p[1] + r[7] * p[2] + t[1],
            r[2] * p[0] + r[5] * p[1] + r[8] * p[2] + t[2],
        ]
    }

    /// Element-wise comparison within `eps`
    pub fn approx_eq(&self, other: &Extrinsics, eps: f32) -> bool {
        self.rotation
            .iter()
            .zip(other.rotation.iter())
            .chain(self.translation.iter().zip(other.translation.iter()))
            .all(|(a, b)| (a - b).abs() <= eps)
    }

    /// Whether this is the identity within `eps`
    pub fn is_identity(&self, eps: f32) -> bool {
        self.approx_eq(&Self::IDENTITY, eps)
    }
}
