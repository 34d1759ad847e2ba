// SPDX-License-Identifier: GPL-3.0-only

//! Uniform parameters shared by the deproject and reproject entry points

use crate::calibration::{Extrinsics, Intrinsics};

/// Uniform block for the point cloud shader
///
/// Scalars only, so the layout is identical in Rust and WGSL without
/// per-array stride padding. The size is a multiple of 16 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ReprojectParams {
    // === Depth raster ===
    /// Depth width in pixels
    pub width: u32,
    /// Depth height in pixels
    pub height: u32,
    /// Meters per depth unit
    pub depth_scale: f32,
    /// Target distortion model tag (see `Distortion::as_index`)
    pub model: u32,

    // === Target intrinsics ===
    pub target_width: f32,
    pub target_height: f32,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
    pub p1: f32,
    pub p2: f32,

    // === Depth to target transform (column-major rotation) ===
    pub r0: f32,
    pub r1: f32,
    pub r2: f32,
    pub r3: f32,
    pub r4: f32,
    pub r5: f32,
    pub r6: f32,
    pub r7: f32,
    pub r8: f32,
    pub t0: f32,
    pub t1: f32,
    pub t2: f32,
    /// Valid entries; invocations at or past this index do nothing
    pub count: u32,
}

impl ReprojectParams {
    /// Parameters for the deproject pass only
    pub fn for_deproject(width: u32, height: u32, depth_scale: f32) -> Self {
        Self {
            width,
            height,
            depth_scale,
            count: width * height,
            ..Default::default()
        }
    }

    /// Parameters for the reproject pass
    ///
    /// `count` may be less than `width * height` when a flat vertex list was
    /// folded into a raster.
    pub fn for_reproject(
        width: u32,
        height: u32,
        count: u32,
        target: &Intrinsics,
        transform: &Extrinsics,
    ) -> Self {
        let [k1, k2, p1, p2, k3] = target.coeffs;
        let r = transform.rotation;
        let t = transform.translation;
        Self {
            width,
            height,
            depth_scale: 0.0,
            model: target.model.as_index(),
            target_width: target.width as f32,
            target_height: target.height as f32,
            fx: target.fx,
            fy: target.fy,
            ppx: target.ppx,
            ppy: target.ppy,
            k1,
            k2,
            k3,
            p1,
            p2,
            r0: r[0],
            r1: r[1],
            r2: r[2],
            r3: r[3],
            r4: r[4],
            r5: r[5],
            r6: r[6],
            r7: r[7],
            r8: r[8],
            t0: t[0],
            t1: t[1],
            t2: t[2],
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_size_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<ReprojectParams>() % 16, 0);
    }
}
