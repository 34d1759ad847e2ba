// SPDX-License-Identifier: GPL-3.0-only

//! NEON backend for aarch64
//!
//! Same layout as the SSE2 backend: eight pixels per iteration split across
//! two four-lane registers, separate multiply and add (no `vfma`), so results
//! match the generic backend bit for bit.

use super::generic::{deproject_range, reproject_range};
use super::rays::{RayCache, RayTable};
use super::{BackendKind, ReprojectionBackend, check_deproject, check_reproject};
use crate::calibration::{Distortion, Extrinsics, Intrinsics};
use crate::constants::SIMD_PIXELS_PER_ITERATION;
use crate::errors::Result;
use crate::pointcloud::{Pixel, TexCoord, Vertex};
use std::arch::aarch64::*;

/// NEON backend
#[derive(Debug, Default)]
pub struct NeonBackend {
    rays: RayCache,
}

impl NeonBackend {
    /// Create the backend if the CPU supports NEON
    pub fn new() -> Option<Self> {
        Self::is_supported().then(Self::default)
    }

    pub fn is_supported() -> bool {
        std::arch::is_aarch64_feature_detected!("neon")
    }
}

impl ReprojectionBackend for NeonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Neon
    }

    fn preprocess(&mut self, intrinsics: &Intrinsics) -> Result<()> {
        self.rays.get(intrinsics);
        Ok(())
    }

    fn deproject(
        &mut self,
        depth: &[u16],
        intrinsics: &Intrinsics,
        depth_scale: f32,
        vertices: &mut [Vertex],
    ) -> Result<()> {
        check_deproject(depth, intrinsics, vertices)?;
        let rays = self.rays.get(intrinsics);
        // SAFETY: construction checked for NEON; lengths validated above
        let done = unsafe { deproject_neon(rays, depth, depth_scale, vertices) };
        deproject_range(rays, depth, depth_scale, vertices, done..depth.len());
        Ok(())
    }

    fn reproject(
        &mut self,
        vertices: &[Vertex],
        target: &Intrinsics,
        transform: &Extrinsics,
        texcoords: &mut [TexCoord],
        pixels: &mut [Pixel],
    ) -> Result<()> {
        check_reproject(vertices, texcoords, pixels)?;
        // SAFETY: construction checked for NEON; lengths validated above
        let done = unsafe { reproject_neon(vertices, target, transform, texcoords, pixels) };
        reproject_range(vertices, target, transform, texcoords, pixels, done..vertices.len());
        Ok(())
    }
}

#[inline]
#[target_feature(enable = "neon")]
unsafe fn masked(value: float32x4_t, mask: uint32x4_t) -> float32x4_t {
    vreinterpretq_f32_u32(vandq_u32(vreinterpretq_u32_f32(value), mask))
}

#[target_feature(enable = "neon")]
unsafe fn deproject_neon(
    rays: &RayTable,
    depth: &[u16],
    depth_scale: f32,
    vertices: &mut [Vertex],
) -> usize {
    let blocks = depth.len() / SIMD_PIXELS_PER_ITERATION;
    let mut xs = [0.0f32; SIMD_PIXELS_PER_ITERATION];
    let mut ys = [0.0f32; SIMD_PIXELS_PER_ITERATION];
    let mut zs = [0.0f32; SIMD_PIXELS_PER_ITERATION];

    unsafe {
        let zero = vdupq_n_f32(0.0);
        let scale = vdupq_n_f32(depth_scale);

        for block in 0..blocks {
            let base = block * SIMD_PIXELS_PER_ITERATION;
            let raw = vld1q_u16(depth.as_ptr().add(base));
            let halves = [
                vcvtq_f32_u32(vmovl_u16(vget_low_u16(raw))),
                vcvtq_f32_u32(vmovl_high_u16(raw)),
            ];
            for (half, raw_f) in halves.into_iter().enumerate() {
                let off = half * 4;
                let valid = vmvnq_u32(vceqq_f32(raw_f, zero));
                let d = vmulq_f32(raw_f, scale);
                let rx = vld1q_f32(rays.x.as_ptr().add(base + off));
                let ry = vld1q_f32(rays.y.as_ptr().add(base + off));
                vst1q_f32(xs.as_mut_ptr().add(off), masked(vmulq_f32(rx, d), valid));
                vst1q_f32(ys.as_mut_ptr().add(off), masked(vmulq_f32(ry, d), valid));
                vst1q_f32(zs.as_mut_ptr().add(off), masked(d, valid));
            }
            for k in 0..SIMD_PIXELS_PER_ITERATION {
                vertices[base + k] = Vertex::new(xs[k], ys[k], zs[k]);
            }
        }
    }
    blocks * SIMD_PIXELS_PER_ITERATION
}

#[target_feature(enable = "neon")]
unsafe fn reproject_neon(
    vertices: &[Vertex],
    target: &Intrinsics,
    transform: &Extrinsics,
    texcoords: &mut [TexCoord],
    pixels: &mut [Pixel],
) -> usize {
    let blocks = vertices.len() / SIMD_PIXELS_PER_ITERATION;
    let [k1, k2, p1, p2, k3] = target.coeffs;
    let model = target.model;
    let distorted = matches!(
        model,
        Distortion::ModifiedBrownConrady | Distortion::BrownConrady
    );
    let mut lane = [[0.0f32; 4]; 3];
    let mut out = [[0.0f32; 4]; 4];

    unsafe {
        let r: [float32x4_t; 9] = [
            vdupq_n_f32(transform.rotation[0]),
            vdupq_n_f32(transform.rotation[1]),
            vdupq_n_f32(transform.rotation[2]),
            vdupq_n_f32(transform.rotation[3]),
            vdupq_n_f32(transform.rotation[4]),
            vdupq_n_f32(transform.rotation[5]),
            vdupq_n_f32(transform.rotation[6]),
            vdupq_n_f32(transform.rotation[7]),
            vdupq_n_f32(transform.rotation[8]),
        ];
        let t = [
            vdupq_n_f32(transform.translation[0]),
            vdupq_n_f32(transform.translation[1]),
            vdupq_n_f32(transform.translation[2]),
        ];
        let (fx, fy) = (vdupq_n_f32(target.fx), vdupq_n_f32(target.fy));
        let (ppx, ppy) = (vdupq_n_f32(target.ppx), vdupq_n_f32(target.ppy));
        let width = vdupq_n_f32(target.width as f32);
        let height = vdupq_n_f32(target.height as f32);
        let (vk1, vk2, vk3) = (vdupq_n_f32(k1), vdupq_n_f32(k2), vdupq_n_f32(k3));
        let (vp1, vp2) = (vdupq_n_f32(p1), vdupq_n_f32(p2));
        let zero = vdupq_n_f32(0.0);
        let one = vdupq_n_f32(1.0);
        let two = vdupq_n_f32(2.0);

        for block in 0..blocks {
            for half in 0..2 {
                let base = block * SIMD_PIXELS_PER_ITERATION + half * 4;
                for k in 0..4 {
                    let v = &vertices[base + k];
                    lane[0][k] = v.x;
                    lane[1][k] = v.y;
                    lane[2][k] = v.z;
                }
                let x = vld1q_f32(lane[0].as_ptr());
                let y = vld1q_f32(lane[1].as_ptr());
                let z = vld1q_f32(lane[2].as_ptr());

                let row = |a: float32x4_t, b: float32x4_t, c: float32x4_t, o: float32x4_t| {
                    vaddq_f32(
                        vaddq_f32(vaddq_f32(vmulq_f32(a, x), vmulq_f32(b, y)), vmulq_f32(c, z)),
                        o,
                    )
                };
                let tx = row(r[0], r[3], r[6], t[0]);
                let ty = row(r[1], r[4], r[7], t[1]);
                let tz = row(r[2], r[5], r[8], t[2]);

                let mask = vandq_u32(
                    vmvnq_u32(vceqq_f32(z, zero)),
                    vmvnq_u32(vcleq_f32(tz, zero)),
                );

                let mut nx = vdivq_f32(tx, tz);
                let mut ny = vdivq_f32(ty, tz);

                if distorted {
                    let r2 = vaddq_f32(vmulq_f32(nx, nx), vmulq_f32(ny, ny));
                    let f = vaddq_f32(
                        vaddq_f32(
                            vaddq_f32(one, vmulq_f32(vk1, r2)),
                            vmulq_f32(vmulq_f32(vk2, r2), r2),
                        ),
                        vmulq_f32(vmulq_f32(vmulq_f32(vk3, r2), r2), r2),
                    );
                    let xf = vmulq_f32(nx, f);
                    let yf = vmulq_f32(ny, f);
                    let (qx, qy) = if model == Distortion::ModifiedBrownConrady {
                        (xf, yf)
                    } else {
                        (nx, ny)
                    };
                    let dx = vaddq_f32(
                        vaddq_f32(xf, vmulq_f32(vmulq_f32(vmulq_f32(two, vp1), qx), qy)),
                        vmulq_f32(vp2, vaddq_f32(r2, vmulq_f32(vmulq_f32(two, qx), qx))),
                    );
                    let dy = vaddq_f32(
                        vaddq_f32(yf, vmulq_f32(vmulq_f32(vmulq_f32(two, vp2), qx), qy)),
                        vmulq_f32(vp1, vaddq_f32(r2, vmulq_f32(vmulq_f32(two, qy), qy))),
                    );
                    nx = dx;
                    ny = dy;
                }

                let px = vaddq_f32(vmulq_f32(nx, fx), ppx);
                let py = vaddq_f32(vmulq_f32(ny, fy), ppy);
                vst1q_f32(out[0].as_mut_ptr(), masked(vdivq_f32(px, width), mask));
                vst1q_f32(out[1].as_mut_ptr(), masked(vdivq_f32(py, height), mask));
                vst1q_f32(out[2].as_mut_ptr(), masked(px, mask));
                vst1q_f32(out[3].as_mut_ptr(), masked(py, mask));
                for k in 0..4 {
                    texcoords[base + k] = TexCoord::new(out[0][k], out[1][k]);
                    pixels[base + k] = Pixel::new(out[2][k], out[3][k]);
                }
            }
        }
    }
    blocks * SIMD_PIXELS_PER_ITERATION
}
