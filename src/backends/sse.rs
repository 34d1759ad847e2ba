// SPDX-License-Identifier: GPL-3.0-only

//! SSE2 backend for x86_64
//!
//! Processes eight pixels per iteration as two four-lane registers. Every lane
//! operation mirrors the scalar formula's order (no fused multiply-add), so
//! results are bit-identical to the generic backend.

use super::generic::{deproject_range, reproject_range};
use super::rays::{RayCache, RayTable};
use super::{BackendKind, ReprojectionBackend, check_deproject, check_reproject};
use crate::calibration::{Distortion, Extrinsics, Intrinsics};
use crate::constants::SIMD_PIXELS_PER_ITERATION;
use crate::errors::Result;
use crate::pointcloud::{Pixel, TexCoord, Vertex};
use std::arch::x86_64::*;

/// SSE2 backend
#[derive(Debug, Default)]
pub struct SseBackend {
    rays: RayCache,
}

impl SseBackend {
    /// Create the backend if the CPU supports SSE2
    pub fn new() -> Option<Self> {
        Self::is_supported().then(Self::default)
    }

    pub fn is_supported() -> bool {
        is_x86_feature_detected!("sse2")
    }
}

impl ReprojectionBackend for SseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sse
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
        // SAFETY: construction checked for SSE2; lengths validated above
        let done = unsafe { deproject_sse2(rays, depth, depth_scale, vertices) };
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
        // SAFETY: construction checked for SSE2; lengths validated above
        let done = unsafe { reproject_sse2(vertices, target, transform, texcoords, pixels) };
        reproject_range(vertices, target, transform, texcoords, pixels, done..vertices.len());
        Ok(())
    }
}

/// Deproject whole blocks of eight pixels, returning how many were written
#[target_feature(enable = "sse2")]
unsafe fn deproject_sse2(
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
        let zero_i = _mm_setzero_si128();
        let zero = _mm_setzero_ps();
        let scale = _mm_set1_ps(depth_scale);

        for block in 0..blocks {
            let base = block * SIMD_PIXELS_PER_ITERATION;
            let raw = _mm_loadu_si128(depth.as_ptr().add(base) as *const __m128i);
            let halves = [
                _mm_cvtepi32_ps(_mm_unpacklo_epi16(raw, zero_i)),
                _mm_cvtepi32_ps(_mm_unpackhi_epi16(raw, zero_i)),
            ];
            for (half, raw_f) in halves.into_iter().enumerate() {
                let off = half * 4;
                let valid = _mm_cmpneq_ps(raw_f, zero);
                let d = _mm_mul_ps(raw_f, scale);
                let rx = _mm_loadu_ps(rays.x.as_ptr().add(base + off));
                let ry = _mm_loadu_ps(rays.y.as_ptr().add(base + off));
                _mm_storeu_ps(
                    xs.as_mut_ptr().add(off),
                    _mm_and_ps(_mm_mul_ps(rx, d), valid),
                );
                _mm_storeu_ps(
                    ys.as_mut_ptr().add(off),
                    _mm_and_ps(_mm_mul_ps(ry, d), valid),
                );
                _mm_storeu_ps(zs.as_mut_ptr().add(off), _mm_and_ps(d, valid));
            }
            for k in 0..SIMD_PIXELS_PER_ITERATION {
                vertices[base + k] = Vertex::new(xs[k], ys[k], zs[k]);
            }
        }
    }
    blocks * SIMD_PIXELS_PER_ITERATION
}

/// Broadcast calibration constants
struct Lanes {
    r: [__m128; 9],
    t: [__m128; 3],
    fx: __m128,
    fy: __m128,
    ppx: __m128,
    ppy: __m128,
    width: __m128,
    height: __m128,
    k1: __m128,
    k2: __m128,
    k3: __m128,
    p1: __m128,
    p2: __m128,
    model: Distortion,
}

impl Lanes {
    #[target_feature(enable = "sse2")]
    unsafe fn new(target: &Intrinsics, transform: &Extrinsics) -> Self {
        let [k1, k2, p1, p2, k3] = target.coeffs;
        unsafe {
            let mut r = [_mm_setzero_ps(); 9];
            for (lane, value) in r.iter_mut().zip(transform.rotation.iter()) {
                *lane = _mm_set1_ps(*value);
            }
            let mut t = [_mm_setzero_ps(); 3];
            for (lane, value) in t.iter_mut().zip(transform.translation.iter()) {
                *lane = _mm_set1_ps(*value);
            }
            Self {
                r,
                t,
                fx: _mm_set1_ps(target.fx),
                fy: _mm_set1_ps(target.fy),
                ppx: _mm_set1_ps(target.ppx),
                ppy: _mm_set1_ps(target.ppy),
                width: _mm_set1_ps(target.width as f32),
                height: _mm_set1_ps(target.height as f32),
                k1: _mm_set1_ps(k1),
                k2: _mm_set1_ps(k2),
                k3: _mm_set1_ps(k3),
                p1: _mm_set1_ps(p1),
                p2: _mm_set1_ps(p2),
                model: target.model,
            }
        }
    }
}

/// Four projected lanes: texture u, v and pixel x, y, already masked
struct Projected {
    u: __m128,
    v: __m128,
    px: __m128,
    py: __m128,
}

#[target_feature(enable = "sse2")]
unsafe fn project4(l: &Lanes, x: __m128, y: __m128, z: __m128) -> Projected {
    unsafe {
        let zero = _mm_setzero_ps();
        let one = _mm_set1_ps(1.0);
        let two = _mm_set1_ps(2.0);

        let row = |a: __m128, b: __m128, c: __m128, t: __m128| {
            _mm_add_ps(
                _mm_add_ps(_mm_add_ps(_mm_mul_ps(a, x), _mm_mul_ps(b, y)), _mm_mul_ps(c, z)),
                t,
            )
        };
        let tx = row(l.r[0], l.r[3], l.r[6], l.t[0]);
        let ty = row(l.r[1], l.r[4], l.r[7], l.t[1]);
        let tz = row(l.r[2], l.r[5], l.r[8], l.t[2]);

        let mask = _mm_and_ps(_mm_cmpneq_ps(z, zero), _mm_cmpnle_ps(tz, zero));

        let mut nx = _mm_div_ps(tx, tz);
        let mut ny = _mm_div_ps(ty, tz);

        if matches!(l.model, Distortion::ModifiedBrownConrady | Distortion::BrownConrady) {
            let r2 = _mm_add_ps(_mm_mul_ps(nx, nx), _mm_mul_ps(ny, ny));
            let f = _mm_add_ps(
                _mm_add_ps(
                    _mm_add_ps(one, _mm_mul_ps(l.k1, r2)),
                    _mm_mul_ps(_mm_mul_ps(l.k2, r2), r2),
                ),
                _mm_mul_ps(_mm_mul_ps(_mm_mul_ps(l.k3, r2), r2), r2),
            );
            let xf = _mm_mul_ps(nx, f);
            let yf = _mm_mul_ps(ny, f);
            // The modified model evaluates the tangential terms on the scaled point
            let (qx, qy) = if l.model == Distortion::ModifiedBrownConrady {
                (xf, yf)
            } else {
                (nx, ny)
            };
            let dx = _mm_add_ps(
                _mm_add_ps(xf, _mm_mul_ps(_mm_mul_ps(_mm_mul_ps(two, l.p1), qx), qy)),
                _mm_mul_ps(l.p2, _mm_add_ps(r2, _mm_mul_ps(_mm_mul_ps(two, qx), qx))),
            );
            let dy = _mm_add_ps(
                _mm_add_ps(yf, _mm_mul_ps(_mm_mul_ps(_mm_mul_ps(two, l.p2), qx), qy)),
                _mm_mul_ps(l.p1, _mm_add_ps(r2, _mm_mul_ps(_mm_mul_ps(two, qy), qy))),
            );
            nx = dx;
            ny = dy;
        }

        let px = _mm_add_ps(_mm_mul_ps(nx, l.fx), l.ppx);
        let py = _mm_add_ps(_mm_mul_ps(ny, l.fy), l.ppy);
        Projected {
            u: _mm_and_ps(_mm_div_ps(px, l.width), mask),
            v: _mm_and_ps(_mm_div_ps(py, l.height), mask),
            px: _mm_and_ps(px, mask),
            py: _mm_and_ps(py, mask),
        }
    }
}

/// Reproject whole blocks of eight vertices, returning how many were written
#[target_feature(enable = "sse2")]
unsafe fn reproject_sse2(
    vertices: &[Vertex],
    target: &Intrinsics,
    transform: &Extrinsics,
    texcoords: &mut [TexCoord],
    pixels: &mut [Pixel],
) -> usize {
    let blocks = vertices.len() / SIMD_PIXELS_PER_ITERATION;
    let mut us = [0.0f32; 4];
    let mut vs = [0.0f32; 4];
    let mut pxs = [0.0f32; 4];
    let mut pys = [0.0f32; 4];

    unsafe {
        let lanes = Lanes::new(target, transform);
        for block in 0..blocks {
            for half in 0..2 {
                let base = block * SIMD_PIXELS_PER_ITERATION + half * 4;
                let v = &vertices[base..base + 4];
                let x = _mm_set_ps(v[3].x, v[2].x, v[1].x, v[0].x);
                let y = _mm_set_ps(v[3].y, v[2].y, v[1].y, v[0].y);
                let z = _mm_set_ps(v[3].z, v[2].z, v[1].z, v[0].z);

                let out = project4(&lanes, x, y, z);
                _mm_storeu_ps(us.as_mut_ptr(), out.u);
                _mm_storeu_ps(vs.as_mut_ptr(), out.v);
                _mm_storeu_ps(pxs.as_mut_ptr(), out.px);
                _mm_storeu_ps(pys.as_mut_ptr(), out.py);
                for k in 0..4 {
                    texcoords[base + k] = TexCoord::new(us[k], vs[k]);
                    pixels[base + k] = Pixel::new(pxs[k], pys[k]);
                }
            }
        }
    }
    blocks * SIMD_PIXELS_PER_ITERATION
}
