// SPDX-License-Identifier: GPL-3.0-only

//! Portable scalar backend
//!
//! The reference for every other backend. The per-pixel helpers here are also
//! used by the SIMD backends for the tail that does not fill a full register.

use super::rays::{RayCache, RayTable};
use super::{BackendKind, ReprojectionBackend, check_deproject, check_reproject};
use crate::calibration::{Extrinsics, Intrinsics};
use crate::errors::Result;
use crate::pointcloud::{Pixel, TexCoord, Vertex};

/// Deproject `depth[range]` using a prebuilt ray table
pub(crate) fn deproject_range(
    rays: &RayTable,
    depth: &[u16],
    depth_scale: f32,
    vertices: &mut [Vertex],
    range: std::ops::Range<usize>,
) {
    for i in range {
        let raw = depth[i];
        vertices[i] = if raw == 0 {
            Vertex::ZERO
        } else {
            let d = raw as f32 * depth_scale;
            Vertex::new(rays.x[i] * d, rays.y[i] * d, d)
        };
    }
}

/// Reproject a single vertex into the target raster
///
/// `None` for the no-data sentinel and for points that land at or behind the
/// target camera.
pub(crate) fn reproject_vertex(
    vertex: &Vertex,
    target: &Intrinsics,
    transform: &Extrinsics,
) -> Option<(TexCoord, Pixel)> {
    if vertex.z == 0.0 {
        return None;
    }
    let p = transform.transform_point(vertex.to_array());
    if p[2] <= 0.0 {
        return None;
    }
    let pixel = target.project_point(p);
    let [u, v] = target.pixel_to_texcoord(pixel);
    Some((TexCoord::new(u, v), Pixel::new(pixel[0], pixel[1])))
}

pub(crate) fn reproject_range(
    vertices: &[Vertex],
    target: &Intrinsics,
    transform: &Extrinsics,
    texcoords: &mut [TexCoord],
    pixels: &mut [Pixel],
    range: std::ops::Range<usize>,
) {
    for i in range {
        let (uv, px) = reproject_vertex(&vertices[i], target, transform)
            .unwrap_or((TexCoord::ZERO, Pixel::ZERO));
        texcoords[i] = uv;
        pixels[i] = px;
    }
}

/// Scalar backend, available everywhere
#[derive(Debug, Default)]
pub struct GenericBackend {
    rays: RayCache,
}

impl GenericBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReprojectionBackend for GenericBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Generic
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
        deproject_range(rays, depth, depth_scale, vertices, 0..depth.len());
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
        reproject_range(vertices, target, transform, texcoords, pixels, 0..vertices.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_by_two_scene() {
        let intr = Intrinsics::pinhole(2, 2, 1.0, 1.0, 0.0, 0.0);
        let depth = [1000u16, 0, 2000, 3000];
        let mut backend = GenericBackend::new();
        let mut vertices = vec![Vertex::ZERO; 4];
        backend.deproject(&depth, &intr, 0.001, &mut vertices).unwrap();

        let z: Vec<f32> = vertices.iter().map(|v| v.z).collect();
        assert_eq!(z, vec![1.0, 0.0, 2.0, 3.0]);
        assert_eq!(vertices[1], Vertex::ZERO);

        let mut uv = vec![TexCoord::ZERO; 4];
        let mut px = vec![Pixel::ZERO; 4];
        backend
            .reproject(&vertices, &intr, &Extrinsics::IDENTITY, &mut uv, &mut px)
            .unwrap();
        // Pixel (0,1) at 2 m lands back on (0,1)
        assert!((px[2].y - 1.0).abs() < 1e-6);
        assert!((uv[2].v - 0.5).abs() < 1e-6);
        // Pixel (1,1)
        assert!((uv[3].u - 0.5).abs() < 1e-6);
        assert!((uv[3].v - 0.5).abs() < 1e-6);
        assert_eq!(uv[1], TexCoord::ZERO);
    }

    #[test]
    fn test_point_behind_target_is_dropped() {
        let intr = Intrinsics::pinhole(2, 2, 1.0, 1.0, 0.0, 0.0);
        let flip = Extrinsics::from_translation([0.0, 0.0, -5.0]);
        assert!(reproject_vertex(&Vertex::new(0.0, 0.0, 1.0), &intr, &flip).is_none());
        assert!(reproject_vertex(&Vertex::ZERO, &intr, &Extrinsics::IDENTITY).is_none());
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let intr = Intrinsics::pinhole(2, 2, 1.0, 1.0, 0.0, 0.0);
        let mut backend = GenericBackend::new();
        let mut vertices = vec![Vertex::ZERO; 3];
        assert!(backend.deproject(&[0; 4], &intr, 0.001, &mut vertices).is_err());
    }
}
