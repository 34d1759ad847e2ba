// SPDX-License-Identifier: GPL-3.0-only

//! wgpu compute backend
//!
//! The ray table is built on the CPU with the reference undistortion and
//! uploaded whenever the intrinsics change. Results agree with the generic
//! backend within float rounding, not bit for bit.

use super::rays::RayCache;
use super::{BackendKind, ReprojectionBackend, check_deproject, check_reproject};
use crate::calibration::{Extrinsics, Intrinsics};
use crate::errors::Result;
use crate::pointcloud::{Pixel, TexCoord, Vertex};
use crate::constants::GPU_FOLD_WIDTH;
use crate::shaders::{PointCloudProcessor, fold_to_raster};
use tracing::debug;

/// GPU backend driving [`PointCloudProcessor`] synchronously
#[derive(Debug)]
pub struct GpuBackend {
    processor: PointCloudProcessor,
    rays: RayCache,
}

impl GpuBackend {
    /// Open a compute device and build the pipelines
    pub fn new() -> Result<Self> {
        let processor = pollster::block_on(PointCloudProcessor::new())?;
        Ok(Self {
            processor,
            rays: RayCache::default(),
        })
    }

    fn ensure_rays(&mut self, intrinsics: &Intrinsics) -> Result<()> {
        if self.processor.has_rays_for(intrinsics) {
            return Ok(());
        }
        let table = self.rays.get(intrinsics);
        self.processor.upload_rays(table)?;
        debug!(
            adapter = %self.processor.device_info().adapter_name,
            "GPU ray table refreshed"
        );
        Ok(())
    }
}

impl ReprojectionBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn preprocess(&mut self, intrinsics: &Intrinsics) -> Result<()> {
        self.ensure_rays(intrinsics)
    }

    fn deproject(
        &mut self,
        depth: &[u16],
        intrinsics: &Intrinsics,
        depth_scale: f32,
        vertices: &mut [Vertex],
    ) -> Result<()> {
        check_deproject(depth, intrinsics, vertices)?;
        if depth.is_empty() {
            return Ok(());
        }
        self.ensure_rays(intrinsics)?;
        pollster::block_on(self.processor.deproject(
            depth,
            intrinsics.width,
            intrinsics.height,
            depth_scale,
            vertices,
        ))
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
        // Reprojection is per vertex, so any raster with the right pixel
        // count works; reuse the resident one to avoid reallocating
        let resident = self.processor.dimensions();
        let dims = if resident.pixel_count() == vertices.len() {
            resident
        } else {
            fold_to_raster(vertices.len() as u32, GPU_FOLD_WIDTH)
        };
        let (width, height) = (dims.width, dims.height);
        pollster::block_on(self.processor.reproject(
            vertices, width, height, target, transform, texcoords, pixels,
        ))
    }
}
