// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU processor infrastructure
//!
//! Dimension caching, raster folding for flat point lists, workgroup grid
//! checks and staging buffer readback.

use crate::errors::{Error, Result};
use crate::gpu::wgpu;

/// Raster size of the resident point cloud buffers
///
/// Buffers are reallocated only when a frame arrives with different
/// dimensions.
#[derive(Default, Clone, Copy, PartialEq, Debug)]
pub struct CachedDimensions {
    pub width: u32,
    pub height: u32,
}

impl CachedDimensions {
    /// Whether a `width x height` raster needs new buffers
    pub fn needs_update(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }

    pub fn update(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Whether buffers have been allocated at all
    pub fn is_initialized(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Number of pixels the buffers hold
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Lay out `count` independent points as a raster at most `max_width` wide
///
/// Reprojection does not care about raster shape, but a single row of a full
/// HD frame needs more workgroups along X than a device allows. The last row
/// may be partially filled; the shader skips indices at or past `count`.
pub fn fold_to_raster(count: u32, max_width: u32) -> CachedDimensions {
    let width = count.clamp(1, max_width.max(1));
    CachedDimensions {
        width,
        height: count.div_ceil(width).max(1),
    }
}

/// Workgroup grid covering a `width x height` raster
///
/// Fails with [`Error::Gpu`] when either axis exceeds the device's
/// per-dimension workgroup limit, instead of letting the dispatch fail
/// validation.
pub fn dispatch_grid(
    width: u32,
    height: u32,
    workgroup_size: u32,
    max_workgroups: u32,
) -> Result<(u32, u32)> {
    let x = compute_dispatch_size(width, workgroup_size);
    let y = compute_dispatch_size(height, workgroup_size);
    if x > max_workgroups || y > max_workgroups {
        return Err(Error::Gpu(format!(
            "{}x{} raster needs {}x{} workgroups, device allows {} per dimension",
            width, height, x, y, max_workgroups
        )));
    }
    Ok((x, y))
}

/// Map a staging buffer, wait for the GPU and copy its first `len` bytes out
///
/// `buffer` must be `MAP_READ` and at least `len` bytes long.
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    len: usize,
) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| Error::Gpu(format!("Failed to poll device: {:?}", e)))?;

    receiver
        .await
        .map_err(|_| Error::Gpu("Failed to receive buffer mapping".to_string()))?
        .map_err(|e| Error::Gpu(format!("Failed to map buffer: {:?}", e)))?;

    let mapped = slice.get_mapped_range();
    let data = mapped
        .get(..len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::Gpu(format!("Staging buffer smaller than {} bytes", len)));
    drop(mapped);
    buffer.unmap();

    data
}

/// Workgroups needed to cover `dimension` invocations
#[inline]
pub fn compute_dispatch_size(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}
