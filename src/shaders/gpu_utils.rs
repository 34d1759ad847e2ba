// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU utilities for the point cloud processor
//!
//! - Bind group layout creation
//! - Storage buffer allocation

use crate::gpu::wgpu;

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Create the bind group layout shared by both point cloud entry points.
///
/// Six bindings:
/// - 0: Uniform parameters
/// - 1: Depth input buffer (storage, read-only, u32 per pixel)
/// - 2: Ray table (storage, read-only, x/y per pixel)
/// - 3: Vertex buffer (storage, read-write, x/y/z per pixel)
/// - 4: Texture coordinate buffer (storage, read-write, u/v per pixel)
/// - 5: Pixel coordinate buffer (storage, read-write, x/y per pixel)
pub fn create_point_cloud_bind_group_layout(
    device: &wgpu::Device,
    label: &str,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            // Uniform parameters
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, false),
            storage_entry(4, false),
            storage_entry(5, false),
        ],
    })
}

/// Allocate a storage buffer of `size` bytes that can be written from the CPU
/// and copied out for readback
pub fn create_storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

/// Allocate a staging buffer of `size` bytes for readback
pub fn create_staging_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    })
}
