// SPDX-License-Identifier: GPL-3.0-only

//! GPU point cloud processor
//!
//! Uploads a depth frame, runs deprojection or reprojection as a compute pass,
//! and reads the result back. Every call is dispatch-and-wait.

use crate::backends::RayTable;
use crate::calibration::{Extrinsics, Intrinsics};
use crate::constants::GPU_WORKGROUP_SIZE;
use crate::errors::{Error, Result};
use crate::gpu::{self, GpuDeviceInfo, wgpu};
use crate::pointcloud::{Pixel, TexCoord, Vertex};
use crate::shaders::common::ReprojectParams;
use crate::shaders::{CachedDimensions, dispatch_grid, gpu_utils, read_buffer_async};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-resolution GPU buffers
struct FrameBuffers {
    depth: wgpu::Buffer,
    rays: wgpu::Buffer,
    vertices: wgpu::Buffer,
    texcoords: wgpu::Buffer,
    pixels: wgpu::Buffer,
    vertices_staging: wgpu::Buffer,
    texcoords_staging: wgpu::Buffer,
    pixels_staging: wgpu::Buffer,
}

/// GPU point cloud processor
pub struct PointCloudProcessor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    deproject_pipeline: wgpu::ComputePipeline,
    reproject_pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    dims: CachedDimensions,
    buffers: Option<FrameBuffers>,
    /// Intrinsics of the ray table resident in the current buffers
    rays_for: Option<Intrinsics>,
}

impl std::fmt::Debug for PointCloudProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCloudProcessor")
            .field("info", &self.info)
            .field("dims", &self.dims)
            .finish()
    }
}

impl PointCloudProcessor {
    /// Create a new GPU point cloud processor
    pub async fn new() -> Result<Self> {
        info!("Initializing GPU point cloud processor");

        let (device, queue, gpu_info) = gpu::create_compute_device("point_cloud_gpu").await?;

        info!(
            adapter_name = %gpu_info.adapter_name,
            adapter_backend = ?gpu_info.backend,
            "GPU device created for point cloud processing"
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("point_cloud_shader"),
            source: wgpu::ShaderSource::Wgsl(super::point_cloud_shader().into()),
        });

        let bind_group_layout = gpu_utils::create_point_cloud_bind_group_layout(
            &device,
            "point_cloud_bind_group_layout",
        );

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("point_cloud_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let deproject_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("point_cloud_deproject_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("deproject_main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let reproject_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("point_cloud_reproject_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("reproject_main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("point_cloud_uniform_buffer"),
            size: std::mem::size_of::<ReprojectParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            info: gpu_info,
            deproject_pipeline,
            reproject_pipeline,
            bind_group_layout,
            uniform_buffer,
            dims: CachedDimensions::default(),
            buffers: None,
            rays_for: None,
        })
    }

    /// Adapter the processor runs on
    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    /// Raster size of the allocated buffers
    pub fn dimensions(&self) -> CachedDimensions {
        self.dims
    }

    /// Whether the resident ray table was built for `intrinsics`
    pub fn has_rays_for(&self, intrinsics: &Intrinsics) -> bool {
        self.rays_for.as_ref() == Some(intrinsics)
    }

    /// Ensure buffers are allocated for a `width x height` depth raster
    fn ensure_resources(&mut self, width: u32, height: u32) {
        if self.buffers.is_some() && !self.dims.needs_update(width, height) {
            return;
        }

        let pixels = width as u64 * height as u64;
        debug!(width, height, "Allocating point cloud buffers");

        let device = &self.device;
        self.buffers = Some(FrameBuffers {
            depth: gpu_utils::create_storage_buffer(device, "point_cloud_depth_buffer", pixels * 4),
            rays: gpu_utils::create_storage_buffer(device, "point_cloud_ray_buffer", pixels * 8),
            vertices: gpu_utils::create_storage_buffer(
                device,
                "point_cloud_vertex_buffer",
                pixels * 12,
            ),
            texcoords: gpu_utils::create_storage_buffer(
                device,
                "point_cloud_texcoord_buffer",
                pixels * 8,
            ),
            pixels: gpu_utils::create_storage_buffer(device, "point_cloud_pixel_buffer", pixels * 8),
            vertices_staging: gpu_utils::create_staging_buffer(
                device,
                "point_cloud_vertex_staging",
                pixels * 12,
            ),
            texcoords_staging: gpu_utils::create_staging_buffer(
                device,
                "point_cloud_texcoord_staging",
                pixels * 8,
            ),
            pixels_staging: gpu_utils::create_staging_buffer(
                device,
                "point_cloud_pixel_staging",
                pixels * 8,
            ),
        });
        self.dims.update(width, height);
        self.rays_for = None;
    }

    fn buffers(&self) -> Result<&FrameBuffers> {
        self.buffers
            .as_ref()
            .ok_or_else(|| Error::Gpu("Point cloud buffers not allocated".to_string()))
    }

    /// Upload the undistorted ray table for the current depth intrinsics
    pub fn upload_rays(&mut self, rays: &RayTable) -> Result<()> {
        let intr = rays.intrinsics();
        if intr.pixel_count() == 0 {
            return Ok(());
        }
        self.ensure_resources(intr.width, intr.height);
        let interleaved: Vec<f32> = rays
            .x
            .iter()
            .zip(rays.y.iter())
            .flat_map(|(x, y)| [*x, *y])
            .collect();
        let buffers = self.buffers()?;
        self.queue
            .write_buffer(&buffers.rays, 0, bytemuck::cast_slice(&interleaved));
        self.rays_for = Some(*intr);
        debug!(width = intr.width, height = intr.height, "Uploaded ray table");
        Ok(())
    }

    fn bind_group(&self, buffers: &FrameBuffers) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("point_cloud_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.depth.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.rays.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffers.texcoords.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: buffers.pixels.as_entire_binding(),
                },
            ],
        })
    }

    /// Record one compute pass over the depth raster plus the readback copies
    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        width: u32,
        height: u32,
        copies: &[(&wgpu::Buffer, &wgpu::Buffer)],
    ) -> Result<()> {
        let buffers = self.buffers()?;
        let max_workgroups = self.device.limits().max_compute_workgroups_per_dimension;
        let (workgroups_x, workgroups_y) =
            dispatch_grid(width, height, GPU_WORKGROUP_SIZE, max_workgroups)?;
        let bind_group = self.bind_group(buffers);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("point_cloud_encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("point_cloud_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, Some(&bind_group), &[]);
            pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
        }

        for (source, staging) in copies {
            encoder.copy_buffer_to_buffer(source, 0, staging, 0, staging.size());
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Deproject `depth` into `vertices`
    ///
    /// The ray table must have been uploaded for the same resolution.
    pub async fn deproject(
        &mut self,
        depth: &[u16],
        width: u32,
        height: u32,
        depth_scale: f32,
        vertices: &mut [Vertex],
    ) -> Result<()> {
        if depth.is_empty() {
            return Ok(());
        }
        self.ensure_resources(width, height);

        let params = ReprojectParams::for_deproject(width, height, depth_scale);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        // Upload depth data (convert u16 to u32)
        let depth_u32: Vec<u32> = depth.iter().map(|&d| d as u32).collect();
        let buffers = self.buffers()?;
        self.queue
            .write_buffer(&buffers.depth, 0, bytemuck::cast_slice(&depth_u32));

        self.dispatch(
            &self.deproject_pipeline,
            width,
            height,
            &[(&buffers.vertices, &buffers.vertices_staging)],
        )?;

        let len = std::mem::size_of_val(vertices);
        let bytes = read_buffer_async(&self.device, &buffers.vertices_staging, len).await?;
        bytemuck::cast_slice_mut::<Vertex, u8>(vertices).copy_from_slice(&bytes);
        Ok(())
    }

    /// Reproject `vertices` into the target camera
    ///
    /// `width x height` is the raster the vertices are laid out in and must
    /// hold at least `vertices.len()` entries.
    #[allow(clippy::too_many_arguments)]
    pub async fn reproject(
        &mut self,
        vertices: &[Vertex],
        width: u32,
        height: u32,
        target: &Intrinsics,
        transform: &Extrinsics,
        texcoords: &mut [TexCoord],
        pixels: &mut [Pixel],
    ) -> Result<()> {
        if vertices.is_empty() {
            return Ok(());
        }
        if (width as usize * height as usize) < vertices.len() {
            return Err(Error::Gpu(format!(
                "{}x{} raster cannot hold {} vertices",
                width,
                height,
                vertices.len()
            )));
        }
        self.ensure_resources(width, height);

        let params = ReprojectParams::for_reproject(
            width,
            height,
            vertices.len() as u32,
            target,
            transform,
        );
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let buffers = self.buffers()?;
        self.queue
            .write_buffer(&buffers.vertices, 0, bytemuck::cast_slice(vertices));

        self.dispatch(
            &self.reproject_pipeline,
            width,
            height,
            &[
                (&buffers.texcoords, &buffers.texcoords_staging),
                (&buffers.pixels, &buffers.pixels_staging),
            ],
        )?;

        let uv_len = std::mem::size_of_val(texcoords);
        let uv = read_buffer_async(&self.device, &buffers.texcoords_staging, uv_len).await?;
        bytemuck::cast_slice_mut::<TexCoord, u8>(texcoords).copy_from_slice(&uv);
        let px_len = std::mem::size_of_val(pixels);
        let px = read_buffer_async(&self.device, &buffers.pixels_staging, px_len).await?;
        bytemuck::cast_slice_mut::<Pixel, u8>(pixels).copy_from_slice(&px);
        Ok(())
    }
}
