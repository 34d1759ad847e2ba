// SPDX-License-Identifier: GPL-3.0-only
//! Compute shaders and the GPU processors that drive them
//!
//! The point cloud shader is the single GPU implementation of deprojection and
//! reprojection. Its formulas mirror the generic CPU backend.

pub mod common;
mod gpu_processor;
pub mod gpu_utils;
pub mod point_cloud;

pub use gpu_processor::{
    CachedDimensions, compute_dispatch_size, dispatch_grid, fold_to_raster, read_buffer_async,
};
pub use point_cloud::{PointCloudProcessor, point_cloud_shader};
