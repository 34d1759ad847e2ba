// SPDX-License-Identifier: GPL-3.0-only

//! GPU deprojection and reprojection of depth frames
//!
//! Two entry points share one bind group layout: `deproject_main` turns raw
//! depth into vertices using the CPU-built ray table, `reproject_main` maps
//! vertices into the target camera.

mod processor;

pub use processor::PointCloudProcessor;

/// Point cloud shader source
const POINT_CLOUD_MAIN_WGSL: &str = include_str!("point_cloud_main.wgsl");

/// Get the point cloud shader source
pub fn point_cloud_shader() -> &'static str {
    POINT_CLOUD_MAIN_WGSL
}
