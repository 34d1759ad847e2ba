// SPDX-License-Identifier: GPL-3.0-only

//! depthcloud - depth-to-point-cloud reprojection for multi-sensor depth cameras
//!
//! This library turns a raw depth frame plus the stream topology of a
//! multi-sensor device into a 3D point cloud with per-point texture
//! coordinates in another sensor's image.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`calibration`]: Intrinsics, extrinsics and the reference projection formulas
//! - [`stream`]: Stream profiles, depth frames and the shared [`Context`]
//! - [`graph`]: The lazily-evaluated transform graph between streams
//! - [`backends`]: Deprojection/reprojection backends (generic, SIMD, GPU)
//! - [`pointcloud`]: The point cloud processing block and occlusion filter
//! - [`config`]: Processing configuration
//!
//! # Example
//!
//! ```ignore
//! let ctx = Context::new();
//! let depth = ctx.create_video_stream(StreamKind::Depth, depth_intrinsics);
//! let color = ctx.create_video_stream(StreamKind::Color, color_intrinsics);
//! ctx.transform_graph().register_constant_transform(&depth, &color, depth_to_color);
//!
//! let mut pc = PointCloud::new(&ctx, PointCloudConfig::default());
//! pc.map_to(color.clone());
//! let points = pc.process(&frame)?;
//! ```

pub mod backends;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod errors;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod graph;
pub mod pointcloud;
#[cfg(feature = "gpu")]
pub mod shaders;
pub mod stream;

// Re-export commonly used types
pub use backends::{BackendKind, ReprojectionBackend};
pub use calibration::{Distortion, Extrinsics, Intrinsics};
pub use config::{BackendPreference, PointCloudConfig};
pub use errors::{Error, Result};
pub use graph::{GraphLock, LazyExtrinsics, NodeId, TransformGraph};
pub use pointcloud::{
    OcclusionMode, OptionRange, Pixel, PointCloud, PointCloudOption, Points, TexCoord, Texture,
    Vertex, export_points_las,
};
pub use stream::{
    Context, DepthFrame, StreamId, StreamKind, StreamProfile, StreamRef, VideoStreamProfile,
};
