// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing reprojection backends
//! - Converting raw depth files to LAS
//! - Running a synthetic occlusion scene

use depthcloud::backends::{self, BackendKind};
use depthcloud::{
    BackendPreference, Context, DepthFrame, Extrinsics, Intrinsics, OcclusionMode, PointCloud,
    PointCloudConfig, StreamKind, StreamRef, TexCoord, export_points_las,
};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Depth camera calibration given on the command line
#[derive(clap::Args, Debug)]
pub struct CameraArgs {
    #[arg(long, default_value = "525.0")]
    fx: f32,

    #[arg(long, default_value = "525.0")]
    fy: f32,

    /// Principal point X (default: image center)
    #[arg(long)]
    ppx: Option<f32>,

    /// Principal point Y (default: image center)
    #[arg(long)]
    ppy: Option<f32>,

    /// Map onto a color sensor with the same intrinsics this many meters
    /// along X
    #[arg(long, allow_hyphen_values = true)]
    baseline: Option<f32>,
}

impl CameraArgs {
    fn intrinsics(&self, width: u32, height: u32) -> Intrinsics {
        Intrinsics::pinhole(
            width,
            height,
            self.fx,
            self.fy,
            self.ppx.unwrap_or(width as f32 / 2.0),
            self.ppy.unwrap_or(height as f32 / 2.0),
        )
    }
}

/// Processing settings: a config file, overridden by individual flags
#[derive(clap::Args, Debug)]
pub struct ProcessingArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Occlusion mode (off, heuristic, exhaustive)
    #[arg(long)]
    occlusion: Option<OcclusionMode>,

    /// Backend (auto, generic, sse, neon, gpu)
    #[arg(long)]
    backend: Option<BackendPreference>,
}

impl ProcessingArgs {
    fn config(&self) -> depthcloud::Result<PointCloudConfig> {
        let mut config = match &self.config {
            Some(path) => PointCloudConfig::load(path)?,
            None => PointCloudConfig::default(),
        };
        if let Some(occlusion) = self.occlusion {
            config.occlusion = occlusion;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        Ok(config)
    }
}

/// Create depth (and optionally color) streams sharing `intrinsics`
fn create_streams(
    ctx: &Context,
    intrinsics: Intrinsics,
    baseline: Option<f32>,
) -> (StreamRef, Option<StreamRef>) {
    let depth = ctx.create_video_stream(StreamKind::Depth, intrinsics);
    let color = baseline.map(|b| {
        let color = ctx.create_video_stream(StreamKind::Color, intrinsics);
        ctx.transform_graph().register_constant_transform(
            &depth,
            &color,
            Extrinsics::from_translation([b, 0.0, 0.0]),
        );
        color
    });
    (depth, color)
}

/// List all reprojection backends
pub fn list_backends(probe_gpu: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("CPU backends (fastest first):");
    for kind in backends::available_cpu_backends() {
        println!("  {}", kind);
    }

    if probe_gpu {
        match backends::create_backend_kind(BackendKind::Gpu) {
            Some(_) => println!("GPU backend: available"),
            None => println!("GPU backend: unavailable"),
        }
    }
    Ok(())
}

/// Convert a raw depth file to a LAS point cloud
pub fn process_file(
    input: &Path,
    output: &Path,
    width: u32,
    height: u32,
    depth_scale: f32,
    camera: &CameraArgs,
    processing: &ProcessingArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = processing.config()?;
    let bytes = std::fs::read(input)?;

    let ctx = Context::new();
    let (depth, color) = create_streams(&ctx, camera.intrinsics(width, height), camera.baseline);
    let frame = DepthFrame::from_bytes(depth, &bytes, width, height, depth_scale)?;

    let mut pc = PointCloud::new(&ctx, config);
    if let Some(color) = color {
        pc.map_to(color);
    }

    let start = Instant::now();
    let points = pc.process(&frame)?;
    info!(elapsed_ms = start.elapsed().as_secs_f64() * 1000.0, "Processed frame");

    let written = export_points_las(points, None, output)?;
    println!("Wrote {} points to {}", written, output.display());
    Ok(())
}

/// Synthetic scene: a near box in front of a far wall
fn synthetic_depth(width: u32, height: u32, depth_scale: f32) -> Vec<u16> {
    let wall = (2.0 / depth_scale) as u16;
    let near = (1.0 / depth_scale) as u16;
    let (x0, x1) = (width / 3, 2 * width / 3);
    let (y0, y1) = (height / 3, 2 * height / 3);
    (0..height)
        .flat_map(|y| {
            (0..width).map(move |x| {
                if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
                    near
                } else {
                    wall
                }
            })
        })
        .collect()
}

/// Run the synthetic scene and report what the occlusion filter removed
pub fn run_demo(
    width: u32,
    height: u32,
    baseline: f32,
    output: Option<&Path>,
    occlusion: Option<OcclusionMode>,
    backend: Option<BackendPreference>,
) -> Result<(), Box<dyn std::error::Error>> {
    let depth_scale = 0.001;
    let intrinsics = Intrinsics::pinhole(
        width,
        height,
        width as f32 * 0.8,
        width as f32 * 0.8,
        width as f32 / 2.0,
        height as f32 / 2.0,
    );

    let ctx = Context::new();
    let (depth, color) = create_streams(&ctx, intrinsics, Some(baseline));
    let frame = DepthFrame::new(
        depth,
        synthetic_depth(width, height, depth_scale),
        width,
        height,
        depth_scale,
    )?;

    let config = PointCloudConfig {
        occlusion: occlusion.unwrap_or_default(),
        backend: backend.unwrap_or_default(),
    };
    let mut pc = PointCloud::new(&ctx, config);
    if let Some(color) = color {
        pc.map_to(color);
    }

    let start = Instant::now();
    let points = pc.process(&frame)?;
    let elapsed = start.elapsed();

    let total = points.len();
    let valid = points.valid_count();
    let untextured = points
        .iter_valid()
        .filter(|(_, uv)| **uv == TexCoord::ZERO)
        .count();

    println!("Backend:          {}", pc.backend_kind());
    println!("Occlusion mode:   {}", config.occlusion);
    println!("Resolution:       {}x{}", width, height);
    println!("Processing time:  {:.2} ms", elapsed.as_secs_f64() * 1000.0);
    println!("Valid points:     {} of {}", valid, total);
    println!("Removed vertices: {}", total - valid);
    println!("Untextured:       {}", untextured);

    if let Some(path) = output {
        let points = pc.points();
        let written = export_points_las(points, None, path)?;
        println!("Wrote {} points to {}", written, path.display());
    }
    Ok(())
}
