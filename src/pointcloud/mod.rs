// SPDX-License-Identifier: GPL-3.0-only

//! Point cloud processing block
//!
//! ```text
//! DepthFrame ──► deproject ──► vertices ──┬──────────────► Points
//!                                         │                  ▲
//!        TransformGraph::resolve ──► reproject ──► texcoords │
//!                                         │        pixels    │
//!                                         └──► OcclusionFilter
//! ```
//!
//! A [`PointCloud`] belongs to one processing thread. It caches the
//! calibration it resolved for the current depth and target streams and only
//! refreshes it when a stream identity or the depth intrinsics change.

mod export;
mod occlusion;
mod options;
mod points;

pub use export::{Texture, export_points_las};
pub use occlusion::{DepthRaster, OcclusionFilter, ScanDirection};
pub use options::{OcclusionMode, OptionRange, PointCloudOption};
pub use points::{Pixel, Points, TexCoord, Vertex};

use crate::backends::{self, BackendKind, ReprojectionBackend};
use crate::calibration::{Extrinsics, Intrinsics};
use crate::config::PointCloudConfig;
use crate::errors::{Error, Result};
use crate::stream::{Context, DepthFrame, StreamId, StreamRef};
use tracing::{debug, info, warn};

/// Calibration resolved for the current depth/target pair
#[derive(Debug, Default)]
struct CalibrationCache {
    depth_stream: Option<StreamId>,
    depth_intrinsics: Option<Intrinsics>,
    depth_scale: f32,
    target_stream: Option<StreamId>,
    target_intrinsics: Option<Intrinsics>,
    extrinsics: Option<Extrinsics>,
}

impl CalibrationCache {
    fn invalidate_transform(&mut self) {
        self.extrinsics = None;
    }
}

/// Turns depth frames into textured point clouds
pub struct PointCloud {
    context: Context,
    backend: Box<dyn ReprojectionBackend>,
    occlusion: OcclusionFilter,
    target: Option<StreamRef>,
    cache: CalibrationCache,
    points: Points,
    pixels: Vec<Pixel>,
}

impl std::fmt::Debug for PointCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCloud")
            .field("backend", &self.backend.kind())
            .field("occlusion", &self.occlusion.mode())
            .field("target", &self.target.as_ref().map(|t| t.unique_id()))
            .field("cache", &self.cache)
            .finish()
    }
}

impl PointCloud {
    /// Create a block using the backend and options from `config`
    pub fn new(context: &Context, config: PointCloudConfig) -> Self {
        let backend = backends::create_backend(config.backend);
        Self::with_backend(context, backend, config.occlusion)
    }

    /// Create a block around an explicit backend
    pub fn with_backend(
        context: &Context,
        backend: Box<dyn ReprojectionBackend>,
        occlusion: OcclusionMode,
    ) -> Self {
        info!(
            backend = %backend.kind(),
            occlusion = %occlusion,
            "Point cloud block created"
        );
        Self {
            context: context.clone(),
            backend,
            occlusion: OcclusionFilter::new(occlusion),
            target: None,
            cache: CalibrationCache::default(),
            points: Points::default(),
            pixels: Vec::new(),
        }
    }

    /// Backend doing the per-pixel work
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Texture the cloud with `target`'s image
    pub fn map_to(&mut self, target: StreamRef) {
        debug!(target = %target.unique_id(), kind = %target.kind(), "Mapping point cloud");
        self.target = Some(target);
    }

    /// Stop texturing; only vertices are produced
    pub fn unmap(&mut self) {
        self.target = None;
    }

    /// Stream the texture coordinates refer to
    pub fn target(&self) -> Option<&StreamRef> {
        self.target.as_ref()
    }

    pub fn supported_options(&self) -> &'static [PointCloudOption] {
        &[PointCloudOption::OcclusionMode]
    }

    pub fn option_range(&self, option: PointCloudOption) -> OptionRange {
        option.range()
    }

    pub fn get_option(&self, option: PointCloudOption) -> f32 {
        match option {
            PointCloudOption::OcclusionMode => self.occlusion.mode().as_value(),
        }
    }

    /// Set an option, rejecting values outside its range
    pub fn set_option(&mut self, option: PointCloudOption, value: f32) -> Result<()> {
        let invalid = |reason: String| Error::InvalidOption {
            option,
            value,
            reason,
        };
        option.range().validate(value).map_err(invalid)?;
        match option {
            PointCloudOption::OcclusionMode => {
                let mode = OcclusionMode::from_value(value)
                    .ok_or_else(|| invalid("not an occlusion mode".to_string()))?;
                debug!(mode = %mode, "Occlusion mode changed");
                self.occlusion.set_mode(mode);
            }
        }
        Ok(())
    }

    /// Output of the last processed frame
    pub fn points(&self) -> &Points {
        &self.points
    }

    /// Target raster pixel coordinates of the last processed frame
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Deproject, texture and filter one depth frame
    ///
    /// A missing transform or target intrinsics is not an error: vertices
    /// are still produced and texture coordinates are zero.
    pub fn process(&mut self, frame: &DepthFrame) -> Result<&Points> {
        let depth_intrinsics = frame.profile.intrinsics().ok_or_else(|| {
            Error::InvalidFrame(format!(
                "{} ({}) has no intrinsics",
                frame.profile.unique_id(),
                frame.profile.kind()
            ))
        })?;
        if depth_intrinsics.width != frame.width || depth_intrinsics.height != frame.height {
            return Err(Error::InvalidFrame(format!(
                "frame is {}x{} but its profile describes {}x{}",
                frame.width, frame.height, depth_intrinsics.width, depth_intrinsics.height
            )));
        }

        self.refresh_depth(frame, &depth_intrinsics)?;

        if self.points.ensure_size(frame.width, frame.height) {
            self.pixels = vec![Pixel::ZERO; self.points.len()];
            debug!(
                width = frame.width,
                height = frame.height,
                "Reallocated point cloud buffers"
            );
        }

        self.backend.deproject(
            &frame.data,
            &depth_intrinsics,
            frame.depth_scale,
            &mut self.points.vertices,
        )?;

        match self.resolve_target(&frame.profile) {
            Some((target, transform)) => {
                self.backend.reproject(
                    &self.points.vertices,
                    &target,
                    &transform,
                    &mut self.points.texcoords,
                    &mut self.pixels,
                )?;
                let raster = DepthRaster {
                    data: &frame.data,
                    width: frame.width as usize,
                    height: frame.height as usize,
                    depth_scale: frame.depth_scale,
                };
                self.occlusion.process(
                    &raster,
                    &target,
                    &transform,
                    &mut self.points.vertices,
                    &mut self.points.texcoords,
                    &self.pixels,
                );
            }
            None => {
                self.points.texcoords.fill(TexCoord::ZERO);
                self.pixels.fill(Pixel::ZERO);
            }
        }

        self.points.frame_number = frame.frame_number;
        self.points.timestamp_ms = frame.timestamp_ms;
        Ok(&self.points)
    }

    /// Track the depth stream identity and rebuild per-pixel state when its
    /// intrinsics change
    fn refresh_depth(&mut self, frame: &DepthFrame, intrinsics: &Intrinsics) -> Result<()> {
        let id = frame.profile.unique_id();
        if self.cache.depth_stream != Some(id) {
            debug!(stream = %id, "Depth stream changed");
            self.cache.depth_stream = Some(id);
            self.cache.invalidate_transform();
        }

        if self.cache.depth_intrinsics.as_ref() != Some(intrinsics) {
            if !intrinsics.model.supports_deprojection() {
                warn!(
                    model = %intrinsics.model,
                    "Depth distortion model cannot be inverted, deprojecting without it"
                );
            }
            self.backend.preprocess(intrinsics)?;
            self.cache.depth_intrinsics = Some(*intrinsics);
            debug!(
                width = intrinsics.width,
                height = intrinsics.height,
                "Depth intrinsics changed"
            );
        }

        if self.cache.depth_scale != frame.depth_scale {
            debug!(depth_scale = frame.depth_scale, "Depth scale changed");
            self.cache.depth_scale = frame.depth_scale;
        }
        Ok(())
    }

    /// Target intrinsics and depth-to-target transform, if texturing is possible
    fn resolve_target(&mut self, depth: &StreamRef) -> Option<(Intrinsics, Extrinsics)> {
        let target = self.target.clone()?;
        let id = target.unique_id();
        if self.cache.target_stream != Some(id) {
            debug!(stream = %id, "Target stream changed");
            self.cache.target_stream = Some(id);
            self.cache.target_intrinsics = None;
            self.cache.invalidate_transform();
        }

        let Some(intrinsics) = target.intrinsics() else {
            debug!(stream = %id, "Target has no intrinsics, skipping texture mapping");
            return None;
        };
        if self.cache.target_intrinsics != Some(intrinsics) {
            if !intrinsics.model.supports_projection() {
                warn!(
                    model = %intrinsics.model,
                    "Target distortion model not supported, projecting without it"
                );
            }
            self.cache.target_intrinsics = Some(intrinsics);
        }

        if self.cache.extrinsics.is_none() {
            self.cache.extrinsics = self.context.transform_graph().resolve(depth, &target);
            match &self.cache.extrinsics {
                Some(e) => debug!(
                    from = %depth.unique_id(),
                    to = %id,
                    translation = ?e.translation,
                    "Resolved depth to target transform"
                ),
                None => debug!(
                    from = %depth.unique_id(),
                    to = %id,
                    "No transform between depth and target"
                ),
            }
        }

        self.cache.extrinsics.map(|e| (intrinsics, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamKind;

    fn setup() -> (Context, StreamRef, StreamRef) {
        let ctx = Context::new();
        let intr = Intrinsics::pinhole(2, 2, 1.0, 1.0, 0.0, 0.0);
        let depth = ctx.create_video_stream(StreamKind::Depth, intr);
        let color = ctx.create_video_stream(StreamKind::Color, intr);
        (ctx, depth, color)
    }

    fn generic(ctx: &Context, mode: OcclusionMode) -> PointCloud {
        PointCloud::with_backend(ctx, Box::new(backends::GenericBackend::new()), mode)
    }

    #[test]
    fn test_option_rejects_out_of_range() {
        let (ctx, _, _) = setup();
        let mut pc = generic(&ctx, OcclusionMode::Heuristic);
        assert_eq!(pc.get_option(PointCloudOption::OcclusionMode), 1.0);

        let err = pc.set_option(PointCloudOption::OcclusionMode, 3.0).unwrap_err();
        assert!(matches!(err, Error::InvalidOption { .. }));
        assert!(pc.set_option(PointCloudOption::OcclusionMode, 0.5).is_err());
        assert_eq!(pc.get_option(PointCloudOption::OcclusionMode), 1.0);

        pc.set_option(PointCloudOption::OcclusionMode, 2.0).unwrap();
        assert_eq!(pc.get_option(PointCloudOption::OcclusionMode), 2.0);
    }

    #[test]
    fn test_missing_transform_keeps_vertices() {
        let (ctx, depth, color) = setup();
        let mut pc = generic(&ctx, OcclusionMode::Off);
        pc.map_to(color);
        let frame = DepthFrame::new(depth, vec![1000, 0, 2000, 3000], 2, 2, 0.001).unwrap();
        let points = pc.process(&frame).unwrap();
        assert_eq!(points.valid_count(), 3);
        assert!(points.texcoords.iter().all(|uv| *uv == TexCoord::ZERO));
    }

    #[test]
    fn test_transform_cached_until_target_changes() {
        let (ctx, depth, color) = setup();
        let mut pc = generic(&ctx, OcclusionMode::Off);
        pc.map_to(color.clone());
        let frame = DepthFrame::new(depth.clone(), vec![1000; 4], 2, 2, 0.001).unwrap();
        pc.process(&frame).unwrap();
        assert!(pc.cache.extrinsics.is_none());

        ctx.transform_graph().register_same_transform(&depth, &color);
        pc.process(&frame).unwrap();
        assert!(pc.cache.extrinsics.is_some_and(|e| e.is_identity(1e-6)));

        pc.unmap();
        let points = pc.process(&frame).unwrap();
        assert!(points.texcoords.iter().all(|uv| *uv == TexCoord::ZERO));
    }

    #[test]
    fn test_profile_without_intrinsics_is_rejected() {
        #[derive(Debug)]
        struct Motion(StreamId);
        impl crate::stream::StreamProfile for Motion {
            fn unique_id(&self) -> StreamId {
                self.0
            }
            fn kind(&self) -> StreamKind {
                StreamKind::Gyro
            }
            fn intrinsics(&self) -> Option<Intrinsics> {
                None
            }
        }

        let ctx = Context::new();
        let profile: StreamRef = std::sync::Arc::new(Motion(ctx.generate_stream_id()));
        let frame = DepthFrame::new(profile, vec![0; 4], 2, 2, 0.001).unwrap();
        let mut pc = generic(&ctx, OcclusionMode::Off);
        assert!(matches!(pc.process(&frame), Err(Error::InvalidFrame(_))));
    }
}
