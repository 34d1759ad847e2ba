// SPDX-License-Identifier: GPL-3.0-only

//! Stream profiles, depth frames and the shared processing context
//!
//! The device/profile layer that produces streams is an external collaborator.
//! This module defines the narrow interface the pipeline consumes from it:
//! a stable stream identity, the stream kind and (for video streams) its
//! intrinsics.

mod context;
mod frame;

pub use context::Context;
pub use frame::DepthFrame;

use crate::calibration::Intrinsics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stable identity of a stream, unique for the lifetime of a [`Context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub(crate) u64);

impl StreamId {
    /// Raw identity value
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Kind of sensor stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamKind {
    #[default]
    Depth,
    Color,
    Infrared,
    Confidence,
    Fisheye,
    Gyro,
    Accel,
}

impl StreamKind {
    /// Whether frames of this kind carry an image raster
    pub fn is_video(self) -> bool {
        !matches!(self, StreamKind::Gyro | StreamKind::Accel)
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamKind::Depth => "Depth",
            StreamKind::Color => "Color",
            StreamKind::Infrared => "Infrared",
            StreamKind::Confidence => "Confidence",
            StreamKind::Fisheye => "Fisheye",
            StreamKind::Gyro => "Gyro",
            StreamKind::Accel => "Accel",
        };
        write!(f, "{}", name)
    }
}

/// A stream as seen by the transform graph and the point cloud block
///
/// Implemented by the device layer. Identity comparisons always go through
/// [`StreamProfile::unique_id`], never through value equality.
pub trait StreamProfile: Send + Sync + std::fmt::Debug {
    /// Stable identity of this stream
    fn unique_id(&self) -> StreamId;

    /// Sensor kind
    fn kind(&self) -> StreamKind;

    /// Intrinsics of the image raster, `None` for motion streams
    fn intrinsics(&self) -> Option<Intrinsics>;
}

/// Shared handle to a stream profile
pub type StreamRef = Arc<dyn StreamProfile>;

/// Plain video stream profile with fixed intrinsics
#[derive(Debug, Clone)]
pub struct VideoStreamProfile {
    id: StreamId,
    kind: StreamKind,
    /// Stream index within its kind (e.g. left/right infrared)
    pub index: u32,
    /// Nominal framerate
    pub fps: u32,
    intrinsics: Intrinsics,
}

impl VideoStreamProfile {
    /// Create a profile with an identity drawn from `ctx`
    pub fn new(ctx: &Context, kind: StreamKind, intrinsics: Intrinsics) -> Self {
        Self {
            id: ctx.generate_stream_id(),
            kind,
            index: 0,
            fps: 30,
            intrinsics,
        }
    }
}

impl StreamProfile for VideoStreamProfile {
    fn unique_id(&self) -> StreamId {
        self.id
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn intrinsics(&self) -> Option<Intrinsics> {
        Some(self.intrinsics)
    }
}
