// SPDX-License-Identifier: GPL-3.0-only

//! Reprojection backends
//!
//! ```text
//! ┌──────────────────────┐
//! │  PointCloud block    │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ ReprojectionBackend  │  ← preprocess / deproject / reproject
//! └──────────┬───────────┘
//!            │
//!   ┌────────┼────────┬────────┐
//!   ▼        ▼        ▼        ▼
//! Generic   SSE2    NEON     wgpu
//! ```
//!
//! The generic backend is the reference. The SIMD backends mirror its
//! operation order and must match it bit for bit; the GPU backend matches it
//! within float rounding.

pub mod generic;
#[cfg(feature = "gpu")]
pub mod gpu;
#[cfg(target_arch = "aarch64")]
pub mod neon;
mod rays;
#[cfg(target_arch = "x86_64")]
pub mod sse;

pub use generic::GenericBackend;
pub use rays::RayTable;

use crate::calibration::{Extrinsics, Intrinsics};
use crate::config::BackendPreference;
use crate::errors::{Error, Result};
use crate::pointcloud::{Pixel, TexCoord, Vertex};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Concrete backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Generic,
    Sse,
    Neon,
    Gpu,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Generic => write!(f, "Generic"),
            BackendKind::Sse => write!(f, "SSE2"),
            BackendKind::Neon => write!(f, "NEON"),
            BackendKind::Gpu => write!(f, "GPU"),
        }
    }
}

/// Deprojection and reprojection of one depth raster
///
/// All slices are in depth raster order and must have the depth frame's pixel
/// count. A zero vertex is the no-data sentinel on input and output.
pub trait ReprojectionBackend: Send {
    /// Backend identifier
    fn kind(&self) -> BackendKind;

    /// Prepare per-pixel state for `intrinsics` (the undistorted ray table)
    ///
    /// Called when the depth intrinsics change. Deprojection also rebuilds on
    /// demand, so calling this is an optimization, not a requirement.
    fn preprocess(&mut self, intrinsics: &Intrinsics) -> Result<()>;

    /// Turn raw depth into camera-space vertices
    ///
    /// Raw zero produces a zero vertex.
    fn deproject(
        &mut self,
        depth: &[u16],
        intrinsics: &Intrinsics,
        depth_scale: f32,
        vertices: &mut [Vertex],
    ) -> Result<()>;

    /// Map vertices into the target stream
    ///
    /// Writes normalized texture coordinates and un-normalized pixel
    /// coordinates. Sentinel vertices and points at or behind the target
    /// camera produce zeros.
    fn reproject(
        &mut self,
        vertices: &[Vertex],
        target: &Intrinsics,
        transform: &Extrinsics,
        texcoords: &mut [TexCoord],
        pixels: &mut [Pixel],
    ) -> Result<()>;
}

pub(crate) fn check_deproject(
    depth: &[u16],
    intrinsics: &Intrinsics,
    vertices: &[Vertex],
) -> Result<()> {
    let expected = intrinsics.pixel_count();
    if depth.len() != expected || vertices.len() != expected {
        return Err(Error::InvalidFrame(format!(
            "depth intrinsics describe {}x{} ({} pixels) but got {} samples and {} vertices",
            intrinsics.width,
            intrinsics.height,
            expected,
            depth.len(),
            vertices.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_reproject(
    vertices: &[Vertex],
    texcoords: &[TexCoord],
    pixels: &[Pixel],
) -> Result<()> {
    if texcoords.len() != vertices.len() || pixels.len() != vertices.len() {
        return Err(Error::InvalidFrame(format!(
            "output length mismatch: {} vertices, {} texcoords, {} pixels",
            vertices.len(),
            texcoords.len(),
            pixels.len()
        )));
    }
    Ok(())
}

/// Best SIMD backend the running CPU supports
fn best_cpu_backend() -> Box<dyn ReprojectionBackend> {
    #[cfg(target_arch = "x86_64")]
    {
        if let Some(backend) = sse::SseBackend::new() {
            return Box::new(backend);
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if let Some(backend) = neon::NeonBackend::new() {
            return Box::new(backend);
        }
    }
    Box::new(GenericBackend::new())
}

/// CPU backends usable on this machine, fastest first
pub fn available_cpu_backends() -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    #[cfg(target_arch = "x86_64")]
    {
        if sse::SseBackend::is_supported() {
            kinds.push(BackendKind::Sse);
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if neon::NeonBackend::is_supported() {
            kinds.push(BackendKind::Neon);
        }
    }
    kinds.push(BackendKind::Generic);
    kinds
}

/// Instantiate a specific backend, `None` when it is unavailable here
pub fn create_backend_kind(kind: BackendKind) -> Option<Box<dyn ReprojectionBackend>> {
    match kind {
        BackendKind::Generic => Some(Box::new(GenericBackend::new()) as Box<dyn ReprojectionBackend>),
        #[cfg(target_arch = "x86_64")]
        BackendKind::Sse => sse::SseBackend::new().map(|b| Box::new(b) as Box<dyn ReprojectionBackend>),
        #[cfg(target_arch = "aarch64")]
        BackendKind::Neon => {
            neon::NeonBackend::new().map(|b| Box::new(b) as Box<dyn ReprojectionBackend>)
        }
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => match gpu::GpuBackend::new() {
            Ok(backend) => Some(Box::new(backend) as Box<dyn ReprojectionBackend>),
            Err(e) => {
                warn!(error = %e, "GPU backend unavailable");
                None
            }
        },
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Select a backend from a preference, falling back to the best CPU backend
pub fn create_backend(preference: BackendPreference) -> Box<dyn ReprojectionBackend> {
    let wanted = match preference {
        BackendPreference::Auto => None,
        BackendPreference::Generic => Some(BackendKind::Generic),
        BackendPreference::Sse => Some(BackendKind::Sse),
        BackendPreference::Neon => Some(BackendKind::Neon),
        BackendPreference::Gpu => Some(BackendKind::Gpu),
    };

    let backend = match wanted.and_then(create_backend_kind) {
        Some(backend) => backend,
        None => {
            if let Some(kind) = wanted {
                warn!(requested = %kind, "Requested backend unavailable, using best CPU backend");
            }
            best_cpu_backend()
        }
    };
    info!(backend = %backend.kind(), %preference, "Selected reprojection backend");
    backend
}
