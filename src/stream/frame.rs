// SPDX-License-Identifier: GPL-3.0-only

//! Depth frames as delivered to the point cloud block

use super::StreamRef;
use crate::errors::{Error, Result};
use std::sync::Arc;

/// A raster of 16-bit depth samples plus the scale that converts them to meters
///
/// A zero sample means "no data" and is carried through as a zero vertex.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    /// Stream that produced this frame
    pub profile: StreamRef,
    /// Row-major depth samples, `width * height` entries
    pub data: Arc<[u16]>,
    pub width: u32,
    pub height: u32,
    /// Meters per depth unit
    pub depth_scale: f32,
    /// Sequence number from the device
    pub frame_number: u64,
    /// Capture time in milliseconds
    pub timestamp_ms: f64,
}

impl DepthFrame {
    /// Wrap `data` as a frame of `profile`
    ///
    /// Fails when the sample count does not match the raster size or the
    /// depth scale is not a positive finite number.
    pub fn new(
        profile: StreamRef,
        data: Vec<u16>,
        width: u32,
        height: u32,
        depth_scale: f32,
    ) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "expected {} depth samples for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        if !(depth_scale.is_finite() && depth_scale > 0.0) {
            return Err(Error::InvalidFrame(format!(
                "depth scale must be positive, got {}",
                depth_scale
            )));
        }
        Ok(Self {
            profile,
            data: data.into(),
            width,
            height,
            depth_scale,
            frame_number: 0,
            timestamp_ms: 0.0,
        })
    }

    /// Build a frame from a raw native-endian byte buffer
    pub fn from_bytes(
        profile: StreamRef,
        bytes: &[u8],
        width: u32,
        height: u32,
        depth_scale: f32,
    ) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(Error::InvalidFrame(format!(
                "odd byte count {} for 16-bit depth",
                bytes.len()
            )));
        }
        // Collecting copies, so the source buffer need not be u16-aligned
        let data: Vec<u16> = bytemuck::pod_collect_to_vec(bytes);
        Self::new(profile, data, width, height, depth_scale)
    }

    /// Set the device sequence number and capture time
    pub fn with_metadata(mut self, frame_number: u64, timestamp_ms: f64) -> Self {
        self.frame_number = frame_number;
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Number of pixels in the frame
    pub fn pixel_count(&self) -> usize {
        self.data.len()
    }

    /// Depth sample at `(x, y)` in meters
    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        Some(self.data[idx] as f32 * self.depth_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Intrinsics;
    use crate::stream::{Context, StreamKind};

    fn profile() -> StreamRef {
        let ctx = Context::new();
        ctx.create_video_stream(
            StreamKind::Depth,
            Intrinsics::pinhole(2, 2, 1.0, 1.0, 1.0, 1.0),
        )
    }

    #[test]
    fn test_rejects_size_mismatch() {
        let err = DepthFrame::new(profile(), vec![0; 3], 2, 2, 0.001).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[test]
    fn test_rejects_bad_scale() {
        assert!(DepthFrame::new(profile(), vec![0; 4], 2, 2, 0.0).is_err());
        assert!(DepthFrame::new(profile(), vec![0; 4], 2, 2, f32::NAN).is_err());
    }

    #[test]
    fn test_from_bytes() {
        let raw: Vec<u8> = [1000u16, 0, 2000, 3000]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let frame = DepthFrame::from_bytes(profile(), &raw, 2, 2, 0.001).unwrap();
        assert_eq!(&frame.data[..], &[1000, 0, 2000, 3000]);
        assert_eq!(frame.depth_at(0, 1), Some(2000.0 * 0.001));
        assert_eq!(frame.depth_at(2, 0), None);
    }
}
