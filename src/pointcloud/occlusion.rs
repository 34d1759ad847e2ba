// SPDX-License-Identifier: GPL-3.0-only

//! Occlusion invalidation
//!
//! Runs after reprojection and removes points the target sensor cannot see
//! because a nearer point covers the same part of its image.
//!
//! - Heuristic: monotonic scan along the sensor baseline. Occluded points lose
//!   their vertex.
//! - Exhaustive: minimum depth per target texel. Occluded points lose their
//!   texture coordinate.
//!
//! Scratch buffers live in the filter and are only resized when a resolution
//! changes.

use super::OcclusionMode;
use super::points::{Pixel, TexCoord, Vertex};
use crate::calibration::{Extrinsics, Intrinsics};
use crate::constants::{
    EXHAUSTIVE_MIN_DEPTH_M, EXHAUSTIVE_Z_TOLERANCE_M, OCCLUSION_DILATION,
    OCCLUSION_Z_THRESHOLD_M, SCAN_AXIS_EPSILON_M, TRANSPOSE_MAX_BLOCK, VERTICAL_DEPTH_STEP_M,
    VERTICAL_SCAN_WINDOW,
};
use tracing::warn;

/// Direction of the heuristic scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Horizontal,
    Vertical,
}

impl ScanDirection {
    /// Pick the scan direction from the depth-to-target translation
    ///
    /// Vertical only when the sensors are stacked: no lateral offset and a
    /// real vertical one.
    pub fn from_translation(translation: [f32; 3]) -> Self {
        if translation[0].abs() < SCAN_AXIS_EPSILON_M && translation[1].abs() > SCAN_AXIS_EPSILON_M
        {
            ScanDirection::Vertical
        } else {
            ScanDirection::Horizontal
        }
    }
}

/// Raw depth raster the points were deprojected from
#[derive(Debug, Clone, Copy)]
pub struct DepthRaster<'a> {
    pub data: &'a [u16],
    pub width: usize,
    pub height: usize,
    /// Meters per depth unit
    pub depth_scale: f32,
}

impl DepthRaster<'_> {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Occlusion filter with reusable scratch space
#[derive(Debug, Default)]
pub struct OcclusionFilter {
    mode: OcclusionMode,
    /// Minimum depth per target texel (exhaustive)
    texel_depth: Vec<f32>,
    /// Transposed raw depth (vertical scan)
    depth_t: Vec<u16>,
    /// Transposed pixel map (vertical scan)
    pixels_t: Vec<Pixel>,
}

impl OcclusionFilter {
    pub fn new(mode: OcclusionMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> OcclusionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: OcclusionMode) {
        self.mode = mode;
    }

    /// Invalidate occluded points in place
    ///
    /// `vertices`, `texcoords` and `pixels` are in depth raster order and
    /// must each hold `raster.pixel_count()` entries.
    pub fn process(
        &mut self,
        raster: &DepthRaster<'_>,
        target: &Intrinsics,
        transform: &Extrinsics,
        vertices: &mut [Vertex],
        texcoords: &mut [TexCoord],
        pixels: &[Pixel],
    ) {
        let count = raster.pixel_count();
        if raster.data.len() != count
            || vertices.len() != count
            || texcoords.len() != count
            || pixels.len() != count
        {
            warn!(
                expected = count,
                depth = raster.data.len(),
                vertices = vertices.len(),
                "Occlusion filter skipped: buffer size mismatch"
            );
            return;
        }

        match self.mode {
            OcclusionMode::Off => {}
            OcclusionMode::Heuristic => {
                match ScanDirection::from_translation(transform.translation) {
                    ScanDirection::Horizontal => {
                        scan_horizontal(raster.width, raster.height, vertices, texcoords, pixels)
                    }
                    ScanDirection::Vertical => {
                        self.scan_vertical(raster, vertices, texcoords, pixels)
                    }
                }
            }
            OcclusionMode::Exhaustive => self.exhaustive(target, vertices, texcoords, pixels),
        }
    }

    /// Column-wise scan over transposed buffers
    ///
    /// A near-to-far depth step marks a boundary. Points right after it whose
    /// projected Y falls below the maximum of the window before it are hidden,
    /// up to the first visible one.
    fn scan_vertical(
        &mut self,
        raster: &DepthRaster<'_>,
        vertices: &mut [Vertex],
        texcoords: &mut [TexCoord],
        pixels: &[Pixel],
    ) {
        let (width, height) = (raster.width, raster.height);
        let count = raster.pixel_count();
        if self.depth_t.len() != count {
            self.depth_t.resize(count, 0);
            self.pixels_t.resize(count, Pixel::ZERO);
        }
        transpose(raster.data, width, height, &mut self.depth_t);
        transpose(pixels, width, height, &mut self.pixels_t);

        let step_raw = VERTICAL_DEPTH_STEP_M / raster.depth_scale;

        // Transposed row `col` holds original column `col`, top to bottom
        for col in 0..width {
            let depth = &self.depth_t[col * height..(col + 1) * height];
            let pix = &self.pixels_t[col * height..(col + 1) * height];

            for k in 1..height {
                let (near, far) = (depth[k - 1], depth[k]);
                // Only pixels after the boundary are examined. Past a
                // far-to-near step they are the nearer surface and cannot be
                // covered by what precedes them.
                if near == 0 || far == 0 || (far as f32 - near as f32) <= step_raw {
                    continue;
                }

                let start = k.saturating_sub(VERTICAL_SCAN_WINDOW);
                let max_y = (start..k)
                    .filter(|&j| depth[j] != 0)
                    .map(|j| pix[j].y)
                    .fold(None, |acc: Option<f32>, y| Some(acc.map_or(y, |m| m.max(y))));
                let Some(max_y) = max_y else {
                    continue;
                };

                let end = (k + VERTICAL_SCAN_WINDOW).min(height);
                for j in k..end {
                    if depth[j] == 0 {
                        continue;
                    }
                    if pix[j].y < max_y {
                        let i = j * width + col;
                        vertices[i] = Vertex::ZERO;
                        texcoords[i] = TexCoord::ZERO;
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// Two passes: minimum depth per texel, then drop texture coordinates of
    /// points clearly behind it. Independent of point order.
    fn exhaustive(
        &mut self,
        target: &Intrinsics,
        vertices: &[Vertex],
        texcoords: &mut [TexCoord],
        pixels: &[Pixel],
    ) {
        let tex_w = target.width as usize;
        let tex_h = target.height as usize;
        let texels = tex_w * tex_h;
        if self.texel_depth.len() != texels {
            self.texel_depth = vec![0.0; texels];
        } else {
            self.texel_depth.fill(0.0);
        }

        let texel_of = |p: &Pixel| -> Option<usize> {
            // Zero pixels are the unmapped sentinel, so the bounds are strict
            if p.x > 0.0 && p.x < tex_w as f32 && p.y > 0.0 && p.y < tex_h as f32 {
                Some(p.y as usize * tex_w + p.x as usize)
            } else {
                None
            }
        };

        for (v, p) in vertices.iter().zip(pixels) {
            if v.z <= EXHAUSTIVE_MIN_DEPTH_M {
                continue;
            }
            if let Some(t) = texel_of(p) {
                let min = &mut self.texel_depth[t];
                if *min < EXHAUSTIVE_MIN_DEPTH_M || v.z < *min {
                    *min = v.z;
                }
            }
        }

        for ((v, p), uv) in vertices.iter().zip(pixels).zip(texcoords.iter_mut()) {
            if v.z <= EXHAUSTIVE_MIN_DEPTH_M {
                continue;
            }
            if let Some(t) = texel_of(p) {
                let min = self.texel_depth[t];
                if min > EXHAUSTIVE_MIN_DEPTH_M && min + EXHAUSTIVE_Z_TOLERANCE_M < v.z {
                    *uv = TexCoord::ZERO;
                }
            }
        }
    }
}

/// Row-wise monotonic scan
///
/// Projected X must grow left to right. A point falling behind the running
/// maximum (or level with it but clearly deeper) is hidden, along with the
/// next visible point.
fn scan_horizontal(
    width: usize,
    height: usize,
    vertices: &mut [Vertex],
    texcoords: &mut [TexCoord],
    pixels: &[Pixel],
) {
    for row in 0..height {
        let mut max_x = -1.0f32;
        let mut max_z = 0.0f32;
        let mut dilation_left = 0usize;

        for i in row * width..(row + 1) * width {
            let z = vertices[i].z;
            if z == 0.0 {
                continue;
            }
            let x = pixels[i].x;
            if x < max_x || (x == max_x && z - max_z > OCCLUSION_Z_THRESHOLD_M) {
                vertices[i] = Vertex::ZERO;
                texcoords[i] = TexCoord::ZERO;
                dilation_left = OCCLUSION_DILATION;
            } else {
                max_x = x;
                max_z = z;
                if dilation_left > 0 {
                    vertices[i] = Vertex::ZERO;
                    texcoords[i] = TexCoord::ZERO;
                    dilation_left -= 1;
                }
            }
        }
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Largest block edge up to [`TRANSPOSE_MAX_BLOCK`] dividing both dimensions
fn transpose_block(width: usize, height: usize) -> usize {
    let g = gcd(width, height);
    (1..=TRANSPOSE_MAX_BLOCK.min(g))
        .rev()
        .find(|b| g % b == 0)
        .unwrap_or(1)
}

/// Cache-blocked transpose of a `width x height` raster into `dst`
/// (`height x width`)
pub(crate) fn transpose<T: Copy>(src: &[T], width: usize, height: usize, dst: &mut [T]) {
    if width == 0 || height == 0 {
        return;
    }
    let block = transpose_block(width, height);
    for by in (0..height).step_by(block) {
        for bx in (0..width).step_by(block) {
            for y in by..by + block {
                for x in bx..bx + block {
                    dst[x * height + y] = src[y * width + x];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_of(xs: &[f32], z: f32) -> (Vec<Vertex>, Vec<TexCoord>, Vec<Pixel>) {
        let vertices = xs.iter().map(|_| Vertex::new(0.0, 0.0, z)).collect();
        let texcoords = xs.iter().map(|x| TexCoord::new(*x, 0.5)).collect();
        let pixels = xs.iter().map(|x| Pixel::new(*x, 0.0)).collect();
        (vertices, texcoords, pixels)
    }

    #[test]
    fn test_scan_direction() {
        assert_eq!(
            ScanDirection::from_translation([0.05, 0.0, 0.0]),
            ScanDirection::Horizontal
        );
        assert_eq!(
            ScanDirection::from_translation([0.0, -0.03, 0.0]),
            ScanDirection::Vertical
        );
        assert_eq!(
            ScanDirection::from_translation([0.0, 0.0, 0.0]),
            ScanDirection::Horizontal
        );
    }

    #[test]
    fn test_horizontal_non_monotonic_row() {
        let (mut v, mut uv, px) = row_of(&[0.1, 0.3, 0.2, 0.4, 0.5], 1.0);
        scan_horizontal(5, 1, &mut v, &mut uv, &px);
        let kept: Vec<bool> = v.iter().map(|v| v.is_valid()).collect();
        // 0.2 is occluded, 0.4 falls in the dilation window
        assert_eq!(kept, vec![true, true, false, false, true]);
        assert_eq!(uv[2], TexCoord::ZERO);
    }

    #[test]
    fn test_horizontal_equal_x_deeper_point() {
        let mut v = vec![Vertex::new(0.0, 0.0, 1.0), Vertex::new(0.0, 0.0, 1.5)];
        let mut uv = vec![TexCoord::ZERO; 2];
        let px = vec![Pixel::new(3.0, 0.0), Pixel::new(3.0, 0.0)];
        scan_horizontal(2, 1, &mut v, &mut uv, &px);
        assert!(v[0].is_valid());
        assert!(!v[1].is_valid());
    }

    #[test]
    fn test_horizontal_rows_are_independent() {
        // The running maximum restarts on each row
        let xs = [0.1, 0.2, 0.3, 0.4];
        let (mut v, mut uv, px) = row_of(&[xs, xs].concat(), 1.0);
        scan_horizontal(4, 2, &mut v, &mut uv, &px);
        assert!(v.iter().all(|v| v.is_valid()));
    }

    #[test]
    fn test_transpose_blocks() {
        assert_eq!(transpose_block(640, 480), 32);
        assert_eq!(transpose_block(6, 4), 2);
        assert_eq!(transpose_block(7, 3), 1);

        let src: Vec<u16> = (0..12).collect();
        let mut dst = vec![0u16; 12];
        transpose(&src, 4, 3, &mut dst);
        assert_eq!(dst, vec![0, 4, 8, 1, 5, 9, 2, 6, 10, 3, 7, 11]);
    }

    #[test]
    fn test_vertical_scan_hides_points_below_edge() {
        // One column: a near surface at rows 0..3, a far one from row 3
        let depth = [1000u16, 1000, 1000, 3000, 3000, 3000];
        let ys = [10.0, 11.0, 12.0, 11.5, 11.8, 13.0];
        let mut vertices: Vec<Vertex> = depth
            .iter()
            .map(|d| Vertex::new(0.0, 0.0, *d as f32 * 0.001))
            .collect();
        let mut texcoords = vec![TexCoord::new(0.5, 0.5); 6];
        let pixels: Vec<Pixel> = ys.iter().map(|y| Pixel::new(0.0, *y)).collect();
        let raster = DepthRaster {
            data: &depth,
            width: 1,
            height: 6,
            depth_scale: 0.001,
        };

        let mut filter = OcclusionFilter::new(OcclusionMode::Heuristic);
        let stacked = Extrinsics::from_translation([0.0, 0.05, 0.0]);
        let target = Intrinsics::pinhole(1, 20, 1.0, 1.0, 0.0, 0.0);
        filter.process(&raster, &target, &stacked, &mut vertices, &mut texcoords, &pixels);

        let kept: Vec<bool> = vertices.iter().map(|v| v.is_valid()).collect();
        assert_eq!(kept, vec![true, true, true, false, false, true]);
    }

    #[test]
    fn test_vertical_scan_ignores_far_to_near_step() {
        // Same projected rows as above, but the surface gets nearer
        let depth = [3000u16, 3000, 3000, 1000, 1000, 1000];
        let ys = [10.0, 11.0, 12.0, 11.5, 11.8, 13.0];
        let mut vertices: Vec<Vertex> = depth
            .iter()
            .map(|d| Vertex::new(0.0, 0.0, *d as f32 * 0.001))
            .collect();
        let mut texcoords = vec![TexCoord::new(0.5, 0.5); 6];
        let pixels: Vec<Pixel> = ys.iter().map(|y| Pixel::new(0.0, *y)).collect();
        let raster = DepthRaster {
            data: &depth,
            width: 1,
            height: 6,
            depth_scale: 0.001,
        };

        let mut filter = OcclusionFilter::new(OcclusionMode::Heuristic);
        let stacked = Extrinsics::from_translation([0.0, 0.05, 0.0]);
        let target = Intrinsics::pinhole(1, 20, 1.0, 1.0, 0.0, 0.0);
        filter.process(&raster, &target, &stacked, &mut vertices, &mut texcoords, &pixels);

        assert!(vertices.iter().all(|v| v.is_valid()));
        assert!(texcoords.iter().all(|uv| *uv != TexCoord::ZERO));
    }

    #[test]
    fn test_exhaustive_keeps_nearest_regardless_of_order() {
        let target = Intrinsics::pinhole(4, 4, 1.0, 1.0, 0.0, 0.0);
        let depth = [1u16, 1];
        let raster = DepthRaster {
            data: &depth,
            width: 2,
            height: 1,
            depth_scale: 1.0,
        };
        let pixels = vec![Pixel::new(1.5, 2.5); 2];

        for (near, far) in [(0usize, 1usize), (1, 0)] {
            let mut vertices = vec![Vertex::ZERO; 2];
            vertices[near] = Vertex::new(0.0, 0.0, 1.0);
            vertices[far] = Vertex::new(0.0, 0.0, 1.2);
            let mut texcoords = vec![TexCoord::new(0.4, 0.6); 2];

            let mut filter = OcclusionFilter::new(OcclusionMode::Exhaustive);
            filter.process(
                &raster,
                &target,
                &Extrinsics::IDENTITY,
                &mut vertices,
                &mut texcoords,
                &pixels,
            );
            assert_eq!(texcoords[near], TexCoord::new(0.4, 0.6));
            assert_eq!(texcoords[far], TexCoord::ZERO);
            // Vertices survive exhaustive invalidation
            assert!(vertices[far].is_valid());
        }
    }

    #[test]
    fn test_exhaustive_tolerance() {
        let target = Intrinsics::pinhole(4, 4, 1.0, 1.0, 0.0, 0.0);
        let depth = [1u16, 1];
        let raster = DepthRaster {
            data: &depth,
            width: 2,
            height: 1,
            depth_scale: 1.0,
        };
        let pixels = vec![Pixel::new(1.5, 1.5); 2];
        let mut vertices = vec![Vertex::new(0.0, 0.0, 1.0), Vertex::new(0.0, 0.0, 1.03)];
        let mut texcoords = vec![TexCoord::new(0.4, 0.4); 2];
        let mut filter = OcclusionFilter::new(OcclusionMode::Exhaustive);
        filter.process(
            &raster,
            &target,
            &Extrinsics::IDENTITY,
            &mut vertices,
            &mut texcoords,
            &pixels,
        );
        assert!(texcoords.iter().all(|uv| *uv != TexCoord::ZERO));
    }

    #[test]
    fn test_off_leaves_everything() {
        let (mut v, mut uv, px) = row_of(&[0.3, 0.1], 1.0);
        let depth = [1u16, 1];
        let raster = DepthRaster {
            data: &depth,
            width: 2,
            height: 1,
            depth_scale: 1.0,
        };
        let mut filter = OcclusionFilter::new(OcclusionMode::Off);
        let target = Intrinsics::pinhole(2, 1, 1.0, 1.0, 0.0, 0.0);
        filter.process(&raster, &target, &Extrinsics::IDENTITY, &mut v, &mut uv, &px);
        assert!(v.iter().all(|v| v.is_valid()));
    }
}
