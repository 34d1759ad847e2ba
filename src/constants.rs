// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline constants - Single source of truth
//!
//! Tuned thresholds for deprojection and occlusion invalidation. The SIMD and
//! GPU backends must use the same values as the generic path.

/// Fixed number of fixed-point iterations when inverting Brown-Conrady
/// distortion. Not a convergence check: every backend runs exactly this many.
pub const UNDISTORT_ITERATIONS: usize = 10;

/// Pixels processed per iteration by the wide SIMD backends (two 4-lane registers)
pub const SIMD_PIXELS_PER_ITERATION: usize = 8;

/// Heuristic occlusion: depth step (meters) at equal projected X that still
/// counts as occluded
pub const OCCLUSION_Z_THRESHOLD_M: f32 = 0.1;

/// Heuristic occlusion: number of pixels invalidated after an occluded pixel
pub const OCCLUSION_DILATION: usize = 1;

/// Vertical scan: depth discontinuity (meters) marking a candidate boundary
pub const VERTICAL_DEPTH_STEP_M: f32 = 0.5;

/// Vertical scan: window size around each candidate boundary
pub const VERTICAL_SCAN_WINDOW: usize = 16;

/// Translation (meters) below which an axis is treated as zero when choosing
/// the scan direction
pub const SCAN_AXIS_EPSILON_M: f32 = 0.01;

/// Largest block edge used by the cache-blocked transpose
pub const TRANSPOSE_MAX_BLOCK: usize = 32;

/// Exhaustive occlusion: depth tolerance (meters) between points sharing a texel
pub const EXHAUSTIVE_Z_TOLERANCE_M: f32 = 0.05;

/// Exhaustive occlusion: depths below this are treated as empty texels
pub const EXHAUSTIVE_MIN_DEPTH_M: f32 = 0.0001;

/// LAS export precision (meters per unit)
pub const LAS_EXPORT_SCALE: f64 = 0.001;

/// GPU compute workgroup edge (16x16 invocations)
pub const GPU_WORKGROUP_SIZE: u32 = 16;

/// Widest raster a flat vertex list is folded into for GPU reprojection
pub const GPU_FOLD_WIDTH: u32 = 4096;
