// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use depthcloud::constants::*;

#[test]
fn test_simd_block_is_two_registers() {
    // Two four-lane registers per iteration
    assert_eq!(SIMD_PIXELS_PER_ITERATION, 8);
}

#[test]
fn test_undistort_iterations_fixed() {
    // Bit-compatible output across backends depends on this exact count
    assert_eq!(UNDISTORT_ITERATIONS, 10);
}

#[test]
fn test_occlusion_thresholds() {
    assert_eq!(OCCLUSION_Z_THRESHOLD_M, 0.1);
    assert_eq!(OCCLUSION_DILATION, 1);
    assert_eq!(VERTICAL_DEPTH_STEP_M, 0.5);
    assert_eq!(VERTICAL_SCAN_WINDOW, 16);
    assert_eq!(EXHAUSTIVE_Z_TOLERANCE_M, 0.05);
    assert!(EXHAUSTIVE_MIN_DEPTH_M < EXHAUSTIVE_Z_TOLERANCE_M);
}

#[test]
fn test_transpose_block_cap() {
    assert!(TRANSPOSE_MAX_BLOCK.is_power_of_two());
    assert!(TRANSPOSE_MAX_BLOCK <= 32);
}

#[cfg(feature = "gpu")]
#[test]
fn test_workgroup_matches_shader() {
    let shader = depthcloud::shaders::point_cloud_shader();
    let attr = format!(
        "@workgroup_size({}, {}, 1)",
        GPU_WORKGROUP_SIZE, GPU_WORKGROUP_SIZE
    );
    assert_eq!(shader.matches(attr.as_str()).count(), 2);
}
