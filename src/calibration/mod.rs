// SPDX-License-Identifier: GPL-3.0-only

//! Camera calibration types and the reference projection formulas
//!
//! Everything that maps between pixels, rays and camera-space points lives
//! here. The reprojection backends either call these functions directly or
//! mirror their operation order lane by lane, so this module is the single
//! definition of what a correct result is.

mod extrinsics;
mod intrinsics;

pub use extrinsics::Extrinsics;
pub use intrinsics::{Distortion, Intrinsics};
