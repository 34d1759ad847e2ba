// SPDX-License-Identifier: GPL-3.0-only

//! Shared shader parameter blocks

mod params;

pub use params::ReprojectParams;
