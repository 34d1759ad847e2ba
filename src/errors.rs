// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the point cloud pipeline
//!
//! Data-dependent conditions (missing transforms, occluded points, zero depth)
//! are never errors. Only malformed input, configuration misuse and GPU
//! failures surface here.

use crate::pointcloud::PointCloudOption;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An option was set to a value outside its range
    #[error("Invalid value {value} for option {option}: {reason}")]
    InvalidOption {
        option: PointCloudOption,
        value: f32,
        reason: String,
    },

    /// A frame does not match its declared geometry
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// GPU device creation or dispatch failed
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Point cloud export failed
    #[error("Export error: {0}")]
    Export(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<las::Error> for Error {
    fn from(err: las::Error) -> Self {
        Error::Export(err.to_string())
    }
}
