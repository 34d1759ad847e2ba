// SPDX-License-Identifier: GPL-3.0-only

use crate::errors::Result;
use crate::pointcloud::OcclusionMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Which reprojection backend to use
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Best CPU backend the processor supports
    #[default]
    Auto,
    /// Portable scalar code
    Generic,
    /// SSE2 (x86_64 only)
    Sse,
    /// NEON (aarch64 only)
    Neon,
    /// wgpu compute, falling back to the best CPU backend when no adapter exists
    Gpu,
}

impl std::fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Generic => "generic",
            Self::Sse => "sse",
            Self::Neon => "neon",
            Self::Gpu => "gpu",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "generic" => Ok(Self::Generic),
            "sse" => Ok(Self::Sse),
            "neon" => Ok(Self::Neon),
            "gpu" => Ok(Self::Gpu),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Point cloud processing settings
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudConfig {
    /// Occlusion invalidation applied after reprojection
    pub occlusion: OcclusionMode,
    /// Reprojection backend selection
    pub backend: BackendPreference,
}

impl PointCloudConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!(path = %path.display(), ?config, "Loaded point cloud config");
        Ok(config)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
