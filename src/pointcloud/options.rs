// SPDX-License-Identifier: GPL-3.0-only

//! Runtime options of the point cloud block

use serde::{Deserialize, Serialize};

/// Occlusion invalidation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcclusionMode {
    /// Keep every reprojected point
    Off,
    /// Monotonic scan along the baseline (cheap, assumes a side-mounted target)
    #[default]
    Heuristic,
    /// Per-texel minimum depth over all points
    Exhaustive,
}

impl OcclusionMode {
    pub const ALL: [OcclusionMode; 3] = [
        OcclusionMode::Off,
        OcclusionMode::Heuristic,
        OcclusionMode::Exhaustive,
    ];

    /// Numeric option value
    pub fn as_value(self) -> f32 {
        match self {
            OcclusionMode::Off => 0.0,
            OcclusionMode::Heuristic => 1.0,
            OcclusionMode::Exhaustive => 2.0,
        }
    }

    /// Parse a numeric option value; only exact integers in range are accepted
    pub fn from_value(value: f32) -> Option<Self> {
        if value.fract() != 0.0 {
            return None;
        }
        Self::ALL.into_iter().find(|mode| mode.as_value() == value)
    }
}

impl std::fmt::Display for OcclusionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcclusionMode::Off => write!(f, "Off"),
            OcclusionMode::Heuristic => write!(f, "Heuristic"),
            OcclusionMode::Exhaustive => write!(f, "Exhaustive"),
        }
    }
}

impl std::str::FromStr for OcclusionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(OcclusionMode::Off),
            "heuristic" | "1" => Ok(OcclusionMode::Heuristic),
            "exhaustive" | "2" => Ok(OcclusionMode::Exhaustive),
            other => Err(format!("unknown occlusion mode '{}'", other)),
        }
    }
}

/// Options exposed by [`PointCloud`](super::PointCloud)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointCloudOption {
    OcclusionMode,
}

impl std::fmt::Display for PointCloudOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointCloudOption::OcclusionMode => write!(f, "Occlusion Mode"),
        }
    }
}

/// Valid range of a numeric option
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

impl OptionRange {
    /// Check `value` against the range, returning the reason on failure
    pub fn validate(&self, value: f32) -> std::result::Result<(), String> {
        if !value.is_finite() || value < self.min || value > self.max {
            return Err(format!("out of range [{}, {}]", self.min, self.max));
        }
        let steps = (value - self.min) / self.step;
        if steps.fract() != 0.0 {
            return Err(format!("not a multiple of step {}", self.step));
        }
        Ok(())
    }
}

impl PointCloudOption {
    pub fn range(self) -> OptionRange {
        match self {
            PointCloudOption::OcclusionMode => OptionRange {
                min: OcclusionMode::Off.as_value(),
                max: OcclusionMode::Exhaustive.as_value(),
                step: 1.0,
                default: OcclusionMode::default().as_value(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_values() {
        for mode in OcclusionMode::ALL {
            assert_eq!(OcclusionMode::from_value(mode.as_value()), Some(mode));
        }
        assert_eq!(OcclusionMode::from_value(1.5), None);
        assert_eq!(OcclusionMode::from_value(3.0), None);
        assert_eq!(OcclusionMode::from_value(-1.0), None);
    }

    #[test]
    fn test_range_validation() {
        let range = PointCloudOption::OcclusionMode.range();
        assert_eq!(range.default, 1.0);
        assert!(range.validate(2.0).is_ok());
        assert!(range.validate(2.5).is_err());
        assert!(range.validate(0.5).is_err());
        assert!(range.validate(f32::NAN).is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("Exhaustive".parse::<OcclusionMode>().unwrap(), OcclusionMode::Exhaustive);
        assert_eq!("0".parse::<OcclusionMode>().unwrap(), OcclusionMode::Off);
        assert!("sometimes".parse::<OcclusionMode>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&OcclusionMode::Heuristic).unwrap();
        assert_eq!(json, "\"heuristic\"");
    }
}
