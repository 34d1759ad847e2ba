// SPDX-License-Identifier: GPL-3.0-only

//! Per-pixel undistorted ray table

use crate::calibration::Intrinsics;
use tracing::debug;

/// Normalized camera ray for every depth pixel, stored as parallel arrays
///
/// Built once per depth intrinsics with the reference undistortion and shared
/// by every CPU backend, so deprojection is a multiply per pixel.
#[derive(Debug, Clone)]
pub struct RayTable {
    intrinsics: Intrinsics,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
}

impl RayTable {
    /// Build the table for `intrinsics`
    pub fn build(intrinsics: &Intrinsics) -> Self {
        let count = intrinsics.pixel_count();
        let mut x = Vec::with_capacity(count);
        let mut y = Vec::with_capacity(count);
        for v in 0..intrinsics.height {
            for u in 0..intrinsics.width {
                let [rx, ry] = intrinsics.pixel_to_ray(u as f32, v as f32);
                x.push(rx);
                y.push(ry);
            }
        }
        debug!(
            width = intrinsics.width,
            height = intrinsics.height,
            model = %intrinsics.model,
            "Built ray table"
        );
        Self {
            intrinsics: *intrinsics,
            x,
            y,
        }
    }

    /// Whether this table was built for `intrinsics`
    pub fn matches(&self, intrinsics: &Intrinsics) -> bool {
        self.intrinsics == *intrinsics
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Hold a table and rebuild it only when the intrinsics change
///
/// The replacement is built completely before it is swapped in, so a reader
/// never sees a partially filled table.
#[derive(Debug, Default)]
pub(crate) struct RayCache {
    table: Option<RayTable>,
}

impl RayCache {
    pub(crate) fn get(&mut self, intrinsics: &Intrinsics) -> &RayTable {
        let stale = !self.table.as_ref().is_some_and(|t| t.matches(intrinsics));
        if stale {
            let fresh = RayTable::build(intrinsics);
            self.table = Some(fresh);
        }
        self.table.get_or_insert_with(|| RayTable::build(intrinsics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Distortion;

    #[test]
    fn test_table_matches_reference_formula() {
        let intr = Intrinsics::pinhole(8, 6, 5.0, 5.5, 3.6, 2.9)
            .with_distortion(Distortion::InverseBrownConrady, [0.1, -0.02, 0.001, 0.002, 0.0]);
        let table = RayTable::build(&intr);
        assert_eq!(table.len(), 48);
        let [x, y] = intr.pixel_to_ray(5.0, 4.0);
        assert_eq!(table.x[4 * 8 + 5], x);
        assert_eq!(table.y[4 * 8 + 5], y);
    }

    #[test]
    fn test_cache_rebuilds_on_change() {
        let mut cache = RayCache::default();
        let a = Intrinsics::pinhole(4, 4, 1.0, 1.0, 0.0, 0.0);
        let b = Intrinsics::pinhole(4, 2, 1.0, 1.0, 0.0, 0.0);
        assert_eq!(cache.get(&a).len(), 16);
        assert_eq!(cache.get(&b).len(), 8);
        assert!(cache.get(&b).matches(&b));
    }
}
