// SPDX-License-Identifier: GPL-3.0-only

//! LAS point cloud export
//!
//! Writes the valid vertices of a [`Points`] buffer as an uncompressed LAS
//! file, colored from the mapped texture when one is supplied.

use super::points::{Points, TexCoord};
use crate::constants::LAS_EXPORT_SCALE;
use crate::errors::{Error, Result};
use las::{Builder, Color, Point, Writer};
use std::path::Path;
use tracing::{debug, info};

/// Color used for points without a texture sample
const UNMAPPED_GREY: u8 = 128;

/// RGBA image of the stream the point cloud was mapped to
#[derive(Debug, Clone, Copy)]
pub struct Texture<'a> {
    pub rgba: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> Texture<'a> {
    pub fn new(rgba: &'a [u8], width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(Error::Export(format!(
                "texture {}x{} needs {} RGBA bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            )));
        }
        Ok(Self {
            rgba,
            width,
            height,
        })
    }

    /// Nearest texel at `uv`, `None` for the unmapped sentinel
    pub fn sample(&self, uv: TexCoord) -> Option<[u8; 3]> {
        if uv == TexCoord::ZERO || self.width == 0 || self.height == 0 {
            return None;
        }
        if !(0.0..=1.0).contains(&uv.u) || !(0.0..=1.0).contains(&uv.v) {
            return None;
        }
        let x = ((uv.u * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.v * self.height as f32) as u32).min(self.height - 1);
        let idx = ((y * self.width + x) * 4) as usize;
        let px = self.rgba.get(idx..idx + 3)?;
        Some([px[0], px[1], px[2]])
    }
}

/// Export the valid vertices of `points` to `path`
///
/// Returns the number of points written. An empty cloud is an error.
pub fn export_points_las(
    points: &Points,
    texture: Option<&Texture<'_>>,
    path: &Path,
) -> Result<usize> {
    let count = points.valid_count();
    if count == 0 {
        return Err(Error::Export("No valid depth points to export".to_string()));
    }

    info!(
        point_count = count,
        textured = texture.is_some(),
        path = %path.display(),
        "Exporting point cloud"
    );

    // Bounds for the header offsets
    let mut min = [f64::MAX; 3];
    let mut max = [f64::MIN; 3];
    for (v, _) in points.iter_valid() {
        for (axis, value) in [v.x, v.y, v.z].into_iter().enumerate() {
            min[axis] = min[axis].min(value as f64);
            max[axis] = max[axis].max(value as f64);
        }
    }
    let transform = |axis: usize| las::Transform {
        scale: LAS_EXPORT_SCALE,
        offset: (min[axis] + max[axis]) / 2.0,
    };

    let mut builder = Builder::from((1, 4));
    builder.point_format.has_color = true;
    builder.point_format.is_compressed = false;
    builder.transforms = las::Vector {
        x: transform(0),
        y: transform(1),
        z: transform(2),
    };
    let header = builder.into_header()?;

    let mut writer = Writer::from_path(path, header)?;

    for (v, uv) in points.iter_valid() {
        let [r, g, b] = texture
            .and_then(|t| t.sample(*uv))
            .unwrap_or([UNMAPPED_GREY; 3]);
        let point = Point {
            x: v.x as f64,
            y: v.y as f64,
            z: v.z as f64,
            color: Some(Color::new(r as u16 * 256, g as u16 * 256, b as u16 * 256)),
            ..Default::default()
        };
        writer.write_point(point)?;
    }

    writer.close()?;

    debug!(path = %path.display(), "LAS export complete");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::Vertex;

    #[test]
    fn test_texture_sampling() {
        // 2x1: red, green
        let rgba = [255, 0, 0, 255, 0, 255, 0, 255];
        let tex = Texture::new(&rgba, 2, 1).unwrap();
        assert_eq!(tex.sample(TexCoord::new(0.2, 0.5)), Some([255, 0, 0]));
        assert_eq!(tex.sample(TexCoord::new(0.8, 0.5)), Some([0, 255, 0]));
        assert_eq!(tex.sample(TexCoord::new(1.0, 1.0)), Some([0, 255, 0]));
        assert_eq!(tex.sample(TexCoord::ZERO), None);
        assert_eq!(tex.sample(TexCoord::new(1.5, 0.5)), None);
        assert!(Texture::new(&rgba, 3, 1).is_err());
    }

    #[test]
    fn test_empty_cloud_is_rejected() {
        let points = Points::new(2, 2);
        let path = std::env::temp_dir().join("depthcloud_empty_export.las");
        assert!(matches!(
            export_points_las(&points, None, &path),
            Err(Error::Export(_))
        ));
    }

    #[test]
    fn test_export_writes_valid_points() {
        let mut points = Points::new(2, 1);
        points.vertices[0] = Vertex::new(0.1, -0.2, 1.5);
        let path = std::env::temp_dir().join(format!(
            "depthcloud_export_{}.las",
            std::process::id()
        ));
        let written = export_points_las(&points, None, &path).unwrap();
        assert_eq!(written, 1);

        let mut reader = las::Reader::from_path(&path).unwrap();
        let read: Vec<las::Point> = reader.points().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(read.len(), 1);
        assert!((read[0].z - 1.5).abs() < 1e-3);
        assert_eq!(read[0].color, Some(Color::new(128 * 256, 128 * 256, 128 * 256)));
        let _ = std::fs::remove_file(&path);
    }
}
