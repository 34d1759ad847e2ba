// SPDX-License-Identifier: GPL-3.0-only

//! Point cloud output buffers

use bytemuck::{Pod, Zeroable};

/// Camera-space point in meters. `z == 0` means no data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vertex {
    pub const ZERO: Vertex = Vertex {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Whether this vertex carries depth
    pub fn is_valid(&self) -> bool {
        self.z != 0.0
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Normalized texture coordinate in the target stream
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TexCoord {
    pub u: f32,
    pub v: f32,
}

impl TexCoord {
    pub const ZERO: TexCoord = TexCoord { u: 0.0, v: 0.0 };

    pub fn new(u: f32, v: f32) -> Self {
        Self { u, v }
    }
}

/// Un-normalized pixel coordinate in the target raster
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Pixel {
    pub x: f32,
    pub y: f32,
}

impl Pixel {
    pub const ZERO: Pixel = Pixel { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Vertices and texture coordinates for one depth frame
///
/// Both arrays hold exactly `width * height` entries in depth raster order.
#[derive(Debug, Clone, Default)]
pub struct Points {
    pub vertices: Vec<Vertex>,
    pub texcoords: Vec<TexCoord>,
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
    pub timestamp_ms: f64,
}

impl Points {
    /// Zeroed buffers for a `width x height` frame
    pub fn new(width: u32, height: u32) -> Self {
        let count = width as usize * height as usize;
        Self {
            vertices: vec![Vertex::ZERO; count],
            texcoords: vec![TexCoord::ZERO; count],
            width,
            height,
            frame_number: 0,
            timestamp_ms: 0.0,
        }
    }

    /// Reallocate when the resolution changed. Returns true when it did.
    pub(crate) fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height && !self.vertices.is_empty() {
            return false;
        }
        *self = Self::new(width, height);
        true
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Number of vertices carrying depth
    pub fn valid_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.is_valid()).count()
    }

    /// Vertices as a flat `[x, y, z, x, y, z, ...]` slice
    pub fn vertex_floats(&self) -> &[f32] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Texture coordinates as a flat `[u, v, u, v, ...]` slice
    pub fn texcoord_floats(&self) -> &[f32] {
        bytemuck::cast_slice(&self.texcoords)
    }

    /// Iterate over `(vertex, texcoord)` pairs that carry depth
    pub fn iter_valid(&self) -> impl Iterator<Item = (&Vertex, &TexCoord)> {
        self.vertices
            .iter()
            .zip(self.texcoords.iter())
            .filter(|(v, _)| v.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_views() {
        let mut points = Points::new(2, 1);
        points.vertices[1] = Vertex::new(1.0, 2.0, 3.0);
        points.texcoords[1] = TexCoord::new(0.5, 0.25);
        assert_eq!(points.vertex_floats(), &[0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(points.texcoord_floats(), &[0.0, 0.0, 0.5, 0.25]);
        assert_eq!(points.valid_count(), 1);
    }

    #[test]
    fn test_ensure_size_reuses_buffers() {
        let mut points = Points::new(4, 4);
        assert!(!points.ensure_size(4, 4));
        assert!(points.ensure_size(8, 2));
        assert_eq!(points.len(), 16);
        assert_eq!(points.width, 8);
    }
}
