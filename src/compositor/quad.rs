//! Full-screen quad geometry and uniform layouts.

use bytemuck::{Pod, Zeroable};

/// Quad vertex: clip-space position + texture coordinate
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 4],
    pub tex_coord: [f32; 2],
}

/// Unit quad over clip space, drawn as a 4-vertex triangle strip.
///
/// Texture `(0, 0)` sits at the bottom-left corner, so frames are uploaded
/// bottom row first (see [`flip_rows_into`]).
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [-1.0, -1.0, 0.0, 1.0],
        tex_coord: [0.0, 0.0],
    },
    QuadVertex {
        position: [1.0, -1.0, 0.0, 1.0],
        tex_coord: [1.0, 0.0],
    },
    QuadVertex {
        position: [-1.0, 1.0, 0.0, 1.0],
        tex_coord: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0, 0.0, 1.0],
        tex_coord: [1.0, 1.0],
    },
];

/// `u_input_variable` (uniform buffers are padded to 16 bytes)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct ScalarUniform {
    pub value: f32,
    pub _padding: [f32; 3],
}

impl ScalarUniform {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            _padding: [0.0; 3],
        }
    }
}

/// `u_resolution` in pixels
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct Vec2Uniform {
    pub value: [f32; 2],
    pub _padding: [f32; 2],
}

impl Vec2Uniform {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            value: [x, y],
            _padding: [0.0; 2],
        }
    }
}

/// Copy tightly packed RGBA rows into `dst` in reverse order.
///
/// Returns false (leaving `dst` empty) when `src` is shorter than
/// `width * height` pixels.
pub fn flip_rows_into(src: &[u8], width: u32, height: u32, dst: &mut Vec<u8>) -> bool {
    dst.clear();
    let stride = width as usize * 4;
    let rows = height as usize;
    if src.len() < stride * rows {
        return false;
    }
    dst.reserve(stride * rows);
    for row in src[..stride * rows].chunks_exact(stride.max(1)).rev() {
        dst.extend_from_slice(row);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_covers_clip_space() {
        for vertex in QUAD_VERTICES {
            let [x, y, _, w] = vertex.position;
            assert_eq!(w, 1.0);
            assert_eq!(vertex.tex_coord, [(x + 1.0) / 2.0, (y + 1.0) / 2.0]);
        }
        assert_eq!(std::mem::size_of::<QuadVertex>(), 24);
    }

    #[test]
    fn test_uniforms_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<ScalarUniform>(), 16);
        assert_eq!(std::mem::size_of::<Vec2Uniform>(), 16);
    }

    #[test]
    fn test_flip_rows() {
        // 1x3 image, one pixel per row
        let src = [1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];
        let mut dst = Vec::new();
        assert!(flip_rows_into(&src, 1, 3, &mut dst));
        assert_eq!(dst, vec![3, 3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn test_flip_rejects_short_buffer() {
        let mut dst = vec![9];
        assert!(!flip_rows_into(&[0; 8], 2, 2, &mut dst));
        assert!(dst.is_empty());
    }
}
