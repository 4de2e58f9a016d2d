//! Vertex layout shared by the asset cache and the renderer

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Mesh vertex with position, normal, and texture coordinate.
///
/// `#[repr(C)]` and `Pod` so vertex arrays can be written to and read from
/// the binary mesh cache as raw bytes, and uploaded to the GPU without
/// repacking.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Size of one vertex in bytes (8 floats).
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Create a new vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }

    /// Create a vertex from glam vectors
    pub fn from_glam(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tex_coord: tex_coord.to_array(),
        }
    }

    /// Position as a glam vector
    pub fn position_vec(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// Normal as a glam vector
    pub fn normal_vec(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}
