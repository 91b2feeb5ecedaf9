//! Vertex formats shared by geometry producers and backends

use glam::{Vec2, Vec3};

/// Position + texture coordinate, tightly packed (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Vertex3d {
    pub position: Vec3,
    pub texcoord: Vec2,
}

impl Vertex3d {
    pub const fn new(position: Vec3, texcoord: Vec2) -> Self {
        Self { position, texcoord }
    }
}
