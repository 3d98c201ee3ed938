/// Mesh geometry storage: vertex/index lists, a world transform and
/// cached bounds. Meshes are immutable during a frame; the geometry
/// pipeline reads them and produces clipped screen-space triangles.
use std::sync::Arc;

use glam::{Mat4, Quat, Vec2, Vec3};

use super::texture::Texture;

/// A single model-space vertex as stored in a mesh.
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub color: [u8; 4],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2, color: [u8; 4]) -> Self {
        Self {
            position,
            normal,
            uv,
            color,
        }
    }

    /// Vertex with a flat color and no meaningful UV.
    pub fn colored(position: Vec3, normal: Vec3, color: [u8; 4]) -> Self {
        Self::new(position, normal, Vec2::ZERO, color)
    }
}

/// Axis-aligned bounding box.
#[derive(Copy, Clone, Debug)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    #[inline]
    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// Transform all corners and rebuild an axis-aligned box around them.
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        let mut out = Aabb::empty();
        if self.is_empty() {
            return out;
        }
        for corner in self.corners() {
            out.extend(m.transform_point3(corner));
        }
        out
    }
}

pub struct Mesh {
    vertices: Vec<Vertex>,
    indices: Vec<[u32; 3]>,
    texture: Option<Arc<Texture>>,

    translation: Vec3,
    rotation: Quat,
    scale: Vec3,

    model: Mat4,
    local_bounds: Aabb,
    world_bounds: Aabb,
    opaque: bool,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            texture: None,
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            model: Mat4::IDENTITY,
            local_bounds: Aabb::empty(),
            world_bounds: Aabb::empty(),
            opaque: true,
        }
    }

    /// Append a triangle. Winding must be counter-clockwise when viewed
    /// from the front; back faces are culled by the rasterizer.
    pub fn add_triangle(&mut self, v0: Vertex, v1: Vertex, v2: Vertex) {
        let base = self.vertices.len() as u32;
        for v in [v0, v1, v2] {
            self.local_bounds.extend(v.position);
            if self.texture.is_none() && v.color[3] != 255 {
                self.opaque = false;
            }
            self.vertices.push(v);
        }
        self.indices.push([base, base + 1, base + 2]);
        self.world_bounds = self.local_bounds.transformed(&self.model);
    }

    pub fn set_texture(&mut self, texture: Arc<Texture>) {
        self.opaque = texture.is_opaque();
        self.texture = Some(texture);
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.translation = translation;
        self.refresh_transform();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.refresh_transform();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.refresh_transform();
    }

    fn refresh_transform(&mut self) {
        self.model =
            Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation);
        self.world_bounds = self.local_bounds.transformed(&self.model);
    }

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn indices(&self) -> &[[u32; 3]] {
        &self.indices
    }

    #[inline]
    pub fn texture(&self) -> Option<&Arc<Texture>> {
        self.texture.as_ref()
    }

    #[inline]
    pub fn model_matrix(&self) -> &Mat4 {
        &self.model
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    #[inline]
    pub fn world_bounds(&self) -> &Aabb {
        &self.world_bounds
    }

    /// A mesh is opaque when its texture is opaque, or, untextured,
    /// when every vertex has alpha 255.
    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }
}
