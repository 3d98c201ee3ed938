/// Scene description: camera, background, ambient light and meshes.
/// Spotlights are owned by the pipeline, which preallocates shadow-map
/// resources per light.
pub mod mesh;
pub mod texture;

pub use mesh::{Aabb, Mesh, Vertex};
pub use texture::Texture;

use glam::Vec3;

use crate::camera::Camera;

pub struct Scene {
    pub camera: Camera,
    pub meshes: Vec<Mesh>,
    /// Background color written to every pixel no geometry touches.
    pub background: [u8; 4],
    /// Constant ambient term, linear RGB in [0, 1].
    pub ambient: Vec3,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            meshes: Vec::new(),
            background: [24, 26, 32, 255],
            ambient: Vec3::splat(0.1),
        }
    }
}
