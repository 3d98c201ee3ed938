/// Geometry pipeline: model -> world -> clip transform, attribute
/// preparation for perspective-correct interpolation, perspective divide,
/// viewport mapping, and batching of clipped triangles by texture.
use std::sync::Arc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::count_call;
use crate::perf::FUNCTION_COUNTERS;
use crate::scene::{Mesh, Texture, Vertex};

use super::clipper::{self, MAX_POLY_VERTS};

/// Hard cap on simultaneously active lights; the per-vertex light clip
/// array is inline to keep triangles contiguous in memory.
pub const MAX_LIGHTS: usize = 4;

/// Vertex in flight through the geometry pipeline.
///
/// `clip` starts as the homogeneous clip-space position; after the
/// perspective divide and viewport transform it holds screen-space
/// x/y in pixels, z in [0, 1] and w = 1. The `inv_w` and `*_over_w`
/// fields keep the pre-divide values needed for perspective-correct
/// interpolation, and are recomputed for every vertex the clipper emits.
#[derive(Copy, Clone, Debug)]
pub struct PipeVertex {
    pub clip: Vec4,
    pub world: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub color: [u8; 4],

    pub inv_w: f32,
    pub world_over_w: Vec3,
    pub normal_over_w: Vec3,
    pub uv_over_w: Vec2,
    pub light_clip_over_w: [Vec4; MAX_LIGHTS],
}

impl PipeVertex {
    pub fn from_mesh_vertex(v: &Vertex, model: &Mat4, normal_matrix: &Mat3, w2c: &Mat4) -> Self {
        let world = model.transform_point3(v.position);
        let clip = *w2c * world.extend(1.0);
        let mut out = Self {
            clip,
            world,
            normal: (*normal_matrix * v.normal).normalize_or_zero(),
            uv: v.uv,
            color: v.color,
            inv_w: 0.0,
            world_over_w: Vec3::ZERO,
            normal_over_w: Vec3::ZERO,
            uv_over_w: Vec2::ZERO,
            light_clip_over_w: [Vec4::ZERO; MAX_LIGHTS],
        };
        out.prepare();
        out
    }

    /// Recompute `inv_w` and the pre-multiplied attributes from the
    /// current clip-space w.
    #[inline]
    pub fn prepare(&mut self) {
        self.inv_w = 1.0 / self.clip.w;
        self.world_over_w = self.world * self.inv_w;
        self.normal_over_w = self.normal * self.inv_w;
        self.uv_over_w = self.uv * self.inv_w;
    }

    /// Linear interpolation along a clipped edge. Attributes interpolate
    /// linearly in clip space; the prepared fields are then rebuilt from
    /// the interpolated w.
    pub fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        let mut color = [0u8; 4];
        for (i, c) in color.iter_mut().enumerate() {
            let fa = a.color[i] as f32;
            let fb = b.color[i] as f32;
            *c = (fa + (fb - fa) * t).round().clamp(0.0, 255.0) as u8;
        }

        let mut out = Self {
            clip: a.clip + (b.clip - a.clip) * t,
            world: a.world + (b.world - a.world) * t,
            normal: a.normal + (b.normal - a.normal) * t,
            uv: a.uv + (b.uv - a.uv) * t,
            color,
            inv_w: 0.0,
            world_over_w: Vec3::ZERO,
            normal_over_w: Vec3::ZERO,
            uv_over_w: Vec2::ZERO,
            light_clip_over_w: [Vec4::ZERO; MAX_LIGHTS],
        };
        out.prepare();
        out
    }

    /// Attach each light's clip-space position, scaled by this vertex's
    /// camera inv_w so it interpolates perspective-correctly.
    #[inline]
    pub fn attach_lights(&mut self, light_mats: &[Mat4]) {
        for (slot, m) in self
            .light_clip_over_w
            .iter_mut()
            .zip(light_mats.iter())
        {
            *slot = (*m * self.world.extend(1.0)) * self.inv_w;
        }
    }

    /// Perspective divide followed by the viewport transform.
    #[inline]
    pub fn to_screen(&mut self, width: f32, height: f32) {
        let ndc = self.clip * self.inv_w;
        self.clip = Vec4::new(
            (ndc.x + 1.0) * 0.5 * width,
            (1.0 - ndc.y) * 0.5 * height,
            ndc.z,
            1.0,
        );
    }
}

/// Screen-space triangle ready for rasterization.
#[derive(Copy, Clone, Debug)]
pub struct Triangle {
    pub v: [PipeVertex; 3],
}

impl Triangle {
    #[inline]
    pub fn average_depth(&self) -> f32 {
        (self.v[0].clip.z + self.v[1].clip.z + self.v[2].clip.z) * (1.0 / 3.0)
    }
}

/// Triangles sharing one texture binding, so the rasterizer rebinds the
/// texture once per batch.
pub struct Batch {
    pub texture: Option<Arc<Texture>>,
    pub opaque: bool,
    pub triangles: Vec<Triangle>,
    depth_sum: f32,
}

impl Batch {
    pub fn new(texture: Option<Arc<Texture>>, opaque: bool) -> Self {
        Self {
            texture,
            opaque,
            triangles: Vec::new(),
            depth_sum: 0.0,
        }
    }

    pub fn push(&mut self, tri: Triangle) {
        self.depth_sum += tri.average_depth();
        self.triangles.push(tri);
    }

    /// Mean screen-space depth of the batch, used for pass ordering.
    pub fn average_depth(&self) -> f32 {
        if self.triangles.is_empty() {
            0.0
        } else {
            self.depth_sum / self.triangles.len() as f32
        }
    }
}

// Cohen-Sutherland style outcodes against the six clip-space planes.
const OUT_LEFT: u8 = 1 << 0;
const OUT_RIGHT: u8 = 1 << 1;
const OUT_BOTTOM: u8 = 1 << 2;
const OUT_TOP: u8 = 1 << 3;
const OUT_NEAR: u8 = 1 << 4;
const OUT_FAR: u8 = 1 << 5;

#[inline]
fn outcode(clip: Vec4) -> u8 {
    let mut code = 0;
    if clip.x < -clip.w {
        code |= OUT_LEFT;
    }
    if clip.x > clip.w {
        code |= OUT_RIGHT;
    }
    if clip.y < -clip.w {
        code |= OUT_BOTTOM;
    }
    if clip.y > clip.w {
        code |= OUT_TOP;
    }
    if clip.z < 0.0 {
        code |= OUT_NEAR;
    }
    if clip.z > clip.w {
        code |= OUT_FAR;
    }
    code
}

/// Conservative whole-mesh rejection: if every corner of the world AABB
/// lies outside the same frustum plane, nothing in the mesh is visible.
fn mesh_outside_frustum(mesh: &Mesh, w2c: &Mat4) -> bool {
    let bounds = mesh.world_bounds();
    if bounds.is_empty() {
        return true;
    }

    let mut all_out = 0xFFu8;
    for corner in bounds.corners() {
        all_out &= outcode(*w2c * corner.extend(1.0));
        if all_out == 0 {
            return false;
        }
    }
    all_out != 0
}

// Vertices with w this small after clipping belong to degenerate
// frustum-corner cases; the perspective divide would explode.
const MIN_CLIP_W: f32 = 1e-6;

/// Transform, clip and viewport-map every mesh in `meshes`, appending
/// screen-space triangles to per-texture batches. `light_mats` are the
/// world-to-clip matrices of the pipeline's lights; the shadow pass
/// passes an empty slice.
pub fn prepare_batches(
    meshes: &[Mesh],
    w2c: &Mat4,
    width: usize,
    height: usize,
    light_mats: &[Mat4],
    batches: &mut Vec<Batch>,
) {
    batches.clear();
    let width_f = width as f32;
    let height_f = height as f32;

    for mesh in meshes {
        if mesh.indices().is_empty() || mesh_outside_frustum(mesh, w2c) {
            continue;
        }

        let model = mesh.model_matrix();
        // Inverse-transpose keeps normals correct under non-uniform scale.
        let normal_matrix = Mat3::from_mat4(*model).inverse().transpose();

        let batch_index = find_or_add_batch(batches, mesh.texture(), mesh.is_opaque());

        let vertices = mesh.vertices();
        for tri in mesh.indices() {
            count_call!(FUNCTION_COUNTERS.triangles_submitted);

            let corners = [
                PipeVertex::from_mesh_vertex(&vertices[tri[0] as usize], model, &normal_matrix, w2c),
                PipeVertex::from_mesh_vertex(&vertices[tri[1] as usize], model, &normal_matrix, w2c),
                PipeVertex::from_mesh_vertex(&vertices[tri[2] as usize], model, &normal_matrix, w2c),
            ];

            let mut poly = [corners[0]; MAX_POLY_VERTS];
            let poly_len = clipper::clip_triangle(&corners, &mut poly);
            if poly_len < 3 {
                count_call!(FUNCTION_COUNTERS.triangles_clipped_out);
                continue;
            }

            // Frustum-corner degenerates where w collapsed to ~0.
            if poly[..poly_len].iter().any(|v| v.clip.w < MIN_CLIP_W) {
                count_call!(FUNCTION_COUNTERS.triangles_clipped_out);
                continue;
            }

            for v in poly[..poly_len].iter_mut() {
                v.attach_lights(light_mats);
                v.to_screen(width_f, height_f);
            }

            // Fan-triangulate the clipped convex polygon.
            let batch = &mut batches[batch_index];
            for i in 1..poly_len - 1 {
                batch.push(Triangle {
                    v: [poly[0], poly[i], poly[i + 1]],
                });
            }
        }
    }

    batches.retain(|b| !b.triangles.is_empty());
}

fn find_or_add_batch(
    batches: &mut Vec<Batch>,
    texture: Option<&Arc<Texture>>,
    opaque: bool,
) -> usize {
    let key = texture.map_or(std::ptr::null(), Arc::as_ptr);
    for (i, batch) in batches.iter().enumerate() {
        let batch_key = batch.texture.as_ref().map_or(std::ptr::null(), Arc::as_ptr);
        if batch_key == key && batch.opaque == opaque {
            return i;
        }
    }
    batches.push(Batch::new(texture.cloned(), opaque));
    batches.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn quad_mesh(color: [u8; 4]) -> Mesh {
        let mut mesh = Mesh::new();
        let n = Vec3::Z;
        let v = |x: f32, y: f32| Vertex::new(Vec3::new(x, y, 0.0), n, Vec2::ZERO, color);
        mesh.add_triangle(v(-1.0, -1.0), v(1.0, -1.0), v(1.0, 1.0));
        mesh.add_triangle(v(-1.0, -1.0), v(1.0, 1.0), v(-1.0, 1.0));
        mesh
    }

    fn simple_w2c() -> Mat4 {
        Mat4::perspective_rh(90f32.to_radians(), 1.0, 0.1, 10.0)
    }

    #[test]
    fn mesh_behind_camera_is_rejected() {
        let mut mesh = quad_mesh([255, 255, 255, 255]);
        mesh.set_translation(Vec3::new(0.0, 0.0, 5.0)); // behind (+Z)
        let mut batches = Vec::new();
        prepare_batches(&[mesh], &simple_w2c(), 64, 64, &[], &mut batches);
        assert!(batches.is_empty());
    }

    #[test]
    fn visible_mesh_produces_screen_triangles() {
        let mut mesh = quad_mesh([255, 255, 255, 255]);
        mesh.set_translation(Vec3::new(0.0, 0.0, -2.0));
        let mut batches = Vec::new();
        prepare_batches(&[mesh], &simple_w2c(), 64, 64, &[], &mut batches);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].triangles.len(), 2);
        for tri in &batches[0].triangles {
            for v in &tri.v {
                assert!((v.clip.w - 1.0).abs() < 1e-6, "w must be 1 after divide");
                assert!(v.clip.x >= 0.0 && v.clip.x <= 64.0);
                assert!(v.clip.z >= 0.0 && v.clip.z <= 1.0);
                assert!((v.inv_w - 0.5).abs() < 1e-4, "inv_w = 1/view_dist at z=-2");
            }
        }
    }

    #[test]
    fn batches_split_by_texture_identity() {
        let tex = Arc::new(Texture::solid(2, 2, [255, 0, 0, 255]));
        let mut a = quad_mesh([255, 255, 255, 255]);
        a.set_translation(Vec3::new(0.0, 0.0, -2.0));
        let mut b = quad_mesh([255, 255, 255, 255]);
        b.set_translation(Vec3::new(0.0, 0.0, -3.0));
        b.set_texture(tex.clone());
        let mut c = quad_mesh([255, 255, 255, 255]);
        c.set_translation(Vec3::new(0.0, 0.0, -4.0));
        c.set_texture(tex);

        let mut batches = Vec::new();
        prepare_batches(&[a, b, c], &simple_w2c(), 64, 64, &[], &mut batches);

        // Untextured batch plus one shared textured batch.
        assert_eq!(batches.len(), 2);
        let textured = batches.iter().find(|b| b.texture.is_some()).unwrap();
        assert_eq!(textured.triangles.len(), 4);
    }

    #[test]
    fn rotated_mesh_keeps_unit_normals() {
        let mut mesh = quad_mesh([255, 255, 255, 255]);
        mesh.set_translation(Vec3::new(0.0, 0.0, -2.0));
        mesh.set_rotation(Quat::from_rotation_y(0.7));
        mesh.set_scale(Vec3::new(3.0, 1.0, 0.5));

        let mut batches = Vec::new();
        prepare_batches(&[mesh], &simple_w2c(), 64, 64, &[], &mut batches);
        for tri in &batches[0].triangles {
            for v in &tri.v {
                assert!((v.normal.length() - 1.0).abs() < 1e-4);
            }
        }
    }
}
