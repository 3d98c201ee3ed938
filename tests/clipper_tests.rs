/// End-to-end clipping tests: geometry that crosses frustum planes must
/// come out of the pipeline as valid screen-space triangles.
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use raster_engine::rendering::clipper::{clip_triangle, inside_frustum, MAX_POLY_VERTS};
use raster_engine::rendering::geometry::{self, Batch, PipeVertex};
use raster_engine::scene::{Mesh, Vertex};

fn clip_vertex(clip: Vec4) -> PipeVertex {
    let v = Vertex::new(clip.truncate(), Vec3::Z, Vec2::ZERO, [255, 255, 255, 255]);
    let mut pv = PipeVertex::from_mesh_vertex(&v, &Mat4::IDENTITY, &Mat3::IDENTITY, &Mat4::IDENTITY);
    pv.clip = clip;
    pv.prepare();
    pv
}

#[test]
fn near_plane_crossing_triangle_fans_into_two() {
    // One corner behind the near plane (z < 0): the clipped quad fans
    // into two triangles whose outputs all satisfy z >= 0.
    let tri = [
        clip_vertex(Vec4::new(0.0, 0.0, -0.5, 1.0)),
        clip_vertex(Vec4::new(1.0, 0.0, 0.5, 1.0)),
        clip_vertex(Vec4::new(0.0, 1.0, 0.5, 1.0)),
    ];
    let mut out = [tri[0]; MAX_POLY_VERTS];
    let len = clip_triangle(&tri, &mut out);

    assert_eq!(len, 4, "a quad fans into 2 triangles");
    for v in &out[..len] {
        assert!(v.clip.z >= -1e-5, "near output violates z >= 0: {:?}", v.clip);
        assert!(inside_frustum(v.clip, 1e-4));
    }
}

#[test]
fn clip_outputs_preserve_homogeneous_inclusion() {
    // A large triangle poking out of several planes at once.
    let tri = [
        clip_vertex(Vec4::new(-3.0, -2.5, 0.3, 1.0)),
        clip_vertex(Vec4::new(3.5, -0.5, 1.9, 1.0)),
        clip_vertex(Vec4::new(0.2, 2.8, -0.4, 1.0)),
    ];
    let mut out = [tri[0]; MAX_POLY_VERTS];
    let len = clip_triangle(&tri, &mut out);

    assert!(len >= 3);
    for v in &out[..len] {
        assert!(inside_frustum(v.clip, 1e-3), "escaped frustum: {:?}", v.clip);
        assert!((v.inv_w - 1.0 / v.clip.w).abs() < 1e-5);
    }
}

fn frustum_crossing_mesh() -> Mesh {
    let mut mesh = Mesh::new();
    let n = Vec3::Z;
    let color = [255, 255, 255, 255];
    // Straddles the near plane of a 90-degree camera at the origin.
    mesh.add_triangle(
        Vertex::new(Vec3::new(0.0, 0.0, 1.0), n, Vec2::ZERO, color),
        Vertex::new(Vec3::new(2.0, 0.0, -3.0), n, Vec2::new(1.0, 0.0), color),
        Vertex::new(Vec3::new(-2.0, 0.5, -3.0), n, Vec2::new(0.0, 1.0), color),
    );
    mesh
}

#[test]
fn pipeline_prep_emits_valid_screen_triangles() {
    let w2c = Mat4::perspective_rh(90f32.to_radians(), 1.0, 0.1, 10.0);
    let mut batches: Vec<Batch> = Vec::new();
    geometry::prepare_batches(&[frustum_crossing_mesh()], &w2c, 128, 128, &[], &mut batches);

    let triangles: usize = batches.iter().map(|b| b.triangles.len()).sum();
    assert!(triangles >= 1, "clipped mesh must still rasterize");

    for batch in &batches {
        for tri in &batch.triangles {
            for v in &tri.v {
                assert!((v.clip.w - 1.0).abs() < 1e-6, "post-divide w must be 1");
                assert!(v.clip.z >= -1e-4 && v.clip.z <= 1.0 + 1e-4, "z outside [0,1]");
                assert!(v.clip.x >= -1e-2 && v.clip.x <= 128.01, "x outside viewport");
                assert!(v.clip.y >= -1e-2 && v.clip.y <= 128.01, "y outside viewport");
                assert!(v.inv_w.is_finite() && v.inv_w > 0.0);
            }
        }
    }
}

#[test]
fn degenerate_triangle_is_dropped() {
    let mut mesh = Mesh::new();
    let n = Vec3::Z;
    let color = [255, 255, 255, 255];
    let p = Vec3::new(0.0, 0.0, -2.0);
    mesh.add_triangle(
        Vertex::new(p, n, Vec2::ZERO, color),
        Vertex::new(p, n, Vec2::ZERO, color),
        Vertex::new(p, n, Vec2::ZERO, color),
    );

    let w2c = Mat4::perspective_rh(90f32.to_radians(), 1.0, 0.1, 10.0);
    let mut batches: Vec<Batch> = Vec::new();
    geometry::prepare_batches(&[mesh], &w2c, 64, 64, &[], &mut batches);

    // Zero-area geometry may survive clipping but must be culled by the
    // rasterizer's area test; here the screen bbox collapses to a point.
    for batch in &batches {
        for tri in &batch.triangles {
            let a = Vec2::new(tri.v[0].clip.x, tri.v[0].clip.y);
            let b = Vec2::new(tri.v[1].clip.x, tri.v[1].clip.y);
            assert!((a - b).length() < 1e-4);
        }
    }
}
