/// Full-frame pipeline tests: depth ordering, alpha compositing,
/// determinism of the tiled merge, and spotlight shadow attenuation.
use glam::{Vec2, Vec3};

use raster_engine::rendering::framebuffer::unpack_rgba;
use raster_engine::{Camera, Mesh, PerspectiveLight, Pipeline, Scene, Vertex};

const W: usize = 64;
const H: usize = 64;

/// Camera-facing quad at world z = `z`, large enough to cover the whole
/// viewport of a 90-degree camera at the origin.
fn fullscreen_quad(z: f32, color: [u8; 4]) -> Mesh {
    let half = 2.0 * z.abs().max(1.0);
    let n = Vec3::Z;
    let mut mesh = Mesh::new();
    let v = |x: f32, y: f32| Vertex::new(Vec3::new(x, y, z), n, Vec2::ZERO, color);
    mesh.add_triangle(v(-half, -half), v(half, -half), v(half, half));
    mesh.add_triangle(v(-half, -half), v(half, half), v(-half, half));
    mesh
}

fn flat_scene() -> Scene {
    let mut camera = Camera::new(W, H).unwrap();
    camera.set_fov(90.0);
    let mut scene = Scene::new(camera);
    scene.background = [0, 0, 0, 255];
    scene.ambient = Vec3::ONE; // pure-albedo shading for lightless tests
    scene
}

fn center_pixel(pipeline: &Pipeline) -> [u8; 4] {
    unpack_rgba(pipeline.framebuffer().color_buffer_slice()[(H / 2) * W + W / 2])
}

#[test]
fn nearer_opaque_quad_wins_in_either_order() {
    let red = fullscreen_quad(-1.0, [255, 0, 0, 255]);
    let blue = fullscreen_quad(-2.0, [0, 0, 255, 255]);

    let mut scene_a = flat_scene();
    scene_a.meshes.push(fullscreen_quad(-1.0, [255, 0, 0, 255]));
    scene_a.meshes.push(fullscreen_quad(-2.0, [0, 0, 255, 255]));

    let mut scene_b = flat_scene();
    scene_b.meshes.push(blue);
    scene_b.meshes.push(red);

    let mut pipeline_a = Pipeline::new(W, H, Vec::new()).unwrap();
    let mut pipeline_b = Pipeline::new(W, H, Vec::new()).unwrap();
    pipeline_a.render(&mut scene_a);
    pipeline_b.render(&mut scene_b);

    assert_eq!(center_pixel(&pipeline_a), [255, 0, 0, 255]);
    assert_eq!(
        pipeline_a.framebuffer().color_buffer_slice(),
        pipeline_b.framebuffer().color_buffer_slice(),
        "draw order must not change the result for opaque geometry"
    );
    assert_eq!(pipeline_a.depth_buffer(), pipeline_b.depth_buffer());

    // The surviving depth is the near quad's depth everywhere.
    let mut scene_red = flat_scene();
    scene_red.meshes.push(fullscreen_quad(-1.0, [255, 0, 0, 255]));
    let mut pipeline_red = Pipeline::new(W, H, Vec::new()).unwrap();
    pipeline_red.render(&mut scene_red);
    assert_eq!(pipeline_a.depth_buffer(), pipeline_red.depth_buffer());
}

#[test]
fn translucent_quad_blends_without_touching_depth() {
    let mut scene = flat_scene();
    scene.meshes.push(fullscreen_quad(-1.0, [255, 255, 255, 128]));

    let mut pipeline = Pipeline::new(W, H, Vec::new()).unwrap();
    pipeline.render(&mut scene);

    let center = center_pixel(&pipeline);
    for channel in &center[..3] {
        assert!(
            (*channel as i32 - 128).abs() <= 2,
            "half-alpha white over black should be mid gray, got {center:?}"
        );
    }
    assert_eq!(center[3], 255);

    for &depth in pipeline.depth_buffer() {
        assert!(
            depth.is_infinite(),
            "translucent fragments must not write depth, found {depth}"
        );
    }
}

#[test]
fn transparent_over_opaque_composites_both() {
    let mut scene = flat_scene();
    scene.meshes.push(fullscreen_quad(-2.0, [0, 0, 255, 255]));
    scene.meshes.push(fullscreen_quad(-1.0, [255, 255, 255, 128]));

    let mut pipeline = Pipeline::new(W, H, Vec::new()).unwrap();
    pipeline.render(&mut scene);

    // Half white over pure blue: red/green rise to ~128, blue stays full.
    let center = center_pixel(&pipeline);
    assert!((center[0] as i32 - 128).abs() <= 2, "got {center:?}");
    assert!((center[1] as i32 - 128).abs() <= 2, "got {center:?}");
    assert!(center[2] >= 253, "got {center:?}");
}

#[test]
fn repeated_renders_are_deterministic() {
    let mut scene = flat_scene();
    scene.meshes.push(fullscreen_quad(-1.5, [10, 200, 90, 255]));
    scene.meshes.push(fullscreen_quad(-1.0, [255, 255, 255, 90]));

    let mut pipeline = Pipeline::new(W, H, Vec::new()).unwrap();
    let first: Vec<u32> = pipeline.render(&mut scene).to_vec();
    let second: Vec<u32> = pipeline.render(&mut scene).to_vec();
    assert_eq!(first, second, "tile completion order must not leak into the output");
}

/// Spotlight at the origin pointing down -Z, a small half-transparent
/// occluder at z = -0.3, and a white receiver at z = -0.6. The occluder
/// halves the receiver's diffuse term.
#[test]
fn translucent_occluder_halves_received_light() {
    let receiver_brightness = |with_occluder: bool| -> u8 {
        let light = PerspectiveLight::new(
            64,
            64,
            90.0,
            0.1,
            2.0,
            Vec3::ONE,
            1.0,
            0.0,
            30.0,
            45.0,
        )
        .unwrap();

        let mut camera = Camera::new(W, H).unwrap();
        camera.set_position(Vec3::new(0.6, 0.0, 0.1));
        camera.look_at(Vec3::new(0.0, 0.0, -0.6), Vec3::Y);

        let mut scene = Scene::new(camera);
        scene.background = [0, 0, 0, 255];
        scene.ambient = Vec3::ZERO;

        // Receiver: white, opaque, facing the light.
        let mut receiver = Mesh::new();
        let rv = |x: f32, y: f32| {
            Vertex::new(Vec3::new(x, y, -0.6), Vec3::Z, Vec2::ZERO, [255, 255, 255, 255])
        };
        receiver.add_triangle(rv(-0.5, -0.5), rv(0.5, -0.5), rv(0.5, 0.5));
        receiver.add_triangle(rv(-0.5, -0.5), rv(0.5, 0.5), rv(-0.5, 0.5));
        scene.meshes.push(receiver);

        if with_occluder {
            let mut occluder = Mesh::new();
            let ov = |x: f32, y: f32| {
                Vertex::new(Vec3::new(x, y, -0.3), Vec3::Z, Vec2::ZERO, [255, 255, 255, 128])
            };
            occluder.add_triangle(ov(-0.1, -0.1), ov(0.1, -0.1), ov(0.1, 0.1));
            occluder.add_triangle(ov(-0.1, -0.1), ov(0.1, 0.1), ov(-0.1, 0.1));
            scene.meshes.push(occluder);
        }

        let mut pipeline = Pipeline::new(W, H, vec![light]).unwrap();
        pipeline.material.specular_strength = 0.0;
        pipeline.render(&mut scene);
        center_pixel(&pipeline)[0]
    };

    let lit = receiver_brightness(false) as f32;
    let shadowed = receiver_brightness(true) as f32;

    assert!(lit > 200.0, "unshadowed receiver should be bright, got {lit}");
    let ratio = shadowed / lit;
    assert!(
        (ratio - 0.5).abs() < 0.08,
        "alpha-0.5 occluder should halve the light: ratio {ratio}"
    );
}

/// The finalized shadow map of a rendered frame satisfies the
/// visibility-function invariants on every pixel.
#[test]
fn rendered_shadow_map_is_well_formed() {
    let light =
        PerspectiveLight::new(32, 32, 90.0, 0.1, 2.0, Vec3::ONE, 1.0, 0.0, 30.0, 45.0).unwrap();

    let mut camera = Camera::new(W, H).unwrap();
    camera.set_position(Vec3::new(0.0, 0.0, 0.5));
    let mut scene = Scene::new(camera);

    let mut occluder = Mesh::new();
    let ov = |x: f32, y: f32| {
        Vertex::new(Vec3::new(x, y, -0.3), Vec3::Z, Vec2::ZERO, [255, 255, 255, 128])
    };
    occluder.add_triangle(ov(-0.2, -0.2), ov(0.2, -0.2), ov(0.2, 0.2));
    scene.meshes.push(occluder);

    let mut wall = fullscreen_wall();
    wall.set_translation(Vec3::new(0.0, 0.0, -0.8));
    scene.meshes.push(wall);

    let mut pipeline = Pipeline::new(W, H, vec![light]).unwrap();
    pipeline.render(&mut scene);

    let map = pipeline.shadow_map(0).unwrap();
    let mut populated = 0;
    for y in 0..map.height() {
        for x in 0..map.width() {
            let vf = map.pixel(x, y);
            let points = vf.points();
            assert_eq!((points[0].depth, points[0].visibility), (0.0, 1.0));
            for pair in points.windows(2) {
                assert!(pair[0].depth <= pair[1].depth);
                assert!(pair[0].visibility >= pair[1].visibility);
            }
            if let Some(od) = vf.opaque_depth() {
                let last = points[points.len() - 1];
                assert!((last.depth - od).abs() < 1e-6);
                assert_eq!(last.visibility, 0.0);
            }
            if points.len() > 1 || vf.opaque_depth().is_some() {
                populated += 1;
            }
        }
    }
    assert!(populated > 0, "the wall and occluder must reach the shadow map");
}

fn fullscreen_wall() -> Mesh {
    let n = Vec3::Z;
    let mut mesh = Mesh::new();
    let v = |x: f32, y: f32| Vertex::new(Vec3::new(x, y, 0.0), n, Vec2::ZERO, [200, 200, 200, 255]);
    mesh.add_triangle(v(-2.0, -2.0), v(2.0, -2.0), v(2.0, 2.0));
    mesh.add_triangle(v(-2.0, -2.0), v(2.0, 2.0), v(-2.0, 2.0));
    mesh
}
