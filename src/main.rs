/// Demo application: window creation, input handling and render loop
/// around a small scene with a spotlight, a textured floor, a spinning
/// cube and translucent panes.
use glam::{Quat, Vec2, Vec3};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use raster_engine::*;
use winit::{
    event::*,
    event_loop::{ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

const WIDTH: usize = 1280;
const HEIGHT: usize = 720;

fn main() {
    println!("=== Raster Engine - Software Rasterizer ===");
    println!("Controls:");
    println!("  WASD - Move camera");
    println!("  Space/Shift - Up/Down");
    println!("  Mouse drag - Look around");
    println!("  P - Toggle depth pre-pass");
    println!("  ESC - Exit");
    println!();

    let event_loop = EventLoop::new().unwrap();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Raster Engine")
            .with_inner_size(winit::dpi::LogicalSize::new(WIDTH as u32, HEIGHT as u32))
            .with_resizable(false)
            .build(&event_loop)
            .unwrap(),
    );

    let context = softbuffer::Context::new(window.clone()).unwrap();
    let mut surface = softbuffer::Surface::new(&context, window.clone()).unwrap();

    // Spotlight hovering above the scene, angled down.
    let light = PerspectiveLight::new(
        512,
        512,
        90.0,
        0.1,
        40.0,
        Vec3::new(1.0, 0.97, 0.9),
        1.2,
        0.01,
        25.0,
        40.0,
    )
    .unwrap();

    let mut pipeline = Pipeline::new(WIDTH, HEIGHT, vec![light]).unwrap();
    if let Some(light) = pipeline.light_mut(0) {
        light.set_transform(
            Vec3::new(0.0, 6.0, 2.0),
            Quat::from_rotation_x(-55.0f32.to_radians()),
        );
    }

    let mut camera = Camera::new(WIDTH, HEIGHT).unwrap();
    camera.set_position(Vec3::new(0.0, 2.5, 7.0));
    camera.look_at(Vec3::new(0.0, 1.0, 0.0), Vec3::Y);

    let mut scene = Scene::new(camera);
    scene.ambient = Vec3::splat(0.12);
    scene.background = [18, 20, 26, 255];
    build_scene(&mut scene);

    // Input state
    let mut keys = InputState::default();
    let mut mouse_down = false;
    let mut last_mouse: Option<(f64, f64)> = None;
    let mut yaw = 0.0f32;
    let mut pitch = -0.3f32;

    // Timing
    let mut last_frame = Instant::now();
    let mut frame_count = 0u32;
    let mut fps_timer = Instant::now();
    let mut spin = 0.0f32;

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::KeyboardInput { event, .. } => {
                        let pressed = event.state == ElementState::Pressed;
                        if let PhysicalKey::Code(keycode) = event.physical_key {
                            match keycode {
                                KeyCode::KeyW => keys.forward = pressed,
                                KeyCode::KeyS => keys.backward = pressed,
                                KeyCode::KeyA => keys.left = pressed,
                                KeyCode::KeyD => keys.right = pressed,
                                KeyCode::Space => keys.up = pressed,
                                KeyCode::ShiftLeft => keys.down = pressed,
                                KeyCode::KeyP if pressed => {
                                    pipeline.enable_depth_prepass = !pipeline.enable_depth_prepass;
                                    println!(
                                        "Depth pre-pass: {}",
                                        if pipeline.enable_depth_prepass { "ON" } else { "OFF" }
                                    );
                                }
                                KeyCode::Escape if pressed => elwt.exit(),
                                _ => {}
                            }
                        }
                    }
                    WindowEvent::MouseInput { state, button, .. } => {
                        if button == MouseButton::Left {
                            mouse_down = state == ElementState::Pressed;
                            if !mouse_down {
                                last_mouse = None;
                            }
                        }
                    }
                    WindowEvent::CursorMoved { position, .. } => {
                        if mouse_down {
                            if let Some((lx, ly)) = last_mouse {
                                yaw -= (position.x - lx) as f32 * 0.003;
                                pitch -= (position.y - ly) as f32 * 0.003;
                                pitch = pitch.clamp(-1.5, 1.5);
                            }
                            last_mouse = Some((position.x, position.y));
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        let now = Instant::now();
                        let dt = (now - last_frame).as_secs_f32();
                        last_frame = now;

                        let rotation =
                            Quat::from_rotation_y(yaw) * Quat::from_rotation_x(pitch);
                        let mut position = scene.camera.position();
                        let forward = rotation * Vec3::NEG_Z;
                        let right = rotation * Vec3::X;
                        let speed = 5.0 * dt;
                        if keys.forward {
                            position += forward * speed;
                        }
                        if keys.backward {
                            position -= forward * speed;
                        }
                        if keys.right {
                            position += right * speed;
                        }
                        if keys.left {
                            position -= right * speed;
                        }
                        if keys.up {
                            position += Vec3::Y * speed;
                        }
                        if keys.down {
                            position -= Vec3::Y * speed;
                        }
                        scene.camera.set_position(position);
                        scene.camera.set_rotation(rotation);

                        // Spin the cube (mesh 1).
                        spin += dt;
                        scene.meshes[1].set_rotation(Quat::from_rotation_y(spin));

                        pipeline.render(&mut scene);

                        surface
                            .resize(
                                NonZeroU32::new(WIDTH as u32).unwrap(),
                                NonZeroU32::new(HEIGHT as u32).unwrap(),
                            )
                            .unwrap();
                        let mut buffer = surface.buffer_mut().unwrap();
                        // softbuffer wants 0RGB u32s; repack from RGBA.
                        for (dst, src) in buffer
                            .iter_mut()
                            .zip(pipeline.framebuffer().color_buffer_slice())
                        {
                            let [r, g, b, _] = rgba_bytes(*src);
                            *dst = ((r as u32) << 16) | ((g as u32) << 8) | b as u32;
                        }
                        buffer.present().unwrap();

                        frame_count += 1;
                        if fps_timer.elapsed().as_secs() >= 1 {
                            println!("FPS: {} | Meshes: {}", frame_count, scene.meshes.len());
                            frame_count = 0;
                            fps_timer = Instant::now();
                        }
                    }
                    _ => {}
                },
                Event::AboutToWait => {
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .unwrap();
}

#[derive(Default)]
struct InputState {
    forward: bool,
    backward: bool,
    left: bool,
    right: bool,
    up: bool,
    down: bool,
}

#[inline]
fn rgba_bytes(pixel: u32) -> [u8; 4] {
    pixel.to_le_bytes()
}

fn build_scene(scene: &mut Scene) {
    // Checkerboard floor.
    let mut floor = Mesh::new();
    floor.set_texture(Arc::new(Texture::checkerboard(
        128,
        128,
        16,
        [210, 210, 215, 255],
        [60, 62, 70, 255],
    )));
    add_quad(
        &mut floor,
        [
            Vec3::new(-6.0, 0.0, 6.0),
            Vec3::new(6.0, 0.0, 6.0),
            Vec3::new(6.0, 0.0, -6.0),
            Vec3::new(-6.0, 0.0, -6.0),
        ],
        Vec3::Y,
        [255, 255, 255, 255],
    );
    scene.meshes.push(floor);

    // Colored cube at the center.
    let mut cube = Mesh::new();
    add_cube(&mut cube, 1.0);
    cube.set_translation(Vec3::new(0.0, 1.0, 0.0));
    scene.meshes.push(cube);

    // Two translucent panes between camera and cube.
    for (x, color) in [
        (-1.2, [255, 60, 60, 120]),
        (1.2, [60, 120, 255, 120]),
    ] {
        let mut pane = Mesh::new();
        add_quad(
            &mut pane,
            [
                Vec3::new(-0.9, 0.0, 0.0),
                Vec3::new(0.9, 0.0, 0.0),
                Vec3::new(0.9, 2.0, 0.0),
                Vec3::new(-0.9, 2.0, 0.0),
            ],
            Vec3::Z,
            color,
        );
        pane.set_translation(Vec3::new(x, 0.4, 2.2));
        scene.meshes.push(pane);
    }
}

/// Two triangles for the quad v0..v3, counter-clockwise from the front.
fn add_quad(mesh: &mut Mesh, corners: [Vec3; 4], normal: Vec3, color: [u8; 4]) {
    let uvs = [
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ];
    let v = |i: usize| Vertex::new(corners[i], normal, uvs[i], color);
    mesh.add_triangle(v(0), v(1), v(2));
    mesh.add_triangle(v(0), v(2), v(3));
}

fn add_cube(mesh: &mut Mesh, half: f32) {
    let faces: [(Vec3, [Vec3; 4], [u8; 4]); 6] = [
        (
            Vec3::Z,
            [
                Vec3::new(-half, -half, half),
                Vec3::new(half, -half, half),
                Vec3::new(half, half, half),
                Vec3::new(-half, half, half),
            ],
            [230, 80, 80, 255],
        ),
        (
            Vec3::NEG_Z,
            [
                Vec3::new(half, -half, -half),
                Vec3::new(-half, -half, -half),
                Vec3::new(-half, half, -half),
                Vec3::new(half, half, -half),
            ],
            [80, 200, 120, 255],
        ),
        (
            Vec3::X,
            [
                Vec3::new(half, -half, half),
                Vec3::new(half, -half, -half),
                Vec3::new(half, half, -half),
                Vec3::new(half, half, half),
            ],
            [90, 120, 230, 255],
        ),
        (
            Vec3::NEG_X,
            [
                Vec3::new(-half, -half, -half),
                Vec3::new(-half, -half, half),
                Vec3::new(-half, half, half),
                Vec3::new(-half, half, -half),
            ],
            [230, 200, 70, 255],
        ),
        (
            Vec3::Y,
            [
                Vec3::new(-half, half, half),
                Vec3::new(half, half, half),
                Vec3::new(half, half, -half),
                Vec3::new(-half, half, -half),
            ],
            [220, 220, 220, 255],
        ),
        (
            Vec3::NEG_Y,
            [
                Vec3::new(-half, -half, -half),
                Vec3::new(half, -half, -half),
                Vec3::new(half, -half, half),
                Vec3::new(-half, -half, half),
            ],
            [120, 120, 120, 255],
        ),
    ];

    for (normal, corners, color) in faces {
        add_quad(mesh, corners, normal, color);
    }
}
