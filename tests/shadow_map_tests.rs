/// Tests for deep shadow map construction, compression and sampling.
use raster_engine::rendering::shadow::{DeepShadowMap, VisibilityFunction};

#[test]
fn build_produces_cumulative_visibility() {
    // Two translucent layers and an opaque backstop in one pixel.
    let mut map = DeepShadowMap::new(64, 64);
    map.add(0, 0, 0.2, 0.5);
    map.add(0, 0, 0.5, 0.5);
    map.add(0, 0, 0.9, 1.0);
    map.initialize();

    let expected = [(0.0, 1.0), (0.2, 0.5), (0.5, 0.25), (0.9, 0.0)];
    let points = map.pixel(0, 0).points();
    assert_eq!(points.len(), expected.len());
    for (point, (depth, visibility)) in points.iter().zip(expected) {
        assert!((point.depth - depth).abs() < 1e-6, "depth {} != {depth}", point.depth);
        assert!(
            (point.visibility - visibility).abs() < 1e-4,
            "visibility {} != {visibility}",
            point.visibility
        );
    }

    // Piecewise-constant samples between the breakpoints. The half-texel
    // bias (0.5/64) shifts each lookup slightly toward the light.
    assert!((map.sample(0, 0, 0.1) - 1.0).abs() < 1e-4);
    assert!((map.sample(0, 0, 0.3) - 0.5).abs() < 1e-4);
    assert!((map.sample(0, 0, 0.6) - 0.25).abs() < 1e-4);
    assert!((map.sample(0, 0, 0.95) - 0.0).abs() < 1e-4);
}

#[test]
fn initialized_pixels_satisfy_invariants() {
    let mut map = DeepShadowMap::new(8, 8);
    map.add(3, 3, 0.7, 0.3);
    map.add(3, 3, 0.1, 0.6);
    map.add(3, 3, 0.4, 1.0);
    map.add(3, 3, 0.55, 0.2); // behind the opaque surface
    map.initialize();

    let vf = map.pixel(3, 3);
    let points = vf.points();

    assert_eq!(points[0].depth, 0.0);
    assert_eq!(points[0].visibility, 1.0);
    for pair in points.windows(2) {
        assert!(pair[0].depth <= pair[1].depth, "points must be depth-sorted");
        assert!(
            pair[0].visibility >= pair[1].visibility,
            "visibility must be non-increasing"
        );
    }
    for p in points {
        assert!((0.0..=1.0).contains(&p.visibility));
    }

    let last = points[points.len() - 1];
    assert_eq!(vf.opaque_depth(), Some(0.4));
    assert!((last.depth - 0.4).abs() < 1e-6, "function must end at the opaque depth");
    assert_eq!(last.visibility, 0.0);
}

#[test]
fn out_of_range_inserts_are_ignored() {
    let mut map = DeepShadowMap::new(4, 4);
    map.add(4, 0, 0.5, 0.5);
    map.add(0, 17, 0.5, 0.5);
    map.initialize();

    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(map.pixel(x, y).points().len(), 1);
        }
    }
}

#[test]
fn compression_error_stays_within_epsilon() {
    // Slope-alternating layer stack: gaps of 0.002 and 0.07 give
    // segment slopes far apart, so every layer survives compression as
    // an exact breakpoint; this also pushes the function past the
    // linear-scan limit into the binary-search path.
    const LAYERS: usize = 27;
    const DROP: f32 = 0.035;

    let mut vf = VisibilityFunction::new();
    let mut depth = 0.0f32;
    let mut expected = Vec::new(); // (depth, cumulative visibility)
    let mut cumulative = 1.0f32;

    for k in 0..LAYERS {
        depth += if k % 2 == 0 { 0.002 } else { 0.07 };
        let target = 1.0 - DROP * (k + 1) as f32;
        let transparency = target / cumulative;
        cumulative = target;
        vf.add(depth, 1.0 - transparency);
        expected.push((depth, target));
    }

    let mut scratch = Vec::new();
    vf.initialize(0.0125, &mut scratch);
    assert!(
        vf.points().len() > 25,
        "want the binary-search path, got {} points",
        vf.points().len()
    );

    // Reference lookup straight over the expected step function.
    let reference = |z: f32| -> f32 {
        let mut vis = 1.0;
        for &(d, v) in &expected {
            if d > z {
                break;
            }
            vis = v;
        }
        vis
    };

    for &(d, _) in &expected {
        let probe = d + 0.0005;
        let got = vf.sample(probe);
        assert!(
            (got - reference(probe)).abs() <= 0.0125 + 1e-3,
            "sample({probe}) = {got}, reference = {}",
            reference(probe)
        );
    }
    assert!((vf.sample(0.0) - 1.0).abs() < 1e-6);
}

#[test]
fn tile_merge_matches_direct_inserts() {
    let mut direct = DeepShadowMap::new(8, 8);
    let mut main = DeepShadowMap::new(8, 8);
    let mut tile = DeepShadowMap::new(4, 4);

    // Fragments landing in the tile that covers (4..8, 4..8).
    let fragments = [
        (5usize, 5usize, 0.3, 0.5),
        (5, 5, 0.6, 1.0),
        (7, 4, 0.2, 0.25),
    ];
    for (x, y, z, a) in fragments {
        direct.add(x, y, z, a);
        tile.add(x - 4, y - 4, z, a);
    }

    main.merge_tile(&tile, 4, 4, 4, 4);
    direct.initialize();
    main.initialize();

    for y in 0..8 {
        for x in 0..8 {
            let a = direct.pixel(x, y).points();
            let b = main.pixel(x, y).points();
            assert_eq!(a.len(), b.len(), "pixel ({x},{y})");
            for (pa, pb) in a.iter().zip(b) {
                assert!((pa.depth - pb.depth).abs() < 1e-6);
                assert!((pa.visibility - pb.visibility).abs() < 1e-6);
            }
            assert_eq!(
                direct.pixel(x, y).opaque_depth(),
                main.pixel(x, y).opaque_depth()
            );
        }
    }
}

#[test]
fn sampling_behind_opaque_depth_is_dark() {
    let mut map = DeepShadowMap::new(32, 32);
    map.add(1, 1, 0.4, 1.0);
    map.initialize();

    assert_eq!(map.sample(1, 1, 0.9), 0.0);
    assert!((map.sample(1, 1, 0.1) - 1.0).abs() < 1e-6);
    // Out-of-range samples are shadowed, not errors.
    assert_eq!(map.sample(200, 1, 0.1), 0.0);
}
