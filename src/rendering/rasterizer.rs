/// Tiled triangle rasterizer.
/// Triangles are binned into fixed-size screen tiles; each tile is
/// rasterized independently with incremental edge functions, a 4-lane
/// SSE2 coverage test and the top-left fill rule, then handed to a
/// fragment processor that is monomorphized per pass.
use glam::Vec2;

use crate::count_call;
use crate::perf::FUNCTION_COUNTERS;
use crate::scene::Texture;

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{
    _mm_add_ps, _mm_and_ps, _mm_cmpge_ps, _mm_movemask_ps, _mm_mul_ps, _mm_set_ps, _mm_set1_ps,
    _mm_setzero_ps, _mm_storeu_ps,
};

use super::framebuffer::{pack_rgba, TileState};
use super::geometry::{Batch, Triangle};
use super::shading::{self, FrameParams};
use super::shadow::DeepShadowMap;

/// Tile edge length in pixels. Must be at least the SIMD lane count.
pub const TILE_SIZE: usize = 32;

// Triangles with less screen area than this (in doubled-area units)
// cover no pixel center and are rejected during setup.
const MIN_TRIANGLE_AREA: f32 = 1e-4;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimdMode {
    Scalar,
    #[cfg(target_arch = "x86_64")]
    Sse2,
}

/// Pick the widest supported coverage path once at startup.
pub fn detect_simd() -> SimdMode {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("sse2") {
            return SimdMode::Sse2;
        }
    }
    SimdMode::Scalar
}

/// Reference to one triangle of one batch, kept small so tile bins stay
/// cache-friendly.
#[derive(Copy, Clone, Debug)]
pub struct TriRef {
    pub batch: u32,
    pub tri: u32,
}

/// Fixed screen-space tile partition with per-tile triangle lists.
/// The lists are pre-allocated once and cleared each frame to avoid
/// allocator churn.
pub struct TileGrid {
    width: usize,
    height: usize,
    tiles_x: usize,
    tiles_y: usize,
    bins: Vec<Vec<TriRef>>,
}

impl TileGrid {
    pub fn new(width: usize, height: usize) -> Self {
        let tiles_x = width.div_ceil(TILE_SIZE);
        let tiles_y = height.div_ceil(TILE_SIZE);
        Self {
            width,
            height,
            tiles_x,
            tiles_y,
            bins: (0..tiles_x * tiles_y).map(|_| Vec::new()).collect(),
        }
    }

    pub fn clear(&mut self) {
        for bin in &mut self.bins {
            bin.clear();
        }
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.bins.len()
    }

    /// Rectangle (x0, y0, w, h) of a tile in pixels.
    pub fn tile_rect(&self, tile: usize) -> (usize, usize, usize, usize) {
        let tx = tile % self.tiles_x;
        let ty = tile / self.tiles_x;
        let x0 = tx * TILE_SIZE;
        let y0 = ty * TILE_SIZE;
        let w = (self.width - x0).min(TILE_SIZE);
        let h = (self.height - y0).min(TILE_SIZE);
        (x0, y0, w, h)
    }

    #[inline]
    pub fn bin(&self, tile: usize) -> &[TriRef] {
        &self.bins[tile]
    }

    /// Tiles that received at least one triangle this frame.
    pub fn dirty_tiles(&self) -> Vec<usize> {
        (0..self.bins.len())
            .filter(|&i| !self.bins[i].is_empty())
            .collect()
    }

    /// Bin every triangle of the given batches, in batch order, into the
    /// tiles its screen bounding box overlaps. Back-facing and sub-pixel
    /// triangles are rejected here so tiles never see them.
    pub fn bin_batches(&mut self, batches: &[Batch], order: &[usize]) {
        for &batch_index in order {
            let batch = &batches[batch_index];
            for (tri_index, tri) in batch.triangles.iter().enumerate() {
                let p0 = tri.v[0].clip;
                let p1 = tri.v[1].clip;
                let p2 = tri.v[2].clip;

                let area = edge_function(
                    Vec2::new(p0.x, p0.y),
                    Vec2::new(p1.x, p1.y),
                    Vec2::new(p2.x, p2.y),
                );
                if area <= MIN_TRIANGLE_AREA {
                    count_call!(FUNCTION_COUNTERS.triangles_culled);
                    continue;
                }

                let min_x = p0.x.min(p1.x).min(p2.x).floor().max(0.0) as usize;
                let min_y = p0.y.min(p1.y).min(p2.y).floor().max(0.0) as usize;
                let max_x = p0.x.max(p1.x).max(p2.x).ceil();
                let max_y = p0.y.max(p1.y).max(p2.y).ceil();
                if max_x < 0.0 || max_y < 0.0 || min_x >= self.width || min_y >= self.height {
                    continue;
                }
                let max_x = (max_x as usize).min(self.width - 1);
                let max_y = (max_y as usize).min(self.height - 1);

                let tref = TriRef {
                    batch: batch_index as u32,
                    tri: tri_index as u32,
                };
                for ty in (min_y / TILE_SIZE)..=(max_y / TILE_SIZE) {
                    for tx in (min_x / TILE_SIZE)..=(max_x / TILE_SIZE) {
                        self.bins[ty * self.tiles_x + tx].push(tref);
                    }
                }
            }
        }
    }
}

/// Per-pass fragment handling. The rasterizer calls `process` for every
/// covered sample; implementations own the depth decision so passes can
/// differ (depth-only, shaded color, shadow insertion).
pub trait FragmentProcessor {
    fn process(&mut self, x: usize, y: usize, z: f32, bary: [f32; 3], tri: &Triangle);
}

/// Depth pre-pass: records depth, shades nothing.
pub struct DepthOnly<'a> {
    pub tile: &'a mut TileState,
}

impl FragmentProcessor for DepthOnly<'_> {
    #[inline]
    fn process(&mut self, x: usize, y: usize, z: f32, _bary: [f32; 3], _tri: &Triangle) {
        let idx = self.tile.index(x, y);
        if z < self.tile.depth[idx] {
            self.tile.depth[idx] = z;
        }
    }
}

/// Color pass: Blinn-Phong shading with opaque depth writes and
/// src-over blending for translucent fragments.
pub struct ColorBlinnPhong<'a, 'b> {
    pub tile: &'a mut TileState,
    pub params: &'a FrameParams<'b>,
    pub texture: Option<&'a Texture>,
}

impl FragmentProcessor for ColorBlinnPhong<'_, '_> {
    #[inline]
    fn process(&mut self, x: usize, y: usize, z: f32, bary: [f32; 3], tri: &Triangle) {
        let idx = self.tile.index(x, y);
        // <= instead of < so fragments re-shading a depth-prepass
        // surface at identical depth still land.
        if z > self.tile.depth[idx] {
            return;
        }

        count_call!(FUNCTION_COUNTERS.fragments_shaded);
        let rgba = shading::shade_fragment(tri, bary, self.texture, self.params);

        if rgba[3] >= 254 {
            self.tile.depth[idx] = z;
            self.tile.color[idx] = pack_rgba(rgba[0], rgba[1], rgba[2], rgba[3]);
        } else {
            count_call!(FUNCTION_COUNTERS.fragments_blended);
            self.tile.color[idx] = shading::blend_src_over(rgba, self.tile.color[idx]);
        }
    }
}

/// Shadow pass: registers fragment opacity in a tile-local deep shadow
/// map. Coordinates are rebased so the tile map starts at (0, 0).
pub struct ShadowDsm<'a> {
    pub dsm: &'a mut DeepShadowMap,
    pub x0: usize,
    pub y0: usize,
    pub texture: Option<&'a Texture>,
}

impl FragmentProcessor for ShadowDsm<'_> {
    #[inline]
    fn process(&mut self, x: usize, y: usize, z: f32, bary: [f32; 3], tri: &Triangle) {
        let alpha = shading::fragment_alpha(tri, bary, self.texture);
        self.dsm.add(x - self.x0, y - self.y0, z, alpha);
    }
}

/// Standard 2D edge function: positive when c lies to the left of a->b
/// for our screen-space winding. E(a, b, c) is twice the signed area of
/// the triangle abc.
#[inline]
pub fn edge_function(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    (c.x - a.x) * (b.y - a.y) - (c.y - a.y) * (b.x - a.x)
}

/// Top-left fill rule: a pixel exactly on edge a->b counts only when the
/// edge is a top edge (horizontal, running rightward) or a left edge
/// (running downward in y-flipped screen space).
#[inline]
fn is_top_left(a: Vec2, b: Vec2) -> bool {
    (a.y == b.y && b.x > a.x) || b.y > a.y
}

struct TriangleSetup {
    // Edge i is opposite vertex i; w_i is its edge function value.
    dx: [f32; 3],
    dy: [f32; 3],
    top_left: [bool; 3],
    z: [f32; 3],
    inv_area: f32,
    p: [Vec2; 3],
}

impl TriangleSetup {
    fn new(tri: &Triangle) -> Option<Self> {
        let p0 = Vec2::new(tri.v[0].clip.x, tri.v[0].clip.y);
        let p1 = Vec2::new(tri.v[1].clip.x, tri.v[1].clip.y);
        let p2 = Vec2::new(tri.v[2].clip.x, tri.v[2].clip.y);

        // Back-face cull and degenerate rejection in one test.
        let area = edge_function(p0, p1, p2);
        if area <= MIN_TRIANGLE_AREA {
            count_call!(FUNCTION_COUNTERS.triangles_culled);
            return None;
        }

        Some(Self {
            // w0 walks edge p1->p2, w1 edge p2->p0, w2 edge p0->p1.
            dx: [p2.y - p1.y, p0.y - p2.y, p1.y - p0.y],
            dy: [p1.x - p2.x, p2.x - p0.x, p0.x - p1.x],
            top_left: [
                is_top_left(p1, p2),
                is_top_left(p2, p0),
                is_top_left(p0, p1),
            ],
            z: [tri.v[0].clip.z, tri.v[1].clip.z, tri.v[2].clip.z],
            inv_area: 1.0 / area,
            p: [p0, p1, p2],
        })
    }

    /// Coverage with the top-left tie-break applied to exact zeros.
    #[inline]
    fn covered(&self, w: [f32; 3]) -> bool {
        for i in 0..3 {
            if w[i] < 0.0 {
                return false;
            }
            if w[i] == 0.0 && !self.top_left[i] {
                return false;
            }
        }
        true
    }

    #[inline]
    fn emit<P: FragmentProcessor>(
        &self,
        x: usize,
        y: usize,
        w: [f32; 3],
        tri: &Triangle,
        processor: &mut P,
    ) {
        let fw = [
            w[0] * self.inv_area,
            w[1] * self.inv_area,
            w[2] * self.inv_area,
        ];
        let z = fw[0] * self.z[0] + fw[1] * self.z[1] + fw[2] * self.z[2];
        processor.process(x, y, z, fw, tri);
    }
}

/// Rasterize one screen-space triangle into the rectangle
/// (x0, y0, w, h), invoking the processor for every covered sample.
pub fn rasterize_triangle<P: FragmentProcessor>(
    tri: &Triangle,
    rect: (usize, usize, usize, usize),
    simd: SimdMode,
    processor: &mut P,
) {
    let Some(setup) = TriangleSetup::new(tri) else {
        return;
    };
    count_call!(FUNCTION_COUNTERS.triangles_rasterized);

    let (rx0, ry0, rw, rh) = rect;
    let rx1 = rx0 + rw - 1;
    let ry1 = ry0 + rh - 1;

    let [p0, p1, p2] = setup.p;

    // Screen bounding box intersected with the target rectangle.
    let min_x = (p0.x.min(p1.x).min(p2.x).floor().max(0.0) as usize).max(rx0);
    let min_y = (p0.y.min(p1.y).min(p2.y).floor().max(0.0) as usize).max(ry0);
    let max_x = (p0.x.max(p1.x).max(p2.x).ceil().max(0.0) as usize).min(rx1);
    let max_y = (p0.y.max(p1.y).max(p2.y).ceil().max(0.0) as usize).min(ry1);
    if min_x > max_x || min_y > max_y {
        return;
    }

    // Edge functions at the first pixel center, stepped incrementally.
    let start = Vec2::new(min_x as f32 + 0.5, min_y as f32 + 0.5);
    let mut w_row = [
        edge_function(p1, p2, start),
        edge_function(p2, p0, start),
        edge_function(p0, p1, start),
    ];

    for y in min_y..=max_y {
        match simd {
            #[cfg(target_arch = "x86_64")]
            SimdMode::Sse2 => unsafe {
                scanline_sse2(&setup, tri, y, min_x, max_x, w_row, processor);
            },
            SimdMode::Scalar => {
                scanline_scalar(&setup, tri, y, min_x, max_x, w_row, processor);
            }
        }

        w_row[0] += setup.dy[0];
        w_row[1] += setup.dy[1];
        w_row[2] += setup.dy[2];
    }
}

#[inline]
fn scanline_scalar<P: FragmentProcessor>(
    setup: &TriangleSetup,
    tri: &Triangle,
    y: usize,
    min_x: usize,
    max_x: usize,
    mut w: [f32; 3],
    processor: &mut P,
) {
    for x in min_x..=max_x {
        if setup.covered(w) {
            setup.emit(x, y, w, tri, processor);
        }
        w[0] += setup.dx[0];
        w[1] += setup.dx[1];
        w[2] += setup.dx[2];
    }
}

/// SSE2 scanline: evaluate all three edge functions for 4 pixels at
/// once and build a coverage mask; covered lanes are finished scalar-ly
/// so the top-left tie-break stays exact.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn scanline_sse2<P: FragmentProcessor>(
    setup: &TriangleSetup,
    tri: &Triangle,
    y: usize,
    min_x: usize,
    max_x: usize,
    mut w: [f32; 3],
    processor: &mut P,
) {
    let offsets = _mm_set_ps(3.0, 2.0, 1.0, 0.0);
    let zero = _mm_setzero_ps();

    let step0 = _mm_set1_ps(setup.dx[0]);
    let step1 = _mm_set1_ps(setup.dx[1]);
    let step2 = _mm_set1_ps(setup.dx[2]);

    let mut x = min_x;
    while x + 3 <= max_x {
        let vw0 = _mm_add_ps(_mm_set1_ps(w[0]), _mm_mul_ps(offsets, step0));
        let vw1 = _mm_add_ps(_mm_set1_ps(w[1]), _mm_mul_ps(offsets, step1));
        let vw2 = _mm_add_ps(_mm_set1_ps(w[2]), _mm_mul_ps(offsets, step2));

        let cover = _mm_and_ps(
            _mm_and_ps(_mm_cmpge_ps(vw0, zero), _mm_cmpge_ps(vw1, zero)),
            _mm_cmpge_ps(vw2, zero),
        );
        let mask = _mm_movemask_ps(cover);

        if mask != 0 {
            let mut lanes0 = [0.0f32; 4];
            let mut lanes1 = [0.0f32; 4];
            let mut lanes2 = [0.0f32; 4];
            _mm_storeu_ps(lanes0.as_mut_ptr(), vw0);
            _mm_storeu_ps(lanes1.as_mut_ptr(), vw1);
            _mm_storeu_ps(lanes2.as_mut_ptr(), vw2);

            for lane in 0..4 {
                if mask & (1 << lane) != 0 {
                    let lw = [lanes0[lane], lanes1[lane], lanes2[lane]];
                    if setup.covered(lw) {
                        setup.emit(x + lane, y, lw, tri, processor);
                    }
                }
            }
        }

        w[0] += setup.dx[0] * 4.0;
        w[1] += setup.dx[1] * 4.0;
        w[2] += setup.dx[2] * 4.0;
        x += 4;
    }

    // Scalar tail for the remaining pixels on this scanline.
    while x <= max_x {
        if setup.covered(w) {
            setup.emit(x, y, w, tri, processor);
        }
        w[0] += setup.dx[0];
        w[1] += setup.dx[1];
        w[2] += setup.dx[2];
        x += 1;
    }
}
