/// Deep shadow maps: per-pixel visibility-versus-depth functions that
/// support translucent occluders. Opaque fragments cap the function at
/// zero; translucent fragments attenuate it multiplicatively.
///
/// Built tile-by-tile like the color passes: workers fill tile-sized
/// maps, merge them into the main map, and one finalize pass sorts,
/// accumulates and compresses every pixel.
use rayon::prelude::*;

use crate::count_call;
use crate::perf::FUNCTION_COUNTERS;

/// Default tolerance of the slope-interval compression, in visibility
/// units.
pub const COMPRESSION_EPSILON: f32 = 0.0125;

/// Functions longer than this are sampled by binary search instead of a
/// linear scan.
const LINEAR_SCAN_MAX: usize = 25;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VisibilityPoint {
    pub depth: f32,
    /// Before `initialize`: the transparency (1 - alpha) of one
    /// translucent fragment. Afterwards: cumulative visibility along
    /// the ray.
    pub visibility: f32,
}

/// Visibility function of a single shadow-map pixel.
#[derive(Clone, Debug)]
pub struct VisibilityFunction {
    points: Vec<VisibilityPoint>,
    opaque_depth: Option<f32>,
}

impl Default for VisibilityFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityFunction {
    pub fn new() -> Self {
        Self {
            points: vec![VisibilityPoint {
                depth: 0.0,
                visibility: 1.0,
            }],
            opaque_depth: None,
        }
    }

    /// Reset to the initial `(0, 1)` state, keeping the allocation.
    pub fn clear(&mut self) {
        self.points.truncate(1);
        self.points[0] = VisibilityPoint {
            depth: 0.0,
            visibility: 1.0,
        };
        self.opaque_depth = None;
    }

    /// Register a fragment at depth `z` with opacity `alpha`.
    pub fn add(&mut self, z: f32, alpha: f32) {
        if alpha >= 1.0 {
            self.opaque_depth = Some(match self.opaque_depth {
                Some(d) => d.min(z),
                None => z,
            });
        } else if alpha > 0.0 {
            // Anything behind an already known opaque surface cannot
            // contribute.
            if let Some(od) = self.opaque_depth {
                if od <= z {
                    return;
                }
            }
            self.points.push(VisibilityPoint {
                depth: z,
                visibility: 1.0 - alpha,
            });
        }
    }

    /// Finalize the function: cap at the opaque depth, sort, turn
    /// per-fragment transparencies into cumulative visibility, compress.
    pub fn initialize(&mut self, epsilon: f32, scratch: &mut Vec<VisibilityPoint>) {
        if let Some(od) = self.opaque_depth {
            // Translucent fragments inserted before the opaque one was
            // known may lie behind it; they carry no information.
            self.points.retain(|p| p.depth <= od);
            self.points.push(VisibilityPoint {
                depth: od,
                visibility: 0.0,
            });
        }

        // Index 0 is the initial (0, 1) and stays put.
        self.points[1..].sort_unstable_by(|a, b| a.depth.total_cmp(&b.depth));

        for i in 1..self.points.len() {
            let v = self.points[i - 1].visibility * self.points[i].visibility;
            self.points[i].visibility = v.max(0.0);
        }

        compress(&self.points, epsilon, scratch);
        std::mem::swap(&mut self.points, scratch);
    }

    /// Piecewise-constant lookup: visibility of the deepest breakpoint
    /// at or before `z`. `z` must already be bias-corrected.
    pub fn sample(&self, z: f32) -> f32 {
        if let Some(od) = self.opaque_depth {
            if z >= od {
                return 0.0;
            }
        }

        if self.points.len() <= LINEAR_SCAN_MAX {
            let mut vis = 1.0;
            for p in &self.points {
                if p.depth > z {
                    break;
                }
                vis = p.visibility;
            }
            vis
        } else {
            let idx = self.points.partition_point(|p| p.depth <= z);
            if idx == 0 {
                1.0
            } else {
                self.points[idx - 1].visibility
            }
        }
    }

    /// Fold another pixel's raw contents into this one. Both must be
    /// un-initialized; the other's leading (0, 1) is skipped.
    pub fn merge_from(&mut self, other: &VisibilityFunction) {
        self.opaque_depth = match (self.opaque_depth, other.opaque_depth) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.points.extend_from_slice(&other.points[1..]);
    }

    #[inline]
    pub fn points(&self) -> &[VisibilityPoint] {
        &self.points
    }

    #[inline]
    pub fn opaque_depth(&self) -> Option<f32> {
        self.opaque_depth
    }
}

/// Incremental slope-interval simplification. Keeps a feasible slope
/// interval from the current breakpoint; when a point makes it empty,
/// the previous point becomes the next breakpoint at the interval's
/// midpoint slope. The output always starts with the input's first
/// point and ends at the input's last depth.
fn compress(points: &[VisibilityPoint], epsilon: f32, out: &mut Vec<VisibilityPoint>) {
    out.clear();
    out.push(points[0]);
    if points.len() < 2 {
        return;
    }

    let mut origin = points[0];
    let mut prev = origin;
    let mut lo = f32::NEG_INFINITY;
    let mut hi = f32::INFINITY;

    for &p in &points[1..] {
        let dz = p.depth - origin.depth;
        if dz <= 0.0 {
            // Coincident depths carry no slope information.
            continue;
        }

        let up = (p.visibility + epsilon - origin.visibility) / dz;
        let dn = (p.visibility - epsilon - origin.visibility) / dz;

        if dn.max(lo) > up.min(hi) {
            // Interval collapsed: the previous point becomes a breakpoint.
            let mid = 0.5 * (lo + hi);
            let vis = (origin.visibility + mid * (prev.depth - origin.depth)).clamp(0.0, 1.0);
            let breakpoint = VisibilityPoint {
                depth: prev.depth,
                visibility: vis,
            };
            out.push(breakpoint);
            origin = breakpoint;

            let dz_restart = p.depth - origin.depth;
            if dz_restart > 0.0 {
                hi = (p.visibility + epsilon - origin.visibility) / dz_restart;
                lo = (p.visibility - epsilon - origin.visibility) / dz_restart;
            } else {
                lo = f32::NEG_INFINITY;
                hi = f32::INFINITY;
            }
        } else {
            lo = lo.max(dn);
            hi = hi.min(up);
        }

        prev = p;
    }

    // The final segment's endpoint is kept verbatim, so an opaque cap
    // survives as the terminal (depth, 0) point.
    let last = points[points.len() - 1];
    let tail = out[out.len() - 1];
    if last.depth > tail.depth {
        out.push(last);
    } else if last.depth == tail.depth && last.visibility != tail.visibility {
        let n = out.len();
        out[n - 1] = last;
    }
}

/// One deep shadow map: a grid of visibility functions plus the
/// constant sampling bias of half a texel.
pub struct DeepShadowMap {
    width: usize,
    height: usize,
    bias: f32,
    epsilon: f32,
    pixels: Vec<VisibilityFunction>,
}

impl DeepShadowMap {
    pub fn new(width: usize, height: usize) -> Self {
        debug_assert!(width > 0 && height > 0);
        let bias = (0.5 / width as f32).max(0.5 / height as f32);
        Self {
            width,
            height,
            bias,
            epsilon: COMPRESSION_EPSILON,
            pixels: (0..width * height).map(|_| VisibilityFunction::new()).collect(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn set_compression_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon.max(0.0);
    }

    pub fn clear(&mut self) {
        for px in &mut self.pixels {
            px.clear();
        }
    }

    /// Insert a fragment. Out-of-range coordinates are silently ignored;
    /// they are fragments landing just outside the light frustum, not
    /// errors.
    #[inline]
    pub fn add(&mut self, x: usize, y: usize, z: f32, alpha: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        count_call!(FUNCTION_COUNTERS.dsm_points_inserted);
        self.pixels[y * self.width + x].add(z, alpha);
    }

    /// Finalize every pixel's visibility function.
    pub fn initialize(&mut self) {
        let epsilon = self.epsilon;
        self.pixels.par_iter_mut().for_each_init(
            Vec::new,
            |scratch, px| px.initialize(epsilon, scratch),
        );
    }

    /// Sample visibility at shadow-map pixel (x, y) and depth `z`.
    /// The half-texel bias offsets z toward the light to suppress
    /// self-shadow acne.
    pub fn sample(&self, x: usize, y: usize, z: f32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        count_call!(FUNCTION_COUNTERS.dsm_samples);
        self.pixels[y * self.width + x].sample(z - self.bias)
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &VisibilityFunction {
        &self.pixels[y * self.width + x]
    }

    /// Merge a tile-sized map's top-left `tile_w` x `tile_h` region into
    /// this map at offset (x0, y0).
    pub fn merge_tile(
        &mut self,
        tile: &DeepShadowMap,
        x0: usize,
        y0: usize,
        tile_w: usize,
        tile_h: usize,
    ) {
        for ly in 0..tile_h {
            for lx in 0..tile_w {
                let src = &tile.pixels[ly * tile.width + lx];
                if src.points().len() > 1 || src.opaque_depth().is_some() {
                    self.pixels[(y0 + ly) * self.width + (x0 + lx)].merge_from(src);
                }
            }
        }
    }
}

/// Raw-pointer view of the main map's pixels for the parallel tile
/// merge.
///
/// Safety: tiles partition the shadow map into disjoint pixel
/// rectangles, so concurrent merges never alias the same
/// VisibilityFunction.
pub struct DsmWriter {
    width: usize,
    height: usize,
    pixels: *mut VisibilityFunction,
}

unsafe impl Send for DsmWriter {}
unsafe impl Sync for DsmWriter {}

impl DsmWriter {
    pub fn new(map: &mut DeepShadowMap) -> Self {
        Self {
            width: map.width,
            height: map.height,
            pixels: map.pixels.as_mut_ptr(),
        }
    }

    /// Merge a worker's tile map into the main map.
    ///
    /// # Safety
    /// The (x0, y0, tile_w, tile_h) rectangle must lie inside the map
    /// and must not overlap any rectangle merged concurrently.
    pub unsafe fn merge_tile(
        &self,
        tile: &DeepShadowMap,
        x0: usize,
        y0: usize,
        tile_w: usize,
        tile_h: usize,
    ) {
        debug_assert!(x0 + tile_w <= self.width && y0 + tile_h <= self.height);
        for ly in 0..tile_h {
            for lx in 0..tile_w {
                let src = &tile.pixels[ly * tile.width + lx];
                if src.points().len() > 1 || src.opaque_depth().is_some() {
                    let dst = &mut *self.pixels.add((y0 + ly) * self.width + (x0 + lx));
                    dst.merge_from(src);
                }
            }
        }
    }
}
