/// Color and depth targets for the rasterizer.
///
/// Color is packed RGBA8 per pixel in a u32 (little-endian bytes
/// R,G,B,A), so the buffer doubles as `width * 4`-byte row-major RGBA
/// scanlines. Depth is f32 per pixel with +inf as the empty sentinel.
/// Both clears go through one vectorized u32 fill; depth is filled with
/// the bit pattern of +inf.
use crate::count_call;
use crate::perf::FUNCTION_COUNTERS;

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{
    _mm256_set1_epi32, _mm256_storeu_si256, _mm_set1_epi32, _mm_storeu_si128,
};

/// Pack RGBA channels into a u32 (little-endian byte order R,G,B,A).
#[inline]
pub const fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

#[inline]
pub const fn unpack_rgba(pixel: u32) -> [u8; 4] {
    [
        (pixel & 0xFF) as u8,
        ((pixel >> 8) & 0xFF) as u8,
        ((pixel >> 16) & 0xFF) as u8,
        ((pixel >> 24) & 0xFF) as u8,
    ]
}

/// Fill a u32 slice with a constant using the widest vector store the
/// CPU offers. Color pixels and depth bit patterns share this path.
fn fill_u32(buf: &mut [u32], value: u32) {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx") {
            unsafe { fill_u32_avx(buf, value) };
            return;
        }
        if std::arch::is_x86_feature_detected!("sse2") {
            unsafe { fill_u32_sse2(buf, value) };
            return;
        }
    }
    buf.fill(value);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn fill_u32_sse2(buf: &mut [u32], value: u32) {
    let splat = _mm_set1_epi32(value as i32);
    let mut lanes = buf.chunks_exact_mut(4);
    for group in &mut lanes {
        _mm_storeu_si128(group.as_mut_ptr() as *mut _, splat);
    }
    lanes.into_remainder().fill(value);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
unsafe fn fill_u32_avx(buf: &mut [u32], value: u32) {
    let splat = _mm256_set1_epi32(value as i32);
    let mut lanes = buf.chunks_exact_mut(8);
    for group in &mut lanes {
        _mm256_storeu_si256(group.as_mut_ptr() as *mut _, splat);
    }
    lanes.into_remainder().fill(value);
}

pub struct Framebuffer {
    pub width: usize,
    pub height: usize,
    pub color_buffer: Vec<u32>,
    pub depth_buffer: Vec<f32>,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        let mut fb = Self {
            width: 0,
            height: 0,
            color_buffer: Vec::new(),
            depth_buffer: Vec::new(),
        };
        fb.resize(width, height);
        fb
    }

    /// Clear color to `clear_color` and depth to +inf. The depth buffer
    /// is filled through the u32 view of the +inf bit pattern so both
    /// buffers use the same vectorized fill.
    pub fn clear(&mut self, clear_color: u32) {
        count_call!(FUNCTION_COUNTERS.framebuffer_clear_calls);
        fill_u32(&mut self.color_buffer, clear_color);
        fill_u32(
            bytemuck::cast_slice_mut(&mut self.depth_buffer),
            f32::INFINITY.to_bits(),
        );
    }

    /// Get color buffer as packed u32 pixels.
    pub fn color_buffer_slice(&self) -> &[u32] {
        &self.color_buffer
    }

    /// View the color buffer as RGBA8 scanlines, `width * 4` bytes per row.
    pub fn as_rgba_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.color_buffer)
    }

    /// Resize the targets. Contents are unspecified until the next clear.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        let len = width * height;
        self.color_buffer.resize(len, 0);
        self.depth_buffer.resize(len, f32::INFINITY);
    }
}

/// Worker-owned color/depth buffers covering one screen tile.
/// A worker creates one of these lazily and rebases it onto each tile it
/// draws, so per-frame allocation stays zero after warmup.
pub struct TileState {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    pub color: Vec<u32>,
    pub depth: Vec<f32>,
}

impl TileState {
    pub fn new(capacity_side: usize) -> Self {
        let cap = capacity_side * capacity_side;
        Self {
            x0: 0,
            y0: 0,
            width: 0,
            height: 0,
            color: Vec::with_capacity(cap),
            depth: Vec::with_capacity(cap),
        }
    }

    /// Point this state at a new tile rectangle and reset both buffers.
    pub fn rebase(&mut self, x0: usize, y0: usize, width: usize, height: usize, background: u32) {
        self.x0 = x0;
        self.y0 = y0;
        self.width = width;
        self.height = height;
        let len = width * height;
        self.color.clear();
        self.color.resize(len, background);
        self.depth.clear();
        self.depth.resize(len, f32::INFINITY);
    }

    /// Linear index for a global pixel coordinate inside this tile.
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x >= self.x0 && x < self.x0 + self.width);
        debug_assert!(y >= self.y0 && y < self.y0 + self.height);
        (y - self.y0) * self.width + (x - self.x0)
    }
}

/// Raw-pointer view of the main framebuffer used during the parallel
/// tile merge.
///
/// Safety: MainTarget is Send + Sync because tiles partition the screen
/// into disjoint pixel rectangles; every worker only reads and writes
/// the rows of its own tile, so no two threads ever touch the same
/// pixel.
pub struct MainTarget {
    width: usize,
    height: usize,
    color: *mut u32,
    depth: *mut f32,
}

unsafe impl Send for MainTarget {}
unsafe impl Sync for MainTarget {}

impl MainTarget {
    pub fn new(framebuffer: &mut Framebuffer) -> Self {
        Self {
            width: framebuffer.width,
            height: framebuffer.height,
            color: framebuffer.color_buffer.as_mut_ptr(),
            depth: framebuffer.depth_buffer.as_mut_ptr(),
        }
    }

    #[inline]
    fn check_tile(&self, tile: &TileState) {
        debug_assert!(tile.x0 + tile.width <= self.width);
        debug_assert!(tile.y0 + tile.height <= self.height);
    }

    /// Seed a tile's depth rows from the main depth buffer.
    pub fn load_depth(&self, tile: &mut TileState) {
        self.check_tile(tile);
        for row in 0..tile.height {
            let src = (tile.y0 + row) * self.width + tile.x0;
            let dst = row * tile.width;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.depth.add(src),
                    tile.depth.as_mut_ptr().add(dst),
                    tile.width,
                );
            }
        }
    }

    /// Seed a tile's color and depth rows from the main buffers.
    pub fn load_color_depth(&self, tile: &mut TileState) {
        self.check_tile(tile);
        for row in 0..tile.height {
            let src = (tile.y0 + row) * self.width + tile.x0;
            let dst = row * tile.width;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.color.add(src) as *const u32,
                    tile.color.as_mut_ptr().add(dst),
                    tile.width,
                );
                std::ptr::copy_nonoverlapping(
                    self.depth.add(src) as *const f32,
                    tile.depth.as_mut_ptr().add(dst),
                    tile.width,
                );
            }
        }
    }

    /// Write a tile's depth rows back to the main depth buffer.
    pub fn store_depth(&self, tile: &TileState) {
        self.check_tile(tile);
        for row in 0..tile.height {
            let dst = (tile.y0 + row) * self.width + tile.x0;
            let src = row * tile.width;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    tile.depth.as_ptr().add(src),
                    self.depth.add(dst),
                    tile.width,
                );
            }
        }
    }

    /// Write a tile's color rows back to the main color buffer.
    pub fn store_color(&self, tile: &TileState) {
        self.check_tile(tile);
        for row in 0..tile.height {
            let dst = (tile.y0 + row) * self.width + tile.x0;
            let src = row * tile.width;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    tile.color.as_ptr().add(src),
                    self.color.add(dst),
                    tile.width,
                );
            }
        }
    }

    /// Write a tile's color and depth rows back to the main buffers.
    pub fn store_color_depth(&self, tile: &TileState) {
        self.store_color(tile);
        self.store_depth(tile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let packed = pack_rgba(12, 34, 56, 78);
        assert_eq!(unpack_rgba(packed), [12, 34, 56, 78]);
    }

    #[test]
    fn rgba_byte_view_matches_channel_order() {
        let mut fb = Framebuffer::new(2, 1);
        fb.color_buffer[0] = pack_rgba(1, 2, 3, 4);
        fb.color_buffer[1] = pack_rgba(5, 6, 7, 8);
        assert_eq!(fb.as_rgba_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn clear_resets_color_and_depth() {
        let mut fb = Framebuffer::new(33, 7); // odd size exercises the SIMD tail
        fb.color_buffer[5] = 0xDEADBEEF;
        fb.depth_buffer[5] = 0.25;

        fb.clear(pack_rgba(9, 9, 9, 255));

        assert!(fb.color_buffer.iter().all(|&c| c == pack_rgba(9, 9, 9, 255)));
        assert!(fb.depth_buffer.iter().all(|&d| d.is_infinite()));
    }

    #[test]
    fn tile_store_and_load_roundtrip() {
        let mut fb = Framebuffer::new(8, 8);
        fb.clear(0);

        let mut tile = TileState::new(4);
        tile.rebase(4, 4, 4, 4, 0xAABBCCDD);
        for d in tile.depth.iter_mut() {
            *d = 0.5;
        }

        let target = MainTarget::new(&mut fb);
        target.store_color_depth(&tile);

        // Only the tile rectangle is touched.
        assert_eq!(fb.color_buffer[0], 0);
        assert_eq!(fb.color_buffer[4 * 8 + 4], 0xAABBCCDD);
        assert_eq!(fb.depth_buffer[7 * 8 + 7], 0.5);
        assert!(fb.depth_buffer[0].is_infinite());

        let mut tile2 = TileState::new(4);
        tile2.rebase(4, 4, 4, 4, 0);
        let target = MainTarget::new(&mut fb);
        target.load_color_depth(&mut tile2);
        assert_eq!(tile2.color, tile.color);
        assert_eq!(tile2.depth, tile.depth);
    }
}
