/// RGBA texture with bilinear sampling.
/// Pixels are stored packed as u32 (little-endian R,G,B,A) so the
/// rasterizer can fetch and blend without per-channel loads.
use glam::Vec4;

use crate::rendering::framebuffer::{pack_rgba, unpack_rgba};

pub struct Texture {
    width: usize,
    height: usize,
    pixels: Vec<u32>,
    opaque: bool,
}

impl Texture {
    /// Build a texture from raw RGBA8 scanlines (width * height * 4 bytes),
    /// as produced by an external image decoder. Returns None if the byte
    /// count does not match the dimensions.
    pub fn from_rgba8(width: usize, height: usize, bytes: &[u8]) -> Option<Self> {
        if width == 0 || height == 0 || bytes.len() != width * height * 4 {
            return None;
        }

        let mut pixels = Vec::with_capacity(width * height);
        let mut opaque = true;
        for px in bytes.chunks_exact(4) {
            if px[3] != 255 {
                opaque = false;
            }
            pixels.push(pack_rgba(px[0], px[1], px[2], px[3]));
        }

        Some(Self {
            width,
            height,
            pixels,
            opaque,
        })
    }

    /// Single-color texture. Mostly useful for tests and debug materials.
    pub fn solid(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let packed = pack_rgba(rgba[0], rgba[1], rgba[2], rgba[3]);
        Self {
            width,
            height,
            pixels: vec![packed; width * height],
            opaque: rgba[3] == 255,
        }
    }

    /// Two-color checkerboard with square cells of `cell` pixels.
    pub fn checkerboard(
        width: usize,
        height: usize,
        cell: usize,
        color_a: [u8; 4],
        color_b: [u8; 4],
    ) -> Self {
        let cell = cell.max(1);
        let a = pack_rgba(color_a[0], color_a[1], color_a[2], color_a[3]);
        let b = pack_rgba(color_b[0], color_b[1], color_b[2], color_b[3]);

        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let parity = (x / cell + y / cell) % 2;
                pixels.push(if parity == 0 { a } else { b });
            }
        }

        Self {
            width,
            height,
            pixels,
            opaque: color_a[3] == 255 && color_b[3] == 255,
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

    /// True iff every pixel has alpha 255.
    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    #[inline]
    fn fetch(&self, x: usize, y: usize) -> Vec4 {
        let [r, g, b, a] = unpack_rgba(self.pixels[y * self.width + x]);
        Vec4::new(r as f32, g as f32, b as f32, a as f32) * (1.0 / 255.0)
    }

    /// Bilinear sample with UV clamped to [0, 1]. Returns linear RGBA in [0, 1].
    pub fn sample_bilinear(&self, u: f32, v: f32) -> Vec4 {
        let u = u.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);

        let fx = u * (self.width - 1) as f32;
        let fy = v * (self.height - 1) as f32;

        let x0 = fx as usize;
        let y0 = fy as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let top = self.fetch(x0, y0).lerp(self.fetch(x1, y0), tx);
        let bottom = self.fetch(x0, y1).lerp(self.fetch(x1, y1), tx);
        top.lerp(bottom, ty)
    }

    /// Bilinear alpha-only sample. Used by the shadow pass, which needs
    /// nothing but fragment opacity.
    #[inline]
    pub fn sample_alpha(&self, u: f32, v: f32) -> f32 {
        if self.opaque {
            return 1.0;
        }
        self.sample_bilinear(u, v).w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opacity_tracks_alpha_channel() {
        let opaque = Texture::solid(4, 4, [10, 20, 30, 255]);
        assert!(opaque.is_opaque());

        let translucent = Texture::solid(4, 4, [10, 20, 30, 128]);
        assert!(!translucent.is_opaque());
    }

    #[test]
    fn bilinear_interpolates_between_texels() {
        let bytes: Vec<u8> = [
            [0u8, 0, 0, 255],
            [255, 255, 255, 255],
            [0, 0, 0, 255],
            [255, 255, 255, 255],
        ]
        .concat();
        let tex = Texture::from_rgba8(2, 2, &bytes).unwrap();

        let mid = tex.sample_bilinear(0.5, 0.5);
        assert!((mid.x - 0.5).abs() < 1e-3, "midpoint should be gray, got {mid}");

        let corner = tex.sample_bilinear(0.0, 0.0);
        assert!(corner.x < 1e-3);
    }

    #[test]
    fn from_rgba8_rejects_bad_length() {
        assert!(Texture::from_rgba8(2, 2, &[0u8; 15]).is_none());
    }
}
