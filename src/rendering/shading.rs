/// Per-fragment shading: perspective-correct attribute recovery,
/// Blinn-Phong direct lighting with spotlight cone falloff and deep
/// shadow map visibility, and src-over alpha blending.
use glam::{Vec3, Vec4};

use crate::camera::PerspectiveLight;
use crate::scene::Texture;

use super::framebuffer::{pack_rgba, unpack_rgba};
use super::geometry::Triangle;
use super::shadow::DeepShadowMap;

/// Interpolated 1/w below this is a degenerate clip result; shading
/// falls back to the unlit albedo instead of dividing by it.
const MIN_INV_W: f32 = 1e-6;

/// Shadow visibility below this contributes nothing worth computing.
const MIN_VISIBILITY: f32 = 1e-4;

/// Scalar material inputs shared by every fragment of a frame.
#[derive(Copy, Clone, Debug)]
pub struct MaterialParams {
    pub specular_strength: f32,
    pub shininess: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            specular_strength: 0.4,
            shininess: 32.0,
        }
    }
}

/// Read-only per-frame state handed to the color-pass workers.
pub struct FrameParams<'a> {
    pub ambient: Vec3,
    pub camera_pos: Vec3,
    pub material: MaterialParams,
    pub lights: &'a [PerspectiveLight],
    pub shadow_maps: &'a [DeepShadowMap],
}

#[inline]
fn color_to_vec4(color: [u8; 4]) -> Vec4 {
    Vec4::new(
        color[0] as f32,
        color[1] as f32,
        color[2] as f32,
        color[3] as f32,
    ) * (1.0 / 255.0)
}

/// Albedo from the bound texture (perspective-correct UV) or from the
/// vertex colors (linear in barycentric space). Linear RGBA in [0, 1].
#[inline]
fn albedo(tri: &Triangle, bary: [f32; 3], inv_w: f32, texture: Option<&Texture>) -> Vec4 {
    match texture {
        Some(tex) => {
            let uv_over_w = tri.v[0].uv_over_w * bary[0]
                + tri.v[1].uv_over_w * bary[1]
                + tri.v[2].uv_over_w * bary[2];
            let uv = uv_over_w / inv_w;
            tex.sample_bilinear(uv.x, uv.y)
        }
        None => {
            color_to_vec4(tri.v[0].color) * bary[0]
                + color_to_vec4(tri.v[1].color) * bary[1]
                + color_to_vec4(tri.v[2].color) * bary[2]
        }
    }
}

/// Albedo without perspective correction, for fragments whose
/// interpolated w collapsed.
#[inline]
fn albedo_unlit(tri: &Triangle, bary: [f32; 3], texture: Option<&Texture>) -> Vec4 {
    match texture {
        Some(tex) => {
            let uv =
                tri.v[0].uv * bary[0] + tri.v[1].uv * bary[1] + tri.v[2].uv * bary[2];
            tex.sample_bilinear(uv.x, uv.y)
        }
        None => {
            color_to_vec4(tri.v[0].color) * bary[0]
                + color_to_vec4(tri.v[1].color) * bary[1]
                + color_to_vec4(tri.v[2].color) * bary[2]
        }
    }
}

/// Spotlight cone falloff for a fragment in direction `to_fragment`
/// (unit vector from the light toward the fragment). 1 inside the inner
/// cone, 0 outside the outer cone, linear ramp between.
#[inline]
pub fn spot_factor(light: &PerspectiveLight, to_fragment: Vec3) -> f32 {
    let c = light.forward().dot(to_fragment);
    if c <= light.outer_cos() {
        return 0.0;
    }
    if c >= light.inner_cos() {
        return 1.0;
    }
    ((c - light.outer_cos()) / (light.inner_cos() - light.outer_cos())).clamp(0.0, 1.0)
}

/// Shadow visibility for a fragment, given its interpolated clip-space
/// position in the light's frustum. Fragments outside the frustum or
/// the shadow map receive no light from it.
#[inline]
fn shadow_visibility(map: &DeepShadowMap, light_clip: Vec4) -> f32 {
    let w = light_clip.w;
    if w.abs() < MIN_INV_W {
        return 0.0;
    }
    if light_clip.x.abs() > w || light_clip.y.abs() > w || light_clip.z < 0.0 || light_clip.z > w
    {
        return 0.0;
    }

    let inv = 1.0 / w;
    let ndc_x = light_clip.x * inv;
    let ndc_y = light_clip.y * inv;
    let ndc_z = light_clip.z * inv;

    let sx = (ndc_x + 1.0) * 0.5 * map.width() as f32;
    let sy = (1.0 - ndc_y) * 0.5 * map.height() as f32;
    if sx < 0.0 || sy < 0.0 {
        return 0.0;
    }
    let (px, py) = (sx as usize, sy as usize);
    if px >= map.width() || py >= map.height() {
        return 0.0;
    }

    map.sample(px, py, ndc_z)
}

/// Blinn-Phong shading of one covered sample. Returns RGBA bytes; the
/// alpha byte is the albedo's, which drives the opaque-versus-blend
/// decision downstream.
pub fn shade_fragment(
    tri: &Triangle,
    bary: [f32; 3],
    texture: Option<&Texture>,
    params: &FrameParams<'_>,
) -> [u8; 4] {
    let inv_w = tri.v[0].inv_w * bary[0] + tri.v[1].inv_w * bary[1] + tri.v[2].inv_w * bary[2];
    if inv_w.abs() < MIN_INV_W {
        let base = albedo_unlit(tri, bary, texture);
        return pack_color(base.truncate(), base.w);
    }
    let w = 1.0 / inv_w;

    let base = albedo(tri, bary, inv_w, texture);

    let world = (tri.v[0].world_over_w * bary[0]
        + tri.v[1].world_over_w * bary[1]
        + tri.v[2].world_over_w * bary[2])
        * w;
    let normal = ((tri.v[0].normal_over_w * bary[0]
        + tri.v[1].normal_over_w * bary[1]
        + tri.v[2].normal_over_w * bary[2])
        * w)
        .normalize_or_zero();

    let mut lit = params.ambient * base.truncate();

    for (i, light) in params.lights.iter().enumerate() {
        let light_clip = (tri.v[0].light_clip_over_w[i] * bary[0]
            + tri.v[1].light_clip_over_w[i] * bary[1]
            + tri.v[2].light_clip_over_w[i] * bary[2])
            * w;

        let visibility = shadow_visibility(&params.shadow_maps[i], light_clip);
        if visibility <= MIN_VISIBILITY {
            continue;
        }

        let to_light = light.position() - world;
        let dist_sq = to_light.length_squared();
        let l = to_light.normalize_or_zero();
        let attenuation = 1.0 / (1.0 + light.quadratic() * dist_sq);

        let spot = spot_factor(light, -l);
        if spot <= 0.0 {
            continue;
        }

        let n_dot_l = normal.dot(l).max(0.0);
        let diffuse = base.truncate() * light.color() * n_dot_l;

        let view = (params.camera_pos - world).normalize_or_zero();
        let half = (l + view).normalize_or_zero();
        let specular = light.color()
            * params.material.specular_strength
            * normal.dot(half).max(0.0).powf(params.material.shininess);

        lit += (diffuse + specular) * (light.intensity() * attenuation * visibility * spot);
    }

    pack_color(lit, base.w)
}

/// Fragment opacity only, for the shadow pass.
pub fn fragment_alpha(tri: &Triangle, bary: [f32; 3], texture: Option<&Texture>) -> f32 {
    match texture {
        Some(tex) => {
            if tex.is_opaque() {
                return 1.0;
            }
            let inv_w =
                tri.v[0].inv_w * bary[0] + tri.v[1].inv_w * bary[1] + tri.v[2].inv_w * bary[2];
            let uv = if inv_w.abs() < MIN_INV_W {
                tri.v[0].uv * bary[0] + tri.v[1].uv * bary[1] + tri.v[2].uv * bary[2]
            } else {
                (tri.v[0].uv_over_w * bary[0]
                    + tri.v[1].uv_over_w * bary[1]
                    + tri.v[2].uv_over_w * bary[2])
                    / inv_w
            };
            tex.sample_alpha(uv.x, uv.y)
        }
        None => {
            (tri.v[0].color[3] as f32 * bary[0]
                + tri.v[1].color[3] as f32 * bary[1]
                + tri.v[2].color[3] as f32 * bary[2])
                * (1.0 / 255.0)
        }
    }
}

/// Clamp linear RGB to bytes, carrying the albedo alpha through.
#[inline]
fn pack_color(rgb: Vec3, alpha: f32) -> [u8; 4] {
    [
        (rgb.x * 255.0).clamp(0.0, 255.0) as u8,
        (rgb.y * 255.0).clamp(0.0, 255.0) as u8,
        (rgb.z * 255.0).clamp(0.0, 255.0) as u8,
        (alpha * 255.0).clamp(0.0, 255.0) as u8,
    ]
}

/// Source-over blend of an RGBA fragment onto a packed destination
/// pixel. The destination depth is untouched by translucent fragments.
#[inline]
pub fn blend_src_over(src: [u8; 4], dst: u32) -> u32 {
    let [dr, dg, db, da] = unpack_rgba(dst);
    let a = src[3] as u32;
    let ia = 255 - a;

    let blend = |s: u8, d: u8| -> u8 {
        ((s as u32 * a + d as u32 * ia + 127) / 255) as u8
    };

    let out_a = (a + (da as u32 * ia + 127) / 255).min(255) as u8;
    pack_rgba(
        blend(src[0], dr),
        blend(src[1], dg),
        blend(src[2], db),
        out_a,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_opaque_source_is_identity() {
        let src = [200, 100, 50, 255];
        let dst = pack_rgba(1, 2, 3, 255);
        assert_eq!(
            blend_src_over(src, dst),
            pack_rgba(200, 100, 50, 255),
            "alpha 255 must overwrite the destination"
        );
    }

    #[test]
    fn blend_half_alpha_averages() {
        let src = [255, 255, 255, 128];
        let out = unpack_rgba(blend_src_over(src, pack_rgba(0, 0, 0, 255)));
        for c in &out[..3] {
            assert!((*c as i32 - 128).abs() <= 1, "half white over black: {:?}", out);
        }
        assert_eq!(out[3], 255);
    }

    #[test]
    fn blend_accumulates_alpha() {
        let src = [255, 255, 255, 128];
        let out = unpack_rgba(blend_src_over(src, pack_rgba(0, 0, 0, 0)));
        assert_eq!(out[3], 128);
    }
}
