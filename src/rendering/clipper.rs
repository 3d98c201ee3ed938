/// Sutherland-Hodgman polygon clipping in homogeneous clip space.
/// Triangles are clipped against the six frustum planes before the
/// perspective divide, so geometry crossing the near plane is split
/// instead of dropped.
use glam::Vec4;

use super::geometry::PipeVertex;

/// A triangle clipped against six planes can gain one vertex per plane.
/// 3 + 6 = 9; 12 leaves headroom.
pub const MAX_POLY_VERTS: usize = 12;

// Frustum planes as (A, B, C, D); a vertex is inside when
// plane . (x, y, z, w) >= 0. Clip z spans [0, w] (glam perspective_rh),
// so the near plane is z >= 0 rather than z >= -w.
const PLANES: [Vec4; 6] = [
    Vec4::new(1.0, 0.0, 0.0, 1.0),  // left:   x + w >= 0
    Vec4::new(-1.0, 0.0, 0.0, 1.0), // right:  w - x >= 0
    Vec4::new(0.0, 1.0, 0.0, 1.0),  // bottom: y + w >= 0
    Vec4::new(0.0, -1.0, 0.0, 1.0), // top:    w - y >= 0
    Vec4::new(0.0, 0.0, 1.0, 0.0),  // near:   z >= 0
    Vec4::new(0.0, 0.0, -1.0, 1.0), // far:    w - z >= 0
];

// Edges whose endpoint distances differ by less than this are treated
// as non-intersecting; both endpoints sit on the plane.
const FLAT_EDGE_EPS: f32 = 1e-12;

/// Clip a triangle against the view frustum. Writes the surviving convex
/// polygon into `out` and returns its vertex count (0 when fully outside).
/// Every emitted vertex has its perspective-prepared fields rebuilt from
/// its interpolated clip w.
pub fn clip_triangle(tri: &[PipeVertex; 3], out: &mut [PipeVertex; MAX_POLY_VERTS]) -> usize {
    let mut buf_a = [tri[0]; MAX_POLY_VERTS];
    let mut buf_b = [tri[0]; MAX_POLY_VERTS];

    buf_a[..3].copy_from_slice(tri);
    let mut len = 3usize;
    let mut in_a = true;

    for plane in &PLANES {
        if len == 0 {
            break;
        }
        len = if in_a {
            clip_against_plane(&buf_a[..len], *plane, &mut buf_b)
        } else {
            clip_against_plane(&buf_b[..len], *plane, &mut buf_a)
        };
        in_a = !in_a;
    }

    let src = if in_a { &buf_a } else { &buf_b };
    out[..len].copy_from_slice(&src[..len]);
    len
}

fn clip_against_plane(
    input: &[PipeVertex],
    plane: Vec4,
    output: &mut [PipeVertex; MAX_POLY_VERTS],
) -> usize {
    let mut out_len = 0usize;
    let mut push = |v: PipeVertex, out_len: &mut usize| {
        if *out_len < MAX_POLY_VERTS {
            output[*out_len] = v;
            *out_len += 1;
        }
    };

    let mut prev = input[input.len() - 1];
    let mut d_prev = plane.dot(prev.clip);

    for &curr in input {
        let d_curr = plane.dot(curr.clip);
        let prev_inside = d_prev >= 0.0;
        let curr_inside = d_curr >= 0.0;

        match (prev_inside, curr_inside) {
            (true, true) => push(curr, &mut out_len),
            (true, false) => {
                if let Some(inter) = intersect(&prev, &curr, d_prev, d_curr) {
                    push(inter, &mut out_len);
                }
            }
            (false, true) => {
                if let Some(inter) = intersect(&prev, &curr, d_prev, d_curr) {
                    push(inter, &mut out_len);
                }
                push(curr, &mut out_len);
            }
            (false, false) => {}
        }

        prev = curr;
        d_prev = d_curr;
    }

    out_len
}

/// Intersection of edge AB with the plane, at t = d_a / (d_a - d_b).
/// A nearly flat edge (d_a ~ d_b) has no stable intersection point and
/// is treated as non-intersecting.
#[inline]
fn intersect(a: &PipeVertex, b: &PipeVertex, d_a: f32, d_b: f32) -> Option<PipeVertex> {
    let denom = d_a - d_b;
    if denom.abs() < FLAT_EDGE_EPS {
        return None;
    }
    let t = d_a / denom;
    Some(PipeVertex::lerp(a, b, t))
}

/// True when the clip position satisfies all six plane inequalities,
/// within `tol` of the plane.
pub fn inside_frustum(clip: Vec4, tol: f32) -> bool {
    PLANES.iter().all(|p| p.dot(clip) >= -tol)
}
