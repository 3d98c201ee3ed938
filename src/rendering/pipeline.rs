/// Frame orchestration: per-light shadow passes, camera geometry prep,
/// the optional depth pre-pass, and the opaque and transparent color
/// passes. Owns every cross-frame resource (framebuffer, tile grids,
/// lights and their shadow maps) so nothing lives in globals.
use glam::Mat4;
use rayon::prelude::*;
use thiserror::Error;

use crate::camera::{PerspectiveLight, Viewport};
use crate::scene::Scene;

use super::framebuffer::{pack_rgba, Framebuffer, MainTarget, TileState};
use super::geometry::{self, Batch, MAX_LIGHTS};
use super::rasterizer::{
    self, ColorBlinnPhong, DepthOnly, ShadowDsm, SimdMode, TileGrid, TriRef, TILE_SIZE,
};
use super::shading::{FrameParams, MaterialParams};
use super::shadow::{DeepShadowMap, DsmWriter};

/// Construction-time configuration failures. The render path itself
/// never fails: degenerate geometry and out-of-range writes are
/// domain-valid outcomes handled by sentinels.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("framebuffer dimensions must be positive, got {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    #[error("field of view must lie in (0, 180) degrees, got {0}")]
    InvalidFov(f32),
    #[error("near plane must be positive and less than far, got near={near} far={far}")]
    InvalidPlanes { near: f32, far: f32 },
    #[error("shadow map dimensions must be positive, got {width}x{height}")]
    InvalidShadowMapSize { width: usize, height: usize },
    #[error("at most {MAX_LIGHTS} lights are supported, got {0}")]
    TooManyLights(usize),
}

/// Run the depth pre-pass above this many opaque triangles even when no
/// light is active.
const DEPTH_PREPASS_TRIANGLES: usize = 4096;

pub struct Pipeline {
    width: usize,
    height: usize,
    framebuffer: Framebuffer,
    grid: TileGrid,

    lights: Vec<PerspectiveLight>,
    shadow_maps: Vec<DeepShadowMap>,
    shadow_grids: Vec<TileGrid>,
    /// (light index, camera version last copied from).
    linked_lights: Vec<(usize, u64)>,

    pub material: MaterialParams,
    /// Master switch for the depth pre-pass heuristic.
    pub enable_depth_prepass: bool,

    simd: SimdMode,
    batches: Vec<Batch>,
    shadow_batches: Vec<Batch>,
}

impl Pipeline {
    /// Preallocates the framebuffer, tile grid and one deep shadow map
    /// plus tile grid per light.
    pub fn new(
        width: usize,
        height: usize,
        lights: Vec<PerspectiveLight>,
    ) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions { width, height });
        }
        if lights.len() > MAX_LIGHTS {
            return Err(PipelineError::TooManyLights(lights.len()));
        }

        let shadow_maps = lights
            .iter()
            .map(|l| DeepShadowMap::new(l.width(), l.height()))
            .collect();
        let shadow_grids = lights
            .iter()
            .map(|l| TileGrid::new(l.width(), l.height()))
            .collect();

        Ok(Self {
            width,
            height,
            framebuffer: Framebuffer::new(width, height),
            grid: TileGrid::new(width, height),
            lights,
            shadow_maps,
            shadow_grids,
            linked_lights: Vec::new(),
            material: MaterialParams::default(),
            enable_depth_prepass: true,
            simd: rasterizer::detect_simd(),
            batches: Vec::new(),
            shadow_batches: Vec::new(),
        })
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
    pub fn light(&self, index: usize) -> Option<&PerspectiveLight> {
        self.lights.get(index)
    }

    #[inline]
    pub fn light_mut(&mut self, index: usize) -> Option<&mut PerspectiveLight> {
        self.lights.get_mut(index)
    }

    #[inline]
    pub fn shadow_map(&self, index: usize) -> Option<&DeepShadowMap> {
        self.shadow_maps.get(index)
    }

    /// Subscribe a light to the scene camera's transform. The copy
    /// happens at most once per render call, guarded by the camera's
    /// version counter, so propagation cannot retrigger itself.
    pub fn link_light_to_camera(&mut self, light: usize) {
        if light < self.lights.len() && !self.linked_lights.iter().any(|(i, _)| *i == light) {
            self.linked_lights.push((light, u64::MAX));
        }
    }

    #[inline]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    #[inline]
    pub fn depth_buffer(&self) -> &[f32] {
        &self.framebuffer.depth_buffer
    }

    /// The last rendered frame as RGBA8 scanlines.
    #[inline]
    pub fn frame_rgba(&self) -> &[u8] {
        self.framebuffer.as_rgba_bytes()
    }

    /// Render one frame and return the packed RGBA framebuffer.
    pub fn render(&mut self, scene: &mut Scene) -> &[u32] {
        // Linked transform propagation, once per change.
        for (light_idx, seen_version) in &mut self.linked_lights {
            let version = scene.camera.version();
            if *seen_version != version {
                self.lights[*light_idx]
                    .set_transform(scene.camera.position(), scene.camera.rotation());
                *seen_version = version;
            }
        }

        for li in 0..self.lights.len() {
            self.render_shadow_map(scene, li);
        }

        // Camera geometry: transform, clip, attach light clips, divide,
        // viewport-map, batch by texture.
        let light_mats: Vec<Mat4> = self.lights.iter().map(|l| l.world_to_clip()).collect();
        geometry::prepare_batches(
            &scene.meshes,
            &scene.camera.world_to_clip(),
            self.width,
            self.height,
            &light_mats,
            &mut self.batches,
        );

        // Opaque batches draw front-to-back to maximize depth rejection;
        // transparent batches draw back-to-front to approximate ordered
        // blending.
        let mut opaque_order: Vec<usize> = (0..self.batches.len())
            .filter(|&i| self.batches[i].opaque)
            .collect();
        opaque_order.sort_by(|&a, &b| {
            self.batches[a]
                .average_depth()
                .total_cmp(&self.batches[b].average_depth())
        });
        let mut transparent_order: Vec<usize> = (0..self.batches.len())
            .filter(|&i| !self.batches[i].opaque)
            .collect();
        transparent_order.sort_by(|&a, &b| {
            self.batches[b]
                .average_depth()
                .total_cmp(&self.batches[a].average_depth())
        });

        let background = pack_rgba(
            scene.background[0],
            scene.background[1],
            scene.background[2],
            scene.background[3],
        );
        self.framebuffer.clear(background);

        let params = FrameParams {
            ambient: scene.ambient,
            camera_pos: scene.camera.position(),
            material: self.material,
            lights: &self.lights,
            shadow_maps: &self.shadow_maps,
        };

        self.grid.clear();
        self.grid.bin_batches(&self.batches, &opaque_order);
        let dirty = self.grid.dirty_tiles();

        let opaque_triangles: usize = opaque_order
            .iter()
            .map(|&i| self.batches[i].triangles.len())
            .sum();
        let run_prepass = self.enable_depth_prepass
            && opaque_triangles > 0
            && (!self.lights.is_empty() || opaque_triangles > DEPTH_PREPASS_TRIANGLES);

        let simd = self.simd;

        if run_prepass {
            let grid = &self.grid;
            let batches = &self.batches;
            let target = MainTarget::new(&mut self.framebuffer);
            dirty.par_iter().for_each_init(
                || TileState::new(TILE_SIZE),
                |tile, &tile_idx| {
                    let (x0, y0, w, h) = grid.tile_rect(tile_idx);
                    tile.rebase(x0, y0, w, h, 0);
                    let mut processor = DepthOnly { tile: &mut *tile };
                    for tref in grid.bin(tile_idx) {
                        let batch = &batches[tref.batch as usize];
                        rasterizer::rasterize_triangle(
                            &batch.triangles[tref.tri as usize],
                            (x0, y0, w, h),
                            simd,
                            &mut processor,
                        );
                    }
                    target.store_depth(tile);
                },
            );
        }

        if !dirty.is_empty() {
            let grid = &self.grid;
            let batches = &self.batches;
            let params = &params;
            let target = MainTarget::new(&mut self.framebuffer);
            dirty.par_iter().for_each_init(
                || TileState::new(TILE_SIZE),
                |tile, &tile_idx| {
                    let rect = grid.tile_rect(tile_idx);
                    tile.rebase(rect.0, rect.1, rect.2, rect.3, background);
                    if run_prepass {
                        target.load_depth(tile);
                    }
                    shade_tile(grid.bin(tile_idx), batches, rect, simd, tile, params);
                    target.store_color_depth(tile);
                },
            );
        }

        if !transparent_order.is_empty() {
            self.grid.clear();
            self.grid.bin_batches(&self.batches, &transparent_order);
            let dirty = self.grid.dirty_tiles();

            if !dirty.is_empty() {
                let grid = &self.grid;
                let batches = &self.batches;
                let params = &params;
                let target = MainTarget::new(&mut self.framebuffer);
                dirty.par_iter().for_each_init(
                    || TileState::new(TILE_SIZE),
                    |tile, &tile_idx| {
                        let rect = grid.tile_rect(tile_idx);
                        tile.rebase(rect.0, rect.1, rect.2, rect.3, background);
                        // Blending needs the opaque pass results under it.
                        target.load_color_depth(tile);
                        shade_tile(grid.bin(tile_idx), batches, rect, simd, tile, params);
                        target.store_color_depth(tile);
                    },
                );
            }
        }

        self.framebuffer.color_buffer_slice()
    }

    /// Build one light's deep shadow map: render the scene from the
    /// light's viewpoint into tile-local maps, merge them, finalize.
    fn render_shadow_map(&mut self, scene: &Scene, li: usize) {
        let light = &self.lights[li];
        let (lw, lh) = (light.width(), light.height());
        let w2c = light.world_to_clip();

        geometry::prepare_batches(&scene.meshes, &w2c, lw, lh, &[], &mut self.shadow_batches);

        let map = &mut self.shadow_maps[li];
        map.clear();

        let grid = &mut self.shadow_grids[li];
        grid.clear();
        let order: Vec<usize> = (0..self.shadow_batches.len()).collect();
        grid.bin_batches(&self.shadow_batches, &order);
        let dirty = grid.dirty_tiles();

        if !dirty.is_empty() {
            let writer = DsmWriter::new(&mut *map);
            let grid = &*grid;
            let batches = &self.shadow_batches;
            let simd = self.simd;

            dirty.par_iter().for_each_init(
                || DeepShadowMap::new(TILE_SIZE, TILE_SIZE),
                |tile_map, &tile_idx| {
                    let (x0, y0, w, h) = grid.tile_rect(tile_idx);
                    tile_map.clear();

                    let bin = grid.bin(tile_idx);
                    let mut i = 0;
                    while i < bin.len() {
                        let batch_idx = bin[i].batch;
                        let batch = &batches[batch_idx as usize];
                        let mut processor = ShadowDsm {
                            dsm: &mut *tile_map,
                            x0,
                            y0,
                            texture: batch.texture.as_deref(),
                        };
                        while i < bin.len() && bin[i].batch == batch_idx {
                            rasterizer::rasterize_triangle(
                                &batch.triangles[bin[i].tri as usize],
                                (x0, y0, w, h),
                                simd,
                                &mut processor,
                            );
                            i += 1;
                        }
                    }

                    // Safety: tiles partition the shadow map; no two
                    // workers merge the same rectangle.
                    unsafe {
                        writer.merge_tile(tile_map, x0, y0, w, h);
                    }
                },
            );
        }

        map.initialize();
    }
}

/// Rasterize a tile's binned triangles with Blinn-Phong shading,
/// rebinding the texture once per batch run.
fn shade_tile(
    bin: &[TriRef],
    batches: &[Batch],
    rect: (usize, usize, usize, usize),
    simd: SimdMode,
    tile: &mut TileState,
    params: &FrameParams<'_>,
) {
    let mut i = 0;
    while i < bin.len() {
        let batch_idx = bin[i].batch;
        let batch = &batches[batch_idx as usize];
        let mut processor = ColorBlinnPhong {
            tile: &mut *tile,
            params,
            texture: batch.texture.as_deref(),
        };
        while i < bin.len() && bin[i].batch == batch_idx {
            rasterizer::rasterize_triangle(
                &batch.triangles[bin[i].tri as usize],
                rect,
                simd,
                &mut processor,
            );
            i += 1;
        }
    }
}
