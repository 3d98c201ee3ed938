pub mod camera;
pub mod perf;
/// Raster Engine - CPU tiled triangle rasterizer with per-pixel
/// Blinn-Phong shading and deep shadow maps for translucent occluders.
pub mod rendering;
pub mod scene;

pub use camera::{Camera, PerspectiveLight, Viewport};
pub use perf::{CounterSnapshot, FunctionCounters, FUNCTION_COUNTERS};
pub use rendering::{
    DeepShadowMap, Framebuffer, MaterialParams, Pipeline, PipelineError, MAX_LIGHTS,
};
pub use scene::{Mesh, Scene, Texture, Vertex};
