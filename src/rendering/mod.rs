/// Rendering pipeline: geometry preparation, homogeneous clipping,
/// tiled rasterization, deep shadow maps and fragment shading.
pub mod clipper;
pub mod framebuffer;
pub mod geometry;
pub mod pipeline;
pub mod rasterizer;
pub mod shading;
pub mod shadow;

pub use framebuffer::Framebuffer;
pub use geometry::MAX_LIGHTS;
pub use pipeline::{Pipeline, PipelineError};
pub use rasterizer::{SimdMode, TileGrid, TILE_SIZE};
pub use shading::MaterialParams;
pub use shadow::{DeepShadowMap, VisibilityFunction, VisibilityPoint};
