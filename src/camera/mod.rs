/// Camera and spotlight viewpoints.
/// Both expose the same contract: pixel dimensions plus a cached
/// world-to-clip matrix (projection * view), refreshed eagerly whenever
/// a transform, FOV or clip plane changes.
use glam::{Mat4, Quat, Vec3};

use crate::rendering::pipeline::PipelineError;

/// Anything triangles can be projected through: a camera or a light.
pub trait Viewport {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn world_to_clip(&self) -> Mat4;
}

pub struct Camera {
    position: Vec3,
    rotation: Quat,
    fov_y: f32, // radians
    near: f32,
    far: f32,
    width: usize,
    height: usize,

    world_to_clip: Mat4,
    version: u64,
}

impl Camera {
    pub fn new(width: usize, height: usize) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions { width, height });
        }

        let mut camera = Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            fov_y: 60.0f32.to_radians(),
            near: 0.1,
            far: 100.0,
            width,
            height,
            world_to_clip: Mat4::IDENTITY,
            version: 0,
        };
        camera.refresh();
        Ok(camera)
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.refresh();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.refresh();
    }

    pub fn set_fov(&mut self, fov_deg: f32) {
        debug_assert!(fov_deg > 0.0 && fov_deg < 180.0);
        self.fov_y = fov_deg.to_radians();
        self.refresh();
    }

    pub fn set_near_far(&mut self, near: f32, far: f32) {
        debug_assert!(near > 0.0 && near < far);
        self.near = near;
        self.far = far;
        self.refresh();
    }

    /// Orient the camera so it looks at `target`.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let view = Mat4::look_at_rh(self.position, target, up);
        self.rotation = Quat::from_mat4(&view.inverse());
        self.refresh();
    }

    fn refresh(&mut self) {
        self.world_to_clip = world_to_clip(
            self.position,
            self.rotation,
            self.fov_y,
            self.width as f32 / self.height as f32,
            self.near,
            self.far,
        );
        self.version += 1;
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// Bumped on every transform/FOV/plane change. Used to propagate
    /// linked transform updates exactly once.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Viewport for Camera {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn world_to_clip(&self) -> Mat4 {
        self.world_to_clip
    }
}

/// Spotlight with a perspective frustum and a deep shadow map budget.
/// The cone is described by inner/outer cutoff cosines; fragments
/// outside the outer cone receive no light, fragments inside the inner
/// cone receive full light, with a linear ramp in between.
pub struct PerspectiveLight {
    position: Vec3,
    rotation: Quat,
    fov_y: f32,
    near: f32,
    far: f32,
    width: usize,
    height: usize,

    color: Vec3,
    intensity: f32,
    quadratic: f32,
    inner_cos: f32,
    outer_cos: f32,

    world_to_clip: Mat4,
}

impl PerspectiveLight {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: usize,
        height: usize,
        fov_deg: f32,
        near: f32,
        far: f32,
        color: Vec3,
        intensity: f32,
        quadratic: f32,
        inner_deg: f32,
        outer_deg: f32,
    ) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidShadowMapSize { width, height });
        }
        if fov_deg <= 0.0 || fov_deg >= 180.0 {
            return Err(PipelineError::InvalidFov(fov_deg));
        }
        if near <= 0.0 || near >= far {
            return Err(PipelineError::InvalidPlanes { near, far });
        }

        let mut light = Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            fov_y: fov_deg.to_radians(),
            near,
            far,
            width,
            height,
            color,
            intensity,
            quadratic,
            inner_cos: inner_deg.to_radians().cos(),
            outer_cos: outer_deg.to_radians().cos(),
            world_to_clip: Mat4::IDENTITY,
        };
        light.refresh();
        Ok(light)
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.refresh();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.refresh();
    }

    /// Move position and rotation together. Used when the light is
    /// linked to a camera so the shared matrix is rebuilt once.
    pub fn set_transform(&mut self, position: Vec3, rotation: Quat) {
        self.position = position;
        self.rotation = rotation;
        self.refresh();
    }

    fn refresh(&mut self) {
        self.world_to_clip = world_to_clip(
            self.position,
            self.rotation,
            self.fov_y,
            self.width as f32 / self.height as f32,
            self.near,
            self.far,
        );
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    #[inline]
    pub fn color(&self) -> Vec3 {
        self.color
    }

    #[inline]
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    #[inline]
    pub fn quadratic(&self) -> f32 {
        self.quadratic
    }

    #[inline]
    pub fn inner_cos(&self) -> f32 {
        self.inner_cos
    }

    #[inline]
    pub fn outer_cos(&self) -> f32 {
        self.outer_cos
    }
}

impl Viewport for PerspectiveLight {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn world_to_clip(&self) -> Mat4 {
        self.world_to_clip
    }
}

/// Shared projection math. Right-handed, looking down -Z, clip z in [0, w].
fn world_to_clip(
    position: Vec3,
    rotation: Quat,
    fov_y: f32,
    aspect: f32,
    near: f32,
    far: f32,
) -> Mat4 {
    let forward = rotation * Vec3::NEG_Z;
    let up = rotation * Vec3::Y;
    let view = Mat4::look_to_rh(position, forward, up);
    let projection = Mat4::perspective_rh(fov_y, aspect, near, far);
    projection * view
}
