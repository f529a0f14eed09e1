//! raylight2d - GPU ray-march lighting for 2D scenes
//!
//! Lights and occluders are registered with a [`SceneRegistry`], flattened
//! into per-variant GPU lists and lit by marching one ray per pixel per light
//! through a signed distance field. The result is an RGBA8 light map.
//!
//! Two backends implement [`backend::ComputeBackend`]:
//! - **wgpu**: headless GPU device
//! - **software**: CPU execution of the same kernels, recording every command
//!
//! # Features
//! - Ear-clipping triangulation for polygon lights and occluders
//! - Dirty-tracked scene lists with grow-on-demand GPU buffers
//! - Batched ray scheduling bounded by the dispatch limits
//! - Ping-pong ray buffers with indirect dispatch between bounces

pub mod backend;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod scene;
pub mod system;

pub use error::{ConfigError, LightingError, LightingResult};
pub use pipeline::{BatchPlan, DispatchLimits, FrameOutcome, RayMarchPipeline};
pub use scene::{Camera2d, CameraTransforms, Light, LightId, SceneRegistry, Shape, ShapeId};
pub use system::{FrameDiagnostics, LightingSystem};

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;

/// Configuration for the lighting pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct LightingConfig {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Light map resolution relative to the output
    pub render_scale: f32,
    /// Sphere-tracing steps per bounce
    pub max_steps: u32,
    /// Times a ray that ran out of steps is resumed, plus one
    pub max_bounces: u32,
    pub dispatch_limits: DispatchLimits,
    /// Alternate a sub-pixel offset with frame parity
    pub temporal_dither: bool,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            render_scale: 1.0,
            max_steps: 64,
            max_bounces: 2,
            dispatch_limits: DispatchLimits::DEFAULT,
            temporal_dither: false,
        }
    }
}

impl LightingConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroSize {
                width: self.width,
                height: self.height,
            });
        }
        if !self.render_scale.is_finite() || self.render_scale <= 0.0 {
            return Err(ConfigError::InvalidRenderScale(self.render_scale));
        }
        let (width, height) = self.render_size();
        if width as u64 * height as u64 > u32::MAX as u64 {
            return Err(ConfigError::TooManyPixels { width, height });
        }
        if self.max_steps == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        if self.max_bounces == 0 {
            return Err(ConfigError::ZeroMaxBounces);
        }
        if self.dispatch_limits.group_size == 0 || self.dispatch_limits.max_groups == 0 {
            return Err(ConfigError::ZeroDispatchLimits);
        }
        Ok(())
    }

    /// Light map size after the render scale, never below 1x1
    pub fn render_size(&self) -> (u32, u32) {
        let scale = |extent: u32| ((extent as f32 * self.render_scale).floor() as u32).max(1);
        (scale(self.width), scale(self.height))
    }
}
