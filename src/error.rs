//! Crate-level error types

use crate::backend::BackendError;
use crate::geometry::TriangulationError;
use crate::pipeline::ScheduleError;
use crate::scene::SceneError;
use thiserror::Error;

/// Rejected [`LightingConfig`](crate::LightingConfig) values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("output size {width}x{height} must be non-zero")]
    ZeroSize { width: u32, height: u32 },
    #[error("render scale {0} must be finite and positive")]
    InvalidRenderScale(f32),
    #[error("render size {width}x{height} has more pixels than a u32 can index")]
    TooManyPixels { width: u32, height: u32 },
    #[error("max_steps must be at least 1")]
    ZeroMaxSteps,
    #[error("max_bounces must be at least 1")]
    ZeroMaxBounces,
    #[error("dispatch limits must have a non-zero group size and group count")]
    ZeroDispatchLimits,
}

/// Any failure surfaced by the lighting system
#[derive(Error, Debug)]
pub enum LightingError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Triangulation(#[from] TriangulationError),
}

pub type LightingResult<T> = Result<T, LightingError>;
