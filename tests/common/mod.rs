//! Shared setup for the lighting integration tests.

use glam::{Vec2, Vec3};
use raylight2d::backend::software::SoftwareBackend;
use raylight2d::backend::ComputeBackend;
use raylight2d::pipeline::AccumulationCell;
use raylight2d::{
    Camera2d, CameraTransforms, DispatchLimits, LightingConfig, LightingSystem, WgpuBackend,
};

/// Output size of the test scenes; one pixel per world unit with the camera
/// from [`camera`]
pub const SIZE: u32 = 21;

/// Backends the tests can run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU kernels, always available
    Software,
    /// Headless wgpu device
    Wgpu,
}

impl Backend {
    /// `None` when no suitable GPU is present
    pub fn create(&self) -> Option<Box<dyn ComputeBackend>> {
        match self {
            Backend::Software => Some(Box::new(SoftwareBackend::new())),
            Backend::Wgpu => match WgpuBackend::new_headless() {
                Ok(backend) => Some(Box::new(backend)),
                Err(err) => {
                    eprintln!("wgpu backend not available: {}", err);
                    None
                }
            },
        }
    }
}

/// Small limits so a 21x21 frame needs several batches
pub fn small_limits() -> DispatchLimits {
    DispatchLimits {
        group_size: 8,
        max_groups: 16,
    }
}

pub fn config() -> LightingConfig {
    LightingConfig {
        dispatch_limits: small_limits(),
        ..LightingConfig::new(SIZE, SIZE)
    }
}

/// Camera centred on the origin; pixel (x, y) covers world (x - 10, 10 - y)
pub fn camera() -> CameraTransforms {
    Camera2d::new(Vec2::ZERO, SIZE as f32).transforms(SIZE, SIZE)
}

pub fn pixel(x: u32, y: u32) -> usize {
    (y * SIZE + x) as usize
}

pub fn read_accumulation(
    system: &LightingSystem,
    backend: &mut dyn ComputeBackend,
) -> Vec<AccumulationCell> {
    system
        .pipeline()
        .read_accumulation(backend)
        .expect("accumulation readback")
}

/// Light reaching `world` from a white light at `light` with no occluders
pub fn unoccluded(world: Vec2, light: Vec2, range: f32) -> Vec3 {
    let falloff = (1.0 - world.distance(light) / range).max(0.0);
    Vec3::ONE * falloff * falloff
}

pub fn assert_close(actual: Vec3, expected: Vec3) {
    assert!(
        (actual - expected).abs().max_element() < 2e-3,
        "expected {}, got {}",
        expected,
        actual
    );
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
