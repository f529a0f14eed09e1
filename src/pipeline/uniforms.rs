//! GPU-side records shared by the ray-march kernels

use crate::scene::{CameraTransforms, LightLists, ShapeLists};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Bytes before the first ray in a ray list (atomic count plus padding)
pub const RAY_LIST_HEADER_SIZE: u64 = 16;
/// Bytes per ray in a ray list
pub const RAY_STRIDE: u64 = std::mem::size_of::<Ray>() as u64;

/// Fixed-point scale of the accumulation buffer
pub const ACCUMULATION_SCALE: f32 = 65536.0;
/// Largest per-channel contribution a single ray may add
pub const MAX_CONTRIBUTION: f32 = 256.0;

/// Hit distance as a fraction of one pixel
pub const HIT_EPSILON_SCALE: f32 = 0.01;

pub const LIGHT_KIND_POINT: u32 = 0;
pub const LIGHT_KIND_SPOT: u32 = 1;
pub const LIGHT_KIND_POLYGON: u32 = 2;

const LIGHT_INDEX_MASK: u32 = (1 << 30) - 1;

/// Packs a light's variant and index within its list into one word
pub fn encode_light(kind: u32, index: u32) -> u32 {
    (kind << 30) | (index & LIGHT_INDEX_MASK)
}

pub fn decode_light(light: u32) -> (u32, u32) {
    (light >> 30, light & LIGHT_INDEX_MASK)
}

/// A ray marching from a pixel toward the light it samples
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Ray {
    pub origin: Vec2,
    pub direction: Vec2,
    pub color: Vec3,
    /// Distance left to the light
    pub remaining: f32,
    pub pixel: u32,
    pub light: u32,
    pub bounce: u32,
    pub _padding: u32,
}

/// Per-pixel additive color sum in `ACCUMULATION_SCALE` fixed point
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct AccumulationCell {
    pub r: u32,
    pub g: u32,
    pub b: u32,
}

impl AccumulationCell {
    pub fn to_color(&self) -> Vec3 {
        Vec3::new(self.r as f32, self.g as f32, self.b as f32) / ACCUMULATION_SCALE
    }
}

/// Fixed-point units one contribution adds to a cell
pub fn contribution_units(color: Vec3) -> [u32; 3] {
    let scaled = color.clamp(Vec3::ZERO, Vec3::splat(MAX_CONTRIBUTION)) * ACCUMULATION_SCALE
        + Vec3::splat(0.5);
    [scaled.x as u32, scaled.y as u32, scaled.z as u32]
}

/// Number of entries in each flat list, as the kernels iterate them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneCounts {
    pub point_lights: u32,
    pub spot_lights: u32,
    pub polygon_lights: u32,
    pub circles: u32,
    pub rects: u32,
    pub polygon_shapes: u32,
}

impl SceneCounts {
    pub fn set_lights(&mut self, lights: &LightLists) {
        self.point_lights = lights.points.len() as u32;
        self.spot_lights = lights.spots.len() as u32;
        self.polygon_lights = lights.polygons.len() as u32;
    }

    pub fn set_shapes(&mut self, shapes: &ShapeLists) {
        self.circles = shapes.circles.len() as u32;
        self.rects = shapes.rects.len() as u32;
        self.polygon_shapes = shapes.polygons.len() as u32;
    }
}

/// Per-frame uniforms written during camera setup
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub inverse_projection: Mat4,
    pub inverse_view: Mat4,
    pub width: u32,
    pub height: u32,
    pub max_steps: u32,
    pub max_bounces: u32,
    /// World units per output pixel
    pub pixel_size: f32,
    /// Sub-pixel sample offset, zero unless temporal dither is on
    pub jitter: f32,
    pub point_light_count: u32,
    pub spot_light_count: u32,
    pub polygon_light_count: u32,
    pub circle_count: u32,
    pub rect_count: u32,
    pub polygon_shape_count: u32,
}

/// Frame parameters independent of the camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    pub width: u32,
    pub height: u32,
    pub max_steps: u32,
    pub max_bounces: u32,
    pub jitter: f32,
}

impl FrameUniforms {
    pub fn new(camera: &CameraTransforms, settings: FrameSettings, counts: SceneCounts) -> Self {
        Self {
            inverse_projection: camera.inverse_projection,
            inverse_view: camera.inverse_view,
            width: settings.width,
            height: settings.height,
            max_steps: settings.max_steps,
            max_bounces: settings.max_bounces,
            pixel_size: camera.pixel_size(settings.width),
            jitter: settings.jitter,
            point_light_count: counts.point_lights,
            spot_light_count: counts.spot_lights,
            polygon_light_count: counts.polygon_lights,
            circle_count: counts.circles,
            rect_count: counts.rects,
            polygon_shape_count: counts.polygon_shapes,
        }
    }

    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    pub fn hit_epsilon(&self) -> f32 {
        self.pixel_size * HIT_EPSILON_SCALE
    }
}

/// Per-batch uniforms, copied from the batch table before each Initialize
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct BatchUniforms {
    pub batch_offset: u32,
    pub pixels_per_batch: u32,
    pub batch_index: u32,
    pub _padding: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_ray_layout() {
        assert_eq!(size_of::<Ray>(), 48);
        assert_eq!(offset_of!(Ray, direction), 8);
        assert_eq!(offset_of!(Ray, color), 16);
        assert_eq!(offset_of!(Ray, remaining), 28);
        assert_eq!(offset_of!(Ray, pixel), 32);
        assert_eq!(offset_of!(Ray, light), 36);
        assert_eq!(offset_of!(Ray, bounce), 40);
    }

    #[test]
    fn test_uniform_layouts() {
        assert_eq!(size_of::<FrameUniforms>(), 176);
        assert_eq!(offset_of!(FrameUniforms, inverse_view), 64);
        assert_eq!(offset_of!(FrameUniforms, width), 128);
        assert_eq!(offset_of!(FrameUniforms, pixel_size), 144);
        assert_eq!(offset_of!(FrameUniforms, point_light_count), 152);
        assert_eq!(offset_of!(FrameUniforms, polygon_shape_count), 172);
        assert_eq!(size_of::<FrameUniforms>() % 16, 0);

        assert_eq!(size_of::<BatchUniforms>(), 16);
        assert_eq!(size_of::<AccumulationCell>(), 12);
    }

    #[test]
    fn test_light_encoding() {
        let id = encode_light(LIGHT_KIND_POLYGON, 12345);
        assert_eq!(decode_light(id), (LIGHT_KIND_POLYGON, 12345));
        assert_eq!(decode_light(encode_light(LIGHT_KIND_POINT, 0)), (0, 0));
    }

    #[test]
    fn test_contribution_units() {
        assert_eq!(contribution_units(Vec3::new(0.25, 1.0, 0.0)), [16384, 65536, 0]);
        assert_eq!(contribution_units(Vec3::splat(-1.0)), [0, 0, 0]);
        assert_eq!(contribution_units(Vec3::splat(1e9))[0], 1 << 24);

        let cell = AccumulationCell { r: 16384, g: 65536, b: 0 };
        assert_eq!(cell.to_color(), Vec3::new(0.25, 1.0, 0.0));
    }
}
