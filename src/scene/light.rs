//! Light types for the scene

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Narrowest and widest spot cone, in degrees
pub const SPOT_ANGLE_MIN: f32 = 1.0;
pub const SPOT_ANGLE_MAX: f32 = 179.0;

/// Caller-chosen identity of a registered light
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LightId(pub u64);

/// Variant-specific light parameters
#[derive(Debug, Clone, PartialEq)]
pub enum LightKind {
    Point,
    /// Cone of `angle` degrees around `direction`
    Spot { direction: Vec2, angle: f32 },
    /// Emitting polygon; contour is relative to the light position
    Polygon { contour: Vec<Vec2> },
    /// Infinitely distant light. Not supported by the ray marcher.
    Directional { direction: Vec2 },
}

impl LightKind {
    pub fn name(&self) -> &'static str {
        match self {
            LightKind::Point => "point",
            LightKind::Spot { .. } => "spot",
            LightKind::Polygon { .. } => "polygon",
            LightKind::Directional { .. } => "directional",
        }
    }
}

/// A light as registered by scene code
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub position: Vec2,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
    pub enabled: bool,
    pub kind: LightKind,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
            enabled: true,
            kind: LightKind::Point,
        }
    }
}

impl Light {
    pub fn point(position: Vec2, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            range,
            ..Default::default()
        }
    }

    pub fn spot(
        position: Vec2,
        direction: Vec2,
        angle_degrees: f32,
        color: Vec3,
        intensity: f32,
        range: f32,
    ) -> Self {
        Self {
            position,
            color,
            intensity,
            range,
            kind: LightKind::Spot {
                direction,
                angle: angle_degrees,
            },
            ..Default::default()
        }
    }

    pub fn polygon(position: Vec2, contour: Vec<Vec2>, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            range,
            kind: LightKind::Polygon { contour },
            ..Default::default()
        }
    }

    pub fn directional(direction: Vec2, color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            range: f32::INFINITY,
            kind: LightKind::Directional { direction },
            ..Default::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Color scaled by intensity, as the kernels consume it
    pub fn premultiplied_color(&self) -> Vec3 {
        self.color * self.intensity
    }

    /// Checks the numeric fields; returns a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        if !self.position.is_finite() {
            return Err(format!("position {} is not finite", self.position));
        }
        if !self.color.is_finite() || self.color.min_element() < 0.0 {
            return Err(format!("color {} must be finite and non-negative", self.color));
        }
        if !self.intensity.is_finite() || self.intensity < 0.0 {
            return Err(format!("intensity {} must be finite and non-negative", self.intensity));
        }
        match &self.kind {
            LightKind::Directional { direction } => {
                if !direction.is_finite() {
                    return Err("direction is not finite".into());
                }
            }
            kind => {
                if !self.range.is_finite() || self.range <= 0.0 {
                    return Err(format!("range {} must be finite and positive", self.range));
                }
                if let LightKind::Spot { direction, angle } = kind {
                    if !direction.is_finite() || !angle.is_finite() {
                        return Err("spot direction and angle must be finite".into());
                    }
                }
                if let LightKind::Polygon { contour } = kind {
                    if contour.iter().any(|v| !v.is_finite()) {
                        return Err("polygon contour has a non-finite vertex".into());
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_point_data(&self) -> PointLightData {
        PointLightData {
            position: self.position,
            range: self.range,
            enabled: self.enabled as u32,
            color: self.premultiplied_color(),
            _padding: 0.0,
        }
    }

    /// Spot record; `None` for any other variant
    pub fn to_spot_data(&self) -> Option<SpotLightData> {
        let LightKind::Spot { direction, angle } = self.kind else {
            return None;
        };
        let (cone_min, cone_max) = spot_cone(direction, angle);
        Some(SpotLightData {
            position: self.position,
            range: self.range,
            enabled: self.enabled as u32,
            color: self.premultiplied_color(),
            _padding: 0.0,
            cone_min,
            cone_max,
        })
    }

    pub fn to_polygon_data(&self, offset: u32, count: u32) -> PolygonLightData {
        PolygonLightData {
            color: self.premultiplied_color(),
            range: self.range,
            segment_offset: offset,
            segment_count: count,
            enabled: self.enabled as u32,
            _padding: 0,
        }
    }
}

/// Unit vectors bounding a spot cone, clockwise bound first.
///
/// The angle is the full cone width in degrees, clamped to
/// [`SPOT_ANGLE_MIN`, `SPOT_ANGLE_MAX`]. A zero direction faces +X.
pub fn spot_cone(direction: Vec2, angle_degrees: f32) -> (Vec2, Vec2) {
    let facing = direction.try_normalize().unwrap_or(Vec2::X);
    let half = angle_degrees.clamp(SPOT_ANGLE_MIN, SPOT_ANGLE_MAX).to_radians() * 0.5;
    (
        Vec2::from_angle(-half).rotate(facing),
        Vec2::from_angle(half).rotate(facing),
    )
}

/// GPU point light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PointLightData {
    pub position: Vec2,
    pub range: f32,
    pub enabled: u32,
    pub color: Vec3,
    pub _padding: f32,
}

/// GPU spot light record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SpotLightData {
    pub position: Vec2,
    pub range: f32,
    pub enabled: u32,
    pub color: Vec3,
    pub _padding: f32,
    pub cone_min: Vec2,
    pub cone_max: Vec2,
}

/// GPU polygon light record, addressing the light segment pool
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PolygonLightData {
    pub color: Vec3,
    pub range: f32,
    pub segment_offset: u32,
    pub segment_count: u32,
    pub enabled: u32,
    pub _padding: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_record_layouts_match_wgsl() {
        assert_eq!(size_of::<PointLightData>(), 32);
        assert_eq!(offset_of!(PointLightData, range), 8);
        assert_eq!(offset_of!(PointLightData, enabled), 12);
        assert_eq!(offset_of!(PointLightData, color), 16);

        assert_eq!(size_of::<SpotLightData>(), 48);
        assert_eq!(offset_of!(SpotLightData, cone_min), 32);
        assert_eq!(offset_of!(SpotLightData, cone_max), 40);

        assert_eq!(size_of::<PolygonLightData>(), 32);
        assert_eq!(offset_of!(PolygonLightData, range), 12);
        assert_eq!(offset_of!(PolygonLightData, segment_offset), 16);
        assert_eq!(offset_of!(PolygonLightData, enabled), 24);
    }

    #[test]
    fn test_spot_cone_brackets_direction() {
        let (min, max) = spot_cone(Vec2::Y, 90.0);
        assert!((min - Vec2::new(1.0, 1.0).normalize()).length() < 1e-6);
        assert!((max - Vec2::new(-1.0, 1.0).normalize()).length() < 1e-6);
        assert!(min.perp_dot(Vec2::Y) > 0.0);
        assert!(Vec2::Y.perp_dot(max) > 0.0);
    }

    #[test]
    fn test_spot_cone_clamps_angle() {
        let wide = spot_cone(Vec2::X, 400.0);
        let clamped = spot_cone(Vec2::X, SPOT_ANGLE_MAX);
        assert_eq!(wide, clamped);

        let (min, max) = spot_cone(Vec2::X, 0.0);
        assert!(min.angle_between(max) > 0.0);
    }

    #[test]
    fn test_spot_cone_zero_direction_faces_x() {
        assert_eq!(spot_cone(Vec2::ZERO, 60.0), spot_cone(Vec2::X, 60.0));
    }

    #[test]
    fn test_premultiplied_color() {
        let light = Light::point(Vec2::ZERO, Vec3::new(1.0, 0.5, 0.0), 2.0, 5.0);
        assert_eq!(light.to_point_data().color, Vec3::new(2.0, 1.0, 0.0));
    }

    #[test]
    fn test_validate_rejects_bad_range() {
        assert!(Light::point(Vec2::ZERO, Vec3::ONE, 1.0, 0.0).validate().is_err());
        assert!(Light::point(Vec2::ZERO, Vec3::ONE, 1.0, f32::NAN).validate().is_err());
        assert!(Light::point(Vec2::ZERO, Vec3::ONE, 1.0, 3.0).validate().is_ok());
        // Directional lights have no range
        assert!(Light::directional(Vec2::X, Vec3::ONE, 1.0).validate().is_ok());
    }
}
