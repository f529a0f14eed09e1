//! Occluding shapes

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// Caller-chosen identity of a registered shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    Circle { radius: f32 },
    /// Axis-aligned rectangle of full `size`
    Rect { size: Vec2 },
    /// Simple polygon relative to the shape position
    Polygon { vertices: Vec<Vec2> },
}

impl ShapeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ShapeKind::Circle { .. } => "circle",
            ShapeKind::Rect { .. } => "rect",
            ShapeKind::Polygon { .. } => "polygon",
        }
    }
}

/// An occluder as registered by scene code.
///
/// Disabled shapes stay in the flat buffers but cast no shadow.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub position: Vec2,
    pub enabled: bool,
    pub kind: ShapeKind,
}

impl Shape {
    pub fn circle(position: Vec2, radius: f32) -> Self {
        Self {
            position,
            enabled: true,
            kind: ShapeKind::Circle { radius },
        }
    }

    pub fn rect(position: Vec2, size: Vec2) -> Self {
        Self {
            position,
            enabled: true,
            kind: ShapeKind::Rect { size },
        }
    }

    pub fn polygon(position: Vec2, vertices: Vec<Vec2>) -> Self {
        Self {
            position,
            enabled: true,
            kind: ShapeKind::Polygon { vertices },
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.position.is_finite() {
            return Err(format!("position {} is not finite", self.position));
        }
        match &self.kind {
            ShapeKind::Circle { radius } if !radius.is_finite() || *radius < 0.0 => {
                Err(format!("radius {radius} must be finite and non-negative"))
            }
            ShapeKind::Rect { size } if !size.is_finite() || size.min_element() < 0.0 => {
                Err(format!("size {size} must be finite and non-negative"))
            }
            ShapeKind::Polygon { vertices } if vertices.iter().any(|v| !v.is_finite()) => {
                Err("polygon has a non-finite vertex".into())
            }
            _ => Ok(()),
        }
    }
}

/// GPU circle record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct CircleShapeData {
    pub position: Vec2,
    pub radius: f32,
    pub enabled: u32,
}

/// GPU rectangle record with half-extents
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct RectShapeData {
    pub position: Vec2,
    pub extents: Vec2,
    pub enabled: u32,
    pub _padding: u32,
}

/// GPU polygon record, addressing the shape segment pool
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct PolygonShapeData {
    pub segment_offset: u32,
    pub segment_count: u32,
    pub enabled: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_record_layouts_match_wgsl() {
        assert_eq!(size_of::<CircleShapeData>(), 16);
        assert_eq!(offset_of!(CircleShapeData, radius), 8);
        assert_eq!(size_of::<RectShapeData>(), 24);
        assert_eq!(offset_of!(RectShapeData, extents), 8);
        assert_eq!(offset_of!(RectShapeData, enabled), 16);
        assert_eq!(size_of::<PolygonShapeData>(), 12);
    }

    #[test]
    fn test_validate() {
        assert!(Shape::circle(Vec2::ZERO, 1.0).validate().is_ok());
        assert!(Shape::circle(Vec2::ZERO, -1.0).validate().is_err());
        assert!(Shape::rect(Vec2::ZERO, Vec2::new(1.0, f32::INFINITY)).validate().is_err());
        assert!(Shape::polygon(Vec2::NAN, vec![]).validate().is_err());
    }
}
