//! Live registry of lights and occluders, flattened into per-variant lists

use super::light::*;
use super::shape::*;
use crate::geometry::{triangulate_into, Segment, SegmentRange, TriangulationError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Lifecycle errors from scene-management code
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("light {0:?} is already registered")]
    DuplicateLight(LightId),
    #[error("light {0:?} is not registered")]
    LightNotFound(LightId),
    #[error("shape {0:?} is already registered")]
    DuplicateShape(ShapeId),
    #[error("shape {0:?} is not registered")]
    ShapeNotFound(ShapeId),
    #[error("invalid light {id:?}: {reason}")]
    InvalidLight { id: LightId, reason: String },
    #[error("invalid shape {id:?}: {reason}")]
    InvalidShape { id: ShapeId, reason: String },
}

/// Per-entity problem found while rebuilding; the entity is skipped or
/// contributes no segments, the rest of the rebuild proceeds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RebuildDiagnostic {
    #[error("light {id:?}: {kind} lights are not supported by the ray marcher")]
    UnsupportedLight { id: LightId, kind: &'static str },
    #[error("light {id:?}: polygon triangulation failed: {error}")]
    LightTriangulation { id: LightId, error: TriangulationError },
    #[error("shape {id:?}: polygon triangulation failed: {error}")]
    ShapeTriangulation { id: ShapeId, error: TriangulationError },
}

/// Flat light records, one list per variant plus the light segment pool
#[derive(Debug, Clone, Default)]
pub struct LightLists {
    pub points: Vec<PointLightData>,
    pub spots: Vec<SpotLightData>,
    pub polygons: Vec<PolygonLightData>,
    pub segments: Vec<Segment>,
}

impl LightLists {
    fn clear(&mut self) {
        self.points.clear();
        self.spots.clear();
        self.polygons.clear();
        self.segments.clear();
    }

    /// Lights that will emit rays this frame
    pub fn enabled_count(&self) -> u32 {
        let points = self.points.iter().filter(|l| l.enabled != 0).count();
        let spots = self.spots.iter().filter(|l| l.enabled != 0).count();
        let polygons = self.polygons.iter().filter(|l| l.enabled != 0).count();
        (points + spots + polygons) as u32
    }
}

/// Flat occluder records, one list per variant plus the shape segment pool
#[derive(Debug, Clone, Default)]
pub struct ShapeLists {
    pub circles: Vec<CircleShapeData>,
    pub rects: Vec<RectShapeData>,
    pub polygons: Vec<PolygonShapeData>,
    pub segments: Vec<Segment>,
}

impl ShapeLists {
    fn clear(&mut self) {
        self.circles.clear();
        self.rects.clear();
        self.polygons.clear();
        self.segments.clear();
    }
}

/// Outcome of a rebuild that actually ran
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    pub records: usize,
    pub diagnostics: Vec<RebuildDiagnostic>,
}

/// Owns the registered lights and shapes and their flattened form.
///
/// Membership is set-like: adding an id twice or removing an absent id is an
/// error. Mutations mark the affected side dirty; `rebuild_*` only does work
/// when dirty.
#[derive(Debug, Default)]
pub struct SceneRegistry {
    lights: BTreeMap<LightId, Light>,
    shapes: BTreeMap<ShapeId, Shape>,
    light_lists: LightLists,
    shape_lists: ShapeLists,
    lights_dirty: bool,
    shapes_dirty: bool,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self {
            lights_dirty: true,
            shapes_dirty: true,
            ..Default::default()
        }
    }

    pub fn add_light(&mut self, id: LightId, light: Light) -> Result<(), SceneError> {
        light
            .validate()
            .map_err(|reason| SceneError::InvalidLight { id, reason })?;
        if self.lights.contains_key(&id) {
            return Err(SceneError::DuplicateLight(id));
        }
        self.lights.insert(id, light);
        self.lights_dirty = true;
        Ok(())
    }

    pub fn remove_light(&mut self, id: LightId) -> Result<Light, SceneError> {
        let light = self.lights.remove(&id).ok_or(SceneError::LightNotFound(id))?;
        self.lights_dirty = true;
        Ok(light)
    }

    /// Replaces a registered light
    pub fn update_light(&mut self, id: LightId, light: Light) -> Result<(), SceneError> {
        light
            .validate()
            .map_err(|reason| SceneError::InvalidLight { id, reason })?;
        let slot = self.lights.get_mut(&id).ok_or(SceneError::LightNotFound(id))?;
        *slot = light;
        self.lights_dirty = true;
        Ok(())
    }

    pub fn set_light_enabled(&mut self, id: LightId, enabled: bool) -> Result<(), SceneError> {
        let light = self.lights.get_mut(&id).ok_or(SceneError::LightNotFound(id))?;
        if light.enabled != enabled {
            light.enabled = enabled;
            self.lights_dirty = true;
        }
        Ok(())
    }

    pub fn add_shape(&mut self, id: ShapeId, shape: Shape) -> Result<(), SceneError> {
        shape
            .validate()
            .map_err(|reason| SceneError::InvalidShape { id, reason })?;
        if self.shapes.contains_key(&id) {
            return Err(SceneError::DuplicateShape(id));
        }
        self.shapes.insert(id, shape);
        self.shapes_dirty = true;
        Ok(())
    }

    pub fn remove_shape(&mut self, id: ShapeId) -> Result<Shape, SceneError> {
        let shape = self.shapes.remove(&id).ok_or(SceneError::ShapeNotFound(id))?;
        self.shapes_dirty = true;
        Ok(shape)
    }

    pub fn update_shape(&mut self, id: ShapeId, shape: Shape) -> Result<(), SceneError> {
        shape
            .validate()
            .map_err(|reason| SceneError::InvalidShape { id, reason })?;
        let slot = self.shapes.get_mut(&id).ok_or(SceneError::ShapeNotFound(id))?;
        *slot = shape;
        self.shapes_dirty = true;
        Ok(())
    }

    pub fn set_shape_enabled(&mut self, id: ShapeId, enabled: bool) -> Result<(), SceneError> {
        let shape = self.shapes.get_mut(&id).ok_or(SceneError::ShapeNotFound(id))?;
        if shape.enabled != enabled {
            shape.enabled = enabled;
            self.shapes_dirty = true;
        }
        Ok(())
    }

    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.lights.get(&id)
    }

    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    pub fn light_count(&self) -> usize {
        self.lights.len()
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn lights_dirty(&self) -> bool {
        self.lights_dirty
    }

    pub fn shapes_dirty(&self) -> bool {
        self.shapes_dirty
    }

    /// Forces the next `rebuild_lights`, e.g. after a failed upload
    pub fn mark_lights_dirty(&mut self) {
        self.lights_dirty = true;
    }

    pub fn mark_shapes_dirty(&mut self) {
        self.shapes_dirty = true;
    }

    pub fn light_lists(&self) -> &LightLists {
        &self.light_lists
    }

    pub fn shape_lists(&self) -> &ShapeLists {
        &self.shape_lists
    }

    /// Re-flattens all lights if anything changed since the last rebuild
    pub fn rebuild_lights(&mut self) -> Option<RebuildReport> {
        if !self.lights_dirty {
            return None;
        }
        self.lights_dirty = false;

        let lists = &mut self.light_lists;
        lists.clear();
        let mut report = RebuildReport::default();

        for (&id, light) in &self.lights {
            match &light.kind {
                LightKind::Point => lists.points.push(light.to_point_data()),
                LightKind::Spot { .. } => lists.spots.extend(light.to_spot_data()),
                LightKind::Polygon { contour } => {
                    let range = triangulate_into(contour, light.position, &mut lists.segments)
                        .unwrap_or_else(|error| {
                            log::warn!("Light {:?}: triangulation failed: {}", id, error);
                            report
                                .diagnostics
                                .push(RebuildDiagnostic::LightTriangulation { id, error });
                            SegmentRange::empty_at(&lists.segments)
                        });
                    lists
                        .polygons
                        .push(light.to_polygon_data(range.offset, range.count));
                }
                LightKind::Directional { .. } => {
                    log::warn!(
                        "Light {:?}: {} lights are not supported, skipping",
                        id,
                        light.kind.name()
                    );
                    report.diagnostics.push(RebuildDiagnostic::UnsupportedLight {
                        id,
                        kind: light.kind.name(),
                    });
                    continue;
                }
            }
            report.records += 1;
        }

        log::debug!(
            "Rebuilt lights: {} point, {} spot, {} polygon, {} segments",
            lists.points.len(),
            lists.spots.len(),
            lists.polygons.len(),
            lists.segments.len()
        );
        Some(report)
    }

    /// Re-flattens all shapes if anything changed since the last rebuild
    pub fn rebuild_shapes(&mut self) -> Option<RebuildReport> {
        if !self.shapes_dirty {
            return None;
        }
        self.shapes_dirty = false;

        let lists = &mut self.shape_lists;
        lists.clear();
        let mut report = RebuildReport::default();

        for (&id, shape) in &self.shapes {
            let enabled = shape.enabled as u32;
            match &shape.kind {
                ShapeKind::Circle { radius } => lists.circles.push(CircleShapeData {
                    position: shape.position,
                    radius: *radius,
                    enabled,
                }),
                ShapeKind::Rect { size } => lists.rects.push(RectShapeData {
                    position: shape.position,
                    extents: *size * 0.5,
                    enabled,
                    _padding: 0,
                }),
                ShapeKind::Polygon { vertices } => {
                    let range = triangulate_into(vertices, shape.position, &mut lists.segments)
                        .unwrap_or_else(|error| {
                            log::warn!("Shape {:?}: triangulation failed: {}", id, error);
                            report
                                .diagnostics
                                .push(RebuildDiagnostic::ShapeTriangulation { id, error });
                            SegmentRange::empty_at(&lists.segments)
                        });
                    lists.polygons.push(PolygonShapeData {
                        segment_offset: range.offset,
                        segment_count: range.count,
                        enabled,
                    });
                }
            }
            report.records += 1;
        }

        log::debug!(
            "Rebuilt shapes: {} circle, {} rect, {} polygon, {} segments",
            lists.circles.len(),
            lists.rects.len(),
            lists.polygons.len(),
            lists.segments.len()
        );
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    fn point(x: f32) -> Light {
        Light::point(Vec2::new(x, 0.0), Vec3::ONE, 1.0, 5.0)
    }

    fn triangle() -> Vec<Vec2> {
        vec![Vec2::ZERO, Vec2::X, Vec2::Y]
    }

    #[test]
    fn test_duplicate_add_fails() {
        let mut registry = SceneRegistry::new();
        registry.add_light(LightId(1), point(0.0)).unwrap();
        assert_eq!(
            registry.add_light(LightId(1), point(1.0)),
            Err(SceneError::DuplicateLight(LightId(1)))
        );
        assert_eq!(registry.light(LightId(1)), Some(&point(0.0)));

        registry.add_shape(ShapeId(4), Shape::circle(Vec2::ZERO, 1.0)).unwrap();
        assert_eq!(
            registry.add_shape(ShapeId(4), Shape::circle(Vec2::ZERO, 2.0)),
            Err(SceneError::DuplicateShape(ShapeId(4)))
        );
    }

    #[test]
    fn test_remove_missing_fails() {
        let mut registry = SceneRegistry::new();
        assert_eq!(
            registry.remove_light(LightId(9)),
            Err(SceneError::LightNotFound(LightId(9)))
        );
        assert_eq!(
            registry.remove_shape(ShapeId(9)),
            Err(SceneError::ShapeNotFound(ShapeId(9)))
        );

        registry.add_light(LightId(9), point(0.0)).unwrap();
        registry.remove_light(LightId(9)).unwrap();
        assert!(registry.remove_light(LightId(9)).is_err());
    }

    #[test]
    fn test_invalid_light_rejected() {
        let mut registry = SceneRegistry::new();
        let result = registry.add_light(LightId(1), Light::point(Vec2::ZERO, Vec3::ONE, 1.0, -1.0));
        assert!(matches!(result, Err(SceneError::InvalidLight { .. })));
        assert_eq!(registry.light_count(), 0);
    }

    #[test]
    fn test_rebuild_only_when_dirty() {
        let mut registry = SceneRegistry::new();
        assert!(registry.rebuild_lights().is_some());
        assert!(registry.rebuild_lights().is_none());

        registry.add_light(LightId(1), point(0.0)).unwrap();
        assert!(registry.lights_dirty());

        let report = registry.rebuild_lights().unwrap();
        assert_eq!(report.records, 1);
        assert!(registry.rebuild_lights().is_none());

        // Toggling to the current value is not a change
        registry.set_light_enabled(LightId(1), true).unwrap();
        assert!(!registry.lights_dirty());
        registry.set_light_enabled(LightId(1), false).unwrap();
        assert!(registry.lights_dirty());
    }

    #[test]
    fn test_rebuild_dispatches_by_variant() {
        let mut registry = SceneRegistry::new();
        registry.add_light(LightId(1), point(0.0)).unwrap();
        registry
            .add_light(
                LightId(2),
                Light::spot(Vec2::ZERO, Vec2::Y, 60.0, Vec3::ONE, 1.0, 4.0),
            )
            .unwrap();
        registry
            .add_light(
                LightId(3),
                Light::polygon(Vec2::new(5.0, 5.0), triangle(), Vec3::ONE, 1.0, 4.0),
            )
            .unwrap();
        registry.add_shape(ShapeId(1), Shape::circle(Vec2::ZERO, 1.0)).unwrap();
        registry
            .add_shape(ShapeId(2), Shape::rect(Vec2::ZERO, Vec2::new(4.0, 2.0)))
            .unwrap();
        registry
            .add_shape(ShapeId(3), Shape::polygon(Vec2::ZERO, vec![
                Vec2::ZERO,
                Vec2::X,
                Vec2::ONE,
                Vec2::Y,
            ]))
            .unwrap();

        registry.rebuild_lights().unwrap();
        registry.rebuild_shapes().unwrap();

        let lights = registry.light_lists();
        assert_eq!(lights.points.len(), 1);
        assert_eq!(lights.spots.len(), 1);
        assert_eq!(lights.polygons.len(), 1);
        assert_eq!(lights.segments.len(), 3);
        let offset = Vec2::new(5.0, 5.0);
        assert!(triangle().iter().any(|v| *v + offset == lights.segments[0].a));
        assert_eq!(lights.enabled_count(), 3);

        let shapes = registry.shape_lists();
        assert_eq!(shapes.circles.len(), 1);
        assert_eq!(shapes.rects[0].extents, Vec2::new(2.0, 1.0));
        assert_eq!(
            shapes.polygons[0],
            PolygonShapeData {
                segment_offset: 0,
                segment_count: 6,
                enabled: 1
            }
        );
        assert_eq!(shapes.segments.len(), 6);
    }

    #[test]
    fn test_segment_ranges_are_contiguous() {
        let mut registry = SceneRegistry::new();
        for i in 0..4 {
            registry
                .add_shape(ShapeId(i), Shape::polygon(Vec2::splat(i as f32), triangle()))
                .unwrap();
        }
        registry.rebuild_shapes().unwrap();

        let shapes = registry.shape_lists();
        let mut next = 0;
        for polygon in &shapes.polygons {
            assert_eq!(polygon.segment_offset, next);
            next += polygon.segment_count;
        }
        assert_eq!(next as usize, shapes.segments.len());
    }

    #[test]
    fn test_unsupported_light_is_skipped_with_diagnostic() {
        let mut registry = SceneRegistry::new();
        registry
            .add_light(LightId(1), Light::directional(Vec2::X, Vec3::ONE, 1.0))
            .unwrap();
        registry.add_light(LightId(2), point(0.0)).unwrap();

        let report = registry.rebuild_lights().unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(
            report.diagnostics,
            vec![RebuildDiagnostic::UnsupportedLight {
                id: LightId(1),
                kind: "directional"
            }]
        );
        assert_eq!(registry.light_lists().points.len(), 1);
    }

    #[test]
    fn test_failed_triangulation_contributes_no_segments() {
        let mut registry = SceneRegistry::new();
        registry
            .add_shape(ShapeId(1), Shape::polygon(Vec2::ZERO, vec![Vec2::ZERO, Vec2::X]))
            .unwrap();
        registry
            .add_shape(ShapeId(2), Shape::polygon(Vec2::ZERO, triangle()))
            .unwrap();

        let report = registry.rebuild_shapes().unwrap();
        assert!(matches!(
            report.diagnostics.as_slice(),
            [RebuildDiagnostic::ShapeTriangulation { id: ShapeId(1), .. }]
        ));

        let shapes = registry.shape_lists();
        assert_eq!(shapes.polygons[0].segment_count, 0);
        assert_eq!(shapes.polygons[1].segment_offset, 0);
        assert_eq!(shapes.polygons[1].segment_count, 3);
    }

    #[test]
    fn test_disabled_entries_stay_in_lists() {
        let mut registry = SceneRegistry::new();
        registry.add_light(LightId(1), point(0.0).with_enabled(false)).unwrap();
        registry
            .add_shape(ShapeId(1), Shape::circle(Vec2::ZERO, 1.0).with_enabled(false))
            .unwrap();
        registry.rebuild_lights();
        registry.rebuild_shapes();

        assert_eq!(registry.light_lists().points.len(), 1);
        assert_eq!(registry.light_lists().enabled_count(), 0);
        assert_eq!(registry.shape_lists().circles[0].enabled, 0);
    }
}
