//! Ray-march math shared by the software kernels
//!
//! Mirrors the WGSL in [`super::shaders`] operation for operation so the
//! software backend produces the same light map as the GPU.

use super::uniforms::*;
use crate::geometry::Segment;
use crate::scene::*;
use glam::{Vec2, Vec4};

/// Distance reported when there is nothing to hit
pub const FAR: f32 = 3.0e38;

/// Leading `count` entries of a list, clamped to its length
pub fn prefix<T>(items: &[T], count: u32) -> &[T] {
    &items[..items.len().min(count as usize)]
}

/// World position sampled for a linear pixel index
pub fn pixel_to_world(frame: &FrameUniforms, pixel: u32) -> Vec2 {
    let width = frame.width.max(1);
    let height = frame.height.max(1);
    let x = (pixel % width) as f32 + 0.5 + frame.jitter;
    let y = (pixel / width) as f32 + 0.5 + frame.jitter;
    let ndc = Vec4::new(
        x / width as f32 * 2.0 - 1.0,
        1.0 - y / height as f32 * 2.0,
        0.0,
        1.0,
    );
    let world = frame.inverse_view * frame.inverse_projection * ndc;
    Vec2::new(world.x, world.y) / world.w
}

pub fn circle_distance(p: Vec2, circle: &CircleShapeData) -> f32 {
    (p - circle.position).length() - circle.radius
}

pub fn rect_distance(p: Vec2, rect: &RectShapeData) -> f32 {
    let q = (p - rect.position).abs() - rect.extents;
    q.max(Vec2::ZERO).length() + q.x.max(q.y).min(0.0)
}

pub fn closest_on_segment(p: Vec2, segment: &Segment) -> Vec2 {
    let edge = segment.b - segment.a;
    let ee = edge.dot(edge);
    if ee <= 0.0 {
        return segment.a;
    }
    let h = ((p - segment.a).dot(edge) / ee).clamp(0.0, 1.0);
    segment.a + edge * h
}

/// Whether a ray from `p` toward +X crosses the segment
pub fn crosses(p: Vec2, segment: &Segment) -> bool {
    let (a, b) = (segment.a, segment.b);
    (a.y > p.y) != (b.y > p.y) && p.x < a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x)
}

/// Nearest boundary point and inside flag for a triangulated polygon
fn polygon_query(p: Vec2, segments: &[Segment]) -> (Vec2, f32, bool) {
    let mut nearest = p;
    let mut best = FAR;
    let mut inside = false;
    for segment in segments {
        let candidate = closest_on_segment(p, segment);
        let dist = (p - candidate).length();
        if dist < best {
            best = dist;
            nearest = candidate;
        }
        if crosses(p, segment) {
            inside = !inside;
        }
    }
    (nearest, best, inside)
}

/// Signed distance to the union of the triangles, negative inside
pub fn polygon_distance(p: Vec2, segments: &[Segment]) -> f32 {
    let (_, dist, inside) = polygon_query(p, segments);
    if inside {
        -dist
    } else {
        dist
    }
}

/// Point a ray from `p` heads for: `p` itself inside the polygon, otherwise
/// the nearest boundary point
pub fn polygon_light_goal(p: Vec2, segments: &[Segment]) -> Vec2 {
    let (nearest, _, inside) = polygon_query(p, segments);
    if inside {
        p
    } else {
        nearest
    }
}

/// Whether `to_pixel` (relative to the light) lies inside a spot cone
pub fn in_cone(spot: &SpotLightData, to_pixel: Vec2) -> bool {
    spot.cone_min.perp_dot(to_pixel) >= 0.0 && to_pixel.perp_dot(spot.cone_max) >= 0.0
}

fn segment_range(segments: &[Segment], offset: u32, count: u32) -> &[Segment] {
    let start = (offset as usize).min(segments.len());
    let end = (offset as usize + count as usize).min(segments.len());
    &segments[start..end]
}

/// Occluding shapes, already clamped to the frame's counts
#[derive(Debug, Clone, Copy)]
pub struct Occluders<'a> {
    pub circles: &'a [CircleShapeData],
    pub rects: &'a [RectShapeData],
    pub polygons: &'a [PolygonShapeData],
    pub segments: &'a [Segment],
}

impl Occluders<'_> {
    /// Distance from `p` to the nearest enabled shape
    pub fn distance(&self, p: Vec2) -> f32 {
        let mut dist = FAR;
        for circle in self.circles.iter().filter(|c| c.enabled != 0) {
            dist = dist.min(circle_distance(p, circle));
        }
        for rect in self.rects.iter().filter(|r| r.enabled != 0) {
            dist = dist.min(rect_distance(p, rect));
        }
        for polygon in self.polygons.iter().filter(|s| s.enabled != 0 && s.segment_count > 0) {
            let segments = segment_range(self.segments, polygon.segment_offset, polygon.segment_count);
            dist = dist.min(polygon_distance(p, segments));
        }
        dist
    }
}

/// Emitting lights, already clamped to the frame's counts
#[derive(Debug, Clone, Copy)]
pub struct LightSources<'a> {
    pub points: &'a [PointLightData],
    pub spots: &'a [SpotLightData],
    pub polygons: &'a [PolygonLightData],
    pub segments: &'a [Segment],
}

impl LightSources<'_> {
    /// Calls `emit` with one primary ray per light that reaches `world`
    pub fn emit_primary_rays(&self, world: Vec2, pixel: u32, mut emit: impl FnMut(Ray)) {
        for (index, light) in self.points.iter().enumerate() {
            if light.enabled == 0 {
                continue;
            }
            let id = encode_light(LIGHT_KIND_POINT, index as u32);
            if let Some(ray) = primary_ray(world, light.position, light.color, light.range, pixel, id) {
                emit(ray);
            }
        }

        for (index, light) in self.spots.iter().enumerate() {
            if light.enabled == 0 || !in_cone(light, world - light.position) {
                continue;
            }
            let id = encode_light(LIGHT_KIND_SPOT, index as u32);
            if let Some(ray) = primary_ray(world, light.position, light.color, light.range, pixel, id) {
                emit(ray);
            }
        }

        for (index, light) in self.polygons.iter().enumerate() {
            if light.enabled == 0 || light.segment_count == 0 {
                continue;
            }
            let segments = segment_range(self.segments, light.segment_offset, light.segment_count);
            let goal = polygon_light_goal(world, segments);
            let id = encode_light(LIGHT_KIND_POLYGON, index as u32);
            if let Some(ray) = primary_ray(world, goal, light.color, light.range, pixel, id) {
                emit(ray);
            }
        }
    }
}

fn primary_ray(
    world: Vec2,
    goal: Vec2,
    color: glam::Vec3,
    range: f32,
    pixel: u32,
    light: u32,
) -> Option<Ray> {
    let delta = goal - world;
    let dist = delta.length();
    if dist > range {
        return None;
    }
    let direction = if dist > 0.0 { delta / dist } else { Vec2::ZERO };
    let falloff = 1.0 - dist / range;
    Some(Ray {
        origin: world,
        direction,
        color: color * falloff * falloff,
        remaining: dist,
        pixel,
        light,
        bounce: 0,
        _padding: 0,
    })
}

/// How a ray left one March dispatch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarchOutcome {
    /// Hit an occluder before reaching the light
    Occluded,
    /// Reached its light; contributes its color
    Arrived,
    /// Ran out of steps and resumes in the next bounce
    Continued(Ray),
    /// Ran out of steps with no bounces left
    Exhausted,
}

/// Sphere-traces `ray` toward its light for at most `max_steps` steps
pub fn march_ray(
    ray: &Ray,
    occluders: &Occluders,
    max_steps: u32,
    max_bounces: u32,
    hit_epsilon: f32,
) -> MarchOutcome {
    let mut t = 0.0;
    for _ in 0..max_steps {
        let d = occluders.distance(ray.origin + ray.direction * t);
        if d < hit_epsilon {
            return MarchOutcome::Occluded;
        }
        if t + d >= ray.remaining {
            return MarchOutcome::Arrived;
        }
        t += d;
    }

    if ray.bounce + 1 < max_bounces {
        MarchOutcome::Continued(Ray {
            origin: ray.origin + ray.direction * t,
            remaining: ray.remaining - t,
            bounce: ray.bounce + 1,
            ..*ray
        })
    } else {
        MarchOutcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::triangulate_into;
    use glam::Vec3;
    use rstest::rstest;

    fn circle(x: f32, y: f32, radius: f32) -> CircleShapeData {
        CircleShapeData {
            position: Vec2::new(x, y),
            radius,
            enabled: 1,
        }
    }

    fn ray_to(origin: Vec2, goal: Vec2) -> Ray {
        let delta = goal - origin;
        Ray {
            origin,
            direction: delta.normalize_or_zero(),
            color: Vec3::ONE,
            remaining: delta.length(),
            ..Default::default()
        }
    }

    fn square(size: f32) -> Vec<Segment> {
        let mut pool = Vec::new();
        let contour = [
            Vec2::ZERO,
            Vec2::new(size, 0.0),
            Vec2::new(size, size),
            Vec2::new(0.0, size),
        ];
        triangulate_into(&contour, Vec2::ZERO, &mut pool).unwrap();
        pool
    }

    #[rstest]
    #[case::outside_x(Vec2::new(3.0, 0.0), 2.0)]
    #[case::outside_corner(Vec2::new(4.0, 5.0), 5.0)]
    #[case::inside(Vec2::new(0.5, 0.0), -0.5)]
    fn test_rect_distance(#[case] p: Vec2, #[case] expected: f32) {
        let rect = RectShapeData {
            extents: Vec2::new(1.0, 1.0),
            enabled: 1,
            ..Default::default()
        };
        assert!((rect_distance(p, &rect) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_polygon_distance_sign() {
        let segments = square(2.0);
        // Inside magnitudes include the internal diagonals; only the sign is exact
        assert!(polygon_distance(Vec2::new(0.3, 1.0), &segments) < 0.0);
        assert!((polygon_distance(Vec2::new(3.0, 1.0), &segments) - 1.0).abs() < 1e-5);
        assert!((polygon_distance(Vec2::new(1.0, -0.5), &segments) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_polygon_light_goal() {
        let segments = square(2.0);
        assert_eq!(polygon_light_goal(Vec2::new(0.3, 1.0), &segments), Vec2::new(0.3, 1.0));
        let goal = polygon_light_goal(Vec2::new(5.0, 1.0), &segments);
        assert!((goal - Vec2::new(2.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_disabled_shapes_do_not_occlude() {
        let shapes = [CircleShapeData {
            enabled: 0,
            ..circle(0.0, 0.0, 1.0)
        }];
        let occluders = Occluders {
            circles: &shapes,
            rects: &[],
            polygons: &[],
            segments: &[],
        };
        assert_eq!(occluders.distance(Vec2::ZERO), FAR);
    }

    #[test]
    fn test_march_blocked_by_circle() {
        let circles = [circle(2.5, 0.0, 2.0)];
        let occluders = Occluders {
            circles: &circles,
            rects: &[],
            polygons: &[],
            segments: &[],
        };
        let blocked = ray_to(Vec2::new(5.0, 0.0), Vec2::ZERO);
        assert_eq!(march_ray(&blocked, &occluders, 64, 1, 0.01), MarchOutcome::Occluded);

        let clear = ray_to(Vec2::new(0.0, 5.0), Vec2::ZERO);
        assert_eq!(march_ray(&clear, &occluders, 64, 1, 0.01), MarchOutcome::Arrived);
    }

    #[test]
    fn test_march_continues_when_steps_run_out() {
        let circles = [circle(2.5, 0.0, 2.0)];
        let occluders = Occluders {
            circles: &circles,
            rects: &[],
            polygons: &[],
            segments: &[],
        };
        let ray = ray_to(Vec2::new(0.0, 5.0), Vec2::ZERO);

        let MarchOutcome::Continued(next) = march_ray(&ray, &occluders, 1, 2, 0.01) else {
            panic!("expected a continued ray");
        };
        assert_eq!(next.bounce, 1);
        assert!(next.remaining < ray.remaining);
        assert_eq!(next.origin.x, 0.0);
        assert_eq!(march_ray(&next, &occluders, 64, 2, 0.01), MarchOutcome::Arrived);

        assert_eq!(march_ray(&ray, &occluders, 1, 1, 0.01), MarchOutcome::Exhausted);
    }

    #[test]
    fn test_primary_rays_respect_range_and_cone() {
        let points = [PointLightData {
            range: 10.0,
            enabled: 1,
            color: Vec3::ONE,
            ..Default::default()
        }];
        let (cone_min, cone_max) = spot_cone(Vec2::Y, 90.0);
        let spots = [SpotLightData {
            range: 10.0,
            enabled: 1,
            color: Vec3::ONE,
            cone_min,
            cone_max,
            ..Default::default()
        }];
        let sources = LightSources {
            points: &points,
            spots: &spots,
            polygons: &[],
            segments: &[],
        };

        let mut rays = Vec::new();
        sources.emit_primary_rays(Vec2::new(0.0, 5.0), 7, |ray| rays.push(ray));
        assert_eq!(rays.len(), 2);
        assert!((rays[0].color.x - 0.25).abs() < 1e-6);
        assert_eq!(rays[0].direction, Vec2::new(0.0, -1.0));
        assert_eq!(rays[1].pixel, 7);
        assert_eq!(decode_light(rays[1].light), (LIGHT_KIND_SPOT, 0));

        rays.clear();
        sources.emit_primary_rays(Vec2::new(0.0, -5.0), 0, |ray| rays.push(ray));
        assert_eq!(rays.len(), 1, "behind the spot");

        rays.clear();
        sources.emit_primary_rays(Vec2::new(0.0, 11.0), 0, |ray| rays.push(ray));
        assert!(rays.is_empty(), "out of range");
    }

    #[test]
    fn test_pixel_to_world_centers() {
        let camera = Camera2d::new(Vec2::ZERO, 21.0).transforms(21, 21);
        let settings = FrameSettings {
            width: 21,
            height: 21,
            max_steps: 1,
            max_bounces: 1,
            jitter: 0.0,
        };
        let frame = FrameUniforms::new(&camera, settings, SceneCounts::default());

        let p = pixel_to_world(&frame, 10 * 21 + 15);
        assert!((p - Vec2::new(5.0, 0.0)).length() < 1e-4);
        let p = pixel_to_world(&frame, 5 * 21 + 10);
        assert!((p - Vec2::new(0.0, 5.0)).length() < 1e-4);
    }
}
