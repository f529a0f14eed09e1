//! Ear-clipping triangulation of simple polygons

use super::{Segment, SegmentRange};
use glam::Vec2;
use thiserror::Error;

/// Minimum cross product for a candidate ear; rejects degenerate zero-area ears
const EAR_EPSILON: f32 = 1e-7;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriangulationError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("no ear found with {remaining} vertices left; polygon is self-intersecting or degenerate")]
    NoEarFound { remaining: usize },
}

pub type Triangle = [Vec2; 3];

/// Signed area of a closed contour; positive when counter-clockwise
pub fn signed_area(contour: &[Vec2]) -> f32 {
    let n = contour.len();
    let mut twice_area = 0.0;
    let mut p = n.wrapping_sub(1);
    for q in 0..n {
        twice_area += contour[p].perp_dot(contour[q]);
        p = q;
    }
    twice_area * 0.5
}

/// Area of a triangle, always non-negative
pub fn triangle_area(triangle: &Triangle) -> f32 {
    let [a, b, c] = *triangle;
    ((b - a).perp_dot(c - a) * 0.5).abs()
}

/// Whether `p` lies inside or on the boundary of the counter-clockwise triangle `abc`
pub fn inside_triangle(a: Vec2, b: Vec2, c: Vec2, p: Vec2) -> bool {
    let ab = (b - a).perp_dot(p - a);
    let bc = (c - b).perp_dot(p - b);
    let ca = (a - c).perp_dot(p - c);
    ab >= 0.0 && bc >= 0.0 && ca >= 0.0
}

/// Triangulates a simple polygon given as an ordered contour of either winding.
///
/// Returns `n - 2` triangles, all counter-clockwise. Reversing the input order
/// produces the same triangles.
pub fn triangulate(contour: &[Vec2]) -> Result<Vec<Triangle>, TriangulationError> {
    let n = contour.len();
    if n < 3 {
        return Err(TriangulationError::TooFewVertices(n));
    }

    // Working index list, always counter-clockwise
    let mut indices: Vec<usize> = if signed_area(contour) > 0.0 {
        (0..n).collect()
    } else {
        (0..n).rev().collect()
    };

    let mut triangles = Vec::with_capacity(n - 2);
    let mut remaining = n;
    let mut budget = 2 * remaining;
    let mut v = remaining - 1;

    while remaining > 2 {
        if budget == 0 {
            return Err(TriangulationError::NoEarFound { remaining });
        }
        budget -= 1;

        let u = if v >= remaining { 0 } else { v };
        v = if u + 1 >= remaining { 0 } else { u + 1 };
        let w = if v + 1 >= remaining { 0 } else { v + 1 };

        if is_ear(contour, &indices, u, v, w) {
            triangles.push([
                contour[indices[u]],
                contour[indices[v]],
                contour[indices[w]],
            ]);
            indices.remove(v);
            remaining -= 1;
            budget = 2 * remaining;
        }
    }

    Ok(triangles)
}

fn is_ear(contour: &[Vec2], indices: &[usize], u: usize, v: usize, w: usize) -> bool {
    let a = contour[indices[u]];
    let b = contour[indices[v]];
    let c = contour[indices[w]];

    if (b - a).perp_dot(c - a) < EAR_EPSILON {
        return false;
    }

    indices
        .iter()
        .enumerate()
        .filter(|(slot, _)| *slot != u && *slot != v && *slot != w)
        .all(|(_, &index)| !inside_triangle(a, b, c, contour[index]))
}

/// Triangulates `contour`, offsets it by `origin` and appends three boundary
/// segments per triangle to `pool`.
///
/// On failure nothing is appended.
pub fn triangulate_into(
    contour: &[Vec2],
    origin: Vec2,
    pool: &mut Vec<Segment>,
) -> Result<SegmentRange, TriangulationError> {
    let triangles = triangulate(contour)?;
    let offset = pool.len() as u32;

    pool.reserve(triangles.len() * 3);
    for [a, b, c] in triangles {
        let (a, b, c) = (a + origin, b + origin, c + origin);
        pool.push(Segment::new(a, b));
        pool.push(Segment::new(b, c));
        pool.push(Segment::new(c, a));
    }

    Ok(SegmentRange {
        offset,
        count: pool.len() as u32 - offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn square() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ]
    }

    fn l_shape() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 2.0),
            Vec2::new(0.0, 2.0),
        ]
    }

    fn star() -> Vec<Vec2> {
        (0..10)
            .map(|i| {
                let angle = i as f32 * std::f32::consts::TAU / 10.0;
                let radius = if i % 2 == 0 { 2.0 } else { 0.8 };
                Vec2::from_angle(angle) * radius
            })
            .collect()
    }

    fn comb() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(5.0, 0.0),
            Vec2::new(5.0, 3.0),
            Vec2::new(4.0, 3.0),
            Vec2::new(4.0, 1.0),
            Vec2::new(3.0, 1.0),
            Vec2::new(3.0, 3.0),
            Vec2::new(2.0, 3.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 3.0),
            Vec2::new(0.0, 3.0),
        ]
    }

    #[test]
    fn test_signed_area_orientation() {
        let ccw = square();
        let cw: Vec<Vec2> = ccw.iter().rev().copied().collect();
        assert_eq!(signed_area(&ccw), 1.0);
        assert_eq!(signed_area(&cw), -1.0);
    }

    #[rstest]
    #[case::triangle(vec![Vec2::ZERO, Vec2::X, Vec2::Y])]
    #[case::square(square())]
    #[case::l_shape(l_shape())]
    #[case::star(star())]
    #[case::comb(comb())]
    fn test_triangle_count_and_area(#[case] contour: Vec<Vec2>) {
        let triangles = triangulate(&contour).unwrap();
        assert_eq!(triangles.len(), contour.len() - 2);

        let total: f32 = triangles.iter().map(triangle_area).sum();
        let expected = signed_area(&contour).abs();
        assert!(
            (total - expected).abs() <= expected * 1e-5,
            "triangle area {total} != polygon area {expected}"
        );
    }

    #[rstest]
    #[case::square(square())]
    #[case::l_shape(l_shape())]
    #[case::star(star())]
    #[case::comb(comb())]
    fn test_reversed_contour_gives_same_triangles(#[case] contour: Vec<Vec2>) {
        let reversed: Vec<Vec2> = contour.iter().rev().copied().collect();
        assert_eq!(triangulate(&contour).unwrap(), triangulate(&reversed).unwrap());
    }

    #[test]
    fn test_triangles_are_counter_clockwise() {
        let cw: Vec<Vec2> = l_shape().into_iter().rev().collect();
        for [a, b, c] in triangulate(&cw).unwrap() {
            assert!((b - a).perp_dot(c - a) > 0.0);
        }
    }

    #[test]
    fn test_too_few_vertices() {
        assert_eq!(
            triangulate(&[Vec2::ZERO, Vec2::X]),
            Err(TriangulationError::TooFewVertices(2))
        );
    }

    #[test]
    fn test_self_intersecting_polygon_fails() {
        // Bow tie: the two lobes cancel out
        let bow_tie = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(0.0, 2.0),
        ];
        assert!(matches!(
            triangulate(&bow_tie),
            Err(TriangulationError::NoEarFound { .. })
        ));
    }

    #[test]
    fn test_collinear_contour_fails() {
        let line = [Vec2::ZERO, Vec2::X, Vec2::new(2.0, 0.0)];
        assert!(triangulate(&line).is_err());
    }

    #[test]
    fn test_triangulate_into_appends_offset_segments() {
        let mut pool = vec![Segment::default(); 5];
        let origin = Vec2::new(10.0, -3.0);

        let range = triangulate_into(&square(), origin, &mut pool).unwrap();
        assert_eq!(range, SegmentRange { offset: 5, count: 6 });
        assert_eq!(pool.len(), 11);

        for segment in &pool[5..] {
            for p in [segment.a, segment.b] {
                let local = p - origin;
                assert!((0.0..=1.0).contains(&local.x) && (0.0..=1.0).contains(&local.y));
            }
        }
        // Each triangle is closed
        for tri in pool[5..].chunks(3) {
            assert_eq!(tri[0].b, tri[1].a);
            assert_eq!(tri[1].b, tri[2].a);
            assert_eq!(tri[2].b, tri[0].a);
        }
    }

    #[test]
    fn test_triangulate_into_failure_leaves_pool_untouched() {
        let mut pool = vec![Segment::default(); 2];
        assert!(triangulate_into(&[Vec2::ZERO], Vec2::ZERO, &mut pool).is_err());
        assert_eq!(pool.len(), 2);
    }
}
