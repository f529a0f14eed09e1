//! Polygon geometry
//!
//! Ear-clipping triangulation and the boundary segment records that polygon
//! lights and polygon occluders are flattened into.

pub mod triangulate;

pub use triangulate::*;

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// A boundary segment in world space, as stored in a segment pool
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Segment {
    pub a: Vec2,
    pub b: Vec2,
}

impl Segment {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self { a, b }
    }
}

/// Contiguous sub-range of a segment pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRange {
    pub offset: u32,
    pub count: u32,
}

impl SegmentRange {
    /// Empty range anchored at the current end of `pool`
    pub fn empty_at(pool: &[Segment]) -> Self {
        Self {
            offset: pool.len() as u32,
            count: 0,
        }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
