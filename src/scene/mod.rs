//! Scene description: lights, occluders and the registry that flattens them
//! into per-variant GPU records.

mod camera;
mod light;
mod registry;
mod shape;

pub use camera::*;
pub use light::*;
pub use registry::*;
pub use shape::*;

pub use crate::geometry::{Segment, SegmentRange};
