//! Backend abstraction layer
//!
//! Provides the [`ComputeBackend`] trait and the types both the wgpu backend
//! and the CPU software backend share.

pub mod software;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;
