//! Ray-march lighting pipeline
//!
//! Scene lists are uploaded through [`buffers`], split into batches by
//! [`batch`] and marched by [`raymarch::RayMarchPipeline`] using the kernels
//! in [`shaders`].

pub mod batch;
pub mod buffers;
pub mod march;
pub mod raymarch;
pub mod shaders;
pub mod uniforms;

pub use batch::{BatchPlan, DispatchLimits, ScheduleError, GROUP_SIZE, MAX_GROUPS};
pub use buffers::{write_buffer_data, GpuList, SceneBuffers};
pub use raymarch::{
    bounce_slots, final_slot, BatchStage, FrameOutcome, PipelineState, RayMarchPipeline, RaySlot,
};
pub use uniforms::{AccumulationCell, BatchUniforms, FrameUniforms, Ray};
