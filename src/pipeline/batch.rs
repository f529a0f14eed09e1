//! Ray batch scheduling against fixed per-dispatch limits

use super::uniforms::{BatchUniforms, RAY_LIST_HEADER_SIZE, RAY_STRIDE};
use crate::backend::DeviceLimits;
use thiserror::Error;

/// Threads per dispatch group
pub const GROUP_SIZE: u32 = 64;
/// Groups per single dispatch call
pub const MAX_GROUPS: u32 = 65535;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("{lights} enabled lights exceed the {rays_per_dispatch} rays a single dispatch can carry")]
    LightCountExceedsDispatch { lights: u32, rays_per_dispatch: u64 },
    #[error("{width}x{height} pixels cannot be indexed with u32")]
    TooManyPixels { width: u32, height: u32 },
}

/// Hardware dispatch limits; their product bounds the rays one dispatch covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub group_size: u32,
    pub max_groups: u32,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl DispatchLimits {
    pub const DEFAULT: Self = Self {
        group_size: GROUP_SIZE,
        max_groups: MAX_GROUPS,
    };

    pub fn rays_per_dispatch(&self) -> u64 {
        self.group_size as u64 * self.max_groups as u64
    }

    /// Groups needed to cover `items` threads
    pub fn groups_for(&self, items: u64) -> u32 {
        items.div_ceil(self.group_size.max(1) as u64) as u32
    }

    /// Shrinks the limits so a full ray list fits one storage binding and the
    /// group counts stay within what the device accepts.
    pub fn fitted(self, device: &DeviceLimits) -> Self {
        let group_size = self
            .group_size
            .min(device.max_compute_invocations_per_workgroup)
            .max(1);
        let binding_rays =
            device.max_storage_buffer_binding_size.saturating_sub(RAY_LIST_HEADER_SIZE) / RAY_STRIDE;
        let max_groups = (self.max_groups as u64)
            .min(device.max_compute_workgroups_per_dimension as u64)
            .min(binding_rays / group_size as u64)
            .max(1) as u32;

        let fitted = Self {
            group_size,
            max_groups,
        };
        if fitted != self {
            log::info!(
                "Dispatch limits reduced to fit device: {}x{} -> {}x{}",
                self.group_size,
                self.max_groups,
                fitted.group_size,
                fitted.max_groups
            );
        }
        fitted
    }
}

/// How one frame's ray work is split into batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub width: u32,
    pub height: u32,
    pub light_count: u32,
    /// One candidate ray per pixel per light
    pub ray_count_max: u64,
    pub pixels_per_batch: u32,
    pub batch_count: u32,
    pub limits: DispatchLimits,
}

impl BatchPlan {
    /// Plan for a frame of `width` x `height` pixels lit by `light_count`
    /// enabled lights.
    ///
    /// No lights yields an empty plan. More lights than one dispatch has rays
    /// for is rejected, since no batch size can work.
    pub fn compute(
        width: u32,
        height: u32,
        light_count: u32,
        limits: DispatchLimits,
    ) -> Result<Self, ScheduleError> {
        let pixel_count = width as u64 * height as u64;
        if pixel_count > u32::MAX as u64 {
            return Err(ScheduleError::TooManyPixels { width, height });
        }
        let ray_count_max = pixel_count * light_count as u64;

        if ray_count_max == 0 {
            return Ok(Self {
                width,
                height,
                light_count,
                ray_count_max,
                pixels_per_batch: 0,
                batch_count: 0,
                limits,
            });
        }

        let rays_per_dispatch = limits.rays_per_dispatch();
        let pixels_per_batch = rays_per_dispatch / light_count as u64;
        if pixels_per_batch == 0 {
            return Err(ScheduleError::LightCountExceedsDispatch {
                lights: light_count,
                rays_per_dispatch,
            });
        }

        let batch_count = pixel_count.div_ceil(pixels_per_batch);
        log::debug!(
            "Batch plan: {}x{} px, {} lights, {} px/batch, {} batches",
            width,
            height,
            light_count,
            pixels_per_batch,
            batch_count
        );

        Ok(Self {
            width,
            height,
            light_count,
            ray_count_max,
            // A batch wider than u32 still covers every pixel
            pixels_per_batch: u32::try_from(pixels_per_batch).unwrap_or(u32::MAX),
            batch_count: batch_count as u32,
            limits,
        })
    }

    /// True when the frame has nothing to march
    pub fn is_empty(&self) -> bool {
        self.ray_count_max == 0
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// First pixel of batch `batch`, for `batch < batch_count`
    pub fn batch_offset(&self, batch: u32) -> u32 {
        batch * self.pixels_per_batch
    }

    /// Groups the Initialize kernel is dispatched over, per batch
    pub fn initialize_groups(&self) -> u32 {
        self.limits.groups_for(self.pixels_per_batch as u64)
    }

    /// Rays one ray list must hold: every pixel of the largest batch times
    /// every light.
    pub fn ray_capacity(&self) -> u64 {
        (self.pixels_per_batch as u64).min(self.pixel_count()) * self.light_count as u64
    }

    /// Uniforms for every batch, in dispatch order
    pub fn batches(&self) -> impl Iterator<Item = BatchUniforms> + '_ {
        (0..self.batch_count).map(|batch| BatchUniforms {
            batch_offset: self.batch_offset(batch),
            pixels_per_batch: self.pixels_per_batch,
            batch_index: batch,
            _padding: 0,
        })
    }
}
