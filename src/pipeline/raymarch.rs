//! Per-frame ray-march orchestration
//!
//! A frame runs Idle -> CameraSetup -> BatchLoop -> Finalize -> Idle. Each
//! batch runs Initialize once and then March once per bounce, alternating the
//! two ray lists so no dispatch reads the list it writes.

use super::batch::*;
use super::buffers::*;
use super::shaders::{self, bindings};
use super::uniforms::*;
use crate::backend::*;
use crate::error::LightingResult;
use crate::scene::CameraTransforms;
use crate::LightingConfig;

/// One of the two ray lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaySlot {
    A,
    B,
}

impl RaySlot {
    pub fn other(self) -> Self {
        match self {
            RaySlot::A => RaySlot::B,
            RaySlot::B => RaySlot::A,
        }
    }

    fn index(self) -> usize {
        match self {
            RaySlot::A => 0,
            RaySlot::B => 1,
        }
    }
}

/// (read, write) lists of March iteration `bounce`. Initialize writes B.
pub fn bounce_slots(bounce: u32) -> (RaySlot, RaySlot) {
    if bounce % 2 == 0 {
        (RaySlot::B, RaySlot::A)
    } else {
        (RaySlot::A, RaySlot::B)
    }
}

/// List written last after `max_bounces` March iterations
pub fn final_slot(max_bounces: u32) -> RaySlot {
    if max_bounces % 2 == 0 {
        RaySlot::B
    } else {
        RaySlot::A
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    Initialize,
    March { bounce: u32 },
}

/// Where the pipeline is within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    CameraSetup,
    BatchLoop { batch: u32, stage: BatchStage },
    Finalize,
}

impl PipelineState {
    /// Whether `next` directly follows this state
    pub fn can_advance_to(&self, next: &PipelineState) -> bool {
        use BatchStage::*;
        use PipelineState::*;

        match (*self, *next) {
            (Idle, CameraSetup) => true,
            (CameraSetup, BatchLoop { batch: 0, stage: Initialize }) => true,
            (
                BatchLoop { batch, stage: Initialize },
                BatchLoop { batch: next_batch, stage: March { bounce: 0 } },
            ) => batch == next_batch,
            (
                BatchLoop { batch, stage: March { bounce } },
                BatchLoop { batch: next_batch, stage: March { bounce: next_bounce } },
            ) => batch == next_batch && next_bounce == bounce + 1,
            (BatchLoop { batch, stage: March { .. } }, BatchLoop { batch: next_batch, stage: Initialize }) => {
                next_batch == batch + 1
            }
            (BatchLoop { stage: March { .. }, .. }, Finalize) => true,
            (Finalize, Idle) => true,
            _ => false,
        }
    }
}

/// What `render` did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No enabled lights; nothing was recorded
    Skipped,
    Rendered { batches: u32, dispatches: u32 },
}

const RAY_USAGE: BufferUsage = BufferUsage::STORAGE
    .union(BufferUsage::COPY_DST)
    .union(BufferUsage::COPY_SRC);

/// Owns the kernels and every per-frame GPU resource of the lighting pass
pub struct RayMarchPipeline {
    config: LightingConfig,
    width: u32,
    height: u32,
    limits: DispatchLimits,
    light_count: u32,
    plan: Result<BatchPlan, ScheduleError>,
    state: PipelineState,
    frame_index: u64,

    lighting_layout: BindGroupLayoutHandle,
    prepare_layout: BindGroupLayoutHandle,
    initialize: ComputePipelineHandle,
    march: ComputePipelineHandle,
    finalize: ComputePipelineHandle,
    prepare: ComputePipelineHandle,

    frame_uniforms: BufferHandle,
    batch_uniforms: BufferHandle,
    batch_table: Option<GpuList<BatchUniforms>>,
    rays: [BufferHandle; 2],
    ray_capacity: u64,
    accumulation: BufferHandle,
    dispatch_args: BufferHandle,
    light_map: TextureHandle,
    light_map_view: TextureViewHandle,
}

impl RayMarchPipeline {
    pub fn new(backend: &mut dyn ComputeBackend, config: &LightingConfig) -> LightingResult<Self> {
        config.validate()?;

        let device = backend.limits();
        if device.max_storage_buffers_per_shader_stage < shaders::STORAGE_BUFFERS_PER_STAGE {
            return Err(BackendError::InitializationFailed(format!(
                "device allows {} storage buffers per stage, lighting needs {}",
                device.max_storage_buffers_per_shader_stage,
                shaders::STORAGE_BUFFERS_PER_STAGE
            ))
            .into());
        }

        let limits = config.dispatch_limits.fitted(&device);
        let (width, height) = config.render_size();

        let lighting_layout = backend.create_bind_group_layout(&shaders::lighting_layout_entries())?;
        let prepare_layout = backend.create_bind_group_layout(&shaders::prepare_layout_entries())?;

        let lighting_source = shaders::lighting_shader(limits.group_size);
        let prepare_source = shaders::prepare_shader();
        let group = [limits.group_size, 1, 1];
        let tile = [shaders::FINALIZE_TILE, shaders::FINALIZE_TILE, 1];

        let initialize = create_kernel(
            backend,
            &lighting_source,
            shaders::INITIALIZE_ENTRY,
            group,
            lighting_layout,
            limits.group_size,
        )?;
        let march = create_kernel(
            backend,
            &lighting_source,
            shaders::MARCH_ENTRY,
            group,
            lighting_layout,
            limits.group_size,
        )?;
        let finalize = create_kernel(
            backend,
            &lighting_source,
            shaders::FINALIZE_ENTRY,
            tile,
            lighting_layout,
            limits.group_size,
        )?;
        let prepare = create_kernel(
            backend,
            &prepare_source,
            shaders::PREPARE_MARCH_ENTRY,
            [1, 1, 1],
            prepare_layout,
            limits.group_size,
        )?;

        let frame_uniforms = backend.create_buffer(&BufferDescriptor {
            label: Some("Frame Uniforms".into()),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let batch_uniforms = backend.create_buffer(&BufferDescriptor {
            label: Some("Batch Uniforms".into()),
            size: std::mem::size_of::<BatchUniforms>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let dispatch_args = backend.create_buffer(&BufferDescriptor {
            label: Some("March Dispatch Args".into()),
            size: 12,
            usage: BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_SRC,
        })?;
        let rays = [
            create_ray_list(backend, RaySlot::A, 1)?,
            create_ray_list(backend, RaySlot::B, 1)?,
        ];
        let accumulation = create_accumulation(backend, width, height)?;
        let (light_map, light_map_view) = create_light_map(backend, width, height)?;

        log::info!(
            "Ray-march pipeline created: {}x{} render target, {}x{} dispatch limits",
            width,
            height,
            limits.group_size,
            limits.max_groups
        );

        Ok(Self {
            config: config.clone(),
            width,
            height,
            limits,
            light_count: 0,
            plan: BatchPlan::compute(width, height, 0, limits),
            state: PipelineState::Idle,
            frame_index: 0,
            lighting_layout,
            prepare_layout,
            initialize,
            march,
            finalize,
            prepare,
            frame_uniforms,
            batch_uniforms,
            batch_table: None,
            rays,
            ray_capacity: 1,
            accumulation,
            dispatch_args,
            light_map,
            light_map_view,
        })
    }

    /// Recomputes the batch plan for `light_count` enabled lights.
    ///
    /// A rejected plan is kept and returned by every `render` until a later
    /// call succeeds.
    pub fn schedule(&mut self, light_count: u32) -> Result<&BatchPlan, ScheduleError> {
        self.light_count = light_count;
        self.plan = BatchPlan::compute(self.width, self.height, light_count, self.limits);
        if let Err(err) = &self.plan {
            log::error!("Cannot schedule ray batches: {}", err);
        }
        self.plan.as_ref().map_err(Clone::clone)
    }

    /// Records and submits one frame
    pub fn render(
        &mut self,
        backend: &mut dyn ComputeBackend,
        scene: &SceneBuffers,
        camera: &CameraTransforms,
    ) -> LightingResult<FrameOutcome> {
        let plan = self.plan.clone()?;
        if plan.is_empty() {
            log::trace!("Frame {} skipped: no enabled lights", self.frame_index);
            self.frame_index += 1;
            return Ok(FrameOutcome::Skipped);
        }

        let mut frame_groups = Vec::with_capacity(4);
        let result = self.record_frame(backend, scene, camera, &plan, &mut frame_groups);

        for group in frame_groups {
            backend.destroy_bind_group(group);
        }
        self.state = PipelineState::Idle;
        self.frame_index += 1;

        let dispatches = result?;
        Ok(FrameOutcome::Rendered {
            batches: plan.batch_count,
            dispatches,
        })
    }

    fn record_frame(
        &mut self,
        backend: &mut dyn ComputeBackend,
        scene: &SceneBuffers,
        camera: &CameraTransforms,
        plan: &BatchPlan,
        frame_groups: &mut Vec<BindGroupHandle>,
    ) -> LightingResult<u32> {
        self.advance(PipelineState::CameraSetup);

        self.ensure_ray_capacity(backend, plan.ray_capacity())?;

        // Queue writes land before any command runs, so per-batch values are
        // copied from a table in command order.
        let table: Vec<BatchUniforms> = plan.batches().collect();
        let batch_table = write_buffer_data(
            backend,
            &table,
            &mut self.batch_table,
            "Batch Table",
            BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
        )?;

        let settings = FrameSettings {
            width: self.width,
            height: self.height,
            max_steps: self.config.max_steps,
            max_bounces: self.config.max_bounces,
            jitter: self.jitter(),
        };
        let uniforms = FrameUniforms::new(camera, settings, scene.counts());
        backend.write_buffer(self.frame_uniforms, 0, bytemuck::bytes_of(&uniforms));

        let scene_entries = scene.bind_group_entries()?;
        let read_a = self.create_lighting_group(backend, &scene_entries, RaySlot::A)?;
        frame_groups.push(read_a);
        let read_b = self.create_lighting_group(backend, &scene_entries, RaySlot::B)?;
        frame_groups.push(read_b);
        let prepare_a = self.create_prepare_group(backend, RaySlot::A)?;
        frame_groups.push(prepare_a);
        let prepare_b = self.create_prepare_group(backend, RaySlot::B)?;
        frame_groups.push(prepare_b);

        let lighting_group = |slot: RaySlot| match slot {
            RaySlot::A => read_a,
            RaySlot::B => read_b,
        };
        let prepare_group = |slot: RaySlot| match slot {
            RaySlot::A => prepare_a,
            RaySlot::B => prepare_b,
        };

        backend.begin_frame()?;
        backend.clear_texture(self.light_map_view, [0.0; 4]);
        backend.clear_buffer(self.accumulation, 0, None);

        let batch_size = std::mem::size_of::<BatchUniforms>() as u64;
        let mut dispatches = 0;

        for batch in 0..plan.batch_count {
            self.advance(PipelineState::BatchLoop {
                batch,
                stage: BatchStage::Initialize,
            });

            backend.copy_buffer_to_buffer(
                batch_table,
                batch as u64 * batch_size,
                self.batch_uniforms,
                0,
                batch_size,
            );
            backend.clear_buffer(self.ray_buffer(RaySlot::B), 0, Some(RAY_LIST_HEADER_SIZE));

            backend.begin_compute_pass(Some("Initialize"));
            backend.set_compute_pipeline(self.initialize);
            // Reading A keeps B as the write target
            backend.set_bind_group(0, lighting_group(RaySlot::A));
            backend.dispatch_compute(plan.initialize_groups(), 1, 1);
            backend.end_compute_pass();
            dispatches += 1;

            for bounce in 0..self.config.max_bounces {
                self.advance(PipelineState::BatchLoop {
                    batch,
                    stage: BatchStage::March { bounce },
                });
                let (read, write) = bounce_slots(bounce);
                backend.clear_buffer(self.ray_buffer(write), 0, Some(RAY_LIST_HEADER_SIZE));

                backend.begin_compute_pass(Some("Prepare March"));
                backend.set_compute_pipeline(self.prepare);
                backend.set_bind_group(0, prepare_group(read));
                backend.dispatch_compute(1, 1, 1);
                backend.end_compute_pass();

                backend.begin_compute_pass(Some("March"));
                backend.set_compute_pipeline(self.march);
                backend.set_bind_group(0, lighting_group(read));
                backend.dispatch_compute_indirect(self.dispatch_args, 0);
                backend.end_compute_pass();
                dispatches += 2;
            }
        }

        self.advance(PipelineState::Finalize);
        backend.begin_compute_pass(Some("Finalize"));
        backend.set_compute_pipeline(self.finalize);
        backend.set_bind_group(0, lighting_group(RaySlot::A));
        backend.dispatch_compute(
            self.width.div_ceil(shaders::FINALIZE_TILE),
            self.height.div_ceil(shaders::FINALIZE_TILE),
            1,
        );
        backend.end_compute_pass();
        dispatches += 1;

        backend.end_frame()?;
        self.advance(PipelineState::Idle);

        log::trace!(
            "Frame {}: {} batches, {} dispatches",
            self.frame_index,
            plan.batch_count,
            dispatches
        );
        Ok(dispatches)
    }

    /// Lighting bind group reading `read` and writing the other list
    fn create_lighting_group(
        &self,
        backend: &mut dyn ComputeBackend,
        scene_entries: &[(u32, BindGroupEntry)],
        read: RaySlot,
    ) -> BackendResult<BindGroupHandle> {
        let mut entries = vec![
            (bindings::FRAME, BindGroupEntry::buffer(self.frame_uniforms)),
            (bindings::BATCH, BindGroupEntry::buffer(self.batch_uniforms)),
        ];
        entries.extend(scene_entries.iter().cloned());
        entries.push((bindings::RAYS_IN, BindGroupEntry::buffer(self.ray_buffer(read))));
        entries.push((
            bindings::RAYS_OUT,
            BindGroupEntry::buffer(self.ray_buffer(read.other())),
        ));
        entries.push((bindings::ACCUMULATION, BindGroupEntry::buffer(self.accumulation)));
        entries.push((
            bindings::LIGHT_MAP,
            BindGroupEntry::StorageTexture(self.light_map_view),
        ));
        backend.create_bind_group(self.lighting_layout, &entries)
    }

    fn create_prepare_group(
        &self,
        backend: &mut dyn ComputeBackend,
        read: RaySlot,
    ) -> BackendResult<BindGroupHandle> {
        backend.create_bind_group(
            self.prepare_layout,
            &[
                (bindings::PREPARE_RAYS, BindGroupEntry::buffer(self.ray_buffer(read))),
                (
                    bindings::PREPARE_DISPATCH_ARGS,
                    BindGroupEntry::buffer(self.dispatch_args),
                ),
            ],
        )
    }

    fn ensure_ray_capacity(
        &mut self,
        backend: &mut dyn ComputeBackend,
        capacity: u64,
    ) -> BackendResult<()> {
        let capacity = capacity.max(1);
        if capacity == self.ray_capacity {
            return Ok(());
        }
        let list_a = create_ray_list(backend, RaySlot::A, capacity)?;
        let list_b = match create_ray_list(backend, RaySlot::B, capacity) {
            Ok(buffer) => buffer,
            Err(error) => {
                backend.destroy_buffer(list_a);
                return Err(error);
            }
        };
        for buffer in std::mem::replace(&mut self.rays, [list_a, list_b]) {
            backend.destroy_buffer(buffer);
        }
        self.ray_capacity = capacity;
        Ok(())
    }

    fn jitter(&self) -> f32 {
        if !self.config.temporal_dither {
            return 0.0;
        }
        if self.frame_index % 2 == 0 {
            0.25
        } else {
            -0.25
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(&next),
            "invalid pipeline transition {:?} -> {:?}",
            self.state,
            next
        );
        log::trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Resizes the output; the render scale is applied on top
    pub fn resize(
        &mut self,
        backend: &mut dyn ComputeBackend,
        width: u32,
        height: u32,
    ) -> LightingResult<()> {
        let config = LightingConfig {
            width,
            height,
            ..self.config.clone()
        };
        config.validate()?;
        let (render_width, render_height) = config.render_size();
        self.config = config;
        if (render_width, render_height) == (self.width, self.height) {
            return Ok(());
        }

        backend.destroy_buffer(self.accumulation);
        backend.destroy_texture_view(self.light_map_view);
        backend.destroy_texture(self.light_map);

        self.width = render_width;
        self.height = render_height;
        self.accumulation = create_accumulation(backend, render_width, render_height)?;
        let (light_map, light_map_view) = create_light_map(backend, render_width, render_height)?;
        self.light_map = light_map;
        self.light_map_view = light_map_view;

        log::info!("Light map resized to {}x{}", render_width, render_height);
        // A rejected plan stays rejected until the light count changes
        let _ = self.schedule(self.light_count);
        Ok(())
    }

    /// Per-pixel sums of the last rendered frame
    pub fn read_accumulation(
        &self,
        backend: &mut dyn ComputeBackend,
    ) -> BackendResult<Vec<AccumulationCell>> {
        let bytes = backend.read_buffer(self.accumulation)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// RGBA8 texels of the light map, row-major
    pub fn read_light_map(&self, backend: &mut dyn ComputeBackend) -> BackendResult<Vec<u8>> {
        backend.read_texture(self.light_map)
    }

    /// The finalized image, for a downstream shading stage to bind
    pub fn light_map(&self) -> TextureHandle {
        self.light_map
    }

    pub fn light_map_view(&self) -> TextureViewHandle {
        self.light_map_view
    }

    pub fn ray_buffer(&self, slot: RaySlot) -> BufferHandle {
        self.rays[slot.index()]
    }

    pub fn ray_capacity(&self) -> u64 {
        self.ray_capacity
    }

    pub fn plan(&self) -> Result<&BatchPlan, &ScheduleError> {
        self.plan.as_ref()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn limits(&self) -> DispatchLimits {
        self.limits
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Size of the light map after the render scale
    pub fn render_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Releases every GPU resource the pipeline owns
    pub fn destroy(mut self, backend: &mut dyn ComputeBackend) {
        for kernel in [self.initialize, self.march, self.finalize, self.prepare] {
            backend.destroy_compute_pipeline(kernel);
        }
        backend.destroy_bind_group_layout(self.lighting_layout);
        backend.destroy_bind_group_layout(self.prepare_layout);
        release(backend, &mut self.batch_table);
        for buffer in self.rays {
            backend.destroy_buffer(buffer);
        }
        backend.destroy_buffer(self.frame_uniforms);
        backend.destroy_buffer(self.batch_uniforms);
        backend.destroy_buffer(self.accumulation);
        backend.destroy_buffer(self.dispatch_args);
        backend.destroy_texture_view(self.light_map_view);
        backend.destroy_texture(self.light_map);
        log::info!("Ray-march pipeline destroyed");
    }
}

fn create_kernel(
    backend: &mut dyn ComputeBackend,
    source: &str,
    entry_point: &str,
    workgroup_size: [u32; 3],
    layout: BindGroupLayoutHandle,
    group_size: u32,
) -> BackendResult<ComputePipelineHandle> {
    backend.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some(format!("Lighting {}", entry_point)),
        shader: source.to_string(),
        entry_point: entry_point.to_string(),
        workgroup_size,
        bind_group_layouts: vec![layout],
        constants: vec![("GROUP_SIZE".to_string(), group_size)],
    })
}

fn create_ray_list(
    backend: &mut dyn ComputeBackend,
    slot: RaySlot,
    capacity: u64,
) -> BackendResult<BufferHandle> {
    let size = RAY_LIST_HEADER_SIZE + capacity * RAY_STRIDE;
    let buffer = backend.create_buffer(&BufferDescriptor {
        label: Some(format!("Rays {:?}", slot)),
        size,
        usage: RAY_USAGE,
    })?;
    log::debug!("Ray list {:?}: {} rays, {} bytes", slot, capacity, size);
    Ok(buffer)
}

fn create_accumulation(
    backend: &mut dyn ComputeBackend,
    width: u32,
    height: u32,
) -> BackendResult<BufferHandle> {
    let cells = (width as u64 * height as u64).max(1);
    backend.create_buffer(&BufferDescriptor {
        label: Some("Accumulation".into()),
        size: cells * std::mem::size_of::<AccumulationCell>() as u64,
        usage: BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
    })
}

fn create_light_map(
    backend: &mut dyn ComputeBackend,
    width: u32,
    height: u32,
) -> BackendResult<(TextureHandle, TextureViewHandle)> {
    let texture = backend.create_texture(&TextureDescriptor {
        label: Some("Light Map".into()),
        width,
        height,
        format: TextureFormat::Rgba8Unorm,
        usage: TextureUsage::STORAGE_BINDING
            | TextureUsage::TEXTURE_BINDING
            | TextureUsage::RENDER_ATTACHMENT
            | TextureUsage::COPY_SRC,
    })?;
    let view = backend.create_texture_view(texture)?;
    Ok((texture, view))
}
