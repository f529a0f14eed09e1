//! CPU backend executing the lighting kernels in software.
//!
//! Buffers and textures live in host memory and every command runs as soon
//! as it is recorded, so results are deterministic and need no GPU. A log of
//! recorded commands is kept for inspection.

mod kernels;

use crate::backend::traits::*;
use crate::backend::types::*;
use kernels::{Kernel, KernelContext};
use std::collections::HashMap;

/// A command as the software backend saw it
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame,
    EndFrame,
    ClearBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
    ClearTexture(TextureViewHandle),
    BeginComputePass { label: Option<String> },
    EndComputePass,
    Dispatch {
        entry_point: String,
        groups: [u32; 3],
        indirect: bool,
        /// Buffers bound at dispatch time, by binding
        buffers: Vec<(u32, BufferHandle)>,
    },
}

pub(crate) struct SoftwareTexture {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<u8>,
}

pub(crate) struct SoftwarePipeline {
    pub entry_point: String,
    pub kernel: Kernel,
    pub workgroup_size: [u32; 3],
    pub constants: Vec<(String, u32)>,
}

/// Software compute backend
pub struct SoftwareBackend {
    limits: DeviceLimits,
    memory_budget: Option<u64>,
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, SoftwareTexture>,
    views: HashMap<u64, u64>,
    layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    pipelines: HashMap<u64, SoftwarePipeline>,

    frame_open: bool,
    in_compute_pass: bool,
    current_pipeline: Option<ComputePipelineHandle>,
    current_bind_group: Option<BindGroupHandle>,

    commands: Vec<RecordedCommand>,
    errors: Vec<String>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits {
            max_storage_buffer_binding_size: 1 << 30,
            max_storage_buffers_per_shader_stage: 16,
            max_compute_workgroups_per_dimension: 65535,
            max_compute_invocations_per_workgroup: 1024,
        })
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            memory_budget: None,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            frame_open: false,
            in_compute_pass: false,
            current_pipeline: None,
            current_bind_group: None,
            commands: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Commands recorded since creation or the last `clear_commands`
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Usage errors seen while recording, in order
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Current contents of a buffer
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    /// Caps the total bytes of live buffers; allocations past it fail
    pub fn set_memory_budget(&mut self, budget: Option<u64>) {
        self.memory_budget = budget;
    }

    /// Total bytes held by live buffers
    pub fn buffer_bytes(&self) -> u64 {
        self.buffers.values().map(|bytes| bytes.len() as u64).sum()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn live_layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len() + self.views.len()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn error(&mut self, message: String) {
        log::error!("SoftwareBackend: {}", message);
        self.errors.push(message);
    }

    fn require_transfer_context(&mut self, command: &str) -> bool {
        if self.in_compute_pass {
            self.error(format!("{} recorded inside a compute pass", command));
            return false;
        }
        true
    }

    fn run_dispatch(&mut self, groups: [u32; 3], indirect: bool) {
        if !self.in_compute_pass {
            self.error("dispatch outside a compute pass".into());
            return;
        }
        let (Some(pipeline), Some(group)) = (self.current_pipeline, self.current_bind_group) else {
            self.error("dispatch without a pipeline and bind group".into());
            return;
        };
        let Some(entries) = self.bind_groups.get(&group.0).cloned() else {
            self.error(format!("dispatch with unknown bind group {}", group.0));
            return;
        };
        let Some((entry_point, kernel, workgroup_size, constants)) =
            self.pipelines.get(&pipeline.0).map(|p| {
                (p.entry_point.clone(), p.kernel, p.workgroup_size, p.constants.clone())
            })
        else {
            self.error(format!("dispatch with unknown pipeline {}", pipeline.0));
            return;
        };

        let buffers = entries
            .iter()
            .filter_map(|(binding, entry)| match entry {
                BindGroupEntry::Buffer { buffer, .. } => Some((*binding, *buffer)),
                BindGroupEntry::StorageTexture(_) => None,
            })
            .collect();
        self.commands.push(RecordedCommand::Dispatch {
            entry_point,
            groups,
            indirect,
            buffers,
        });
        log::trace!("SoftwareBackend: {:?} over {:?} groups", kernel, groups);

        let mut context = KernelContext {
            buffers: &mut self.buffers,
            textures: &mut self.textures,
            views: &self.views,
            entries: &entries,
            constants: &constants,
            workgroup_size,
            groups,
        };
        if let Err(err) = kernel.run(&mut context) {
            self.error(format!("{:?} kernel failed: {}", kernel, err));
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl ComputeBackend for SoftwareBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        if let Some(budget) = self.memory_budget {
            let used = self.buffer_bytes();
            if used + desc.size > budget {
                return Err(BackendError::BufferCreationFailed(format!(
                    "{:?}: out of memory ({} of {} bytes in use, {} requested)",
                    desc.label, used, budget, desc.size
                )));
            }
        }
        let id = self.next_id();
        log::trace!(
            "SoftwareBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        self.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(bytes) = self.buffers.get_mut(&buffer.0) else {
            self.error(format!("write to unknown buffer {}", buffer.0));
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            let len = bytes.len();
            self.error(format!("write of {}..{} past buffer end {}", start, end, len));
            return;
        }
        bytes[start..end].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: zero-sized texture",
                desc.label
            )));
        }
        let id = self.next_id();
        let bytes = desc.width as usize * desc.height as usize * 4;
        self.textures.insert(
            id,
            SoftwareTexture {
                width: desc.width,
                height: desc.height,
                texels: vec![0; bytes],
            },
        );
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            });
        }
        let id = self.next_id();
        self.views.insert(id, texture.0);
        Ok(TextureViewHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.next_id();
        self.layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let Some(layout_entries) = self.layouts.get(&layout.0) else {
            return Err(BackendError::InvalidHandle {
                kind: "bind group layout",
                id: layout.0,
            });
        };
        if layout_entries.len() != entries.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "bind group has {} entries, layout expects {}",
                entries.len(),
                layout_entries.len()
            )));
        }
        for (_, entry) in entries {
            match entry {
                BindGroupEntry::Buffer { buffer, .. } if !self.buffers.contains_key(&buffer.0) => {
                    return Err(BackendError::InvalidHandle {
                        kind: "buffer",
                        id: buffer.0,
                    });
                }
                BindGroupEntry::StorageTexture(view) if !self.views.contains_key(&view.0) => {
                    return Err(BackendError::InvalidHandle {
                        kind: "texture view",
                        id: view.0,
                    });
                }
                _ => {}
            }
        }
        let id = self.next_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let kernel = Kernel::from_entry_point(&desc.entry_point).ok_or_else(|| {
            BackendError::PipelineCreationFailed(format!(
                "no software kernel for entry point '{}'",
                desc.entry_point
            ))
        })?;
        let id = self.next_id();
        self.pipelines.insert(
            id,
            SoftwarePipeline {
                entry_point: desc.entry_point.clone(),
                kernel,
                workgroup_size: desc.workgroup_size,
                constants: desc.constants.clone(),
            },
        );
        Ok(ComputePipelineHandle(id))
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        if self.frame_open {
            return Err(BackendError::InitializationFailed(
                "begin_frame called twice".into(),
            ));
        }
        self.frame_open = true;
        self.commands.push(RecordedCommand::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.in_compute_pass {
            self.error("end_frame inside a compute pass".into());
            self.in_compute_pass = false;
        }
        self.frame_open = false;
        self.commands.push(RecordedCommand::EndFrame);
        Ok(())
    }

    fn clear_buffer(&mut self, buffer: BufferHandle, offset: u64, size: Option<u64>) {
        if !self.require_transfer_context("clear_buffer") {
            return;
        }
        let Some(bytes) = self.buffers.get_mut(&buffer.0) else {
            self.error(format!("clear of unknown buffer {}", buffer.0));
            return;
        };
        let start = (offset as usize).min(bytes.len());
        let end = size.map_or(bytes.len(), |size| (start + size as usize).min(bytes.len()));
        bytes[start..end].fill(0);
        self.commands.push(RecordedCommand::ClearBuffer {
            buffer,
            offset,
            size,
        });
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        if !self.require_transfer_context("copy_buffer_to_buffer") {
            return;
        }
        let source = self
            .buffers
            .get(&src.0)
            .and_then(|bytes| bytes.get(src_offset as usize..(src_offset + size) as usize))
            .map(<[u8]>::to_vec);
        let Some(source) = source else {
            self.error(format!("copy from buffer {} out of range", src.0));
            return;
        };
        let Some(target) = self
            .buffers
            .get_mut(&dst.0)
            .and_then(|bytes| bytes.get_mut(dst_offset as usize..(dst_offset + size) as usize))
        else {
            self.error(format!("copy into buffer {} out of range", dst.0));
            return;
        };
        target.copy_from_slice(&source);
        self.commands.push(RecordedCommand::CopyBuffer { src, dst, size });
    }

    fn clear_texture(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        if !self.require_transfer_context("clear_texture") {
            return;
        }
        let texture = self
            .views
            .get(&view.0)
            .and_then(|texture| self.textures.get_mut(texture));
        let Some(texture) = texture else {
            self.error(format!("clear of unknown texture view {}", view.0));
            return;
        };
        let texel = color.map(unorm8);
        for chunk in texture.texels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&texel);
        }
        self.commands.push(RecordedCommand::ClearTexture(view));
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        if !self.frame_open {
            self.error("compute pass outside a frame".into());
        }
        self.in_compute_pass = true;
        self.current_pipeline = None;
        self.current_bind_group = None;
        self.commands.push(RecordedCommand::BeginComputePass {
            label: label.map(str::to_string),
        });
    }

    fn end_compute_pass(&mut self) {
        self.in_compute_pass = false;
        self.commands.push(RecordedCommand::EndComputePass);
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.current_pipeline = Some(pipeline);
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if index != 0 {
            self.error(format!("bind group index {} is not supported", index));
            return;
        }
        self.current_bind_group = Some(bind_group);
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.run_dispatch([x, y, z], false);
    }

    fn dispatch_compute_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        let args = self
            .buffers
            .get(&buffer.0)
            .and_then(|bytes| bytes.get(offset as usize..offset as usize + 12))
            .map(|bytes| bytemuck::pod_read_unaligned::<[u32; 3]>(bytes));
        match args {
            Some(groups) => self.run_dispatch(groups, true),
            None => self.error(format!("indirect arguments out of range in buffer {}", buffer.0)),
        }
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.buffers
            .get(&buffer.0)
            .cloned()
            .ok_or(BackendError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        self.textures
            .get(&texture.0)
            .map(|texture| texture.texels.clone())
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.layouts.remove(&layout.0);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if self.current_pipeline == Some(pipeline) {
            self.current_pipeline = None;
        }
        self.pipelines.remove(&pipeline.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(backend: &mut SoftwareBackend, size: u64) -> BufferHandle {
        backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size,
                usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            })
            .unwrap()
    }

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let mut backend = SoftwareBackend::new();
        let result = backend.create_buffer(&BufferDescriptor {
            label: Some("empty".into()),
            size: 0,
            usage: BufferUsage::STORAGE,
        });
        assert!(matches!(result, Err(BackendError::BufferCreationFailed(_))));
    }

    #[test]
    fn test_clear_and_copy() {
        let mut backend = SoftwareBackend::new();
        let a = buffer(&mut backend, 8);
        let b = buffer(&mut backend, 8);
        backend.write_buffer(a, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        backend.copy_buffer_to_buffer(a, 4, b, 0, 4);
        backend.clear_buffer(a, 2, Some(4));

        assert_eq!(backend.buffer_data(a).unwrap(), &[1, 2, 0, 0, 0, 0, 7, 8]);
        assert_eq!(backend.buffer_data(b).unwrap(), &[5, 6, 7, 8, 0, 0, 0, 0]);
        assert!(backend.errors().is_empty());
    }

    #[test]
    fn test_transfer_inside_pass_is_an_error() {
        let mut backend = SoftwareBackend::new();
        let a = buffer(&mut backend, 4);
        backend.write_buffer(a, 0, &[9; 4]);
        backend.begin_frame().unwrap();
        backend.begin_compute_pass(None);
        backend.clear_buffer(a, 0, None);
        backend.end_compute_pass();
        backend.end_frame().unwrap();

        assert_eq!(backend.buffer_data(a).unwrap(), &[9; 4]);
        assert_eq!(backend.errors().len(), 1);
    }

    #[test]
    fn test_memory_budget_rejects_allocations() {
        let mut backend = SoftwareBackend::new();
        let kept = buffer(&mut backend, 16);
        backend.set_memory_budget(Some(24));

        let result = backend.create_buffer(&BufferDescriptor {
            label: Some("large".into()),
            size: 16,
            usage: BufferUsage::STORAGE,
        });
        assert!(matches!(result, Err(BackendError::BufferCreationFailed(_))));
        assert_eq!(backend.live_buffer_count(), 1);

        buffer(&mut backend, 8);
        backend.destroy_buffer(kept);
        buffer(&mut backend, 16);
        assert_eq!(backend.buffer_bytes(), 24);

        backend.set_memory_budget(None);
        buffer(&mut backend, 1024);
    }

    #[test]
    fn test_unknown_entry_point_rejected() {
        let mut backend = SoftwareBackend::new();
        let result = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: None,
            shader: String::new(),
            entry_point: "main".into(),
            workgroup_size: [1, 1, 1],
            bind_group_layouts: vec![],
            constants: vec![],
        });
        assert!(result.is_err());
    }
}
