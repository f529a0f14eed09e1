//! Per-frame orchestration: rebuild, upload, schedule, render

use crate::backend::*;
use crate::error::LightingResult;
use crate::pipeline::{FrameOutcome, RayMarchPipeline, SceneBuffers};
use crate::scene::{CameraTransforms, RebuildDiagnostic, SceneRegistry};
use crate::LightingConfig;

/// What the last `render_frame` did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDiagnostics {
    /// `None` until a frame has been rendered
    pub outcome: Option<FrameOutcome>,
    pub lights_rebuilt: bool,
    pub shapes_rebuilt: bool,
    /// Entities skipped or left without segments by the rebuilds
    pub rebuild: Vec<RebuildDiagnostic>,
}

/// Owns the scene registry, its GPU lists and the ray-march pipeline
pub struct LightingSystem {
    registry: SceneRegistry,
    buffers: SceneBuffers,
    pipeline: RayMarchPipeline,
    config: LightingConfig,
    diagnostics: FrameDiagnostics,
}

impl LightingSystem {
    pub fn new(backend: &mut dyn ComputeBackend, config: LightingConfig) -> LightingResult<Self> {
        let pipeline = RayMarchPipeline::new(backend, &config)?;
        let buffers = SceneBuffers::new(backend)?;
        let (width, height) = pipeline.render_size();
        log::info!(
            "Lighting system ready: {}x{} output, {}x{} light map",
            config.width,
            config.height,
            width,
            height
        );

        Ok(Self {
            registry: SceneRegistry::new(),
            buffers,
            pipeline,
            config,
            diagnostics: FrameDiagnostics::default(),
        })
    }

    pub fn registry(&self) -> &SceneRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SceneRegistry {
        &mut self.registry
    }

    pub fn pipeline(&self) -> &RayMarchPipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }

    /// Rebuilds dirty scene lists, uploads them, reschedules when the light
    /// set changed, then renders one frame.
    pub fn render_frame(
        &mut self,
        backend: &mut dyn ComputeBackend,
        camera: &CameraTransforms,
    ) -> LightingResult<FrameOutcome> {
        let mut diagnostics = FrameDiagnostics::default();

        if let Some(report) = self.registry.rebuild_lights() {
            let lights = self.registry.light_lists();
            if let Err(err) = self.buffers.upload_lights(backend, lights) {
                // Not on the device yet, retry next frame
                self.registry.mark_lights_dirty();
                return Err(err.into());
            }
            diagnostics.lights_rebuilt = true;
            diagnostics.rebuild.extend(report.diagnostics);
            // A rejected plan is kept by the pipeline and surfaces from render
            let _ = self.pipeline.schedule(lights.enabled_count());
        }

        if let Some(report) = self.registry.rebuild_shapes() {
            if let Err(err) = self
                .buffers
                .upload_shapes(backend, self.registry.shape_lists())
            {
                self.registry.mark_shapes_dirty();
                return Err(err.into());
            }
            diagnostics.shapes_rebuilt = true;
            diagnostics.rebuild.extend(report.diagnostics);
        }

        let result = self.pipeline.render(backend, &self.buffers, camera);
        diagnostics.outcome = result.as_ref().ok().copied();
        self.diagnostics = diagnostics;
        result
    }

    /// Resizes the output; the light map follows the render scale
    pub fn resize(
        &mut self,
        backend: &mut dyn ComputeBackend,
        width: u32,
        height: u32,
    ) -> LightingResult<()> {
        self.pipeline.resize(backend, width, height)?;
        self.config.width = width;
        self.config.height = height;
        Ok(())
    }

    /// Texture holding the last frame's light
    pub fn light_map(&self) -> TextureHandle {
        self.pipeline.light_map()
    }

    pub fn light_map_view(&self) -> TextureViewHandle {
        self.pipeline.light_map_view()
    }

    pub fn read_light_map(&self, backend: &mut dyn ComputeBackend) -> BackendResult<Vec<u8>> {
        self.pipeline.read_light_map(backend)
    }

    /// Releases every GPU resource
    pub fn destroy(mut self, backend: &mut dyn ComputeBackend) {
        self.buffers.destroy(backend);
        self.pipeline.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::error::LightingError;
    use crate::pipeline::DispatchLimits;
    use crate::scene::{Camera2d, Light, LightId, Shape, ShapeId};
    use glam::{Vec2, Vec3};

    fn system(backend: &mut SoftwareBackend) -> LightingSystem {
        let config = LightingConfig {
            max_steps: 32,
            dispatch_limits: DispatchLimits {
                group_size: 8,
                max_groups: 16,
            },
            ..LightingConfig::new(16, 16)
        };
        LightingSystem::new(backend, config).unwrap()
    }

    #[test]
    fn test_empty_scene_skips() {
        let mut backend = SoftwareBackend::new();
        let mut system = system(&mut backend);
        let camera = Camera2d::default().transforms(16, 16);

        backend.clear_commands();
        let outcome = system.render_frame(&mut backend, &camera).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(backend.commands().is_empty());
        assert!(system.diagnostics().lights_rebuilt);
        assert!(system.diagnostics().shapes_rebuilt);
    }

    #[test]
    fn test_rebuild_only_when_dirty() {
        let mut backend = SoftwareBackend::new();
        let mut system = system(&mut backend);
        let camera = Camera2d::default().transforms(16, 16);
        system
            .registry_mut()
            .add_light(LightId(1), Light::point(Vec2::ZERO, Vec3::ONE, 1.0, 8.0))
            .unwrap();

        let first = system.render_frame(&mut backend, &camera).unwrap();
        assert!(matches!(first, FrameOutcome::Rendered { .. }));
        assert!(system.diagnostics().lights_rebuilt);

        system.render_frame(&mut backend, &camera).unwrap();
        assert!(!system.diagnostics().lights_rebuilt);
        assert!(!system.diagnostics().shapes_rebuilt);

        system
            .registry_mut()
            .add_shape(ShapeId(1), Shape::circle(Vec2::new(3.0, 0.0), 1.0))
            .unwrap();
        system.render_frame(&mut backend, &camera).unwrap();
        assert!(!system.diagnostics().lights_rebuilt);
        assert!(system.diagnostics().shapes_rebuilt);
        assert!(backend.errors().is_empty());
    }

    #[test]
    fn test_directional_light_reported() {
        let mut backend = SoftwareBackend::new();
        let mut system = system(&mut backend);
        let camera = Camera2d::default().transforms(16, 16);
        system
            .registry_mut()
            .add_light(LightId(7), Light::directional(Vec2::X, Vec3::ONE, 1.0))
            .unwrap();

        let outcome = system.render_frame(&mut backend, &camera).unwrap();

        // The only light is unsupported, so nothing is marched
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(matches!(
            system.diagnostics().rebuild.as_slice(),
            [RebuildDiagnostic::UnsupportedLight { id: LightId(7), .. }]
        ));
    }

    #[test]
    fn test_failed_upload_is_retried() {
        let mut backend = SoftwareBackend::new();
        let mut system = system(&mut backend);
        let camera = Camera2d::default().transforms(16, 16);
        for id in 0..2 {
            system
                .registry_mut()
                .add_light(LightId(id), Light::point(Vec2::ZERO, Vec3::ONE, 1.0, 8.0))
                .unwrap();
        }

        backend.set_memory_budget(Some(backend.buffer_bytes()));
        let failed = system.render_frame(&mut backend, &camera);
        assert!(matches!(
            failed,
            Err(LightingError::Backend(BackendError::BufferCreationFailed(_)))
        ));
        assert!(system.registry().lights_dirty());

        backend.set_memory_budget(None);
        let outcome = system.render_frame(&mut backend, &camera).unwrap();
        assert!(matches!(outcome, FrameOutcome::Rendered { .. }));
        assert!(system.diagnostics().lights_rebuilt);
        assert!(!system.registry().lights_dirty());
        assert_eq!(system.pipeline().plan().unwrap().light_count, 2);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut backend = SoftwareBackend::new();
        let system = system(&mut backend);
        system.destroy(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_pipeline_count(), 0);
        assert_eq!(backend.live_layout_count(), 0);
        assert_eq!(backend.live_texture_count(), 0);
    }
}
