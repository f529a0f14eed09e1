//! GPU buffer management for flat CPU-side lists
//!
//! Every list maps onto a buffer of `max(len, 1)` elements. A buffer is only
//! reallocated when that element count changes, so its handle can change
//! between frames and consumers must re-read it each frame.

use super::shaders::bindings;
use super::uniforms::SceneCounts;
use crate::backend::*;
use crate::scene::*;
use bytemuck::Pod;
use std::marker::PhantomData;

/// A device buffer holding `capacity` elements of `T`
#[derive(Debug)]
pub struct GpuList<T> {
    buffer: BufferHandle,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> GpuList<T> {
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Allocated element count, never zero
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn byte_size(&self) -> u64 {
        (self.capacity * std::mem::size_of::<T>()) as u64
    }

    pub fn binding(&self) -> BindGroupEntry {
        BindGroupEntry::buffer(self.buffer)
    }
}

/// Uploads `source` into `target`, (re)allocating it first when absent or
/// sized for a different element count.
///
/// An empty source still gets a one-element buffer holding a zeroed element.
pub fn write_buffer_data<T: Pod>(
    backend: &mut dyn ComputeBackend,
    source: &[T],
    target: &mut Option<GpuList<T>>,
    label: &str,
    usage: BufferUsage,
) -> BackendResult<BufferHandle> {
    let capacity = source.len().max(1);

    let current = target
        .as_ref()
        .filter(|list| list.capacity == capacity)
        .map(|list| list.buffer);

    let buffer = match current {
        Some(buffer) => buffer,
        None => {
            let size = (capacity * std::mem::size_of::<T>()) as u64;
            // The old buffer stays valid if the allocation fails
            let buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(label.to_string()),
                size,
                usage,
            })?;
            log::debug!("Allocated '{}': {} elements, {} bytes", label, capacity, size);
            release(backend, target);
            *target = Some(GpuList {
                buffer,
                capacity,
                _marker: PhantomData,
            });
            buffer
        }
    };

    if source.is_empty() {
        backend.write_buffer(buffer, 0, bytemuck::bytes_of(&T::zeroed()));
    } else {
        backend.write_buffer(buffer, 0, bytemuck::cast_slice(source));
    }

    Ok(buffer)
}

/// Destroys the buffer behind `target`, if any
pub fn release<T>(backend: &mut dyn ComputeBackend, target: &mut Option<GpuList<T>>) {
    if let Some(list) = target.take() {
        backend.destroy_buffer(list.buffer);
    }
}

const SCENE_USAGE: BufferUsage = BufferUsage::STORAGE.union(BufferUsage::COPY_DST);

/// Device copies of the flattened scene lists
#[derive(Debug, Default)]
pub struct SceneBuffers {
    point_lights: Option<GpuList<PointLightData>>,
    spot_lights: Option<GpuList<SpotLightData>>,
    polygon_lights: Option<GpuList<PolygonLightData>>,
    light_segments: Option<GpuList<Segment>>,
    circles: Option<GpuList<CircleShapeData>>,
    rects: Option<GpuList<RectShapeData>>,
    polygon_shapes: Option<GpuList<PolygonShapeData>>,
    shape_segments: Option<GpuList<Segment>>,
    counts: SceneCounts,
}

impl SceneBuffers {
    /// Creates every buffer up front from empty lists
    pub fn new(backend: &mut dyn ComputeBackend) -> BackendResult<Self> {
        let mut buffers = Self::default();
        buffers.upload_lights(backend, &LightLists::default())?;
        buffers.upload_shapes(backend, &ShapeLists::default())?;
        Ok(buffers)
    }

    pub fn upload_lights(
        &mut self,
        backend: &mut dyn ComputeBackend,
        lights: &LightLists,
    ) -> BackendResult<()> {
        write_buffer_data(backend, &lights.points, &mut self.point_lights, "Point Lights", SCENE_USAGE)?;
        write_buffer_data(backend, &lights.spots, &mut self.spot_lights, "Spot Lights", SCENE_USAGE)?;
        write_buffer_data(
            backend,
            &lights.polygons,
            &mut self.polygon_lights,
            "Polygon Lights",
            SCENE_USAGE,
        )?;
        write_buffer_data(
            backend,
            &lights.segments,
            &mut self.light_segments,
            "Light Segments",
            SCENE_USAGE,
        )?;
        self.counts.set_lights(lights);
        Ok(())
    }

    pub fn upload_shapes(
        &mut self,
        backend: &mut dyn ComputeBackend,
        shapes: &ShapeLists,
    ) -> BackendResult<()> {
        write_buffer_data(backend, &shapes.circles, &mut self.circles, "Circle Shapes", SCENE_USAGE)?;
        write_buffer_data(backend, &shapes.rects, &mut self.rects, "Rect Shapes", SCENE_USAGE)?;
        write_buffer_data(
            backend,
            &shapes.polygons,
            &mut self.polygon_shapes,
            "Polygon Shapes",
            SCENE_USAGE,
        )?;
        write_buffer_data(
            backend,
            &shapes.segments,
            &mut self.shape_segments,
            "Shape Segments",
            SCENE_USAGE,
        )?;
        self.counts.set_shapes(shapes);
        Ok(())
    }

    pub fn counts(&self) -> SceneCounts {
        self.counts
    }

    /// Bind group entries for the scene bindings, re-read every frame
    pub fn bind_group_entries(&self) -> BackendResult<Vec<(u32, BindGroupEntry)>> {
        let entries = [
            (bindings::POINT_LIGHTS, self.point_lights.as_ref().map(GpuList::binding)),
            (bindings::SPOT_LIGHTS, self.spot_lights.as_ref().map(GpuList::binding)),
            (bindings::POLYGON_LIGHTS, self.polygon_lights.as_ref().map(GpuList::binding)),
            (bindings::LIGHT_SEGMENTS, self.light_segments.as_ref().map(GpuList::binding)),
            (bindings::CIRCLES, self.circles.as_ref().map(GpuList::binding)),
            (bindings::RECTS, self.rects.as_ref().map(GpuList::binding)),
            (bindings::POLYGON_SHAPES, self.polygon_shapes.as_ref().map(GpuList::binding)),
            (bindings::SHAPE_SEGMENTS, self.shape_segments.as_ref().map(GpuList::binding)),
        ];

        entries
            .into_iter()
            .map(|(binding, entry)| {
                entry.map(|entry| (binding, entry)).ok_or(BackendError::InvalidHandle {
                    kind: "scene buffer binding",
                    id: binding as u64,
                })
            })
            .collect()
    }

    /// Releases every scene buffer
    pub fn destroy(&mut self, backend: &mut dyn ComputeBackend) {
        release(backend, &mut self.point_lights);
        release(backend, &mut self.spot_lights);
        release(backend, &mut self.polygon_lights);
        release(backend, &mut self.light_segments);
        release(backend, &mut self.circles);
        release(backend, &mut self.rects);
        release(backend, &mut self.polygon_shapes);
        release(backend, &mut self.shape_segments);
        log::debug!("Scene buffers destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use glam::Vec2;

    fn usage() -> BufferUsage {
        BufferUsage::STORAGE | BufferUsage::COPY_DST
    }

    #[test]
    fn test_empty_list_gets_one_zeroed_element() {
        let mut backend = SoftwareBackend::new();
        let mut target: Option<GpuList<CircleShapeData>> = None;

        let buffer = write_buffer_data(&mut backend, &[], &mut target, "empty", usage()).unwrap();

        assert_eq!(target.as_ref().map(GpuList::capacity), Some(1));
        let bytes = backend.buffer_data(buffer).unwrap();
        assert_eq!(bytes.len(), std::mem::size_of::<CircleShapeData>());
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_after_data_clears_stale_contents() {
        let mut backend = SoftwareBackend::new();
        let mut target = None;
        let circle = CircleShapeData {
            position: Vec2::ONE,
            radius: 3.0,
            enabled: 1,
        };

        write_buffer_data(&mut backend, &[circle], &mut target, "circles", usage()).unwrap();
        let buffer = write_buffer_data(&mut backend, &[], &mut target, "circles", usage()).unwrap();

        let bytes = backend.buffer_data(buffer).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reallocates_only_on_count_change() {
        let mut backend = SoftwareBackend::new();
        let mut target = None;
        let a = [Segment::new(Vec2::ZERO, Vec2::X); 3];
        let b = [Segment::new(Vec2::Y, Vec2::ONE); 3];

        let first = write_buffer_data(&mut backend, &a, &mut target, "segments", usage()).unwrap();
        let second = write_buffer_data(&mut backend, &b, &mut target, "segments", usage()).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.buffer_data(second).unwrap(), bytemuck::cast_slice::<_, u8>(&b));

        let third = write_buffer_data(&mut backend, &a[..2], &mut target, "segments", usage()).unwrap();
        assert_ne!(second, third);
        assert!(backend.buffer_data(second).is_none(), "old buffer released");
        assert_eq!(target.as_ref().map(GpuList::capacity), Some(2));
    }

    #[test]
    fn test_empty_lists_do_not_churn() {
        let mut backend = SoftwareBackend::new();
        let mut target: Option<GpuList<Segment>> = None;
        let first = write_buffer_data(&mut backend, &[], &mut target, "segments", usage()).unwrap();
        let second = write_buffer_data(&mut backend, &[], &mut target, "segments", usage()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scene_buffers_bind_every_list() {
        let mut backend = SoftwareBackend::new();
        let mut buffers = SceneBuffers::new(&mut backend).unwrap();
        let entries = buffers.bind_group_entries().unwrap();
        assert_eq!(entries.len(), 8);
        assert_eq!(backend.live_buffer_count(), 8);

        buffers.destroy(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
        assert!(buffers.bind_group_entries().is_err());
    }
}
