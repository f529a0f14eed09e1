//! CPU renditions of the lighting kernels

use super::SoftwareTexture;
use crate::backend::traits::BindGroupEntry;
use crate::pipeline::march::{self, LightSources, MarchOutcome, Occluders};
use crate::pipeline::shaders::{self, bindings};
use crate::pipeline::uniforms::*;
use crate::scene::*;
use bytemuck::Pod;
use std::collections::HashMap;

/// Kernel selected by a pipeline's entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kernel {
    Initialize,
    March,
    Finalize,
    PrepareMarch,
}

impl Kernel {
    pub fn from_entry_point(entry_point: &str) -> Option<Self> {
        match entry_point {
            shaders::INITIALIZE_ENTRY => Some(Kernel::Initialize),
            shaders::MARCH_ENTRY => Some(Kernel::March),
            shaders::FINALIZE_ENTRY => Some(Kernel::Finalize),
            shaders::PREPARE_MARCH_ENTRY => Some(Kernel::PrepareMarch),
            _ => None,
        }
    }

    pub fn run(self, ctx: &mut KernelContext) -> Result<(), String> {
        match self {
            Kernel::Initialize => run_initialize(ctx),
            Kernel::March => run_march(ctx),
            Kernel::Finalize => run_finalize(ctx),
            Kernel::PrepareMarch => run_prepare_march(ctx),
        }
    }
}

/// Resources visible to one dispatch
pub(crate) struct KernelContext<'a> {
    pub buffers: &'a mut HashMap<u64, Vec<u8>>,
    pub textures: &'a mut HashMap<u64, SoftwareTexture>,
    pub views: &'a HashMap<u64, u64>,
    pub entries: &'a [(u32, BindGroupEntry)],
    pub constants: &'a [(String, u32)],
    pub workgroup_size: [u32; 3],
    pub groups: [u32; 3],
}

impl KernelContext<'_> {
    fn buffer_id(&self, binding: u32) -> Result<u64, String> {
        self.entries
            .iter()
            .find_map(|(slot, entry)| match entry {
                BindGroupEntry::Buffer { buffer, .. } if *slot == binding => Some(buffer.0),
                _ => None,
            })
            .ok_or_else(|| format!("no buffer at binding {}", binding))
    }

    fn bytes(&self, binding: u32) -> Result<&[u8], String> {
        let id = self.buffer_id(binding)?;
        self.buffers
            .get(&id)
            .map(Vec::as_slice)
            .ok_or_else(|| format!("buffer {} at binding {} was destroyed", id, binding))
    }

    fn bytes_mut(&mut self, binding: u32) -> Result<&mut Vec<u8>, String> {
        let id = self.buffer_id(binding)?;
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| format!("buffer {} at binding {} was destroyed", id, binding))
    }

    fn read_struct<T: Pod>(&self, binding: u32) -> Result<T, String> {
        let bytes = self.bytes(binding)?;
        let size = std::mem::size_of::<T>();
        bytes
            .get(..size)
            .map(bytemuck::pod_read_unaligned)
            .ok_or_else(|| format!("binding {} is smaller than {} bytes", binding, size))
    }

    fn read_array<T: Pod>(&self, binding: u32) -> Result<Vec<T>, String> {
        Ok(read_records(self.bytes(binding)?))
    }

    fn texture_mut(&mut self, binding: u32) -> Result<&mut SoftwareTexture, String> {
        let view = self
            .entries
            .iter()
            .find_map(|(slot, entry)| match entry {
                BindGroupEntry::StorageTexture(view) if *slot == binding => Some(view.0),
                _ => None,
            })
            .ok_or_else(|| format!("no texture at binding {}", binding))?;
        let texture = self
            .views
            .get(&view)
            .ok_or_else(|| format!("texture view {} was destroyed", view))?;
        self.textures
            .get_mut(texture)
            .ok_or_else(|| format!("texture {} was destroyed", texture))
    }

    fn threads_x(&self) -> u64 {
        self.groups[0] as u64 * self.workgroup_size[0] as u64
    }

    fn constant(&self, name: &str) -> Result<u32, String> {
        self.constants
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| format!("constant {} is not declared", name))
    }
}

fn read_records<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Rays of a ray list up to its header total, clamped to its capacity
fn live_rays(list: &[u8]) -> Vec<Ray> {
    let header = RAY_LIST_HEADER_SIZE as usize;
    let total = list
        .get(..4)
        .map(bytemuck::pod_read_unaligned::<u32>)
        .unwrap_or(0) as usize;
    let rays = list.get(header..).unwrap_or(&[]);
    let mut live: Vec<Ray> = read_records(rays);
    live.truncate(total);
    live
}

/// Appends rays the way `push_ray` does: every attempt bumps the total,
/// rays past the capacity are dropped
fn append_rays(list: &mut [u8], rays: &[Ray]) {
    let header = RAY_LIST_HEADER_SIZE as usize;
    let stride = RAY_STRIDE as usize;
    let capacity = list.len().saturating_sub(header) / stride;
    let mut total = bytemuck::pod_read_unaligned::<u32>(&list[..4]);
    for ray in rays {
        let slot = total as usize;
        total += 1;
        if slot < capacity {
            let start = header + slot * stride;
            list[start..start + stride].copy_from_slice(bytemuck::bytes_of(ray));
        }
    }
    list[..4].copy_from_slice(&total.to_ne_bytes());
}

fn run_initialize(ctx: &mut KernelContext) -> Result<(), String> {
    let frame: FrameUniforms = ctx.read_struct(bindings::FRAME)?;
    let batch: BatchUniforms = ctx.read_struct(bindings::BATCH)?;
    let points: Vec<PointLightData> = ctx.read_array(bindings::POINT_LIGHTS)?;
    let spots: Vec<SpotLightData> = ctx.read_array(bindings::SPOT_LIGHTS)?;
    let polygons: Vec<PolygonLightData> = ctx.read_array(bindings::POLYGON_LIGHTS)?;
    let segments: Vec<crate::geometry::Segment> = ctx.read_array(bindings::LIGHT_SEGMENTS)?;

    let sources = LightSources {
        points: march::prefix(&points, frame.point_light_count),
        spots: march::prefix(&spots, frame.spot_light_count),
        polygons: march::prefix(&polygons, frame.polygon_light_count),
        segments: &segments,
    };

    let threads = ctx.threads_x().min(batch.pixels_per_batch as u64) as u32;
    let pixel_count = frame.pixel_count();
    let mut rays = Vec::new();
    for index in 0..threads {
        let pixel = batch.batch_offset + index;
        if pixel >= pixel_count {
            break;
        }
        let world = march::pixel_to_world(&frame, pixel);
        sources.emit_primary_rays(world, pixel, |ray| rays.push(ray));
    }

    append_rays(ctx.bytes_mut(bindings::RAYS_OUT)?, &rays);
    Ok(())
}

fn run_march(ctx: &mut KernelContext) -> Result<(), String> {
    if ctx.buffer_id(bindings::RAYS_IN)? == ctx.buffer_id(bindings::RAYS_OUT)? {
        return Err("ray list bound for both reading and writing".into());
    }

    let frame: FrameUniforms = ctx.read_struct(bindings::FRAME)?;
    let circles: Vec<CircleShapeData> = ctx.read_array(bindings::CIRCLES)?;
    let rects: Vec<RectShapeData> = ctx.read_array(bindings::RECTS)?;
    let polygons: Vec<PolygonShapeData> = ctx.read_array(bindings::POLYGON_SHAPES)?;
    let segments: Vec<crate::geometry::Segment> = ctx.read_array(bindings::SHAPE_SEGMENTS)?;
    let mut rays = live_rays(ctx.bytes(bindings::RAYS_IN)?);
    rays.truncate(ctx.threads_x() as usize);

    let occluders = Occluders {
        circles: march::prefix(&circles, frame.circle_count),
        rects: march::prefix(&rects, frame.rect_count),
        polygons: march::prefix(&polygons, frame.polygon_shape_count),
        segments: &segments,
    };

    let epsilon = frame.hit_epsilon();
    let mut arrived = Vec::new();
    let mut continued = Vec::new();
    for ray in &rays {
        match march::march_ray(ray, &occluders, frame.max_steps, frame.max_bounces, epsilon) {
            MarchOutcome::Arrived => arrived.push((ray.pixel, contribution_units(ray.color))),
            MarchOutcome::Continued(next) => continued.push(next),
            MarchOutcome::Occluded | MarchOutcome::Exhausted => {}
        }
    }

    let accumulation = ctx.bytes_mut(bindings::ACCUMULATION)?;
    for (pixel, units) in arrived {
        for (channel, add) in units.into_iter().enumerate() {
            let start = (pixel as usize * 3 + channel) * 4;
            let Some(word) = accumulation.get_mut(start..start + 4) else {
                continue;
            };
            let sum = bytemuck::pod_read_unaligned::<u32>(word).wrapping_add(add);
            word.copy_from_slice(&sum.to_ne_bytes());
        }
    }

    append_rays(ctx.bytes_mut(bindings::RAYS_OUT)?, &continued);
    Ok(())
}

fn run_finalize(ctx: &mut KernelContext) -> Result<(), String> {
    let frame: FrameUniforms = ctx.read_struct(bindings::FRAME)?;
    let cells: Vec<AccumulationCell> = ctx.read_array(bindings::ACCUMULATION)?;
    let columns = (ctx.groups[0] * ctx.workgroup_size[0]).min(frame.width);
    let rows = (ctx.groups[1] * ctx.workgroup_size[1]).min(frame.height);

    let texture = ctx.texture_mut(bindings::LIGHT_MAP)?;
    for y in 0..rows.min(texture.height) {
        for x in 0..columns.min(texture.width) {
            let Some(cell) = cells.get((y * frame.width + x) as usize) else {
                continue;
            };
            let color = cell.to_color().min(glam::Vec3::ONE);
            let texel = (y * texture.width + x) as usize * 4;
            texture.texels[texel..texel + 4].copy_from_slice(&[
                super::unorm8(color.x),
                super::unorm8(color.y),
                super::unorm8(color.z),
                255,
            ]);
        }
    }
    Ok(())
}

fn run_prepare_march(ctx: &mut KernelContext) -> Result<(), String> {
    let group_size = ctx.constant("GROUP_SIZE")?.max(1);
    let live = live_rays(ctx.bytes(bindings::PREPARE_RAYS)?).len() as u32;
    let args = [live.div_ceil(group_size), 1, 1];

    let target = ctx.bytes_mut(bindings::PREPARE_DISPATCH_ARGS)?;
    target
        .get_mut(..12)
        .ok_or("dispatch argument buffer is smaller than 12 bytes")?
        .copy_from_slice(bytemuck::cast_slice(&args));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    fn ray(pixel: u32) -> Ray {
        Ray {
            origin: Vec2::splat(pixel as f32),
            color: Vec3::ONE,
            pixel,
            ..Default::default()
        }
    }

    #[test]
    fn test_append_counts_overflow() {
        let mut list = vec![0u8; (RAY_LIST_HEADER_SIZE + 2 * RAY_STRIDE) as usize];
        append_rays(&mut list, &[ray(1), ray(2), ray(3)]);

        let total: u32 = bytemuck::pod_read_unaligned(&list[..4]);
        assert_eq!(total, 3);
        let live = live_rays(&list);
        assert_eq!(live.len(), 2);
        assert_eq!(live[1].pixel, 2);
    }

    #[test]
    fn test_append_continues_after_existing() {
        let mut list = vec![0u8; (RAY_LIST_HEADER_SIZE + 4 * RAY_STRIDE) as usize];
        append_rays(&mut list, &[ray(1)]);
        append_rays(&mut list, &[ray(7)]);
        let pixels: Vec<u32> = live_rays(&list).iter().map(|r| r.pixel).collect();
        assert_eq!(pixels, vec![1, 7]);
    }
}
