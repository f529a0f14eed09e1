//! WGSL kernels and their bind group layouts

use crate::backend::*;

pub const INITIALIZE_ENTRY: &str = "initialize";
pub const MARCH_ENTRY: &str = "march";
pub const FINALIZE_ENTRY: &str = "finalize";
pub const PREPARE_MARCH_ENTRY: &str = "prepare_march";

/// Workgroup edge of the Finalize kernel
pub const FINALIZE_TILE: u32 = 8;

/// Storage buffers the lighting layout binds in one stage
pub const STORAGE_BUFFERS_PER_STAGE: u32 = 11;

const WORKGROUP_SIZE_PLACEHOLDER: &str = "__WORKGROUP_SIZE__";

/// Binding slots of the lighting layout
pub mod bindings {
    pub const FRAME: u32 = 0;
    pub const BATCH: u32 = 1;
    pub const POINT_LIGHTS: u32 = 2;
    pub const SPOT_LIGHTS: u32 = 3;
    pub const POLYGON_LIGHTS: u32 = 4;
    pub const LIGHT_SEGMENTS: u32 = 5;
    pub const CIRCLES: u32 = 6;
    pub const RECTS: u32 = 7;
    pub const POLYGON_SHAPES: u32 = 8;
    pub const SHAPE_SEGMENTS: u32 = 9;
    pub const RAYS_IN: u32 = 10;
    pub const RAYS_OUT: u32 = 11;
    pub const ACCUMULATION: u32 = 12;
    pub const LIGHT_MAP: u32 = 13;

    /// Binding slots of the prepare layout
    pub const PREPARE_RAYS: u32 = 0;
    pub const PREPARE_DISPATCH_ARGS: u32 = 1;
}

fn compute_entry(binding: u32, ty: BindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::COMPUTE,
        ty,
    }
}

pub fn lighting_layout_entries() -> Vec<BindGroupLayoutEntry> {
    use bindings::*;

    let mut entries = vec![
        compute_entry(FRAME, BindingType::UniformBuffer),
        compute_entry(BATCH, BindingType::UniformBuffer),
    ];
    for binding in POINT_LIGHTS..=RAYS_IN {
        entries.push(compute_entry(binding, BindingType::StorageBuffer { read_only: true }));
    }
    entries.push(compute_entry(RAYS_OUT, BindingType::StorageBuffer { read_only: false }));
    entries.push(compute_entry(ACCUMULATION, BindingType::StorageBuffer { read_only: false }));
    entries.push(compute_entry(
        LIGHT_MAP,
        BindingType::StorageTexture {
            format: TextureFormat::Rgba8Unorm,
        },
    ));
    entries
}

pub fn prepare_layout_entries() -> Vec<BindGroupLayoutEntry> {
    vec![
        compute_entry(bindings::PREPARE_RAYS, BindingType::StorageBuffer { read_only: true }),
        compute_entry(
            bindings::PREPARE_DISPATCH_ARGS,
            BindingType::StorageBuffer { read_only: false },
        ),
    ]
}

/// Lighting module with its 1D kernels sized to `group_size` threads
pub fn lighting_shader(group_size: u32) -> String {
    LIGHTING_SHADER.replace(WORKGROUP_SIZE_PLACEHOLDER, &group_size.to_string())
}

/// Module writing the March kernel's indirect dispatch arguments.
/// Expects a `GROUP_SIZE` constant declared ahead of it.
pub fn prepare_shader() -> String {
    PREPARE_SHADER.to_string()
}

const LIGHTING_SHADER: &str = r#"
const ACCUMULATION_SCALE: f32 = 65536.0;
const MAX_CONTRIBUTION: f32 = 256.0;
const HIT_EPSILON_SCALE: f32 = 0.01;
const FAR: f32 = 3.0e38;

const LIGHT_KIND_POINT: u32 = 0u;
const LIGHT_KIND_SPOT: u32 = 1u;
const LIGHT_KIND_POLYGON: u32 = 2u;

struct FrameParams {
    inverse_projection: mat4x4<f32>,
    inverse_view: mat4x4<f32>,
    width: u32,
    height: u32,
    max_steps: u32,
    max_bounces: u32,
    pixel_size: f32,
    jitter: f32,
    point_light_count: u32,
    spot_light_count: u32,
    polygon_light_count: u32,
    circle_count: u32,
    rect_count: u32,
    polygon_shape_count: u32,
}

struct BatchParams {
    batch_offset: u32,
    pixels_per_batch: u32,
    batch_index: u32,
    _padding: u32,
}

struct PointLight {
    position: vec2<f32>,
    range: f32,
    enabled: u32,
    color: vec3<f32>,
    _padding: f32,
}

struct SpotLight {
    position: vec2<f32>,
    range: f32,
    enabled: u32,
    color: vec3<f32>,
    _padding: f32,
    cone_min: vec2<f32>,
    cone_max: vec2<f32>,
}

struct PolygonLight {
    color: vec3<f32>,
    range: f32,
    segment_offset: u32,
    segment_count: u32,
    enabled: u32,
    _padding: u32,
}

struct Segment {
    a: vec2<f32>,
    b: vec2<f32>,
}

struct Circle {
    position: vec2<f32>,
    radius: f32,
    enabled: u32,
}

struct Rect {
    position: vec2<f32>,
    extents: vec2<f32>,
    enabled: u32,
    _padding: u32,
}

struct PolygonShape {
    segment_offset: u32,
    segment_count: u32,
    enabled: u32,
}

struct Ray {
    origin: vec2<f32>,
    direction: vec2<f32>,
    color: vec3<f32>,
    remaining: f32,
    pixel: u32,
    light: u32,
    bounce: u32,
    _padding: u32,
}

struct RayInput {
    total: u32,
    rays: array<Ray>,
}

struct RayList {
    total: atomic<u32>,
    rays: array<Ray>,
}

@group(0) @binding(0) var<uniform> frame_params: FrameParams;
@group(0) @binding(1) var<uniform> batch_params: BatchParams;
@group(0) @binding(2) var<storage, read> point_lights: array<PointLight>;
@group(0) @binding(3) var<storage, read> spot_lights: array<SpotLight>;
@group(0) @binding(4) var<storage, read> polygon_lights: array<PolygonLight>;
@group(0) @binding(5) var<storage, read> light_segments: array<Segment>;
@group(0) @binding(6) var<storage, read> circles: array<Circle>;
@group(0) @binding(7) var<storage, read> rects: array<Rect>;
@group(0) @binding(8) var<storage, read> polygon_shapes: array<PolygonShape>;
@group(0) @binding(9) var<storage, read> shape_segments: array<Segment>;
@group(0) @binding(10) var<storage, read> rays_in: RayInput;
@group(0) @binding(11) var<storage, read_write> rays_out: RayList;
@group(0) @binding(12) var<storage, read_write> accumulation: array<atomic<u32>>;
@group(0) @binding(13) var light_map: texture_storage_2d<rgba8unorm, write>;

fn encode_light(kind: u32, index: u32) -> u32 {
    return (kind << 30u) | (index & 0x3fffffffu);
}

fn pixel_to_world(pixel: u32) -> vec2<f32> {
    let width = max(frame_params.width, 1u);
    let height = max(frame_params.height, 1u);
    let sx = f32(pixel % width) + 0.5 + frame_params.jitter;
    let sy = f32(pixel / width) + 0.5 + frame_params.jitter;
    let ndc = vec4<f32>(sx / f32(width) * 2.0 - 1.0, 1.0 - sy / f32(height) * 2.0, 0.0, 1.0);
    let world = frame_params.inverse_view * frame_params.inverse_projection * ndc;
    return world.xy / world.w;
}

fn cross2(a: vec2<f32>, b: vec2<f32>) -> f32 {
    return a.x * b.y - a.y * b.x;
}

fn closest_on_segment(p: vec2<f32>, seg: Segment) -> vec2<f32> {
    let edge = seg.b - seg.a;
    let ee = dot(edge, edge);
    if ee <= 0.0 {
        return seg.a;
    }
    let h = clamp(dot(p - seg.a, edge) / ee, 0.0, 1.0);
    return seg.a + edge * h;
}

fn crosses(p: vec2<f32>, seg: Segment) -> bool {
    let a = seg.a;
    let b = seg.b;
    return (a.y > p.y) != (b.y > p.y) && p.x < a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
}

fn polygon_shape_distance(p: vec2<f32>, shape: PolygonShape) -> f32 {
    let end = min(shape.segment_offset + shape.segment_count, arrayLength(&shape_segments));
    var best = FAR;
    var inside = false;
    for (var i = shape.segment_offset; i < end; i = i + 1u) {
        let seg = shape_segments[i];
        best = min(best, length(p - closest_on_segment(p, seg)));
        if crosses(p, seg) {
            inside = !inside;
        }
    }
    if inside {
        return -best;
    }
    return best;
}

fn polygon_light_goal(p: vec2<f32>, light: PolygonLight) -> vec2<f32> {
    let end = min(light.segment_offset + light.segment_count, arrayLength(&light_segments));
    var nearest = p;
    var best = FAR;
    var inside = false;
    for (var i = light.segment_offset; i < end; i = i + 1u) {
        let seg = light_segments[i];
        let candidate = closest_on_segment(p, seg);
        let dist = length(p - candidate);
        if dist < best {
            best = dist;
            nearest = candidate;
        }
        if crosses(p, seg) {
            inside = !inside;
        }
    }
    if inside {
        return p;
    }
    return nearest;
}

fn scene_distance(p: vec2<f32>) -> f32 {
    var dist = FAR;

    let circle_total = min(frame_params.circle_count, arrayLength(&circles));
    for (var i = 0u; i < circle_total; i = i + 1u) {
        let circle = circles[i];
        if circle.enabled != 0u {
            dist = min(dist, length(p - circle.position) - circle.radius);
        }
    }

    let rect_total = min(frame_params.rect_count, arrayLength(&rects));
    for (var i = 0u; i < rect_total; i = i + 1u) {
        let rect = rects[i];
        if rect.enabled != 0u {
            let q = abs(p - rect.position) - rect.extents;
            dist = min(dist, length(max(q, vec2<f32>(0.0))) + min(max(q.x, q.y), 0.0));
        }
    }

    let polygon_total = min(frame_params.polygon_shape_count, arrayLength(&polygon_shapes));
    for (var i = 0u; i < polygon_total; i = i + 1u) {
        let shape = polygon_shapes[i];
        if shape.enabled != 0u && shape.segment_count > 0u {
            dist = min(dist, polygon_shape_distance(p, shape));
        }
    }

    return dist;
}

fn push_ray(ray: Ray) {
    let slot = atomicAdd(&rays_out.total, 1u);
    if slot < arrayLength(&rays_out.rays) {
        rays_out.rays[slot] = ray;
    }
}

fn emit_ray(world: vec2<f32>, goal: vec2<f32>, color: vec3<f32>, range: f32, pixel: u32, light: u32) {
    let delta = goal - world;
    let dist = length(delta);
    if dist > range {
        return;
    }
    var direction = vec2<f32>(0.0);
    if dist > 0.0 {
        direction = delta / dist;
    }
    let falloff = 1.0 - dist / range;
    push_ray(Ray(world, direction, color * falloff * falloff, dist, pixel, light, 0u, 0u));
}

fn accumulate(pixel: u32, color: vec3<f32>) {
    let cell = pixel * 3u;
    if cell + 3u > arrayLength(&accumulation) {
        return;
    }
    let scaled = clamp(color, vec3<f32>(0.0), vec3<f32>(MAX_CONTRIBUTION)) * ACCUMULATION_SCALE;
    let units = vec3<u32>(scaled + vec3<f32>(0.5));
    atomicAdd(&accumulation[cell], units.x);
    atomicAdd(&accumulation[cell + 1u], units.y);
    atomicAdd(&accumulation[cell + 2u], units.z);
}

@compute @workgroup_size(__WORKGROUP_SIZE__)
fn initialize(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= batch_params.pixels_per_batch {
        return;
    }
    let pixel = batch_params.batch_offset + gid.x;
    if pixel >= frame_params.width * frame_params.height {
        return;
    }
    let world = pixel_to_world(pixel);

    let point_total = min(frame_params.point_light_count, arrayLength(&point_lights));
    for (var i = 0u; i < point_total; i = i + 1u) {
        let light = point_lights[i];
        if light.enabled != 0u {
            emit_ray(world, light.position, light.color, light.range, pixel, encode_light(LIGHT_KIND_POINT, i));
        }
    }

    let spot_total = min(frame_params.spot_light_count, arrayLength(&spot_lights));
    for (var i = 0u; i < spot_total; i = i + 1u) {
        let light = spot_lights[i];
        let to_pixel = world - light.position;
        let in_cone = cross2(light.cone_min, to_pixel) >= 0.0 && cross2(to_pixel, light.cone_max) >= 0.0;
        if light.enabled != 0u && in_cone {
            emit_ray(world, light.position, light.color, light.range, pixel, encode_light(LIGHT_KIND_SPOT, i));
        }
    }

    let polygon_total = min(frame_params.polygon_light_count, arrayLength(&polygon_lights));
    for (var i = 0u; i < polygon_total; i = i + 1u) {
        let light = polygon_lights[i];
        if light.enabled != 0u && light.segment_count > 0u {
            let goal = polygon_light_goal(world, light);
            emit_ray(world, goal, light.color, light.range, pixel, encode_light(LIGHT_KIND_POLYGON, i));
        }
    }
}

@compute @workgroup_size(__WORKGROUP_SIZE__)
fn march(@builtin(global_invocation_id) gid: vec3<u32>) {
    let live = min(rays_in.total, arrayLength(&rays_in.rays));
    if gid.x >= live {
        return;
    }
    let ray = rays_in.rays[gid.x];
    let epsilon = frame_params.pixel_size * HIT_EPSILON_SCALE;

    var t = 0.0;
    for (var i = 0u; i < frame_params.max_steps; i = i + 1u) {
        let d = scene_distance(ray.origin + ray.direction * t);
        if d < epsilon {
            return;
        }
        if t + d >= ray.remaining {
            accumulate(ray.pixel, ray.color);
            return;
        }
        t = t + d;
    }

    if ray.bounce + 1u < frame_params.max_bounces {
        push_ray(Ray(
            ray.origin + ray.direction * t,
            ray.direction,
            ray.color,
            ray.remaining - t,
            ray.pixel,
            ray.light,
            ray.bounce + 1u,
            0u,
        ));
    }
}

@compute @workgroup_size(8, 8, 1)
fn finalize(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= frame_params.width || gid.y >= frame_params.height {
        return;
    }
    let cell = (gid.y * frame_params.width + gid.x) * 3u;
    let sum = vec3<f32>(
        f32(atomicLoad(&accumulation[cell])),
        f32(atomicLoad(&accumulation[cell + 1u])),
        f32(atomicLoad(&accumulation[cell + 2u])),
    ) / ACCUMULATION_SCALE;
    textureStore(light_map, vec2<i32>(i32(gid.x), i32(gid.y)), vec4<f32>(min(sum, vec3<f32>(1.0)), 1.0));
}
"#;

const PREPARE_SHADER: &str = r#"
struct Ray {
    origin: vec2<f32>,
    direction: vec2<f32>,
    color: vec3<f32>,
    remaining: f32,
    pixel: u32,
    light: u32,
    bounce: u32,
    _padding: u32,
}

struct RayInput {
    total: u32,
    rays: array<Ray>,
}

@group(0) @binding(0) var<storage, read> rays: RayInput;
@group(0) @binding(1) var<storage, read_write> dispatch_args: array<u32, 3>;

@compute @workgroup_size(1)
fn prepare_march() {
    let live = min(rays.total, arrayLength(&rays.rays));
    dispatch_args[0] = (live + GROUP_SIZE - 1u) / GROUP_SIZE;
    dispatch_args[1] = 1u;
    dispatch_args[2] = 1u;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::uniforms::{ACCUMULATION_SCALE, HIT_EPSILON_SCALE, MAX_CONTRIBUTION};

    #[test]
    fn test_workgroup_size_substituted() {
        let source = lighting_shader(32);
        assert!(!source.contains(WORKGROUP_SIZE_PLACEHOLDER));
        assert_eq!(source.matches("@workgroup_size(32)").count(), 2);
    }

    #[test]
    fn test_shader_constants_match_host() {
        let source = lighting_shader(64);
        assert!(source.contains(&format!("ACCUMULATION_SCALE: f32 = {:.1};", ACCUMULATION_SCALE)));
        assert!(source.contains(&format!("MAX_CONTRIBUTION: f32 = {:.1};", MAX_CONTRIBUTION)));
        assert!(source.contains(&format!("HIT_EPSILON_SCALE: f32 = {};", HIT_EPSILON_SCALE)));
    }

    #[test]
    fn test_lighting_layout_storage_count() {
        let entries = lighting_layout_entries();
        let storage = entries
            .iter()
            .filter(|e| matches!(e.ty, BindingType::StorageBuffer { .. }))
            .count();
        assert_eq!(storage as u32, STORAGE_BUFFERS_PER_STAGE);
        assert_eq!(entries.len(), 14);
        for (index, entry) in entries.iter().enumerate() {
            assert_eq!(entry.binding, index as u32);
        }
    }
}
