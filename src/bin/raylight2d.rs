//! Renders one frame of a demo scene to a PNG light map

use clap::Parser;
use glam::{Vec2, Vec3};
use raylight2d::backend::software::SoftwareBackend;
use raylight2d::backend::ComputeBackend;
use raylight2d::{
    Camera2d, FrameOutcome, Light, LightId, LightingConfig, LightingSystem, Shape, ShapeId,
    WgpuBackend,
};
use std::path::PathBuf;

/// Where the kernels run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Headless wgpu device
    #[default]
    Gpu,
    /// CPU execution, no GPU needed
    Software,
}

/// 2D ray-marched lighting, rendered offscreen
#[derive(Parser, Debug)]
#[command(name = "raylight2d", version, about)]
struct Args {
    /// Output width in pixels
    #[arg(long, default_value = "512")]
    width: u32,

    /// Output height in pixels
    #[arg(long, default_value = "512")]
    height: u32,

    /// Light map resolution relative to the output
    #[arg(long, default_value = "1.0")]
    scale: f32,

    /// Sphere-tracing steps per bounce
    #[arg(long, default_value = "64")]
    max_steps: u32,

    /// Bounce budget for rays that run out of steps
    #[arg(long, default_value = "2")]
    max_bounces: u32,

    /// Offset samples by frame parity
    #[arg(long)]
    dither: bool,

    /// Number of frames to render before writing the image
    #[arg(long, default_value = "1")]
    frames: u32,

    #[arg(long, default_value = "gpu", value_enum)]
    backend: CliBackend,

    /// PNG file to write
    #[arg(short, long, default_value = "lightmap.png")]
    output: PathBuf,
}

/// Three colored lights around a few occluders
fn populate_demo_scene(system: &mut LightingSystem) -> raylight2d::LightingResult<()> {
    let registry = system.registry_mut();

    registry.add_light(
        LightId(1),
        Light::point(Vec2::new(-5.0, 4.0), Vec3::new(1.0, 0.55, 0.25), 1.2, 14.0),
    )?;
    registry.add_light(
        LightId(2),
        Light::spot(
            Vec2::new(6.0, -6.0),
            Vec2::new(-1.0, 1.0),
            50.0,
            Vec3::new(0.3, 0.6, 1.0),
            1.5,
            18.0,
        ),
    )?;
    registry.add_light(
        LightId(3),
        Light::polygon(
            Vec2::new(4.0, 6.0),
            vec![
                Vec2::new(-1.0, -0.5),
                Vec2::new(1.0, -0.5),
                Vec2::new(1.0, 0.5),
                Vec2::new(-1.0, 0.5),
            ],
            Vec3::new(0.4, 1.0, 0.5),
            0.8,
            9.0,
        ),
    )?;

    registry.add_shape(ShapeId(1), Shape::circle(Vec2::new(-1.5, 1.0), 1.2))?;
    registry.add_shape(ShapeId(2), Shape::rect(Vec2::new(2.0, -1.5), Vec2::new(3.0, 0.8)))?;
    registry.add_shape(
        ShapeId(3),
        Shape::polygon(
            Vec2::new(-4.0, -4.0),
            vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(2.0, 0.0),
                Vec2::new(1.0, 0.6),
                Vec2::new(2.0, 2.0),
                Vec2::new(0.0, 2.0),
            ],
        ),
    )?;
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut backend: Box<dyn ComputeBackend> = match args.backend {
        CliBackend::Gpu => Box::new(WgpuBackend::new_headless()?),
        CliBackend::Software => Box::new(SoftwareBackend::new()),
    };

    let config = LightingConfig {
        render_scale: args.scale,
        max_steps: args.max_steps,
        max_bounces: args.max_bounces,
        temporal_dither: args.dither,
        ..LightingConfig::new(args.width, args.height)
    };
    let mut system = LightingSystem::new(backend.as_mut(), config)?;
    populate_demo_scene(&mut system)?;

    let camera = Camera2d::new(Vec2::ZERO, 20.0).transforms(args.width, args.height);
    for frame in 0..args.frames.max(1) {
        match system.render_frame(backend.as_mut(), &camera)? {
            FrameOutcome::Skipped => log::warn!("Frame {} skipped: no enabled lights", frame),
            FrameOutcome::Rendered { batches, dispatches } => log::info!(
                "Frame {}: {} batches, {} dispatches",
                frame,
                batches,
                dispatches
            ),
        }
    }
    for diagnostic in &system.diagnostics().rebuild {
        log::warn!("{}", diagnostic);
    }

    let (width, height) = system.pipeline().render_size();
    let texels = system.read_light_map(backend.as_mut())?;
    let image = image::RgbaImage::from_raw(width, height, texels)
        .ok_or("light map readback has the wrong size")?;
    image.save(&args.output)?;
    log::info!("Wrote {}x{} light map to {}", width, height, args.output.display());

    system.destroy(backend.as_mut());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Args::parse()) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
