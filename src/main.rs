use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use glam::Vec3;
use tracing::info;
use tracing_subscriber::EnvFilter;

use splatgpu::demo::generate_demo_ply;
use splatgpu::{CameraUniform, DisplayMode, GaussianRenderer, PointCloud, RenderSettings};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Centers,
    Opacity,
    Depth,
    Gaussians,
}

impl From<ModeArg> for DisplayMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Centers => DisplayMode::Centers,
            ModeArg::Opacity => DisplayMode::Opacity,
            ModeArg::Depth => DisplayMode::Depth,
            ModeArg::Gaussians => DisplayMode::Gaussians,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "splatgpu",
    version,
    about = "Headless GPU Gaussian splat renderer"
)]
struct Cli {
    /// Path to a binary little-endian .ply scene
    input: Option<PathBuf>,
    #[arg(long, help = "Render the built-in demo scene", conflicts_with = "input")]
    demo: bool,
    #[arg(long, value_name = "N", default_value_t = 45_000, help = "Demo point count")]
    points: usize,
    #[arg(long, default_value_t = 42, help = "Demo scene seed")]
    seed: u64,
    #[arg(long, value_name = "N", default_value_t = 3, help = "Frames to render")]
    frames: u32,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    #[arg(long, default_value_t = 1.0, help = "Gaussian scale factor")]
    scale: f32,
    #[arg(long, default_value_t = 60.0, help = "Vertical field of view in degrees")]
    fov: f32,
    #[arg(long, value_enum, default_value_t = ModeArg::Gaussians)]
    mode: ModeArg,
}

fn read_scene(cli: &Cli) -> anyhow::Result<Vec<u8>> {
    match (&cli.input, cli.demo) {
        (Some(path), false) => {
            let is_ply = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ply"));
            if !is_ply {
                bail!("Unsupported input '{}'. Use a .ply or --demo", path.display());
            }
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))
        }
        _ => {
            info!(points = cli.points, seed = cli.seed, "generating demo scene");
            Ok(generate_demo_ply(cli.points, cli.seed))
        }
    }
}

async fn create_device() -> anyhow::Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        })
        .await
        .context("no suitable GPU adapter")?;
    let adapter_info = adapter.get_info();
    info!(name = %adapter_info.name, backend = ?adapter_info.backend, "using adapter");

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("splatgpu device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )
        .await
        .context("requesting GPU device")
}

/// Settings whose cull box encloses the whole cloud.
fn settings_for(point_cloud: &PointCloud, mode: DisplayMode) -> RenderSettings {
    let margin = 1.0;
    let [min_x, min_y, min_z] = point_cloud.bounds.min;
    let [max_x, max_y, max_z] = point_cloud.bounds.max;
    RenderSettings {
        bbox_min: [min_x - margin, min_y - margin, min_z - margin, 0.0],
        bbox_max: [max_x + margin, max_y + margin, max_z + margin, 0.0],
        display_mode: mode as u32 as f32,
        ..RenderSettings::default()
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let bytes = read_scene(&cli)?;
    let (device, queue) = create_device().await?;

    let point_cloud = PointCloud::load(&device, &bytes)
        .await
        .context("loading point cloud")?;
    let center = Vec3::from(point_cloud.bounds.center());
    let radius = Vec3::from(point_cloud.bounds.extent()).length().max(1.0) * 1.2;
    let mode = DisplayMode::from(cli.mode);
    let settings = settings_for(&point_cloud, mode);

    let mut renderer = GaussianRenderer::with_settings(&device, point_cloud, TARGET_FORMAT, settings)
        .await
        .context("building renderer")?;
    renderer.update_settings(&queue, cli.scale);
    info!(mode = mode.name(), scale = cli.scale, "display settings");

    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen target"),
        size: wgpu::Extent3d {
            width: cli.width.max(1),
            height: cli.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = target.create_view(&wgpu::TextureViewDescriptor::default());

    let started = Instant::now();
    for frame in 0..cli.frames {
        // Orbit the scene centre, one step per frame.
        let angle = frame as f32 * 0.15;
        let eye = center + Vec3::new(radius * angle.sin(), 0.0, radius * angle.cos());
        let camera = CameraUniform::look_at(
            eye,
            center,
            cli.fov.to_radians(),
            cli.width,
            cli.height,
        );
        renderer.update_camera(&queue, &camera);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });
        renderer.render(&mut encoder, &view);
        queue.submit(Some(encoder.finish()));

        let visible = renderer.visible_count(&device);
        info!(frame, visible = visible.or_zero(), ?visible, "frame done");
    }

    // Drain the queue once so the last capture is reported.
    let _ = device.poll(wgpu::Maintain::Wait);
    let visible = renderer.visible_count(&device);
    info!(visible = visible.or_zero(), ?visible, "final visible count");

    let telemetry = renderer.telemetry();
    info!(
        frames = telemetry.frame_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        avg_frame_time = ?telemetry.average_frame_time(),
        smoothed_fps = telemetry.smoothed_fps(),
        "render finished"
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    pollster::block_on(run(cli))
}
