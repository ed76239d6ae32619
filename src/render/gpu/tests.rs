use std::sync::{Mutex, MutexGuard, OnceLock};

use glam::Vec3;
use rand::{Rng, SeedableRng};

use super::types::{CameraUniform, DrawIndirectArgs, RenderSettings, SortInfo};
use super::{GaussianRenderer, RenderError, VisibleCount};
use crate::loader::PointCloud;
use crate::parser::ply::encode_binary_ply;
use crate::splat::RawVertexRecord;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const TARGET_SIZE: u32 = 64;

static TEST_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

fn test_guard() -> MutexGuard<'static, ()> {
    let mutex = TEST_MUTEX.get_or_init(|| Mutex::new(()));
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct GpuTest {
    _guard: MutexGuard<'static, ()>,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

fn setup_gpu_test() -> Option<GpuTest> {
    let guard = test_guard();
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::default(),
        force_fallback_adapter: false,
        compatible_surface: None,
    }));
    let Some(adapter) = adapter else {
        eprintln!("Skipping GPU test: no wgpu adapter.");
        return None;
    };

    let requested = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("test device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
        },
        None,
    ));
    match requested {
        Ok((device, queue)) => Some(GpuTest {
            _guard: guard,
            device,
            queue,
        }),
        Err(err) => {
            eprintln!("Skipping GPU test: device request failed: {err}");
            None
        }
    }
}

fn make_target(device: &wgpu::Device) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("test target"),
            size: wgpu::Extent3d {
                width: TARGET_SIZE,
                height: TARGET_SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn camera_at(eye: Vec3, target: Vec3) -> CameraUniform {
    CameraUniform::look_at(
        eye,
        target,
        std::f32::consts::FRAC_PI_3,
        TARGET_SIZE,
        TARGET_SIZE,
    )
}

/// Copies `size` bytes of `src` through a staging buffer and returns them.
fn read_bytes(test: &GpuTest, src: &wgpu::Buffer, size: u64) -> Vec<u8> {
    let staging = test.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("test staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = test
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    test.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| {
        result.expect("staging map failed");
    });
    let _ = test.device.poll(wgpu::Maintain::Wait);
    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    bytes
}

fn read_words(test: &GpuTest, src: &wgpu::Buffer, count: u32) -> Vec<u32> {
    let bytes = read_bytes(test, src, u64::from(count) * 4);
    bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

fn render_frame(test: &GpuTest, renderer: &mut GaussianRenderer, view: &wgpu::TextureView) {
    let mut encoder = test
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("test frame"),
        });
    renderer.render(&mut encoder, view);
    test.queue.submit(Some(encoder.finish()));
}

/// Reads the visible count, draining the queue once if the map is still pending.
fn settled_visible_count(test: &GpuTest, renderer: &mut GaussianRenderer) -> VisibleCount {
    let first = renderer.visible_count(&test.device);
    if first != VisibleCount::NotReady {
        return first;
    }
    let _ = test.device.poll(wgpu::Maintain::Wait);
    renderer.visible_count(&test.device)
}

fn three_point_records() -> Vec<RawVertexRecord> {
    [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [-0.5, 0.2, 0.0]]
        .into_iter()
        .map(|position| RawVertexRecord {
            position,
            opacity: 2.0,
            scale: [-2.0; 3],
            sh_dc: [1.0, 0.5, 0.0],
            ..Default::default()
        })
        .collect()
}

fn generate_seeded_records(count: usize, seed: u64) -> Vec<RawVertexRecord> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| RawVertexRecord {
            position: [
                rng.random_range(-1.6_f32..1.6_f32),
                rng.random_range(-1.6_f32..1.6_f32),
                rng.random_range(-1.5_f32..1.5_f32),
            ],
            opacity: rng.random_range(-1.0_f32..3.0_f32),
            scale: [
                rng.random_range(-3.5_f32..-2.0_f32),
                rng.random_range(-3.5_f32..-2.0_f32),
                rng.random_range(-3.5_f32..-2.0_f32),
            ],
            sh_dc: [
                rng.random_range(-1.0_f32..1.0_f32),
                rng.random_range(-1.0_f32..1.0_f32),
                rng.random_range(-1.0_f32..1.0_f32),
            ],
            ..Default::default()
        })
        .collect()
}

fn build_renderer(test: &GpuTest, records: &[RawVertexRecord]) -> GaussianRenderer {
    let bytes = encode_binary_ply(records, 0);
    let point_cloud =
        pollster::block_on(PointCloud::load(&test.device, &bytes)).expect("point cloud load");
    pollster::block_on(GaussianRenderer::new(
        &test.device,
        point_cloud,
        TARGET_FORMAT,
    ))
    .expect("renderer construction")
}

#[test]
fn test_three_point_frame_end_to_end() {
    let Some(test) = setup_gpu_test() else {
        return;
    };

    let mut renderer = build_renderer(&test, &three_point_records());
    let point_cloud = renderer.point_cloud();
    assert_eq!(point_cloud.num_points, 3);
    assert_eq!(point_cloud.sh_degree, 0);
    assert_eq!(point_cloud.gaussian_3d_buffer.size(), 60);
    assert_eq!(point_cloud.sh_buffer.size(), 288);
    assert_eq!(point_cloud.splat_2d_buffer.size(), 72);

    let view = make_target(&test.device);
    renderer.update_camera(&test.queue, &camera_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
    render_frame(&test, &mut renderer, &view);

    let args: DrawIndirectArgs =
        bytemuck::pod_read_unaligned(&read_bytes(&test, renderer.indirect_buffer(), 16));
    let info: SortInfo =
        bytemuck::pod_read_unaligned(&read_bytes(&test, renderer.sorter().info_buffer(), 16));

    assert_eq!(args.instance_count, info.visible_count);
    assert!(args.instance_count <= 3);
    assert_eq!(args.instance_count, 3, "all three points face the camera");
    assert_eq!(args.vertex_count, 4);
    assert_eq!((args.first_vertex, args.first_instance), (0, 0));

    let readback = settled_visible_count(&test, &mut renderer);
    assert_eq!(readback, VisibleCount::Ready(info.visible_count));
    assert_eq!(renderer.telemetry().frame_count(), 1);
}

#[test]
fn test_count_is_reset_every_frame() {
    let Some(test) = setup_gpu_test() else {
        return;
    };

    let mut renderer = build_renderer(&test, &three_point_records());
    let view = make_target(&test.device);

    renderer.update_camera(&test.queue, &camera_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
    render_frame(&test, &mut renderer, &view);
    render_frame(&test, &mut renderer, &view);
    let args: DrawIndirectArgs =
        bytemuck::pod_read_unaligned(&read_bytes(&test, renderer.indirect_buffer(), 16));
    assert_eq!(args.instance_count, 3, "count must not accumulate across frames");

    // Everything is behind this camera.
    renderer.update_camera(
        &test.queue,
        &camera_at(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 10.0)),
    );
    render_frame(&test, &mut renderer, &view);
    let args: DrawIndirectArgs =
        bytemuck::pod_read_unaligned(&read_bytes(&test, renderer.indirect_buffer(), 16));
    assert_eq!(args.instance_count, 0);
}

#[test]
fn test_sorted_back_to_front_across_blocks() {
    let Some(test) = setup_gpu_test() else {
        return;
    };

    let records = generate_seeded_records(1_000, 0x5eed);
    let mut renderer = build_renderer(&test, &records);
    assert!(renderer.sorter().block_count() > 1);

    let view = make_target(&test.device);
    renderer.update_camera(&test.queue, &camera_at(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO));
    render_frame(&test, &mut renderer, &view);

    let info: SortInfo =
        bytemuck::pod_read_unaligned(&read_bytes(&test, renderer.sorter().info_buffer(), 16));
    let visible = info.visible_count;
    assert!(visible > 0 && visible <= 1_000);

    let sorted = &renderer.sorter().ping_pong()[0];
    let keys = read_words(&test, &sorted.keys, visible);
    let indices = read_words(&test, renderer.sorter().sorted_indices(), visible);

    assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));

    // Ascending inverted-depth keys mean descending view depth.
    let depths: Vec<f32> = keys.iter().map(|k| f32::from_bits(!k)).collect();
    assert!(depths.windows(2).all(|pair| pair[0] >= pair[1]));

    let mut unique = indices.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), indices.len());
    assert!(indices.iter().all(|&i| i < 1_000));
}

#[test]
fn test_scale_update_is_localized_on_device() {
    let Some(test) = setup_gpu_test() else {
        return;
    };

    let mut renderer = build_renderer(&test, &three_point_records());
    let before = read_bytes(&test, renderer.settings_buffer(), 80);
    assert_eq!(before, bytemuck::bytes_of(&RenderSettings::default()));

    renderer.update_settings(&test.queue, 0.25);
    let after = read_bytes(&test, renderer.settings_buffer(), 80);

    assert_eq!(&after[..32], &before[..32]);
    assert_eq!(&after[36..], &before[36..]);
    assert_eq!(&after[32..36], &0.25_f32.to_le_bytes());
    assert_eq!(renderer.settings().scale_factor, 0.25);
}

#[test]
fn test_readback_before_any_frame_is_not_ready() {
    let Some(test) = setup_gpu_test() else {
        return;
    };

    let mut renderer = build_renderer(&test, &three_point_records());
    let result = renderer.visible_count(&test.device);
    assert_eq!(result, VisibleCount::NotReady);
    assert_eq!(result.or_zero(), 0);
}

#[test]
fn test_pending_readback_skips_capture_until_read() {
    let Some(test) = setup_gpu_test() else {
        return;
    };

    let mut renderer = build_renderer(&test, &three_point_records());
    let view = make_target(&test.device);
    renderer.update_camera(&test.queue, &camera_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO));
    render_frame(&test, &mut renderer, &view);

    // The first read never waits, so the map may still be in flight.
    let first = renderer.visible_count(&test.device);
    assert!(matches!(first, VisibleCount::NotReady | VisibleCount::Ready(3)));
    if first == VisibleCount::NotReady {
        // A frame recorded while the map is pending renders without the copy.
        render_frame(&test, &mut renderer, &view);
        let _ = test.device.poll(wgpu::Maintain::Wait);
        assert_eq!(renderer.visible_count(&test.device), VisibleCount::Ready(3));
    }
    assert_eq!(renderer.visible_count(&test.device), VisibleCount::NotReady);
}

#[test]
fn test_empty_cloud_is_rejected() {
    let Some(test) = setup_gpu_test() else {
        return;
    };

    let bytes = encode_binary_ply(&[], 0);
    let result = pollster::block_on(PointCloud::load(&test.device, &bytes));
    assert!(matches!(result, Err(RenderError::EmptyPointCloud)));
}
