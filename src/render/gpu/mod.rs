pub mod error;
pub mod pipeline;
pub mod readback;
pub mod sort;
#[cfg(test)]
mod tests;
pub mod types;

use std::time::Instant;

use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::frame::{BufferWriter, FrameBuffer, FrameCommands, FrameOrchestrator};
use crate::loader::PointCloud;
use crate::telemetry::FrameTelemetry;

pub use error::RenderError;
pub use readback::{VisibleCount, VisibleCountReadback};
pub use sort::{GpuSorter, SortBuffers};
use pipeline::{PreprocessLayouts, RenderLayouts};
use types::{CameraUniform, DrawIndirectArgs, RenderSettings, PREPROCESS_WORKGROUP_SIZE};

struct PreprocessStage {
    pipeline: wgpu::ComputePipeline,
    /// camera, point cloud, sort inputs, settings
    bind_groups: [wgpu::BindGroup; 4],
}

struct DrawStage {
    pipeline: wgpu::RenderPipeline,
    /// projected splats, sorted indices
    bind_groups: [wgpu::BindGroup; 2],
}

/// Every buffer, pipeline and bind group a frame touches, owned in one place.
struct GpuResources {
    camera_buffer: wgpu::Buffer,
    settings_buffer: wgpu::Buffer,
    indirect_buffer: wgpu::Buffer,
    sorter: GpuSorter,
    preprocess: PreprocessStage,
    draw: DrawStage,
}

impl GpuResources {
    fn new(
        device: &wgpu::Device,
        point_cloud: &PointCloud,
        num_points: u32,
        settings: &RenderSettings,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self, RenderError> {
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("camera buffer"),
            contents: bytemuck::bytes_of(&CameraUniform::look_at(
                glam::Vec3::new(0.0, 0.0, 5.0),
                glam::Vec3::ZERO,
                std::f32::consts::FRAC_PI_4,
                1,
                1,
            )),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let settings_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("render settings buffer"),
            contents: bytemuck::bytes_of(settings),
            usage: wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });
        let indirect_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("draw indirect buffer"),
            contents: bytemuck::bytes_of(&DrawIndirectArgs::default()),
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        let sorter = GpuSorter::new(device, num_points)?;

        let preprocess_layouts = PreprocessLayouts::new(device);
        let sort_input = sorter.input();
        let preprocess = PreprocessStage {
            pipeline: preprocess_layouts.create_pipeline(device),
            bind_groups: [
                bind_buffers(
                    device,
                    "preprocess camera",
                    &preprocess_layouts.camera,
                    &[&camera_buffer],
                ),
                bind_buffers(
                    device,
                    "preprocess point cloud",
                    &preprocess_layouts.point_cloud,
                    &[
                        &point_cloud.gaussian_3d_buffer,
                        &point_cloud.sh_buffer,
                        &point_cloud.splat_2d_buffer,
                    ],
                ),
                bind_buffers(
                    device,
                    "preprocess sort inputs",
                    &preprocess_layouts.sort,
                    &[sorter.info_buffer(), &sort_input.keys, &sort_input.values],
                ),
                bind_buffers(
                    device,
                    "preprocess settings",
                    &preprocess_layouts.settings,
                    &[&settings_buffer],
                ),
            ],
        };

        let render_layouts = RenderLayouts::new(device);
        let draw = DrawStage {
            pipeline: render_layouts.create_pipeline(device, target_format),
            bind_groups: [
                bind_buffers(
                    device,
                    "render splats",
                    &render_layouts.splats,
                    &[&point_cloud.splat_2d_buffer],
                ),
                bind_buffers(
                    device,
                    "render sorted indices",
                    &render_layouts.indices,
                    &[sorter.sorted_indices()],
                ),
            ],
        };

        Ok(Self {
            camera_buffer,
            settings_buffer,
            indirect_buffer,
            sorter,
            preprocess,
            draw,
        })
    }

    fn buffer<'a>(
        &'a self,
        readback: &'a VisibleCountReadback,
        target: FrameBuffer,
    ) -> &'a wgpu::Buffer {
        match target {
            FrameBuffer::SortInfo => self.sorter.info_buffer(),
            FrameBuffer::DrawIndirect => &self.indirect_buffer,
            FrameBuffer::Settings => &self.settings_buffer,
            FrameBuffer::Readback => readback.buffer(),
        }
    }
}

/// Binds `buffers` in order at bindings 0, 1, ...
fn bind_buffers(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
        .iter()
        .zip(0u32..)
        .map(|(buffer, binding)| wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

/// Frame recording over one command encoder and its target view.
struct EncoderCommands<'a> {
    resources: &'a GpuResources,
    readback: &'a VisibleCountReadback,
    encoder: &'a mut wgpu::CommandEncoder,
    target: &'a wgpu::TextureView,
}

impl FrameCommands for EncoderCommands<'_> {
    fn clear_buffer(&mut self, target: FrameBuffer, offset: u64, size: u64) {
        let buffer = self.resources.buffer(self.readback, target);
        self.encoder.clear_buffer(buffer, offset, Some(size));
    }

    fn preprocess(&mut self, workgroups: u32) {
        let stage = &self.resources.preprocess;
        let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("preprocess"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&stage.pipeline);
        for (index, bind_group) in (0u32..).zip(&stage.bind_groups) {
            pass.set_bind_group(index, bind_group, &[]);
        }
        pass.dispatch_workgroups(workgroups, 1, 1);
    }

    fn sort(&mut self) {
        self.resources.sorter.sort(self.encoder);
    }

    fn copy_buffer(
        &mut self,
        src: FrameBuffer,
        src_offset: u64,
        dst: FrameBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        let src = self.resources.buffer(self.readback, src);
        let dst = self.resources.buffer(self.readback, dst);
        self.encoder
            .copy_buffer_to_buffer(src, src_offset, dst, dst_offset, size);
    }

    fn draw_indirect(&mut self, args: FrameBuffer, offset: u64) {
        let args = self.resources.buffer(self.readback, args);
        let stage = &self.resources.draw;
        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("splat render pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&stage.pipeline);
        for (index, bind_group) in (0u32..).zip(&stage.bind_groups) {
            pass.set_bind_group(index, bind_group, &[]);
        }
        pass.draw_indirect(args, offset);
    }
}

struct QueueWriter<'a> {
    resources: &'a GpuResources,
    readback: &'a VisibleCountReadback,
    queue: &'a wgpu::Queue,
}

impl BufferWriter for QueueWriter<'_> {
    fn write_buffer(&mut self, target: FrameBuffer, offset: u64, data: &[u8]) {
        let buffer = self.resources.buffer(self.readback, target);
        self.queue.write_buffer(buffer, offset, data);
    }
}

/// Draws a loaded [`PointCloud`] with back-to-front alpha blending.
pub struct GaussianRenderer {
    point_cloud: PointCloud,
    resources: GpuResources,
    readback: VisibleCountReadback,
    orchestrator: FrameOrchestrator,
}

impl std::fmt::Debug for GaussianRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaussianRenderer")
            .field("num_points", &self.point_cloud.num_points)
            .field("sh_degree", &self.point_cloud.sh_degree)
            .field("sorter", &self.resources.sorter)
            .field("readback", &self.readback)
            .field("settings", self.orchestrator.settings())
            .finish()
    }
}

impl GaussianRenderer {
    pub async fn new(
        device: &wgpu::Device,
        point_cloud: PointCloud,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self, RenderError> {
        Self::with_settings(device, point_cloud, target_format, RenderSettings::default()).await
    }

    pub async fn with_settings(
        device: &wgpu::Device,
        point_cloud: PointCloud,
        target_format: wgpu::TextureFormat,
        settings: RenderSettings,
    ) -> Result<Self, RenderError> {
        let num_points = u32::try_from(point_cloud.num_points)?;
        let workgroups = num_points.div_ceil(PREPROCESS_WORKGROUP_SIZE);
        let limit = device.limits().max_compute_workgroups_per_dimension;
        if workgroups > limit {
            return Err(RenderError::TooManyPoints {
                points: point_cloud.num_points,
                workgroups: u64::from(workgroups),
                limit,
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = GpuResources::new(device, &point_cloud, num_points, &settings, target_format);
        let validation = device.pop_error_scope().await;
        let resources = built?;
        if let Some(err) = validation {
            return Err(RenderError::device("renderer resources", err));
        }

        info!(
            num_points,
            workgroups,
            ?target_format,
            "gaussian renderer ready"
        );

        Ok(Self {
            point_cloud,
            resources,
            readback: VisibleCountReadback::new(device),
            orchestrator: FrameOrchestrator::new(num_points, settings),
        })
    }

    /// Records one full frame into `encoder`. Nothing is submitted here.
    pub fn render(&mut self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let capture = self.readback.begin_capture();
        let mut cmds = EncoderCommands {
            resources: &self.resources,
            readback: &self.readback,
            encoder,
            target,
        };
        self.orchestrator
            .record_frame(&mut cmds, Instant::now(), capture);
        debug!(
            frame = self.orchestrator.telemetry().frame_count(),
            capture, "frame recorded"
        );
    }

    pub fn update_settings(&mut self, queue: &wgpu::Queue, scale_factor: f32) {
        let mut writer = QueueWriter {
            resources: &self.resources,
            readback: &self.readback,
            queue,
        };
        self.orchestrator.update_settings(&mut writer, scale_factor);
    }

    pub fn update_camera(&self, queue: &wgpu::Queue, camera: &CameraUniform) {
        queue.write_buffer(&self.resources.camera_buffer, 0, bytemuck::bytes_of(camera));
    }

    pub fn camera_buffer(&self) -> &wgpu::Buffer {
        &self.resources.camera_buffer
    }

    pub fn settings_buffer(&self) -> &wgpu::Buffer {
        &self.resources.settings_buffer
    }

    pub fn indirect_buffer(&self) -> &wgpu::Buffer {
        &self.resources.indirect_buffer
    }

    pub fn sorter(&self) -> &GpuSorter {
        &self.resources.sorter
    }

    /// Latest captured visible count. Diagnostic only, never waits on the GPU.
    pub fn visible_count(&mut self, device: &wgpu::Device) -> VisibleCount {
        self.readback.read(device)
    }

    pub fn settings(&self) -> &RenderSettings {
        self.orchestrator.settings()
    }

    pub fn telemetry(&self) -> &FrameTelemetry {
        self.orchestrator.telemetry()
    }

    pub fn point_cloud(&self) -> &PointCloud {
        &self.point_cloud
    }
}
