use std::mem::size_of;
use std::num::NonZeroU64;

use crate::splat::{PACKED_COLOR_SIZE, PACKED_GAUSSIAN_SIZE, SPLAT_2D_SIZE};

use super::types::{CameraUniform, RenderSettings, SortInfo};

const PREPROCESS_SHADER: &str = include_str!("../../../shaders/preprocess.wgsl");
const GAUSSIAN_SHADER: &str = include_str!("../../../shaders/gaussian.wgsl");
pub(super) const RADIX_SORT_SHADER: &str = include_str!("../../../shaders/radix_sort.wgsl");

const U32_SIZE: u64 = size_of::<u32>() as u64;

fn min_size(bytes: u64) -> Option<NonZeroU64> {
    NonZeroU64::new(bytes)
}

pub(super) fn uniform_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    size: u64,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: min_size(size),
        },
        count: None,
    }
}

pub(super) fn storage_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    read_only: bool,
    size: u64,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: min_size(size),
        },
        count: None,
    }
}

pub(super) fn compile_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

pub(super) fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layouts: &[&wgpu::BindGroupLayout],
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Resource-set layouts of the preprocess stage, one per bind group index.
#[derive(Debug)]
pub struct PreprocessLayouts {
    pub camera: wgpu::BindGroupLayout,
    pub point_cloud: wgpu::BindGroupLayout,
    pub sort: wgpu::BindGroupLayout,
    pub settings: wgpu::BindGroupLayout,
}

impl PreprocessLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let compute = wgpu::ShaderStages::COMPUTE;
        let camera = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preprocess camera layout"),
            entries: &[uniform_entry(
                0,
                compute,
                size_of::<CameraUniform>() as u64,
            )],
        });
        let point_cloud = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preprocess point cloud layout"),
            entries: &[
                storage_entry(0, compute, true, PACKED_GAUSSIAN_SIZE as u64),
                storage_entry(1, compute, true, PACKED_COLOR_SIZE as u64),
                storage_entry(2, compute, false, SPLAT_2D_SIZE as u64),
            ],
        });
        let sort = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preprocess sort layout"),
            entries: &[
                storage_entry(0, compute, false, size_of::<SortInfo>() as u64),
                storage_entry(1, compute, false, U32_SIZE),
                storage_entry(2, compute, false, U32_SIZE),
            ],
        });
        let settings = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preprocess settings layout"),
            entries: &[uniform_entry(
                0,
                compute,
                size_of::<RenderSettings>() as u64,
            )],
        });
        Self {
            camera,
            point_cloud,
            sort,
            settings,
        }
    }

    pub fn create_pipeline(&self, device: &wgpu::Device) -> wgpu::ComputePipeline {
        let module = compile_module(device, "preprocess shader", PREPROCESS_SHADER);
        create_compute_pipeline(
            device,
            "preprocess pipeline",
            &[&self.camera, &self.point_cloud, &self.sort, &self.settings],
            &module,
            "preprocess",
        )
    }
}

/// Resource-set layouts of the render stage.
#[derive(Debug)]
pub struct RenderLayouts {
    pub splats: wgpu::BindGroupLayout,
    pub indices: wgpu::BindGroupLayout,
}

impl RenderLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let vertex = wgpu::ShaderStages::VERTEX;
        let splats = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("render splat layout"),
            entries: &[storage_entry(0, vertex, true, SPLAT_2D_SIZE as u64)],
        });
        let indices = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("render index layout"),
            entries: &[storage_entry(0, vertex, true, U32_SIZE)],
        });
        Self { splats, indices }
    }

    pub fn create_pipeline(
        &self,
        device: &wgpu::Device,
        target_format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        let module = compile_module(device, "gaussian shader", GAUSSIAN_SHADER);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("render pipeline layout"),
            bind_group_layouts: &[&self.splats, &self.indices],
            push_constant_ranges: &[],
        });

        // Premultiplied alpha, back to front.
        let blend_component = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("render pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState {
                        color: blend_component,
                        alpha: blend_component,
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}
