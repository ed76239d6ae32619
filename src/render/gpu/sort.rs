use std::mem::size_of;

use tracing::debug;
use wgpu::util::DeviceExt;

use super::error::RenderError;
use super::pipeline::{
    compile_module, create_compute_pipeline, storage_entry, uniform_entry, RADIX_SORT_SHADER,
};
use super::types::{
    SortInfo, SortPassParams, RADIX_BITS, RADIX_BUCKETS, RADIX_PASSES, SORT_WORKGROUP_SIZE,
};

pub fn div_ceil_u32(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Workgroups needed to cover `count` items, never zero.
pub fn workgroups_for(count: u32, workgroup_size: u32) -> u32 {
    div_ceil_u32(count, workgroup_size).max(1)
}

fn dispatch_1d(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    workgroups: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(workgroups, 1, 1);
}

/// One half of the ping-pong pair: depth keys and the point indices they carry.
#[derive(Debug)]
pub struct SortBuffers {
    pub keys: wgpu::Buffer,
    pub values: wgpu::Buffer,
}

impl SortBuffers {
    fn new(device: &wgpu::Device, bytes: u64, label: &str) -> Self {
        let make = |suffix: &str| {
            let name = format!("{label} {suffix}");
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&name),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        Self {
            keys: make("keys"),
            values: make("values"),
        }
    }
}

/// GPU depth sorter. Preprocess fills `ping_pong[0]` and bumps the visible
/// count in `info_buffer`; `sort` orders the first `visible_count` pairs by
/// ascending key, leaving the result back in `ping_pong[0]`.
pub struct GpuSorter {
    capacity: u32,
    block_count: u32,
    info_buffer: wgpu::Buffer,
    ping_pong: [SortBuffers; 2],
    _histograms: wgpu::Buffer,
    _pass_params: Vec<wgpu::Buffer>,
    pass_bind_groups: Vec<wgpu::BindGroup>,
    histogram_pipeline: wgpu::ComputePipeline,
    scan_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
}

impl std::fmt::Debug for GpuSorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuSorter")
            .field("capacity", &self.capacity)
            .field("block_count", &self.block_count)
            .finish()
    }
}

impl GpuSorter {
    pub fn new(device: &wgpu::Device, num_points: u32) -> Result<Self, RenderError> {
        let capacity = num_points.max(1);
        let block_count = workgroups_for(capacity, SORT_WORKGROUP_SIZE);
        let limits = device.limits();
        if block_count > limits.max_compute_workgroups_per_dimension {
            return Err(RenderError::TooManyPoints {
                points: num_points as usize,
                workgroups: u64::from(block_count),
                limit: limits.max_compute_workgroups_per_dimension,
            });
        }

        let max_binding =
            u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        let pair_bytes = u64::from(capacity) * size_of::<u32>() as u64;
        let histogram_bytes =
            u64::from(block_count) * u64::from(RADIX_BUCKETS) * size_of::<u32>() as u64;
        for (label, size) in [
            ("sort key buffer", pair_bytes),
            ("sort histogram buffer", histogram_bytes),
        ] {
            if size > max_binding {
                return Err(RenderError::BufferTooLarge {
                    label,
                    size,
                    limit: max_binding,
                });
            }
        }

        let info_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort info buffer"),
            contents: bytemuck::bytes_of(&SortInfo {
                visible_count: 0,
                capacity,
                block_count,
                _pad: 0,
            }),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });
        let ping_pong = [
            SortBuffers::new(device, pair_bytes, "sort a"),
            SortBuffers::new(device, pair_bytes, "sort b"),
        ];
        let histograms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sort histogram buffer"),
            size: histogram_bytes,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let compute = wgpu::ShaderStages::COMPUTE;
        let u32_size = size_of::<u32>() as u64;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("radix sort layout"),
            entries: &[
                uniform_entry(0, compute, size_of::<SortPassParams>() as u64),
                storage_entry(1, compute, true, size_of::<SortInfo>() as u64),
                storage_entry(2, compute, true, u32_size),
                storage_entry(3, compute, true, u32_size),
                storage_entry(4, compute, false, u32_size),
                storage_entry(5, compute, false, u32_size),
                storage_entry(6, compute, false, u32_size),
            ],
        });

        let module = compile_module(device, "radix sort shader", RADIX_SORT_SHADER);
        let histogram_pipeline =
            create_compute_pipeline(device, "radix histogram", &[&layout], &module, "histogram");
        let scan_pipeline = create_compute_pipeline(
            device,
            "radix scan",
            &[&layout],
            &module,
            "scan_histograms",
        );
        let scatter_pipeline =
            create_compute_pipeline(device, "radix scatter", &[&layout], &module, "scatter");

        let mut pass_params = Vec::with_capacity(RADIX_PASSES as usize);
        let mut pass_bind_groups = Vec::with_capacity(RADIX_PASSES as usize);
        for pass in 0..RADIX_PASSES {
            let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("radix pass params"),
                contents: bytemuck::bytes_of(&SortPassParams {
                    shift: pass * RADIX_BITS,
                    block_count,
                    capacity,
                    _pad: 0,
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let (src, dst) = pass_buffers(&ping_pong, pass);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("radix pass bind group"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: info_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: src.keys.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: src.values.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: dst.keys.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: dst.values.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: histograms.as_entire_binding(),
                    },
                ],
            });
            pass_params.push(params);
            pass_bind_groups.push(bind_group);
        }

        debug!(capacity, block_count, "gpu sorter ready");

        Ok(Self {
            capacity,
            block_count,
            info_buffer,
            ping_pong,
            _histograms: histograms,
            _pass_params: pass_params,
            pass_bind_groups,
            histogram_pipeline,
            scan_pipeline,
            scatter_pipeline,
        })
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Visible count plus scratch; see [`SortInfo`].
    pub fn info_buffer(&self) -> &wgpu::Buffer {
        &self.info_buffer
    }

    pub fn ping_pong(&self) -> &[SortBuffers; 2] {
        &self.ping_pong
    }

    /// Input pair preprocess writes into.
    pub fn input(&self) -> &SortBuffers {
        &self.ping_pong[0]
    }

    pub fn sorted_indices(&self) -> &wgpu::Buffer {
        &self.ping_pong[result_slot()].values
    }

    /// Records every radix pass into `encoder`. Must follow preprocess in the
    /// same encoder.
    pub fn sort(&self, encoder: &mut wgpu::CommandEncoder) {
        for bind_group in &self.pass_bind_groups {
            dispatch_1d(
                encoder,
                "radix histogram",
                &self.histogram_pipeline,
                bind_group,
                self.block_count,
            );
            dispatch_1d(encoder, "radix scan", &self.scan_pipeline, bind_group, 1);
            dispatch_1d(
                encoder,
                "radix scatter",
                &self.scatter_pipeline,
                bind_group,
                self.block_count,
            );
        }
    }
}

fn pass_buffers(ping_pong: &[SortBuffers; 2], pass: u32) -> (&SortBuffers, &SortBuffers) {
    let src = (pass % 2) as usize;
    (&ping_pong[src], &ping_pong[1 - src])
}

fn result_slot() -> usize {
    (RADIX_PASSES % 2) as usize
}
