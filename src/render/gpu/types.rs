use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

pub const PREPROCESS_WORKGROUP_SIZE: u32 = 256;
pub const SORT_WORKGROUP_SIZE: u32 = 256;
pub const RADIX_BITS: u32 = 8;
pub const RADIX_BUCKETS: u32 = 1 << RADIX_BITS;
pub const RADIX_PASSES: u32 = 32 / RADIX_BITS;

/// Vertices per splat quad (triangle strip).
pub const QUAD_VERTICES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum DisplayMode {
    /// Small fixed-size dots at each projected centre.
    Centers = 0,
    /// Greyscale of the activated opacity.
    Opacity = 1,
    /// Greyscale of the view depth.
    Depth = 2,
    #[default]
    Gaussians = 3,
}

impl DisplayMode {
    pub fn from_index(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Centers),
            1 => Some(Self::Opacity),
            2 => Some(Self::Depth),
            3 => Some(Self::Gaussians),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Centers => "Centers",
            Self::Opacity => "Opacity",
            Self::Depth => "Depth",
            Self::Gaussians => "Gaussians",
        }
    }
}

/// Uniform record shared with `Settings` in preprocess.wgsl. Twenty floats.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderSettings {
    pub bbox_min: [f32; 4],
    pub bbox_max: [f32; 4],
    pub scale_factor: f32,
    pub display_mode: f32,
    pub _pad: [f32; 2],
    pub reserved: [f32; 8],
}

impl Default for RenderSettings {
    fn default() -> Self {
        let mut reserved = [0.0; 8];
        reserved[0] = 0.3;
        Self {
            bbox_min: [-10.0, -10.0, -10.0, 0.0],
            bbox_max: [10.0, 10.0, 10.0, 0.0],
            scale_factor: 1.0,
            display_mode: DisplayMode::Gaussians as u32 as f32,
            _pad: [0.0; 2],
            reserved,
        }
    }
}

impl RenderSettings {
    pub const SCALE_FACTOR_OFFSET: u64 = offset_of!(RenderSettings, scale_factor) as u64;
    pub const DISPLAY_MODE_OFFSET: u64 = offset_of!(RenderSettings, display_mode) as u64;

    pub fn display_mode(&self) -> Option<DisplayMode> {
        DisplayMode::from_index(self.display_mode as u32)
    }
}

/// `wgpu::RenderPass::draw_indirect` argument layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl Default for DrawIndirectArgs {
    fn default() -> Self {
        Self {
            vertex_count: QUAD_VERTICES,
            instance_count: 0,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

impl DrawIndirectArgs {
    pub const INSTANCE_COUNT_OFFSET: u64 = offset_of!(DrawIndirectArgs, instance_count) as u64;
}

/// Head of the sorter's info buffer. `visible_count` is bumped atomically by preprocess.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortInfo {
    pub visible_count: u32,
    pub capacity: u32,
    pub block_count: u32,
    pub _pad: u32,
}

impl SortInfo {
    pub const VISIBLE_COUNT_OFFSET: u64 = offset_of!(SortInfo, visible_count) as u64;
    pub const VISIBLE_COUNT_SIZE: u64 = size_of::<u32>() as u64;
}

/// Per-pass uniform for radix_sort.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortPassParams {
    pub shift: u32,
    pub block_count: u32,
    pub capacity: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub view_inv: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub proj_inv: [[f32; 4]; 4],
    pub viewport: [f32; 2],
    pub focal: [f32; 2],
}

impl CameraUniform {
    pub fn new(view: Mat4, proj: Mat4, viewport: Vec2, focal: Vec2) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            view_inv: view.inverse().to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            proj_inv: proj.inverse().to_cols_array_2d(),
            viewport: viewport.to_array(),
            focal: focal.to_array(),
        }
    }

    /// Right-handed perspective camera at `eye` looking at `target`, `fov_y` in radians.
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, width: u32, height: u32) -> Self {
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(fov_y, width / height, 0.01, 1000.0);
        let focal_y = height / (2.0 * (fov_y * 0.5).tan());
        let focal_x = focal_y;
        Self::new(
            view,
            proj,
            Vec2::new(width, height),
            Vec2::new(focal_x, focal_y),
        )
    }
}

// Hard fail at compile time if Rust<->WGSL layout drifts.
const _: [(); 80] = [(); size_of::<RenderSettings>()];
const _: [(); 16] = [(); size_of::<DrawIndirectArgs>()];
const _: [(); 16] = [(); size_of::<SortInfo>()];
const _: [(); 16] = [(); size_of::<SortPassParams>()];
const _: [(); 272] = [(); size_of::<CameraUniform>()];
