//! GPU-resident 3D Gaussian splat pipeline: load a point cloud, project and
//! cull it in a compute pass, depth-sort on the GPU and draw it indirectly.

pub mod demo;
pub mod frame;
pub mod loader;
pub mod parser;
pub mod render;
pub mod splat;
pub mod telemetry;

pub use frame::{BufferWriter, FrameBuffer, FrameCommands, FrameOrchestrator};
pub use loader::{Bounds, PointCloud, PointCloudLayout};
pub use render::gpu::types::{CameraUniform, DisplayMode, RenderSettings};
pub use render::gpu::{GaussianRenderer, RenderError, VisibleCount};
pub use telemetry::FrameTelemetry;
