use std::time::Instant;

use tracing::debug;

use crate::render::gpu::types::{
    DrawIndirectArgs, RenderSettings, SortInfo, PREPROCESS_WORKGROUP_SIZE,
};
use crate::telemetry::FrameTelemetry;

/// Device buffers the orchestrator addresses directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameBuffer {
    SortInfo,
    DrawIndirect,
    Settings,
    Readback,
}

/// Host-to-device writes (queue writes on wgpu).
pub trait BufferWriter {
    fn write_buffer(&mut self, target: FrameBuffer, offset: u64, data: &[u8]);
}

/// Device-side commands recorded into one frame's unit of work.
pub trait FrameCommands {
    fn clear_buffer(&mut self, target: FrameBuffer, offset: u64, size: u64);
    fn preprocess(&mut self, workgroups: u32);
    fn sort(&mut self);
    fn copy_buffer(
        &mut self,
        src: FrameBuffer,
        src_offset: u64,
        dst: FrameBuffer,
        dst_offset: u64,
        size: u64,
    );
    /// Clears the target to transparent black and draws with the indirect
    /// arguments stored in `args` at `offset`.
    fn draw_indirect(&mut self, args: FrameBuffer, offset: u64);
}

/// Sequences one frame: reset, preprocess, sort, count copy, draw.
#[derive(Debug, Clone)]
pub struct FrameOrchestrator {
    num_points: u32,
    settings: RenderSettings,
    telemetry: FrameTelemetry,
}

impl FrameOrchestrator {
    pub fn new(num_points: u32, settings: RenderSettings) -> Self {
        Self {
            num_points,
            settings,
            telemetry: FrameTelemetry::new(),
        }
    }

    pub fn preprocess_workgroups(&self) -> u32 {
        self.num_points.div_ceil(PREPROCESS_WORKGROUP_SIZE)
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn telemetry(&self) -> &FrameTelemetry {
        &self.telemetry
    }

    pub fn record_frame<C>(&mut self, cmds: &mut C, now: Instant, capture_readback: bool)
    where
        C: FrameCommands + ?Sized,
    {
        cmds.clear_buffer(
            FrameBuffer::SortInfo,
            SortInfo::VISIBLE_COUNT_OFFSET,
            SortInfo::VISIBLE_COUNT_SIZE,
        );
        cmds.preprocess(self.preprocess_workgroups());
        cmds.sort();
        cmds.copy_buffer(
            FrameBuffer::SortInfo,
            SortInfo::VISIBLE_COUNT_OFFSET,
            FrameBuffer::DrawIndirect,
            DrawIndirectArgs::INSTANCE_COUNT_OFFSET,
            SortInfo::VISIBLE_COUNT_SIZE,
        );
        cmds.draw_indirect(FrameBuffer::DrawIndirect, 0);

        if capture_readback {
            cmds.copy_buffer(
                FrameBuffer::SortInfo,
                SortInfo::VISIBLE_COUNT_OFFSET,
                FrameBuffer::Readback,
                0,
                SortInfo::VISIBLE_COUNT_SIZE,
            );
        }

        self.telemetry.record_frame(now);
    }

    /// Writes only the scale-factor field; the rest of the device copy is untouched.
    pub fn update_settings<W>(&mut self, writer: &mut W, scale_factor: f32)
    where
        W: BufferWriter + ?Sized,
    {
        self.settings.scale_factor = scale_factor;
        writer.write_buffer(
            FrameBuffer::Settings,
            RenderSettings::SCALE_FACTOR_OFFSET,
            bytemuck::bytes_of(&scale_factor),
        );
        debug!(scale_factor, "scale factor updated");
    }
}
