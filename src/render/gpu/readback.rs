use std::mem::size_of;

use futures::channel::oneshot;
use tracing::{debug, warn};

type MapOutcome = Result<Result<(), wgpu::BufferAsyncError>, oneshot::Canceled>;

/// Result of a diagnostic visible-count read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibleCount {
    /// No frame has captured a value since the last read.
    NotReady,
    /// The readback buffer could not be mapped.
    MapFailed,
    Ready(u32),
}

impl VisibleCount {
    /// Diagnostic contract: anything but a successful read reports zero.
    pub fn or_zero(self) -> u32 {
        match self {
            Self::Ready(count) => count,
            Self::NotReady | Self::MapFailed => 0,
        }
    }
}

enum ReadbackState {
    Idle,
    Copied,
    Mapping(oneshot::Receiver<Result<(), wgpu::BufferAsyncError>>),
}

/// Four-byte host-mappable mirror of the sorter's visible count.
///
/// A frame only records the copy into this buffer when no mapping is
/// outstanding, so a slow reader never blocks rendering.
pub struct VisibleCountReadback {
    buffer: wgpu::Buffer,
    state: ReadbackState,
}

impl std::fmt::Debug for VisibleCountReadback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            ReadbackState::Idle => "idle",
            ReadbackState::Copied => "copied",
            ReadbackState::Mapping(_) => "mapping",
        };
        f.debug_struct("VisibleCountReadback")
            .field("state", &state)
            .finish()
    }
}

impl VisibleCountReadback {
    pub const SIZE: u64 = size_of::<u32>() as u64;

    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("visible count readback"),
            size: Self::SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            state: ReadbackState::Idle,
        }
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Claims the buffer for this frame's copy. Returns false while a mapping
    /// is still pending.
    pub fn begin_capture(&mut self) -> bool {
        match self.state {
            ReadbackState::Mapping(_) => false,
            ReadbackState::Idle | ReadbackState::Copied => {
                self.state = ReadbackState::Copied;
                true
            }
        }
    }

    /// Returns the last captured count without waiting on the GPU. Call after
    /// the frame that captured it has been submitted. While the mapping is
    /// still in flight this reports `NotReady` and a later call picks it up.
    pub fn read(&mut self, device: &wgpu::Device) -> VisibleCount {
        if let ReadbackState::Copied = self.state {
            let (sender, receiver) = oneshot::channel();
            self.buffer
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = sender.send(result);
                });
            self.state = ReadbackState::Mapping(receiver);
        }
        let ReadbackState::Mapping(receiver) = &mut self.state else {
            return VisibleCount::NotReady;
        };

        let _ = device.poll(wgpu::Maintain::Poll);
        let Some(outcome) = settled(receiver) else {
            return VisibleCount::NotReady;
        };
        self.state = ReadbackState::Idle;

        let buffer = &self.buffer;
        resolve(outcome, || {
            let count = {
                let view = buffer.slice(..).get_mapped_range();
                bytemuck::pod_read_unaligned::<u32>(&view[..size_of::<u32>()])
            };
            buffer.unmap();
            count
        })
    }
}

/// Outcome of the map callback, or `None` while it has not fired.
fn settled(
    receiver: &mut oneshot::Receiver<Result<(), wgpu::BufferAsyncError>>,
) -> Option<MapOutcome> {
    receiver.try_recv().transpose()
}

fn resolve(outcome: MapOutcome, read: impl FnOnce() -> u32) -> VisibleCount {
    match outcome {
        Ok(Ok(())) => {
            let count = read();
            debug!(count, "visible count read back");
            VisibleCount::Ready(count)
        }
        Ok(Err(err)) => {
            warn!(%err, "visible count readback failed to map");
            VisibleCount::MapFailed
        }
        Err(oneshot::Canceled) => {
            warn!("visible count readback callback dropped");
            VisibleCount::MapFailed
        }
    }
}
