use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frame times kept for the rolling average.
pub const FRAME_TIME_WINDOW: usize = 60;
const FPS_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Per-renderer frame counters, advanced once per recorded frame.
#[derive(Debug, Clone, Default)]
pub struct FrameTelemetry {
    frame_count: u64,
    last_frame: Option<Instant>,
    frame_times: VecDeque<Duration>,
    sample_start: Option<Instant>,
    frames_in_sample: u32,
    fps: f32,
    smoothed_fps: f32,
}

impl FrameTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self, now: Instant) {
        self.frame_count += 1;

        if let Some(last) = self.last_frame {
            let delta = now.saturating_duration_since(last);
            if self.frame_times.len() == FRAME_TIME_WINDOW {
                self.frame_times.pop_front();
            }
            self.frame_times.push_back(delta);

            let instant_fps = 1.0 / delta.as_secs_f32().max(1e-6);
            self.smoothed_fps = if self.smoothed_fps <= 0.01 {
                instant_fps
            } else {
                0.90 * self.smoothed_fps + 0.10 * instant_fps
            };
        }
        self.last_frame = Some(now);

        let start = *self.sample_start.get_or_insert(now);
        self.frames_in_sample += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= FPS_SAMPLE_PERIOD {
            self.fps = self.frames_in_sample as f32 / elapsed.as_secs_f32();
            self.frames_in_sample = 0;
            self.sample_start = Some(now);
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second over the last completed one-second sample.
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn smoothed_fps(&self) -> f32 {
        self.smoothed_fps
    }

    pub fn frame_times(&self) -> impl Iterator<Item = Duration> + '_ {
        self.frame_times.iter().copied()
    }

    pub fn average_frame_time(&self) -> Option<Duration> {
        let count = u32::try_from(self.frame_times.len()).ok().filter(|&n| n > 0)?;
        Some(self.frame_times.iter().sum::<Duration>() / count)
    }
}
