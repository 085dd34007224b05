// Player configuration
// All tunables are injected at construction; nothing is process-global.

use std::time::Duration;

/// Tunables for one player instance.
///
/// The defaults match the stream format produced by the encoder side:
/// 48 kHz stereo Opus, 120 samples per frame (2.5 ms).
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Native sample rate used for frame addressing.
    pub sample_rate: u32,
    /// Samples covered by one frame at `sample_rate`.
    pub frame_samples: u32,
    /// Channel count of the decoded stream.
    pub channels: usize,
    /// Frames requested by one range read.
    pub fetch_window: usize,
    /// Scheduler ticks between fetch-window advances.
    pub fetch_every: u64,
    /// Frames per scheduled playback buffer.
    pub buffer_frames: usize,
    /// Delay before re-checking a frame that is not yet ready.
    pub retry_backoff: Duration,
    /// Age after which a `Pending` frame with no arrival becomes eligible
    /// for refetch.
    pub pending_retry: Duration,
    /// Consecutive readiness misses tolerated before a frame is treated as
    /// permanently unavailable and played as a gap.
    pub miss_retry_limit: u32,
    /// Level-meter value reported for silence, in dBFS.
    pub db_floor: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frame_samples: 120,
            channels: 2,
            fetch_window: 2000,
            fetch_every: 100,
            buffer_frames: 5,
            retry_backoff: Duration::from_millis(50),
            pending_retry: Duration::from_secs(2),
            miss_retry_limit: 40,
            db_floor: -100.0,
        }
    }
}

impl PlayerConfig {
    /// Duration of one frame in seconds.
    pub fn frame_duration(&self) -> f64 {
        f64::from(self.frame_samples) / f64::from(self.sample_rate)
    }
}
