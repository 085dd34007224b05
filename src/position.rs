// Position, level, and clip-region reporting toward the UI layer

use crate::config::PlayerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

/// Snapshot handed to the UI on every playhead or level change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    /// Current playhead position in seconds.
    pub time_secs: f64,
    /// Total track duration in seconds.
    pub duration_secs: f64,
    pub stopped: bool,
    /// Instantaneous level per channel, in dBFS.
    pub levels_db: Vec<f32>,
}

/// Publishes playhead position and meter levels, memoizing the last report to
/// avoid redundant notifications.
#[derive(Debug)]
pub struct PositionSync {
    tx: watch::Sender<PositionReport>,
    last: Mutex<PositionReport>,
}

impl PositionSync {
    pub fn new(duration_secs: f64, db_floor: f32, channels: usize) -> Self {
        let initial = PositionReport {
            time_secs: 0.0,
            duration_secs,
            stopped: true,
            levels_db: vec![db_floor; channels],
        };
        let (tx, _) = watch::channel(initial.clone());
        Self {
            tx,
            last: Mutex::new(initial),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PositionReport> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PositionReport {
        self.last.lock().clone()
    }

    /// Publish a new report; a no-op when nothing changed.
    pub(crate) fn report(&self, time_secs: f64, stopped: bool, levels_db: Option<Vec<f32>>) {
        let mut last = self.last.lock();
        let next = PositionReport {
            time_secs,
            duration_secs: last.duration_secs,
            stopped,
            levels_db: levels_db.unwrap_or_else(|| last.levels_db.clone()),
        };
        if next != *last {
            *last = next.clone();
            let _ = self.tx.send(next);
        }
    }
}

/// Average-amplitude level of a PCM buffer in dBFS. Silence (and an empty
/// buffer) maps to `floor` instead of negative infinity.
pub fn pcm_to_db(pcm: &[f32], floor: f32) -> f32 {
    if pcm.is_empty() {
        return floor;
    }
    let sum: f32 = pcm.iter().map(|s| s.abs()).sum();
    let avg = sum / pcm.len() as f32;
    if avg <= 0.0 {
        return floor;
    }
    (20.0 * avg.log10()).max(floor)
}

/// Floor a time to a millisecond step, e.g. `round_time(t, 5)` snaps to 5 ms.
pub fn round_time(seconds: f64, step_ms: u64) -> f64 {
    let step = step_ms as f64;
    ((seconds * 1000.0 / step).floor() * step) / 1000.0
}

/// `mm:ss`, or `mm:ss.mmm` with the milliseconds floored to `round_ms`.
pub fn format_time(milliseconds: f64, round_ms: Option<u64>) -> String {
    let total_seconds = (milliseconds / 1000.0).floor() as u64;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    match round_ms {
        Some(step) => {
            let step = step.max(1);
            let millis = (milliseconds as u64 % 1000) / step * step;
            format!("{minutes:02}:{seconds:02}.{millis:03}")
        }
        None => format!("{minutes:02}:{seconds:02}"),
    }
}

/// A playable `[start_frame, end_frame)` region, as captured by user marks
/// during playback. Persisting regions as clips is the caller's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClipRegion {
    pub start_frame: usize,
    pub end_frame: usize,
}

impl ClipRegion {
    /// Marked time step for clip boundaries, in milliseconds.
    pub const MARK_STEP_MS: u64 = 5;

    /// Build a region from mark times, snapping both ends to the 5 ms grid.
    pub fn from_seconds(start: f64, end: f64, config: &PlayerConfig) -> Self {
        let to_frame = |t: f64| {
            ((round_time(t, Self::MARK_STEP_MS) * f64::from(config.sample_rate))
                / f64::from(config.frame_samples))
            .floor()
            .max(0.0) as usize
        };
        let start_frame = to_frame(start);
        Self {
            start_frame,
            end_frame: to_frame(end).max(start_frame),
        }
    }

    pub fn duration_secs(&self, config: &PlayerConfig) -> f64 {
        self.end_frame.saturating_sub(self.start_frame) as f64 * config.frame_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_to_db_silence_hits_floor() {
        assert_eq!(pcm_to_db(&[0.0; 256], -100.0), -100.0);
        assert_eq!(pcm_to_db(&[], -100.0), -100.0);
    }

    #[test]
    fn test_pcm_to_db_half_scale() {
        let db = pcm_to_db(&[0.5; 64], -100.0);
        assert!((db - -6.0206).abs() < 0.01, "db={db}");
    }

    #[test]
    fn test_round_time_snaps_down() {
        assert!((round_time(1.2344, 5) - 1.230).abs() < 1e-9);
        assert!((round_time(0.005, 5) - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(61_234.0, None), "01:01");
        assert_eq!(format_time(61_234.0, Some(5)), "01:01.230");
        assert_eq!(format_time(900.0, Some(1)), "00:00.900");
    }

    #[test]
    fn test_clip_region_from_seconds() {
        let config = PlayerConfig::default();
        let region = ClipRegion::from_seconds(1.0, 2.0, &config);
        assert_eq!(region.start_frame, 400);
        assert_eq!(region.end_frame, 800);
        assert!((region.duration_secs(&config) - 1.0).abs() < 1e-9);
        // End never precedes start.
        let inverted = ClipRegion::from_seconds(2.0, 1.0, &config);
        assert_eq!(inverted.start_frame, inverted.end_frame);
    }

    #[tokio::test]
    async fn test_report_memoizes_identical_updates() {
        let sync = PositionSync::new(10.0, -100.0, 2);
        let mut rx = sync.subscribe();
        sync.report(1.0, false, Some(vec![-20.0, -21.0]));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        sync.report(1.0, false, Some(vec![-20.0, -21.0]));
        assert!(!rx.has_changed().unwrap());
        sync.report(1.0, true, None);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow().stopped);
    }
}
