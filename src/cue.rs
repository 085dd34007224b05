// Cue index: the binary frame-offset table at the head of a stream resource
//
// Layout (little-endian):
//   [0, 4)            frame count N
//   [4, 4 + 4*N)      N u32 byte offsets, relative to the packet-data region
//   4 + 4*N ..        packet data

use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::stream::client::RangeSource;

/// Size of the frame-count header preceding the offset table.
pub const INDEX_HEADER_BYTES: u64 = 4;

/// Sanity cap on the reported frame count (a 16M-frame index is ~64 MiB of
/// offsets and over 11 hours of audio at 2.5 ms frames).
const MAX_FRAMES: u32 = 1 << 24;

/// Parsed cue index for one sound. Immutable once loaded; shared by the
/// fetch path and the scheduler for the lifetime of the session.
#[derive(Debug)]
pub struct CueIndex {
    offsets: Vec<u32>,
    sample_rate: u32,
    frame_samples: u32,
}

impl CueIndex {
    /// Load and parse the index with two range reads against the store.
    ///
    /// Any failure here is fatal to starting playback for this sound; there
    /// is no partial index.
    pub async fn load(
        source: &dyn RangeSource,
        sound_id: &str,
        config: &PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let head = source
            .fetch_range(sound_id, 0, Some(INDEX_HEADER_BYTES - 1))
            .await
            .map_err(PlayerError::IndexUnavailable)?;
        if head.len() < 4 {
            return Err(PlayerError::IndexCorrupt(format!(
                "header read returned {} bytes",
                head.len()
            )));
        }
        let frame_count = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        if frame_count == 0 {
            return Err(PlayerError::IndexCorrupt("index reports zero frames".into()));
        }
        if frame_count > MAX_FRAMES {
            return Err(PlayerError::IndexCorrupt(format!(
                "implausible frame count {frame_count}"
            )));
        }

        let table_bytes = 4 * frame_count as usize;
        let body = source
            .fetch_range(
                sound_id,
                INDEX_HEADER_BYTES,
                Some(INDEX_HEADER_BYTES + table_bytes as u64 - 1),
            )
            .await
            .map_err(PlayerError::IndexUnavailable)?;
        if body.len() < table_bytes {
            return Err(PlayerError::IndexCorrupt(format!(
                "offset table truncated: expected {} bytes, got {}",
                table_bytes,
                body.len()
            )));
        }

        let mut offsets = Vec::with_capacity(frame_count as usize);
        for i in 0..frame_count as usize {
            let at = i * 4;
            let cue = u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
            if let Some(&prev) = offsets.last() {
                if cue < prev {
                    return Err(PlayerError::IndexCorrupt(format!(
                        "offsets decrease at frame {i}: {prev} -> {cue}"
                    )));
                }
            }
            offsets.push(cue);
        }

        Ok(Self {
            offsets,
            sample_rate: config.sample_rate,
            frame_samples: config.frame_samples,
        })
    }

    /// Build an index from already-parsed parts.
    pub fn from_parts(offsets: Vec<u32>, sample_rate: u32, frame_samples: u32) -> Self {
        Self {
            offsets,
            sample_rate,
            frame_samples,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.offsets.len()
    }

    /// First byte of the packet-data region within the resource.
    pub fn data_offset(&self) -> u64 {
        INDEX_HEADER_BYTES + 4 * self.offsets.len() as u64
    }

    /// Absolute byte offset of a frame's packet within the resource.
    pub fn byte_offset(&self, frame: usize) -> Option<u64> {
        self.offsets
            .get(frame)
            .map(|&cue| self.data_offset() + u64::from(cue))
    }

    /// Absolute byte range covering packets `[from_frame, to_frame)`.
    ///
    /// The end is the first byte of `to_frame`'s packet (inclusive range
    /// semantics, as sent in an HTTP `Range` header), or open-ended when the
    /// window reaches the last frame.
    pub fn byte_range(&self, from_frame: usize, to_frame: usize) -> (u64, Option<u64>) {
        let from = self.data_offset() + u64::from(self.offsets[from_frame]);
        if to_frame >= self.offsets.len() - 1 {
            (from, None)
        } else {
            (from, Some(self.data_offset() + u64::from(self.offsets[to_frame])))
        }
    }

    /// Frame containing the given time, clamped to the track.
    pub fn frame_at(&self, seconds: f64) -> usize {
        let frame = ((seconds * f64::from(self.sample_rate)) / f64::from(self.frame_samples))
            .floor()
            .max(0.0) as usize;
        frame.min(self.offsets.len().saturating_sub(1))
    }

    /// Start time of the given frame, in seconds.
    pub fn time_at(&self, frame: usize) -> f64 {
        frame as f64 * f64::from(self.frame_samples) / f64::from(self.sample_rate)
    }

    /// Total track duration in seconds.
    pub fn duration(&self) -> f64 {
        self.time_at(self.offsets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use bytes::Bytes;

    /// Serves ranges out of one in-memory resource.
    struct StubSource {
        data: Vec<u8>,
    }

    #[async_trait]
    impl RangeSource for StubSource {
        async fn fetch_range(
            &self,
            _sound_id: &str,
            from: u64,
            to: Option<u64>,
        ) -> Result<Bytes, FetchError> {
            let from = from as usize;
            let end = to.map_or(self.data.len(), |t| (t as usize + 1).min(self.data.len()));
            Ok(Bytes::copy_from_slice(&self.data[from.min(self.data.len())..end]))
        }
    }

    fn index_bytes(offsets: &[u32]) -> Vec<u8> {
        let mut data = (offsets.len() as u32).to_le_bytes().to_vec();
        for &o in offsets {
            data.extend_from_slice(&o.to_le_bytes());
        }
        data
    }

    async fn load(offsets: &[u32]) -> Result<CueIndex, PlayerError> {
        let source = StubSource {
            data: index_bytes(offsets),
        };
        CueIndex::load(&source, "snd", &PlayerConfig::default()).await
    }

    #[tokio::test]
    async fn test_parse_and_byte_range() {
        let cues = load(&[0, 10, 20, 30]).await.unwrap();
        assert_eq!(cues.frame_count(), 4);
        assert_eq!(cues.data_offset(), 20);
        // Fetching frames [0, 2) requests bytes [headerEnd+0, headerEnd+20].
        assert_eq!(cues.byte_range(0, 2), (20, Some(40)));
        // A window reaching the last frame is open-ended.
        assert_eq!(cues.byte_range(1, 3), (30, None));
    }

    #[tokio::test]
    async fn test_zero_frames_is_corrupt() {
        assert!(matches!(load(&[]).await, Err(PlayerError::IndexCorrupt(_))));
    }

    #[tokio::test]
    async fn test_decreasing_offsets_are_corrupt() {
        assert!(matches!(
            load(&[0, 20, 10]).await,
            Err(PlayerError::IndexCorrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_table_is_corrupt() {
        let mut data = index_bytes(&[0, 10, 20, 30]);
        data.truncate(12);
        let source = StubSource { data };
        assert!(matches!(
            CueIndex::load(&source, "snd", &PlayerConfig::default()).await,
            Err(PlayerError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_time_round_trip_within_one_frame() {
        let cues = CueIndex::from_parts(vec![0; 1000], 48_000, 120);
        let frame_dur = 120.0 / 48_000.0;
        for &t in &[0.0, 0.004, 0.91, 1.23456, 2.49999] {
            let rt = cues.time_at(cues.frame_at(t));
            assert!((rt - t).abs() < frame_dur, "t={t} rt={rt}");
        }
    }

    #[test]
    fn test_frame_at_clamps_to_track() {
        let cues = CueIndex::from_parts(vec![0, 10, 20], 48_000, 120);
        assert_eq!(cues.frame_at(1e9), 2);
        assert_eq!(cues.frame_at(-1.0), 0);
    }
}
