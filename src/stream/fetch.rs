// Range fetcher: fills the frame store one fetch window at a time
//
// Per-frame packet layout within a fetched range (little-endian):
//   byte 0       flag/config: bits [7:5] encoding flag, [4:0] codec config id
//   byte 1       channel count
//   bytes [2,4)  payload length
//   bytes [4,..) raw Opus payload
// Packets are packed back-to-back; the stream must be walked sequentially.

use crate::cue::CueIndex;
use crate::error::PlayerError;
use crate::store::FrameStore;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::client::RangeSource;

/// Packet header size in bytes.
pub const PACKET_HEADER_BYTES: usize = 4;

/// Encoding flag value marking a decodable audio payload. Packets with any
/// other flag are non-audio and their frames are never promoted to ready.
pub const ENCODING_AUDIO: u8 = 1;

/// Issues byte-range reads for windows of unfetched frames and writes the
/// parsed packets into the frame store.
pub struct RangeFetcher {
    source: Arc<dyn RangeSource>,
    sound_id: String,
    window: usize,
    pending_retry: Duration,
}

impl RangeFetcher {
    pub fn new(
        source: Arc<dyn RangeSource>,
        sound_id: impl Into<String>,
        window: usize,
        pending_retry: Duration,
    ) -> Self {
        Self {
            source,
            sound_id: sound_id.into(),
            window,
            pending_retry,
        }
    }

    /// Ensure the window starting at `from_frame` is fetched or in flight.
    ///
    /// Scans forward for the first frame still fetchable; if none, this is a
    /// no-op (idempotent under repeated calls). Otherwise every frame from
    /// there to the window end is marked pending before the single range
    /// request goes out, so concurrent calls never fetch the same range
    /// twice. A transport failure leaves the frames pending; they become
    /// eligible again once the pending-retry age passes.
    pub async fn ensure_range(
        &self,
        store: &Mutex<FrameStore>,
        cues: &CueIndex,
        from_frame: usize,
    ) -> Result<(), PlayerError> {
        let frame_count = cues.frame_count();
        if frame_count == 0 || from_frame >= frame_count {
            return Ok(());
        }
        let window_end = (from_frame + self.window).min(frame_count - 1);

        let first = {
            let mut store = store.lock();
            let found = (from_frame..window_end)
                .find(|&frame| store.fetchable(frame, self.pending_retry));
            let Some(first) = found else {
                return Ok(());
            };
            for frame in first..window_end {
                store.mark_pending(frame);
            }
            first
        };

        let (from_byte, to_byte) = cues.byte_range(first, window_end);
        log::debug!(
            "GET packets {first} to {window_end} (bytes {from_byte}-{})",
            to_byte.map_or_else(String::new, |b| b.to_string())
        );
        let body = self
            .source
            .fetch_range(&self.sound_id, from_byte, to_byte)
            .await
            .map_err(PlayerError::RangeFetchFailed)?;

        let mut store = store.lock();
        for (frame, payload) in walk_packets(&body, first, window_end) {
            store.insert_ready(frame, payload);
        }
        Ok(())
    }
}

/// Walk a fetched packet stream, yielding `(frame, payload)` for each
/// audio-flagged packet. Stops at the first truncated packet; ranges that end
/// on a cue boundary carry the first header byte of the next packet, which
/// the truncation check discards.
pub(crate) fn walk_packets(
    body: &Bytes,
    from_frame: usize,
    max_frame: usize,
) -> Vec<(usize, Bytes)> {
    let mut out = Vec::new();
    let mut offset = 0;
    let mut frame = from_frame;
    while frame <= max_frame && offset + PACKET_HEADER_BYTES <= body.len() {
        let flag_and_config = body[offset];
        let encoding_flag = (flag_and_config & 0xe0) >> 5;
        let frame_size = u16::from_le_bytes([body[offset + 2], body[offset + 3]]) as usize;
        if offset + PACKET_HEADER_BYTES + frame_size > body.len() {
            break;
        }
        if encoding_flag == ENCODING_AUDIO {
            let payload =
                body.slice(offset + PACKET_HEADER_BYTES..offset + PACKET_HEADER_BYTES + frame_size);
            out.push((frame, payload));
        }
        offset += PACKET_HEADER_BYTES + frame_size;
        frame += 1;
    }
    out
}
