// Frame store: fixed-capacity arena of per-frame encoded payloads
//
// Slots move Absent -> Pending -> Ready and never backwards; `Ready` is never
// demoted for the lifetime of the session. The fetcher consults the pending
// timestamp to decide when a frame whose fetch went missing may be requested
// again, which does not violate the observer-visible monotonicity.

use bytes::Bytes;
use std::time::{Duration, Instant};

/// Fetch state of one frame.
#[derive(Debug, Clone)]
pub enum FrameSlot {
    /// No fetch has ever covered this frame.
    Absent,
    /// Covered by an issued range request that has not delivered it yet.
    Pending { since: Instant },
    /// Encoded payload available for decode.
    Ready(Bytes),
}

/// Sparse table of encoded frames for one sound session.
#[derive(Debug)]
pub struct FrameStore {
    slots: Vec<FrameSlot>,
}

impl FrameStore {
    pub fn new(frame_count: usize) -> Self {
        Self {
            slots: vec![FrameSlot::Absent; frame_count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<&FrameSlot> {
        self.slots.get(frame)
    }

    pub fn is_ready(&self, frame: usize) -> bool {
        matches!(self.slots.get(frame), Some(FrameSlot::Ready(_)))
    }

    /// Payload for a frame, if it has arrived.
    pub fn payload(&self, frame: usize) -> Option<Bytes> {
        match self.slots.get(frame) {
            Some(FrameSlot::Ready(payload)) => Some(payload.clone()),
            _ => None,
        }
    }

    /// Whether the fetcher may start a request covering this frame: never
    /// fetched, or marked pending long enough ago that the covering request
    /// is presumed lost.
    pub fn fetchable(&self, frame: usize, pending_retry: Duration) -> bool {
        match self.slots.get(frame) {
            Some(FrameSlot::Absent) => true,
            Some(FrameSlot::Pending { since }) => since.elapsed() >= pending_retry,
            _ => false,
        }
    }

    /// Mark a frame as covered by an in-flight request. A no-op for `Ready`
    /// frames; re-marking a stale `Pending` frame refreshes its timestamp.
    pub fn mark_pending(&mut self, frame: usize) {
        if let Some(slot) = self.slots.get_mut(frame) {
            if !matches!(slot, FrameSlot::Ready(_)) {
                *slot = FrameSlot::Pending {
                    since: Instant::now(),
                };
            }
        }
    }

    /// Record an arrived payload. First arrival wins; a frame is never
    /// replaced once ready.
    pub fn insert_ready(&mut self, frame: usize, payload: Bytes) {
        if let Some(slot) = self.slots.get_mut(frame) {
            if !matches!(slot, FrameSlot::Ready(_)) {
                *slot = FrameSlot::Ready(payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        let mut store = FrameStore::new(3);
        assert!(store.fetchable(0, Duration::ZERO));
        store.mark_pending(0);
        assert!(matches!(store.get(0), Some(FrameSlot::Pending { .. })));
        store.insert_ready(0, Bytes::from_static(b"a"));
        assert!(store.is_ready(0));
        // Ready is never demoted.
        store.mark_pending(0);
        assert!(store.is_ready(0));
        store.insert_ready(0, Bytes::from_static(b"b"));
        assert_eq!(store.payload(0).unwrap(), Bytes::from_static(b"a"));
    }

    #[test]
    fn test_fresh_pending_is_not_fetchable() {
        let mut store = FrameStore::new(1);
        store.mark_pending(0);
        assert!(!store.fetchable(0, Duration::from_secs(2)));
        // With a zero retry age the same frame is immediately eligible again.
        assert!(store.fetchable(0, Duration::ZERO));
    }

    #[test]
    fn test_out_of_range_is_inert() {
        let mut store = FrameStore::new(1);
        store.mark_pending(5);
        store.insert_ready(5, Bytes::new());
        assert!(store.get(5).is_none());
        assert!(!store.fetchable(5, Duration::ZERO));
    }
}
