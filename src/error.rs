// Error taxonomy for the streaming engine
use thiserror::Error;

/// Errors surfaced by the range transport.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("range request returned status {0}")]
    Status(u16),
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors surfaced by the player.
///
/// Only the index variants are fatal to starting playback; fetch and decode
/// problems during an active session are logged and retried or skipped.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("cue index corrupt: {0}")]
    IndexCorrupt(String),
    #[error("cue index unavailable")]
    IndexUnavailable(#[source] FetchError),
    #[error("range fetch failed")]
    RangeFetchFailed(#[source] FetchError),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),
}
