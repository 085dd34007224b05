// Cuestream - streaming playback engine for cue-indexed Opus audio
// Module declarations
pub mod audio;
pub mod config;
pub mod cue;
pub mod error;
pub mod position;
pub mod store;
pub mod stream;

pub use audio::decoder::{DecodedBlock, FrameDecoder, OpusFrameDecoder};
pub use audio::output::{AudioOutput, CpalOutput, EndCallback};
pub use audio::player::Player;
pub use config::PlayerConfig;
pub use cue::CueIndex;
pub use error::{FetchError, PlayerError};
pub use position::{format_time, pcm_to_db, round_time, ClipRegion, PositionReport};
pub use store::{FrameSlot, FrameStore};
pub use stream::client::{HttpRangeSource, RangeSource};
pub use stream::fetch::RangeFetcher;
