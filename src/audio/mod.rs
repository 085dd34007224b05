// Audio playback module
// Opus decode, clock-scheduled output, and the playback scheduler

pub mod decoder;
pub mod output;
pub mod player;

pub use decoder::{DecodedBlock, FrameDecoder, OpusFrameDecoder};
pub use output::{AudioOutput, CpalOutput, EndCallback};
pub use player::Player;
