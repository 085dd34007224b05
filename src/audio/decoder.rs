// Opus frame decoding
// Batches consecutive payloads through one decoder instance per session

use crate::error::PlayerError;
use bytes::Bytes;

/// Largest decoded Opus frame: 120 ms at 48 kHz.
const MAX_FRAME_SAMPLES: usize = 5760;

/// PCM produced by one batch decode.
#[derive(Debug, Default)]
pub struct DecodedBlock {
    /// One sample array per channel.
    pub channel_data: Vec<Vec<f32>>,
    /// Samples decoded per channel.
    pub samples_decoded: usize,
}

/// Decodes batches of consecutive encoded frames into per-channel PCM.
///
/// A missing payload (`None`) decodes to zero samples; an undecodable
/// payload is skipped and logged. Decode problems never abort playback.
pub trait FrameDecoder: Send {
    fn decode_frames(&mut self, payloads: &[Option<Bytes>]) -> DecodedBlock;
}

/// `FrameDecoder` backed by libopus.
pub struct OpusFrameDecoder {
    decoder: opus::Decoder,
    channels: usize,
    interleaved: Vec<f32>,
}

impl OpusFrameDecoder {
    pub fn new(sample_rate: u32, channels: usize) -> Result<Self, PlayerError> {
        let layout = match channels {
            1 => opus::Channels::Mono,
            _ => opus::Channels::Stereo,
        };
        let decoder = opus::Decoder::new(sample_rate, layout)
            .map_err(|e| PlayerError::DecodeFailed(e.to_string()))?;
        Ok(Self {
            decoder,
            channels: channels.clamp(1, 2),
            interleaved: vec![0.0; MAX_FRAME_SAMPLES * 2],
        })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn decode_frames(&mut self, payloads: &[Option<Bytes>]) -> DecodedBlock {
        let mut channel_data = vec![Vec::new(); self.channels];
        let mut samples_decoded = 0;

        for payload in payloads {
            let Some(payload) = payload else {
                continue;
            };
            match self
                .decoder
                .decode_float(payload, &mut self.interleaved, false)
            {
                Ok(frames) => {
                    for frame in 0..frames {
                        for (ch, samples) in channel_data.iter_mut().enumerate() {
                            samples.push(self.interleaved[frame * self.channels + ch]);
                        }
                    }
                    samples_decoded += frames;
                }
                Err(e) => {
                    log::warn!("opus decode failed, skipping frame: {e}");
                }
            }
        }

        DecodedBlock {
            channel_data,
            samples_decoded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_payloads_decode_to_zero_samples() {
        let mut decoder = OpusFrameDecoder::new(48_000, 2).unwrap();
        let block = decoder.decode_frames(&[None, None, None]);
        assert_eq!(block.samples_decoded, 0);
        assert_eq!(block.channel_data.len(), 2);
        assert!(block.channel_data[0].is_empty());
    }

    #[test]
    fn test_undecodable_payload_is_skipped_not_fatal() {
        let mut decoder = OpusFrameDecoder::new(48_000, 2).unwrap();
        // Not a valid Opus TOC sequence; must be skipped, not fatal.
        let block = decoder.decode_frames(&[Some(Bytes::from_static(&[0xff, 0xff, 0xff]))]);
        assert_eq!(block.samples_decoded, 0);
    }
}
