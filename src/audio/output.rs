// Audio output using cpal
// Schedules PCM buffers at exact clock times and fires completion callbacks

use crate::error::PlayerError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Fired once after a scheduled buffer's playback completes.
pub type EndCallback = Box<dyn FnOnce() + Send + 'static>;

/// The audio sink consumed by the scheduler.
///
/// Buffers are planar PCM scheduled at exact start times on the output's own
/// running clock; back-to-back scheduling is the caller's responsibility.
pub trait AudioOutput: Send + Sync {
    /// Schedule `channel_data` (one sample array per channel, `sample_rate`
    /// samples per second) to start at `start_time` seconds on the output
    /// clock. `on_ended` fires once after the last sample has played.
    fn play(
        &self,
        channel_data: Vec<Vec<f32>>,
        sample_rate: u32,
        start_time: f64,
        on_ended: Option<EndCallback>,
    );

    /// The output device's running clock, in seconds.
    fn current_time(&self) -> f64;
}

/// One buffer waiting on, or progressing through, the device stream.
struct Scheduled {
    /// Device-clock frame at which the first sample plays.
    start_frame: u64,
    channels: Vec<Vec<f32>>,
    /// Source-rate to device-rate step per output frame.
    step: f64,
    /// Fractional read cursor in source samples.
    pos: f64,
    on_ended: Option<EndCallback>,
}

impl Scheduled {
    fn source_len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    fn done(&self, clock: u64) -> bool {
        self.start_frame <= clock && self.pos as usize >= self.source_len()
    }
}

struct SinkState {
    queue: Mutex<Vec<Scheduled>>,
    /// Device frames rendered since the stream started.
    clock: AtomicU64,
}

/// `AudioOutput` backed by the default cpal device.
///
/// The stream lives on a dedicated thread (cpal streams are not `Send`); the
/// handle shares only the schedule queue and the sample-counter clock with it.
pub struct CpalOutput {
    state: Arc<SinkState>,
    device_rate: u32,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new() -> Result<Self, PlayerError> {
        let state = Arc::new(SinkState {
            queue: Mutex::new(Vec::new()),
            clock: AtomicU64::new(0),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread_state = state.clone();
        let thread_shutdown = shutdown.clone();
        let thread = std::thread::spawn(move || {
            match build_device_stream(thread_state) {
                Ok((stream, device_rate)) => {
                    // Errors after this point only matter if the handle is
                    // still alive; a dropped receiver means we shut down.
                    let _ = ready_tx.send(Ok(device_rate));
                    while !thread_shutdown.load(Ordering::Relaxed) {
                        std::thread::park_timeout(Duration::from_millis(100));
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(PlayerError::OutputUnavailable(e)),
            Err(_) => {
                return Err(PlayerError::OutputUnavailable(
                    "audio thread exited during startup".into(),
                ))
            }
        };

        Ok(Self {
            state,
            device_rate,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn play(
        &self,
        channel_data: Vec<Vec<f32>>,
        sample_rate: u32,
        start_time: f64,
        on_ended: Option<EndCallback>,
    ) {
        let start_frame = (start_time * f64::from(self.device_rate)).round().max(0.0) as u64;
        let step = f64::from(sample_rate) / f64::from(self.device_rate);
        self.state.queue.lock().push(Scheduled {
            start_frame,
            channels: channel_data,
            step,
            pos: 0.0,
            on_ended,
        });
    }

    fn current_time(&self) -> f64 {
        self.state.clock.load(Ordering::Relaxed) as f64 / f64::from(self.device_rate)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

fn build_device_stream(state: Arc<SinkState>) -> Result<(Stream, u32), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("No output device available")?;
    let config = device
        .default_output_config()
        .map_err(|e| format!("Failed to get default output config: {e}"))?;
    let device_rate = config.sample_rate().0;
    let device_channels = config.channels() as usize;

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config.into(), state, device_channels)?
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config.into(), state, device_channels)?
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config.into(), state, device_channels)?
        }
        format => return Err(format!("Unsupported sample format: {format:?}")),
    };

    stream
        .play()
        .map_err(|e| format!("Failed to start stream: {e}"))?;
    Ok((stream, device_rate))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &cpal::Device,
    config: &StreamConfig,
    state: Arc<SinkState>,
    device_channels: usize,
) -> Result<Stream, String> {
    let channels = device_channels.max(1);
    let mut mix = vec![0.0f32; channels];
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut clock = state.clock.load(Ordering::Relaxed);
                let mut finished: Vec<EndCallback> = Vec::new();
                {
                    let mut queue = state.queue.lock();
                    let frames = data.len() / channels;
                    for fi in 0..frames {
                        for m in mix.iter_mut() {
                            *m = 0.0;
                        }
                        for s in queue.iter_mut() {
                            if s.start_frame > clock || s.channels.is_empty() {
                                continue;
                            }
                            let idx = s.pos as usize;
                            if idx >= s.source_len() {
                                continue;
                            }
                            for (ch, m) in mix.iter_mut().enumerate() {
                                let src = &s.channels[ch.min(s.channels.len() - 1)];
                                *m += src.get(idx).copied().unwrap_or(0.0);
                            }
                            s.pos += s.step;
                        }
                        for (ch, &m) in mix.iter().enumerate() {
                            data[fi * channels + ch] = T::from_sample(m);
                        }
                        clock += 1;
                    }
                    queue.retain_mut(|s| {
                        if s.done(clock) {
                            if let Some(cb) = s.on_ended.take() {
                                finished.push(cb);
                            }
                            false
                        } else {
                            true
                        }
                    });
                }
                state.clock.store(clock, Ordering::Relaxed);
                // Run completion callbacks outside the queue lock so they may
                // schedule follow-up buffers.
                for cb in finished {
                    cb();
                }
            },
            move |err| {
                log::error!("audio output error: {err}");
            },
            None,
        )
        .map_err(|e| format!("Failed to build output stream: {e}"))?;
    Ok(stream)
}
