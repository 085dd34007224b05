// Playback scheduler
//
// Buffers are scheduled in pairs: buffer 1 is pre-scheduled to start exactly
// when buffer 0 ends (computed from decoded sample counts, never measured),
// and buffer 0's completion callback triggers the tick that schedules the
// pair two buffers ahead. Each completing buffer advances the playhead and
// publishes meter levels. Cancellation is by generation id: every
// continuation re-checks the session before acting and stale work is a no-op.

use crate::audio::decoder::FrameDecoder;
use crate::audio::output::{AudioOutput, EndCallback};
use crate::config::PlayerConfig;
use crate::cue::CueIndex;
use crate::error::PlayerError;
use crate::position::{pcm_to_db, ClipRegion, PositionReport, PositionSync};
use crate::store::FrameStore;
use crate::stream::client::RangeSource;
use crate::stream::fetch::RangeFetcher;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Control state of the current playback attempt.
#[derive(Debug)]
struct Session {
    generation: u32,
    frame: usize,
    /// Exclusive end frame for bounded play; `None` plays to track end.
    end_frame: Option<usize>,
    playing: bool,
    /// Rate handed to the output; differs from the native rate only when the
    /// user reinterprets playback speed.
    playback_rate: u32,
}

/// State shared between the control handle, the scheduler task, and buffer
/// completion callbacks.
struct Shared {
    session: Mutex<Session>,
    store: Mutex<FrameStore>,
    position: PositionSync,
}

/// Captured arguments for one scheduling tick. Continuations re-send these
/// through the tick channel instead of recursing.
#[derive(Debug, Clone)]
struct TickArgs {
    frame: usize,
    generation: u32,
    end_frame: Option<usize>,
    fetch_from: usize,
    /// Output-clock start for the next pair; `None` on the first pair of a
    /// session (read from the device clock).
    start_time: Option<f64>,
    tick: u64,
    /// Consecutive readiness misses at the current frame.
    misses: u32,
}

/// Streaming player for one sound.
///
/// Owns the cue index and frame store for the session; playback intent goes
/// in through [`play`](Self::play)/[`pause`](Self::pause)/[`seek`](Self::seek)
/// and position comes back out through [`subscribe`](Self::subscribe).
pub struct Player {
    config: PlayerConfig,
    cues: Arc<CueIndex>,
    shared: Arc<Shared>,
    tick_tx: mpsc::UnboundedSender<TickArgs>,
}

impl Player {
    /// Load the cue index for `sound_id` and spawn the scheduler task.
    ///
    /// Index failures are fatal here; no playback is possible for the sound
    /// until a later connect attempt succeeds.
    pub async fn connect(
        sound_id: impl Into<String>,
        source: Arc<dyn RangeSource>,
        output: Arc<dyn AudioOutput>,
        decoder: Box<dyn FrameDecoder>,
        config: PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let sound_id = sound_id.into();
        let cues = Arc::new(CueIndex::load(source.as_ref(), &sound_id, &config).await?);
        let shared = Arc::new(Shared {
            session: Mutex::new(Session {
                generation: 0,
                frame: 0,
                end_frame: None,
                playing: false,
                playback_rate: config.sample_rate,
            }),
            store: Mutex::new(FrameStore::new(cues.frame_count())),
            position: PositionSync::new(cues.duration(), config.db_floor, config.channels),
        });

        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            config: config.clone(),
            cues: cues.clone(),
            shared: shared.clone(),
            fetcher: RangeFetcher::new(
                source,
                sound_id,
                config.fetch_window,
                config.pending_retry,
            ),
            decoder,
            output,
            tick_tx: tick_tx.downgrade(),
        };
        tokio::spawn(scheduler.run(tick_rx));

        Ok(Self {
            config,
            cues,
            shared,
            tick_tx,
        })
    }

    /// Resume from the current cursor, playing to the end of the track.
    pub fn play(&self) {
        let frame = self.shared.session.lock().frame;
        self.start(frame, None);
    }

    pub fn play_at_frame(&self, frame: usize) {
        self.start(frame, None);
    }

    pub fn play_at(&self, seconds: f64) {
        self.start(self.cues.frame_at(seconds), None);
    }

    /// Play exactly `[from, to)`.
    pub fn play_range(&self, from: usize, to: usize) {
        self.start(from, Some(to));
    }

    pub fn play_region(&self, region: ClipRegion) {
        self.start(region.start_frame, Some(region.end_frame));
    }

    /// Stop scheduling; buffers already handed to the output finish naturally
    /// but their continuations observe the stopped session and do nothing.
    pub fn pause(&self) {
        let time = {
            let mut session = self.shared.session.lock();
            session.playing = false;
            self.cues.time_at(session.frame)
        };
        self.shared.position.report(time, true, None);
    }

    pub fn toggle(&self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// While playing, restarts at the target (same end bound); while stopped,
    /// only moves the reported cursor.
    pub fn seek(&self, seconds: f64) {
        self.seek_frame(self.cues.frame_at(seconds));
    }

    pub fn seek_frame(&self, frame: usize) {
        let frame = frame.min(self.cues.frame_count().saturating_sub(1));
        let resume = {
            let mut session = self.shared.session.lock();
            if session.playing {
                Some(session.end_frame)
            } else {
                session.frame = frame;
                None
            }
        };
        match resume {
            Some(end) => self.start(frame, end),
            None => self
                .shared
                .position
                .report(self.cues.time_at(frame), true, None),
        }
    }

    /// Reinterpret playback speed by handing a different sample rate to the
    /// output. Frame addressing stays at the native rate.
    pub fn set_playback_rate(&self, hz: u32) {
        self.shared.session.lock().playback_rate = hz.max(1);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.session.lock().playing
    }

    pub fn current_frame(&self) -> usize {
        self.shared.session.lock().frame
    }

    pub fn position_secs(&self) -> f64 {
        self.cues.time_at(self.current_frame())
    }

    pub fn duration_secs(&self) -> f64 {
        self.cues.duration()
    }

    pub fn cues(&self) -> &CueIndex {
        &self.cues
    }

    /// Position/level updates for the UI layer.
    pub fn subscribe(&self) -> watch::Receiver<PositionReport> {
        self.shared.position.subscribe()
    }

    pub fn snapshot(&self) -> PositionReport {
        self.shared.position.snapshot()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Begin a new session: fresh generation id, then the first tick.
    fn start(&self, from: usize, end: Option<usize>) {
        let from = from.min(self.cues.frame_count().saturating_sub(1));
        let generation = rand::random::<u32>();
        {
            let mut session = self.shared.session.lock();
            session.generation = generation;
            session.frame = from;
            session.end_frame = end;
            session.playing = true;
        }
        self.shared
            .position
            .report(self.cues.time_at(from), false, None);
        let _ = self.tick_tx.send(TickArgs {
            frame: from,
            generation,
            end_frame: end,
            fetch_from: from,
            start_time: None,
            tick: 0,
            misses: 0,
        });
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        // Dropping the handle ends the session; the scheduler task exits once
        // the tick channel closes and in-flight continuations go stale.
        self.shared.session.lock().playing = false;
    }
}

/// The scheduling loop. Owns the decoder; all frame-store and session
/// mutation during a tick happens on this single task.
///
/// Holds only a weak tick sender: the strong sender lives on the `Player`
/// handle, so dropping the handle closes the channel and ends the task.
struct Scheduler {
    config: PlayerConfig,
    cues: Arc<CueIndex>,
    shared: Arc<Shared>,
    fetcher: RangeFetcher,
    decoder: Box<dyn FrameDecoder>,
    output: Arc<dyn AudioOutput>,
    tick_tx: mpsc::WeakUnboundedSender<TickArgs>,
}

impl Scheduler {
    async fn run(mut self, mut tick_rx: mpsc::UnboundedReceiver<TickArgs>) {
        while let Some(args) = tick_rx.recv().await {
            self.tick(args).await;
        }
    }

    fn session_live(&self, generation: u32) -> bool {
        let session = self.shared.session.lock();
        session.generation == generation && session.playing
    }

    /// Stop the session if `generation` is still current and report it.
    fn stop_session(&self, generation: u32, at_frame: usize) {
        {
            let mut session = self.shared.session.lock();
            if session.generation != generation {
                return;
            }
            session.playing = false;
            session.frame = at_frame;
        }
        self.shared
            .position
            .report(self.cues.time_at(at_frame), true, None);
    }

    async fn tick(&mut self, mut args: TickArgs) {
        let frame_count = self.cues.frame_count();
        let buffer_frames = self.config.buffer_frames;
        let end_limit = args.end_frame.unwrap_or(frame_count).min(frame_count);

        // Stale, paused, or completed sessions terminate here: no scheduling,
        // no recursion.
        {
            let mut session = self.shared.session.lock();
            if args.generation != session.generation || !session.playing {
                return;
            }
            if args.frame >= end_limit {
                drop(session);
                self.stop_session(args.generation, end_limit.min(frame_count));
                return;
            }
            session.frame = args.frame;
        }

        // Advance the fetch window on cadence. Failures are logged and left
        // to the pending-retry policy; the window cursor still advances so
        // fetching keeps pace with playback.
        if args.tick % self.config.fetch_every == 0 {
            let from = args.fetch_from;
            if let Err(e) = self
                .fetcher
                .ensure_range(&self.shared.store, &self.cues, from)
                .await
            {
                log::warn!("range fetch from frame {from} failed, will retry: {e}");
            }
            args.fetch_from = from + self.config.fetch_window;
            if !self.session_live(args.generation) {
                // Superseded while the fetch was in flight.
                return;
            }
        }
        args.tick += 1;

        // Readiness of the farthest frame needed by the upcoming pair.
        let probe = (args.frame + buffer_frames).min(frame_count - 1);
        let probe_ready = self.shared.store.lock().is_ready(probe);
        if !probe_ready {
            if probe >= frame_count - 1 {
                // The unready frame is the last of the track: end of track,
                // not an error.
                self.stop_session(args.generation, args.frame);
                return;
            }
            if args.misses < self.config.miss_retry_limit {
                log::debug!("miss {probe} {}", args.tick);
                args.misses += 1;
                let tick_tx = self.tick_tx.clone();
                let backoff = self.config.retry_backoff;
                tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    if let Some(tick_tx) = tick_tx.upgrade() {
                        let _ = tick_tx.send(args);
                    }
                });
                return;
            }
            log::warn!(
                "frame {probe} still unavailable after {} retries, playing through the gap",
                args.misses
            );
        }
        args.misses = 0;

        // Decode the pair first so both durations are known exactly before
        // anything is scheduled.
        let start_time = match args.start_time {
            Some(t) => t,
            None => self.output.current_time(),
        };
        let playback_rate = self.shared.session.lock().playback_rate;

        struct PairBuffer {
            cursor_after: usize,
            channel_data: Vec<Vec<f32>>,
            levels: Vec<f32>,
            duration: f64,
        }

        let mut pair: Vec<PairBuffer> = Vec::with_capacity(2);
        for half in 0..2 {
            let buf_from = args.frame + half * buffer_frames;
            if buf_from >= end_limit {
                break;
            }
            let buf_to = (buf_from + buffer_frames).min(end_limit);
            let payloads: Vec<Option<Bytes>> = {
                let store = self.shared.store.lock();
                (buf_from..buf_to).map(|f| store.payload(f)).collect()
            };
            let block = self.decoder.decode_frames(&payloads);
            let duration = block.samples_decoded as f64 / f64::from(playback_rate);
            let levels = block
                .channel_data
                .iter()
                .map(|ch| pcm_to_db(ch, self.config.db_floor))
                .collect();
            pair.push(PairBuffer {
                cursor_after: buf_to,
                channel_data: block.channel_data,
                levels,
                duration,
            });
        }
        if !self.session_live(args.generation) {
            return;
        }

        let pair_duration: f64 = pair.iter().map(|b| b.duration).sum();
        let next_frame = args.frame + 2 * buffer_frames;
        let final_pair = next_frame >= end_limit;
        let last = pair.len() - 1;

        let mut buffer_start = start_time;
        for (i, buffer) in pair.into_iter().enumerate() {
            let on_ended = self.completion(
                &args,
                i == 0 && !final_pair,
                final_pair && i == last,
                buffer.cursor_after,
                buffer.levels,
                next_frame,
                start_time + pair_duration,
            );
            self.output.play(
                buffer.channel_data,
                playback_rate,
                buffer_start,
                Some(on_ended),
            );
            buffer_start += buffer.duration;
        }
    }

    /// Completion callback for one scheduled buffer: advance the playhead,
    /// publish levels, and (for the leading buffer of a non-final pair) send
    /// the tick for the pair two buffers ahead.
    fn completion(
        &self,
        args: &TickArgs,
        recurse: bool,
        ends_session: bool,
        cursor_after: usize,
        levels: Vec<f32>,
        next_frame: usize,
        next_start: f64,
    ) -> EndCallback {
        let shared = self.shared.clone();
        let cues = self.cues.clone();
        let tick_tx = self.tick_tx.clone();
        let generation = args.generation;
        let next_args = TickArgs {
            frame: next_frame,
            generation,
            end_frame: args.end_frame,
            fetch_from: args.fetch_from,
            start_time: Some(next_start),
            tick: args.tick,
            misses: 0,
        };
        Box::new(move || {
            {
                let mut session = shared.session.lock();
                if session.generation != generation || !session.playing {
                    // Stale continuation: superseded or paused.
                    return;
                }
                session.frame = cursor_after;
                if ends_session {
                    session.playing = false;
                }
            }
            shared
                .position
                .report(cues.time_at(cursor_after), ends_session, Some(levels));
            if recurse {
                if let Some(tick_tx) = tick_tx.upgrade() {
                    let _ = tick_tx.send(next_args);
                }
            }
        })
    }
}
