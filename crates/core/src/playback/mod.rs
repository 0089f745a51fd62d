//! Transport state machine and background position tracking.
//!
//! Every transport field lives behind one mutex shared with the tracking
//! thread. Each call to `play` opens a new session with a fresh generation
//! number; the tracker only writes the position or notifies listeners while
//! the generation it was spawned with is still current, so a tracker that
//! lost a race with `stop`/`seek` cannot resurrect a stale position.

mod listener;
mod output;

use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::{AudioBuffer, AudioDecoder, LipsyncError, PlaybackConfig, Result};

pub use listener::{CompletionListener, PlaybackEvent, PositionListener};
pub use output::{AudioOutput, SilentOutput};

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "stopped"),
            TransportState::Playing => write!(f, "playing"),
            TransportState::Paused => write!(f, "paused"),
        }
    }
}

/// Sample bounds of one playback invocation. `end_sample: None` plays to the
/// end of the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackRange {
    pub start_sample: usize,
    pub end_sample: Option<usize>,
}

impl PlaybackRange {
    /// Exclusive end of the range for a buffer of `len` samples.
    pub fn end_for(&self, len: usize) -> usize {
        self.end_sample.map_or(len, |end| end.min(len))
    }
}

/// Wall-clock reference for the running session.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    started_at: Instant,
    start_sample: usize,
}

#[derive(Debug)]
struct Transport {
    buffer: Option<AudioBuffer>,
    state: TransportState,
    position: usize,
    range: PlaybackRange,
    anchor: Option<Anchor>,
    generation: u64,
}

impl Transport {
    fn effective_end(&self) -> usize {
        self.buffer
            .as_ref()
            .map_or(0, |buffer| self.range.end_for(buffer.len()))
    }

    /// Position extrapolated from the session anchor, capped at the range end.
    fn estimate(&self) -> usize {
        match (&self.anchor, &self.buffer) {
            (Some(anchor), Some(buffer)) => {
                let elapsed = anchor.started_at.elapsed().as_secs_f64();
                let advanced = (elapsed * f64::from(buffer.sample_rate())) as usize;
                anchor
                    .start_sample
                    .saturating_add(advanced)
                    .min(self.effective_end())
            }
            _ => self.position,
        }
    }

    fn seconds(&self, samples: usize) -> f64 {
        self.buffer.as_ref().map_or(0.0, |buffer| {
            (samples as f64 / f64::from(buffer.sample_rate())).min(buffer.duration_seconds())
        })
    }
}

#[derive(Clone, Default)]
struct Listeners {
    position: Option<Arc<dyn PositionListener>>,
    completion: Option<Arc<dyn CompletionListener>>,
}

enum Tick {
    Position(f64),
    Finished,
}

struct Shared {
    transport: Mutex<Transport>,
    listeners: Mutex<Listeners>,
    live_trackers: AtomicUsize,
}

impl Shared {
    fn lock_transport(&self) -> Result<MutexGuard<'_, Transport>> {
        self.transport
            .lock()
            .map_err(|_| LipsyncError::Poisoned("transport state"))
    }

    fn listeners(&self) -> Result<Listeners> {
        self.listeners
            .lock()
            .map(|listeners| listeners.clone())
            .map_err(|_| LipsyncError::Poisoned("playback listeners"))
    }

    /// One tracker step. `None` means the session is over and the tracker
    /// should exit without notifying anyone.
    fn poll(&self, generation: u64) -> Result<Option<Tick>> {
        let mut transport = self.lock_transport()?;
        if transport.state != TransportState::Playing || transport.generation != generation {
            return Ok(None);
        }

        let position = transport.estimate();
        transport.position = position;

        if position >= transport.effective_end() {
            transport.state = TransportState::Stopped;
            transport.anchor = None;
            tracing::debug!(generation, position, "playback reached end of range");
            return Ok(Some(Tick::Finished));
        }

        Ok(Some(Tick::Position(transport.seconds(position))))
    }

    fn is_current(&self, generation: u64) -> Result<bool> {
        let transport = self.lock_transport()?;
        Ok(transport.state == TransportState::Playing && transport.generation == generation)
    }
}

/// Decrements the live tracker count when the tracking thread exits.
struct LiveTracker(Arc<Shared>);

impl Drop for LiveTracker {
    fn drop(&mut self) {
        self.0.live_trackers.fetch_sub(1, Ordering::SeqCst);
    }
}

fn track(shared: Arc<Shared>, generation: u64, cancelled: Receiver<()>, interval: Duration) {
    let _live = LiveTracker(Arc::clone(&shared));

    loop {
        match cancelled.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let tick = match shared.poll(generation) {
            Ok(Some(tick)) => tick,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%err, generation, "position tracker stopping");
                break;
            }
        };

        let listeners = match shared.listeners() {
            Ok(listeners) => listeners,
            Err(err) => {
                tracing::warn!(%err, generation, "position tracker stopping");
                break;
            }
        };

        match tick {
            Tick::Position(seconds) => {
                // The listener lookup released the transport lock; skip the
                // tick if a pause or restart got in meanwhile.
                if !matches!(shared.is_current(generation), Ok(true)) {
                    break;
                }
                if let Some(listener) = &listeners.position {
                    listener.on_position(generation, seconds);
                }
            }
            Tick::Finished => {
                if let Some(listener) = &listeners.completion {
                    listener.on_finished(generation);
                }
                break;
            }
        }
    }
}

struct Tracker {
    handle: JoinHandle<()>,
    // Dropping the sender wakes the tracker out of its sleep.
    cancel: Sender<()>,
}

/// Plays one loaded [`AudioBuffer`] and tracks the playback position on a
/// background thread.
///
/// All methods take `&self` and are safe to call from any thread, including
/// from inside a listener callback running on the tracking thread.
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    output: Arc<dyn AudioOutput>,
    tracker: Mutex<Option<Tracker>>,
    poll_interval: Duration,
}

impl PlaybackEngine {
    /// Creates an engine that renders through [`SilentOutput`].
    pub fn new(config: &PlaybackConfig) -> Self {
        Self::with_output(config, Arc::new(SilentOutput))
    }

    pub fn with_output(config: &PlaybackConfig, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport: Mutex::new(Transport {
                    buffer: None,
                    state: TransportState::Stopped,
                    position: 0,
                    range: PlaybackRange::default(),
                    anchor: None,
                    generation: 0,
                }),
                listeners: Mutex::new(Listeners::default()),
                live_trackers: AtomicUsize::new(0),
            }),
            output,
            tracker: Mutex::new(None),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn set_position_listener(&self, listener: Arc<dyn PositionListener>) -> Result<()> {
        self.lock_listeners()?.position = Some(listener);
        Ok(())
    }

    pub fn set_completion_listener(&self, listener: Arc<dyn CompletionListener>) -> Result<()> {
        self.lock_listeners()?.completion = Some(listener);
        Ok(())
    }

    /// Replaces the loaded audio. Any session is ended and the transport is
    /// rewound with its range cleared.
    pub fn load(&self, buffer: AudioBuffer) -> Result<()> {
        self.interrupt(TransportState::Stopped)?;

        let mut transport = self.shared.lock_transport()?;
        tracing::info!(
            samples = buffer.len(),
            sample_rate = buffer.sample_rate(),
            "loaded audio buffer"
        );
        transport.buffer = Some(buffer);
        transport.state = TransportState::Stopped;
        transport.position = 0;
        transport.range = PlaybackRange::default();
        Ok(())
    }

    /// Decodes `path` and loads the result. A decode failure leaves the engine
    /// exactly as it was.
    pub fn load_file(&self, path: &Path, decoder: &dyn AudioDecoder) -> Result<AudioBuffer> {
        let buffer = decoder.decode(path)?;
        self.load(buffer.clone())?;
        Ok(buffer)
    }

    /// Starts playing from the current position towards the range end. Does
    /// nothing when no audio is loaded or the range is exhausted. While already
    /// playing, the session is restarted from the current estimate.
    pub fn play(&self) -> Result<()> {
        self.interrupt(TransportState::Paused)?;
        self.start_session()
    }

    /// Halts playback, keeping the position and the range end.
    pub fn pause(&self) -> Result<()> {
        if self.interrupt(TransportState::Paused)? {
            tracing::debug!(position = self.position_samples()?, "paused");
        }
        Ok(())
    }

    /// Halts playback, rewinds to the start and clears the range end. Calling
    /// it while already stopped leaves the position alone.
    pub fn stop(&self) -> Result<()> {
        let was_playing = self.interrupt(TransportState::Stopped)?;

        let mut transport = self.shared.lock_transport()?;
        if was_playing || transport.state == TransportState::Paused {
            transport.state = TransportState::Stopped;
            transport.position = 0;
            tracing::debug!("stopped");
        }
        transport.range = PlaybackRange::default();
        Ok(())
    }

    /// Moves to `seconds`, clamped to the buffer. A running session is
    /// stopped and restarted from the new position, which clears its range
    /// end so playback continues to the end of the buffer.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let was_playing = self.interrupt(TransportState::Paused)?;
        self.reposition(|transport, buffer| {
            transport.position = buffer.sample_at(seconds);
            if was_playing {
                transport.range.end_sample = None;
            }
        })?;

        if was_playing {
            self.start_session()?;
        }
        Ok(())
    }

    /// Plays from `seconds` to the end of the buffer.
    pub fn play_from(&self, seconds: f64) -> Result<()> {
        self.interrupt(TransportState::Paused)?;
        self.reposition(|transport, buffer| {
            transport.position = buffer.sample_at(seconds);
            transport.range.end_sample = None;
        })?;
        self.start_session()
    }

    /// Plays from the start of the buffer up to `seconds`.
    pub fn play_to(&self, seconds: f64) -> Result<()> {
        self.interrupt(TransportState::Paused)?;
        self.reposition(|transport, buffer| {
            transport.position = 0;
            transport.range.end_sample = Some(buffer.sample_at(seconds));
        })?;
        self.start_session()
    }

    pub fn toggle(&self) -> Result<()> {
        if self.state()? == TransportState::Playing {
            self.pause()
        } else {
            self.play()
        }
    }

    pub fn state(&self) -> Result<TransportState> {
        Ok(self.shared.lock_transport()?.state)
    }

    pub fn is_playing(&self) -> Result<bool> {
        Ok(self.state()? == TransportState::Playing)
    }

    /// Current position in samples; estimated live while playing.
    pub fn position_samples(&self) -> Result<usize> {
        let transport = self.shared.lock_transport()?;
        Ok(if transport.state == TransportState::Playing {
            transport.estimate()
        } else {
            transport.position
        })
    }

    pub fn position_seconds(&self) -> Result<f64> {
        let transport = self.shared.lock_transport()?;
        let samples = if transport.state == TransportState::Playing {
            transport.estimate()
        } else {
            transport.position
        };
        Ok(transport.seconds(samples))
    }

    pub fn duration_seconds(&self) -> Result<f64> {
        let transport = self.shared.lock_transport()?;
        Ok(transport
            .buffer
            .as_ref()
            .map_or(0.0, AudioBuffer::duration_seconds))
    }

    pub fn range(&self) -> Result<PlaybackRange> {
        Ok(self.shared.lock_transport()?.range)
    }

    /// Generation of the most recent session; 0 before the first `play`.
    pub fn generation(&self) -> Result<u64> {
        Ok(self.shared.lock_transport()?.generation)
    }

    pub fn buffer(&self) -> Result<Option<AudioBuffer>> {
        Ok(self.shared.lock_transport()?.buffer.clone())
    }

    /// Applies `update` to the transport if audio is loaded.
    fn reposition<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut Transport, &AudioBuffer),
    {
        let mut transport = self.shared.lock_transport()?;
        if let Some(buffer) = transport.buffer.clone() {
            update(&mut *transport, &buffer);
        }
        Ok(())
    }

    /// Ends the running session, if any, moving to `next` with the estimated
    /// position written back. Returns whether a session was running.
    fn interrupt(&self, next: TransportState) -> Result<bool> {
        let was_playing = {
            let mut transport = self.shared.lock_transport()?;
            let playing = transport.state == TransportState::Playing;
            if playing {
                transport.position = transport.estimate();
                transport.anchor = None;
                transport.state = next;
                self.output.halt();
            }
            playing
        };

        self.reap_tracker()?;
        Ok(was_playing)
    }

    fn start_session(&self) -> Result<()> {
        let generation = {
            let mut transport = self.shared.lock_transport()?;
            if transport.state == TransportState::Playing {
                tracing::debug!(
                    generation = transport.generation,
                    "play ignored: session already running"
                );
                return Ok(());
            }
            let Some(buffer) = transport.buffer.clone() else {
                tracing::debug!("play ignored: no audio loaded");
                return Ok(());
            };

            let start = transport.position;
            let end = transport.effective_end();
            if start >= end {
                tracing::debug!(start, end, "play ignored: range exhausted");
                return Ok(());
            }

            self.output.start(&buffer, start..end)?;

            transport.generation += 1;
            transport.range.start_sample = start;
            transport.anchor = Some(Anchor {
                started_at: Instant::now(),
                start_sample: start,
            });
            transport.state = TransportState::Playing;
            tracing::debug!(generation = transport.generation, start, end, "playing");
            transport.generation
        };

        self.spawn_tracker(generation)
    }

    fn spawn_tracker(&self, generation: u64) -> Result<()> {
        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let interval = self.poll_interval;

        self.shared.live_trackers.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(format!("position-tracker-{generation}"))
            .spawn(move || track(shared, generation, cancelled, interval));

        match spawned {
            Ok(handle) => {
                *self.lock_tracker()? = Some(Tracker { handle, cancel });
                Ok(())
            }
            Err(err) => {
                self.shared.live_trackers.fetch_sub(1, Ordering::SeqCst);
                self.interrupt(TransportState::Paused)?;
                Err(err.into())
            }
        }
    }

    /// Signals the tracker and waits for it to exit, unless the caller is the
    /// tracker itself, in which case it is left to notice the cancellation on
    /// its own once the current callback returns.
    fn reap_tracker(&self) -> Result<()> {
        let Some(tracker) = self.lock_tracker()?.take() else {
            return Ok(());
        };

        drop(tracker.cancel);
        if tracker.handle.thread().id() == thread::current().id() {
            return Ok(());
        }

        if tracker.handle.join().is_err() {
            tracing::warn!("position tracker panicked");
        }
        Ok(())
    }

    fn lock_tracker(&self) -> Result<MutexGuard<'_, Option<Tracker>>> {
        self.tracker
            .lock()
            .map_err(|_| LipsyncError::Poisoned("position tracker"))
    }

    fn lock_listeners(&self) -> Result<MutexGuard<'_, Listeners>> {
        self.shared
            .listeners
            .lock()
            .map_err(|_| LipsyncError::Poisoned("playback listeners"))
    }

    #[cfg(test)]
    fn live_trackers(&self) -> usize {
        self.shared.live_trackers.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if let Err(err) = self.interrupt(TransportState::Stopped) {
            tracing::warn!(%err, "failed to stop playback on drop");
        }
    }
}

impl fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("PlaybackEngine");
        if let Ok(transport) = self.shared.transport.try_lock() {
            debug
                .field("state", &transport.state)
                .field("position", &transport.position)
                .field("range", &transport.range)
                .field("generation", &transport.generation);
        }
        debug.field("poll_interval", &self.poll_interval).finish()
    }
}
