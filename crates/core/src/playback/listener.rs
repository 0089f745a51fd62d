use crossbeam_channel::Sender;

/// Receives the estimated playback position while a session is running.
///
/// Calls arrive on the tracking thread. Implementations may call back into
/// the engine (for example to pause), but must not block for long since the
/// next poll waits for them.
///
/// A call already under way when another thread pauses or seeks may still
/// land; it carries the old generation and always completes before that
/// `pause`/`seek` returns.
pub trait PositionListener: Send + Sync {
    fn on_position(&self, generation: u64, seconds: f64);
}

/// Told once per session when playback runs off the end of its range.
pub trait CompletionListener: Send + Sync {
    fn on_finished(&self, generation: u64);
}

/// Channel message carrying either notification, tagged with the session
/// generation it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Position { generation: u64, seconds: f64 },
    Finished { generation: u64 },
}

impl PlaybackEvent {
    pub fn generation(&self) -> u64 {
        match self {
            PlaybackEvent::Position { generation, .. } | PlaybackEvent::Finished { generation } => {
                *generation
            }
        }
    }
}

impl PositionListener for Sender<PlaybackEvent> {
    fn on_position(&self, generation: u64, seconds: f64) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.send(PlaybackEvent::Position {
            generation,
            seconds,
        });
    }
}

impl CompletionListener for Sender<PlaybackEvent> {
    fn on_finished(&self, generation: u64) {
        let _ = self.send(PlaybackEvent::Finished { generation });
    }
}
