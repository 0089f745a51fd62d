//! Core library for speech-driven lip-sync animation.
//!
//! Audio is decoded into an [`AudioBuffer`] and played through the
//! [`PlaybackEngine`], which tracks the position on a background thread. The
//! [`RecognitionBridge`] turns an external recognizer's phoneme stream into a
//! [`Timeline`] of mouth shapes that can be queried at the playback position
//! and exported as a per-frame [`FrameSheet`].

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod recognition;
pub mod timeline;
pub mod waveform;

pub use audio::{AudioBuffer, AudioDecoder, WavDecoder};
pub use config::{AppConfig, ExportConfig, PlaybackConfig, RecognizerConfig, WaveformConfig};
pub use error::{LipsyncError, Result};
pub use playback::{
    AudioOutput, CompletionListener, PlaybackEngine, PlaybackEvent, PlaybackRange,
    PositionListener, SilentOutput, TransportState,
};
pub use recognition::{
    build_timeline, ipa_to_mouth_shape, parse_raw_phonemes, CommandRecognizer, RawPhoneme,
    RecognitionBridge, RecognitionListener, Recognizer,
};
pub use timeline::{
    FrameEntry, FrameSheet, MouthShape, PhonemeStep, ShapeDisplay, Timeline, FRAME_SHEET_HEADER,
    MAX_FRAME,
};
pub use waveform::{
    cursor_fraction, display_columns, format_timestamp, grid_interval, grid_lines,
    position_at_fraction, WaveformPeaks,
};
