//! Bridge between the external phoneme recognizer and [`Timeline`].
//!
//! The recognizer is handed to the bridge fully constructed and lives as long
//! as the bridge does. Asynchronous requests are single-flight: a request made
//! while another is running is dropped, not queued.

mod ipa;

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Command,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::Sender;

use crate::{LipsyncError, PhonemeStep, RecognizerConfig, Result, Timeline};

pub use ipa::ipa_to_mouth_shape;

/// Produces the raw `start duration symbol` text stream for an audio file.
pub trait Recognizer: Send + Sync {
    fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// Receives the outcome of [`RecognitionBridge::recognize_async`]. Exactly one
/// of the two methods is called per accepted request, on the worker thread.
pub trait RecognitionListener: Send + Sync {
    fn on_complete(&self, timeline: Timeline);
    fn on_error(&self, error: LipsyncError);
}

impl RecognitionListener for Sender<Result<Timeline>> {
    fn on_complete(&self, timeline: Timeline) {
        let _ = self.send(Ok(timeline));
    }

    fn on_error(&self, error: LipsyncError) {
        let _ = self.send(Err(error));
    }
}

/// One entry of the recognizer stream, before shape mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPhoneme {
    pub start_time: f64,
    pub duration: f64,
    pub symbol: String,
}

/// Parses recognizer output. Lines without at least three tokens, or whose
/// times are non-numeric, negative or non-finite, are skipped.
pub fn parse_raw_phonemes(output: &str) -> Vec<RawPhoneme> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let start_time = parse_time(tokens.next()?)?;
            let duration = parse_time(tokens.next()?)?;
            let symbol = tokens.next()?.to_string();
            Some(RawPhoneme {
                start_time,
                duration,
                symbol,
            })
        })
        .collect()
}

fn parse_time(token: &str) -> Option<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|time| time.is_finite() && *time >= 0.0)
}

/// Maps each raw phoneme through the IPA table, keeping recognizer order.
pub fn build_timeline(phonemes: &[RawPhoneme]) -> Timeline {
    phonemes
        .iter()
        .map(|phoneme| {
            PhonemeStep::new(
                phoneme.start_time,
                phoneme.duration,
                ipa_to_mouth_shape(&phoneme.symbol),
            )
        })
        .collect()
}

/// Runs an external program and reads the phoneme stream from its stdout.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
}

impl CommandRecognizer {
    pub fn new(config: &RecognizerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl Recognizer for CommandRecognizer {
    fn transcribe(&self, audio_path: &Path) -> Result<String> {
        tracing::debug!(program = %self.program, path = %audio_path.display(), "running recognizer");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(audio_path)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LipsyncError::Recognition(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|err| LipsyncError::Recognition(format!("output is not UTF-8: {err}")))
    }
}

/// Clears the in-flight flag when the worker ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RecognitionBridge<R> {
    recognizer: Arc<R>,
    in_flight: Arc<AtomicBool>,
}

impl<R: Recognizer + 'static> RecognitionBridge<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    /// True while an asynchronous request is running.
    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Blocking recognition of `audio_path`.
    pub fn recognize(&self, audio_path: &Path) -> Result<Timeline> {
        recognize_with(self.recognizer.as_ref(), audio_path)
    }

    /// Starts recognition on a worker thread and reports to `listener`.
    ///
    /// Returns `Ok(None)` without touching the listener when a request is
    /// already in flight.
    pub fn recognize_async<L>(
        &self,
        audio_path: impl Into<PathBuf>,
        listener: L,
    ) -> Result<Option<JoinHandle<()>>>
    where
        L: RecognitionListener + 'static,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("recognition already running, request ignored");
            return Ok(None);
        }

        let guard = InFlight(Arc::clone(&self.in_flight));
        let recognizer = Arc::clone(&self.recognizer);
        let audio_path = audio_path.into();

        let handle = thread::Builder::new()
            .name("recognizer".into())
            .spawn(move || {
                let _guard = guard;
                match recognize_with(recognizer.as_ref(), &audio_path) {
                    Ok(timeline) => listener.on_complete(timeline),
                    Err(err) => {
                        tracing::warn!(%err, path = %audio_path.display(), "recognition failed");
                        listener.on_error(err);
                    }
                }
            })?;

        Ok(Some(handle))
    }
}

fn recognize_with<R: Recognizer + ?Sized>(recognizer: &R, audio_path: &Path) -> Result<Timeline> {
    let output = recognizer.transcribe(audio_path)?;
    let phonemes = parse_raw_phonemes(&output);
    let timeline = build_timeline(&phonemes);
    tracing::info!(
        path = %audio_path.display(),
        steps = timeline.len(),
        "recognition finished"
    );
    Ok(timeline)
}

impl<R: fmt::Debug> fmt::Debug for RecognitionBridge<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionBridge")
            .field("recognizer", &self.recognizer)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use crossbeam_channel::Receiver;

    use super::*;
    use crate::MouthShape;

    struct FixedRecognizer(&'static str);

    impl Recognizer for FixedRecognizer {
        fn transcribe(&self, _audio_path: &Path) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    /// Blocks every call until the test opens the gate.
    struct GatedRecognizer {
        gate: Receiver<()>,
        calls: AtomicUsize,
    }

    impl Recognizer for GatedRecognizer {
        fn transcribe(&self, _audio_path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| LipsyncError::msg("gate never opened"))?;
            Ok("0.0 0.1 m".to_string())
        }
    }

    struct FailingRecognizer;

    impl Recognizer for FailingRecognizer {
        fn transcribe(&self, _audio_path: &Path) -> Result<String> {
            Err(LipsyncError::Recognition("model missing".to_string()))
        }
    }

    struct PanickingRecognizer;

    impl Recognizer for PanickingRecognizer {
        fn transcribe(&self, _audio_path: &Path) -> Result<String> {
            panic!("recognizer crashed");
        }
    }

    #[test]
    fn parses_recognizer_stream_leniently() {
        let raw = parse_raw_phonemes("0.210 0.045 h\n\ngarbage\n0.5 x ə\n0.300 0.045 ɛ extra\n");

        assert_eq!(
            raw,
            vec![
                RawPhoneme {
                    start_time: 0.21,
                    duration: 0.045,
                    symbol: "h".to_string(),
                },
                RawPhoneme {
                    start_time: 0.3,
                    duration: 0.045,
                    symbol: "ɛ".to_string(),
                },
            ]
        );
    }

    #[test]
    fn out_of_range_times_are_skipped() {
        let raw = parse_raw_phonemes(
            "inf 0.1 m\n0.0 NaN m\n-0.5 0.1 m\n0.2 -0.1 m\n0.0 infinity m\n0.4 0.1 a\n",
        );

        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].symbol, "a");
    }

    #[test]
    fn recognizer_stream_with_bad_times_still_exports() {
        let bridge = RecognitionBridge::new(FixedRecognizer(
            "inf 0.1 m\n0.0 NaN m\n-1.0 0.5 m\n0.0 0.1 m\n0.1 0.1 o\n",
        ));
        let timeline = bridge.recognize(Path::new("speech.wav")).unwrap();
        assert_eq!(timeline.len(), 2);

        let reloaded = Timeline::deserialize(&timeline.serialize());
        assert_eq!(reloaded, timeline);

        let sheet = timeline.export_frame_sheet(10).unwrap();
        assert_eq!(sheet.to_string(), "MohoSwitch1\n1 MBP\n2 O");
    }

    #[test]
    fn huge_recognizer_times_fail_export_cleanly() {
        let timeline = build_timeline(&parse_raw_phonemes("0.0 1e300 m\n1e12 0.1 o\n"));
        assert_eq!(timeline.len(), 2);

        let err = timeline.export_frame_sheet(24).unwrap_err();
        assert!(matches!(err, LipsyncError::InvalidInput(_)));
    }

    #[test]
    fn blocking_recognition_maps_symbols() {
        let bridge = RecognitionBridge::new(FixedRecognizer("0.00 0.10 m\n0.10 0.20 æ\n0.30 0.05 q"));
        let timeline = bridge.recognize(Path::new("speech.wav")).unwrap();

        let shapes: Vec<&MouthShape> = timeline.iter().map(|step| &step.mouth_shape).collect();
        assert_eq!(shapes, vec![&MouthShape::Mbp, &MouthShape::Ai, &MouthShape::Rest]);
        assert!((timeline.steps()[1].start_time - 0.1).abs() < 1e-9);
    }

    #[test]
    fn second_async_request_is_dropped_while_first_runs() {
        let (open, gate) = crossbeam_channel::unbounded();
        let bridge = RecognitionBridge::new(GatedRecognizer {
            gate,
            calls: AtomicUsize::new(0),
        });
        let (first_tx, first_rx) = crossbeam_channel::unbounded::<Result<Timeline>>();
        let (second_tx, second_rx) = crossbeam_channel::unbounded::<Result<Timeline>>();

        let handle = bridge
            .recognize_async("first.wav", first_tx)
            .unwrap()
            .expect("first request should start");
        assert!(bridge.is_processing());

        let dropped = bridge.recognize_async("second.wav", second_tx).unwrap();
        assert!(dropped.is_none());

        open.send(()).unwrap();
        handle.join().unwrap();

        let result = first_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result.unwrap().len(), 1);
        assert!(first_rx.try_recv().is_err());
        assert!(second_rx.try_recv().is_err());
        assert_eq!(bridge.recognizer().calls.load(Ordering::SeqCst), 1);
        assert!(!bridge.is_processing());
    }

    #[test]
    fn errors_reach_the_listener_and_release_the_guard() {
        let bridge = RecognitionBridge::new(FailingRecognizer);
        let (tx, rx) = crossbeam_channel::unbounded::<Result<Timeline>>();

        bridge
            .recognize_async("speech.wav", tx.clone())
            .unwrap()
            .unwrap()
            .join()
            .unwrap();

        let err = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap_err();
        assert!(matches!(err, LipsyncError::Recognition(_)));
        assert!(!bridge.is_processing());
        assert!(bridge.recognize_async("again.wav", tx).unwrap().is_some());
    }

    #[test]
    fn panicking_recognizer_still_releases_the_guard() {
        let bridge = RecognitionBridge::new(PanickingRecognizer);
        let (tx, rx) = crossbeam_channel::unbounded::<Result<Timeline>>();

        let handle = bridge.recognize_async("speech.wav", tx).unwrap().unwrap();
        assert!(handle.join().is_err());

        assert!(!bridge.is_processing());
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_recognizer_reads_stdout() {
        let recognizer = CommandRecognizer::new(&RecognizerConfig {
            program: "echo".to_string(),
            args: vec!["0.0 0.1 m".to_string()],
        });

        let timeline = RecognitionBridge::new(recognizer)
            .recognize(Path::new("clip.wav"))
            .unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.steps()[0].mouth_shape, MouthShape::Mbp);
    }

    #[cfg(unix)]
    #[test]
    fn command_recognizer_reports_failed_exit() {
        let recognizer = CommandRecognizer::new(&RecognizerConfig {
            program: "false".to_string(),
            args: Vec::new(),
        });

        let err = recognizer.transcribe(Path::new("clip.wav")).unwrap_err();
        assert!(matches!(err, LipsyncError::Recognition(_)));
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let recognizer = CommandRecognizer::new(&RecognizerConfig {
            program: "definitely-not-a-recognizer-binary".to_string(),
            args: Vec::new(),
        });

        let err = recognizer.transcribe(Path::new("clip.wav")).unwrap_err();
        assert!(matches!(err, LipsyncError::Io(_)));
    }
}
