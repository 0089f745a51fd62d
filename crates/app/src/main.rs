use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use lipsync_core::{
    display_columns, format_timestamp, AppConfig, AudioDecoder, CommandRecognizer, LipsyncError,
    MouthShape, PlaybackEngine, PlaybackEvent, RecognitionBridge, Result, Timeline, WavDecoder,
    WaveformPeaks,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Recognize {
            audio,
            output,
            sheet,
            fps,
        } => run_recognize(
            &config,
            &audio,
            output.as_deref(),
            sheet.as_deref(),
            fps.unwrap_or(config.export.fps),
        ),
        Commands::Export {
            timeline,
            output,
            fps,
        } => run_export(&timeline, &output, fps.unwrap_or(config.export.fps)),
        Commands::Play {
            audio,
            timeline,
            from,
            to,
        } => run_play(&config, &audio, timeline.as_deref(), from, to),
        Commands::Peaks { audio, width } => run_peaks(&config, &audio, width),
    }
}

fn run_recognize(
    config: &AppConfig,
    audio: &Path,
    output: Option<&Path>,
    sheet: Option<&Path>,
    fps: u32,
) -> Result<()> {
    tracing::info!(?audio, program = %config.recognizer.program, "processing audio");

    let bridge = RecognitionBridge::new(CommandRecognizer::new(&config.recognizer));
    let (tx, rx) = crossbeam_channel::bounded::<Result<Timeline>>(1);
    if bridge.recognize_async(audio, tx)?.is_none() {
        return Err(LipsyncError::msg("recognition is already running"));
    }

    let timeline = rx
        .recv()
        .map_err(|_| LipsyncError::msg("recognizer stopped without reporting a result"))??;

    match output {
        Some(path) => {
            timeline.save(path)?;
            tracing::info!(?path, steps = timeline.len(), "saved timeline");
        }
        None => println!("{}", timeline.serialize()),
    }

    if let Some(path) = sheet {
        timeline.export_frame_sheet(fps)?.save(path)?;
        tracing::info!(?path, fps, "exported frame sheet");
    }
    Ok(())
}

fn run_export(timeline: &Path, output: &Path, fps: u32) -> Result<()> {
    let timeline = Timeline::load(timeline)?;
    let sheet = timeline.export_frame_sheet(fps)?;
    sheet.save(output)?;
    tracing::info!(
        ?output,
        fps,
        steps = timeline.len(),
        frames = sheet.entries().len(),
        "exported frame sheet"
    );
    Ok(())
}

fn run_play(
    config: &AppConfig,
    audio: &Path,
    timeline: Option<&Path>,
    from: Option<f64>,
    to: Option<f64>,
) -> Result<()> {
    let timeline = match timeline {
        Some(path) => Timeline::load(path)?,
        None => Timeline::new(),
    };

    let engine = PlaybackEngine::new(&config.playback);
    engine.load_file(audio, &WavDecoder)?;
    let duration = engine.duration_seconds()?;

    let (tx, rx) = crossbeam_channel::unbounded::<PlaybackEvent>();
    engine.set_position_listener(Arc::new(tx.clone()))?;
    engine.set_completion_listener(Arc::new(tx))?;

    match (from, to) {
        (Some(start), _) => engine.play_from(start)?,
        (None, Some(end)) => engine.play_to(end)?,
        (None, None) => engine.play()?,
    }

    if !engine.is_playing()? {
        tracing::info!("nothing to play in the requested range");
        return Ok(());
    }

    let mut shown: Option<MouthShape> = None;
    for event in rx.iter() {
        match event {
            PlaybackEvent::Position { seconds, .. } => {
                let current = timeline.display_at(seconds);
                if shown.as_ref() != Some(&current.shape) {
                    tracing::info!(
                        time = %format!("{} / {}", format_timestamp(seconds), format_timestamp(duration)),
                        shape = %current.shape,
                        span = current.span.as_deref().unwrap_or(""),
                        "mouth shape"
                    );
                    shown = Some(current.shape);
                }
            }
            PlaybackEvent::Finished { .. } => {
                tracing::info!(
                    position = %format_timestamp(engine.position_seconds()?),
                    "playback finished"
                );
                break;
            }
        }
    }
    Ok(())
}

fn run_peaks(config: &AppConfig, audio: &Path, width: usize) -> Result<()> {
    let buffer = WavDecoder.decode(audio)?;
    let columns = display_columns(width, config.waveform.min_columns);
    let peaks = WaveformPeaks::from_samples(buffer.samples(), columns);
    if peaks.is_none() {
        tracing::warn!(?audio, "no audio data");
    }
    println!("{}", serde_json::to_string(&peaks)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Lip-sync timelines from speech audio", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run phoneme recognition on an audio file and build a mouth-shape timeline.
    Recognize {
        /// Audio file handed to the recognizer.
        audio: PathBuf,
        /// Where to write the timeline; printed to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also export a frame sheet to this path.
        #[arg(long)]
        sheet: Option<PathBuf>,
        /// Frame rate for the sheet.
        #[arg(long)]
        fps: Option<u32>,
    },
    /// Convert a saved timeline into a frame sheet.
    Export {
        timeline: PathBuf,
        output: PathBuf,
        #[arg(long)]
        fps: Option<u32>,
    },
    /// Play a WAV file and follow the mouth shape at the playback position.
    Play {
        audio: PathBuf,
        /// Timeline to follow during playback.
        #[arg(short, long)]
        timeline: Option<PathBuf>,
        /// Play from this time (seconds) to the end.
        #[arg(long, conflicts_with = "to")]
        from: Option<f64>,
        /// Play from the start up to this time (seconds).
        #[arg(long)]
        to: Option<f64>,
    },
    /// Print the waveform peak envelope of a WAV file as JSON.
    Peaks {
        audio: PathBuf,
        /// Display width in pixels.
        #[arg(long, default_value_t = 0)]
        width: usize,
    },
}
