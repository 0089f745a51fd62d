use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{LipsyncError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub export: ExportConfig,
    pub waveform: WaveformConfig,
    pub recognizer: RecognizerConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Sections that are absent keep their
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.playback.poll_interval_ms == 0 {
            return Err(LipsyncError::InvalidInput(
                "playback poll interval must be positive",
            ));
        }
        if self.export.fps == 0 {
            return Err(LipsyncError::InvalidInput("export fps must be positive"));
        }
        Ok(())
    }
}

/// Configuration specific to the playback engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Period of the background position tracker.
    pub poll_interval_ms: u64,
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
        }
    }
}

/// Frame sheet export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub fps: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { fps: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    /// Lower bound on the number of envelope columns, whatever the display width.
    pub min_columns: usize,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self { min_columns: 400 }
    }
}

/// Command line used to invoke the external phoneme recognizer. The audio
/// path is appended after `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![
                "-m".to_string(),
                "allosaurus.run".to_string(),
                "--timestamp".to_string(),
                "True".to_string(),
                "-i".to_string(),
            ],
        }
    }
}
