use serde::{Deserialize, Serialize};

/// Normalised peak envelope used to draw a waveform, one value per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformPeaks {
    peaks: Vec<f32>,
    samples_per_column: usize,
}

impl WaveformPeaks {
    /// Splits `samples` into equal segments of `max(1, len / columns)` samples,
    /// keeps the largest magnitude of each and scales the result so the
    /// loudest column is 1.0. Trailing samples that do not fill a whole
    /// segment are dropped. Returns `None` when there is nothing to draw.
    pub fn from_samples(samples: &[f32], columns: usize) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let samples_per_column = (samples.len() / columns.max(1)).max(1);
        let mut peaks: Vec<f32> = samples
            .chunks_exact(samples_per_column)
            .map(|segment| segment.iter().fold(0.0_f32, |peak, s| peak.max(s.abs())))
            .collect();

        let max_peak = peaks.iter().copied().fold(0.0_f32, f32::max);
        if max_peak > 0.0 {
            for peak in &mut peaks {
                *peak /= max_peak;
            }
        }

        Some(Self {
            peaks,
            samples_per_column,
        })
    }

    pub fn peaks(&self) -> &[f32] {
        &self.peaks
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn samples_per_column(&self) -> usize {
        self.samples_per_column
    }
}

/// Envelope width for a display `width` pixels wide.
pub fn display_columns(width: usize, min_columns: usize) -> usize {
    width.max(min_columns).max(1)
}

/// Playback cursor as a fraction of the clip, in `[0, 1]`.
pub fn cursor_fraction(position: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        (position / duration).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Inverse of [`cursor_fraction`], used for click-to-seek.
pub fn position_at_fraction(fraction: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        fraction.clamp(0.0, 1.0) * duration
    } else {
        0.0
    }
}

/// Spacing of time grid markers for a clip of `duration` seconds.
pub fn grid_interval(duration: f64) -> f64 {
    if duration < 10.0 {
        1.0
    } else if duration < 60.0 {
        5.0
    } else {
        10.0
    }
}

/// Marker times strictly inside `(0, duration)`.
pub fn grid_lines(duration: f64) -> Vec<f64> {
    if duration <= 0.0 {
        return Vec::new();
    }

    let interval = grid_interval(duration);
    (1..)
        .map(|step| step as f64 * interval)
        .take_while(|time| *time < duration)
        .collect()
}

/// Formats seconds as `M:SS.ss`.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor();
    format!("{}:{:05.2}", minutes as u64, seconds - minutes * 60.0)
}
