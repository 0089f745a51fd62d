use std::{fmt, path::Path, sync::Arc};

use crate::{LipsyncError, Result};

/// Decoded mono PCM audio. Immutable once built; clones share the samples.
#[derive(Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(LipsyncError::InvalidInput("sample rate must be positive"));
        }

        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Converts a time in seconds to a sample index clamped to `[0, len]`.
    /// Non-finite negative input lands on 0, positive infinity on `len`.
    pub fn sample_at(&self, seconds: f64) -> usize {
        let len = self.samples.len();
        if seconds.is_nan() || seconds <= 0.0 {
            return 0;
        }

        let index = seconds * self.sample_rate as f64;
        if index >= len as f64 {
            len
        } else {
            index as usize
        }
    }
}

impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("samples", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Turns an audio file into a mono [`AudioBuffer`].
pub trait AudioDecoder {
    fn decode(&self, path: &Path) -> Result<AudioBuffer>;
}

/// WAV decoder backed by `hound`. Multi-channel files are mixed down to mono
/// by averaging each frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<AudioBuffer> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 * scale))
                    .collect::<std::result::Result<Vec<f32>, hound::Error>>()?
            }
        };

        let samples: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        tracing::info!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate = spec.sample_rate,
            channels,
            "decoded audio"
        );

        AudioBuffer::new(samples, spec.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for sample in frames {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let err = AudioBuffer::new(vec![0.0_f32; 4], 0).unwrap_err();
        assert!(matches!(err, LipsyncError::InvalidInput(_)));
    }

    #[test]
    fn converts_seconds_to_clamped_samples() {
        let buffer = AudioBuffer::new(vec![0.0_f32; 100], 10).unwrap();
        assert_eq!(buffer.sample_at(-3.0), 0);
        assert_eq!(buffer.sample_at(f64::NAN), 0);
        assert_eq!(buffer.sample_at(2.55), 25);
        assert_eq!(buffer.sample_at(1_000.0), 100);
        assert_eq!(buffer.sample_at(f64::INFINITY), 100);
        assert!((buffer.duration_seconds() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn decodes_and_downmixes_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, &[16_384, 0, -16_384, -16_384]);

        let buffer = WavDecoder.decode(&path).unwrap();
        assert_eq!(buffer.sample_rate(), 8_000);
        assert_eq!(buffer.len(), 2);
        assert!((buffer.samples()[0] - 0.25).abs() < 1e-4);
        assert!((buffer.samples()[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WavDecoder.decode(&dir.path().join("absent.wav")).is_err());
    }
}
