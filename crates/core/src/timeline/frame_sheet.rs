use std::{collections::BTreeMap, fmt, fs, path::Path};

use serde::Serialize;

use super::{MouthShape, Timeline};
use crate::{LipsyncError, Result};

/// First line of every exported sheet.
pub const FRAME_SHEET_HEADER: &str = "MohoSwitch1";

/// Exported frame numbers stay below this, a little over 115 hours at 24 fps.
pub const MAX_FRAME: u64 = 10_000_000;

/// One `<frame> <shape>` row. Frames are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameEntry {
    pub frame: u64,
    pub shape: MouthShape,
}

/// Per-frame switch table for the animation tool.
///
/// Steps are expanded independently and rows are kept in emission order.
/// When steps overlap, the same frame number appears more than once; the
/// consuming tool keeps the last row it reads for a frame, which
/// [`FrameSheet::resolve`] mirrors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSheet {
    fps: u32,
    entries: Vec<FrameEntry>,
}

impl FrameSheet {
    pub(super) fn from_timeline(timeline: &Timeline, fps: u32) -> Result<Self> {
        if fps == 0 {
            return Err(LipsyncError::InvalidInput("frame rate must be positive"));
        }

        let rate = f64::from(fps);
        let mut entries = Vec::new();
        for step in timeline {
            let start = (step.start_time * rate).floor();
            let span = (step.duration * rate).floor();
            if !(start >= 0.0 && span >= 0.0 && start + span < MAX_FRAME as f64) {
                tracing::warn!(
                    start_time = step.start_time,
                    duration = step.duration,
                    fps,
                    "step cannot be expressed in frames"
                );
                return Err(LipsyncError::InvalidInput(
                    "step lies outside the exportable frame range",
                ));
            }

            let start_frame = start as u64 + 1;
            let end_frame = start_frame + span as u64;
            entries.extend((start_frame..end_frame).map(|frame| FrameEntry {
                frame,
                shape: step.mouth_shape.clone(),
            }));
        }

        Ok(Self { fps, entries })
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    /// Collapses duplicate frame numbers, keeping the last emitted row.
    pub fn resolve(&self) -> BTreeMap<u64, &MouthShape> {
        self.entries
            .iter()
            .map(|entry| (entry.frame, &entry.shape))
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }
}

impl fmt::Display for FrameSheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{FRAME_SHEET_HEADER}")?;
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{} {}", entry.frame, entry.shape)?;
        }
        Ok(())
    }
}
