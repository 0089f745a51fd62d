//! Timed mouth-shape events and their plain-text persistence.
//!
//! The text format is one step per line, `start duration shape`, with the
//! two times written as 4-decimal fixed point. Reading is deliberately
//! lenient: lines that do not parse are dropped rather than reported, so a
//! hand-edited file with stray comments or typos still loads.

mod frame_sheet;

use std::{fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Result;

pub use frame_sheet::{FrameEntry, FrameSheet, FRAME_SHEET_HEADER, MAX_FRAME};

/// Preston-Blair mouth shape. Labels outside the standard set are kept
/// verbatim in [`MouthShape::Other`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MouthShape {
    Ai,
    E,
    Etc,
    Fv,
    L,
    Mbp,
    O,
    U,
    Wq,
    #[default]
    Rest,
    Other(String),
}

impl MouthShape {
    pub fn as_str(&self) -> &str {
        match self {
            MouthShape::Ai => "AI",
            MouthShape::E => "E",
            MouthShape::Etc => "etc",
            MouthShape::Fv => "FV",
            MouthShape::L => "L",
            MouthShape::Mbp => "MBP",
            MouthShape::O => "O",
            MouthShape::U => "U",
            MouthShape::Wq => "WQ",
            MouthShape::Rest => "rest",
            MouthShape::Other(label) => label,
        }
    }

    fn from_token(token: &str) -> Self {
        match token {
            "AI" => MouthShape::Ai,
            "E" => MouthShape::E,
            "etc" => MouthShape::Etc,
            "FV" => MouthShape::Fv,
            "L" => MouthShape::L,
            "MBP" => MouthShape::Mbp,
            "O" => MouthShape::O,
            "U" => MouthShape::U,
            "WQ" => MouthShape::Wq,
            "rest" => MouthShape::Rest,
            other => MouthShape::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MouthShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MouthShape {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_token(s))
    }
}

impl From<&str> for MouthShape {
    fn from(value: &str) -> Self {
        Self::from_token(value)
    }
}

impl From<String> for MouthShape {
    fn from(value: String) -> Self {
        Self::from_token(&value)
    }
}

impl From<MouthShape> for String {
    fn from(value: MouthShape) -> Self {
        value.as_str().to_string()
    }
}

/// A single mouth shape held for `duration` seconds from `start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeStep {
    pub start_time: f64,
    pub duration: f64,
    pub mouth_shape: MouthShape,
}

impl PhonemeStep {
    /// Negative durations collapse to zero.
    pub fn new(start_time: f64, duration: f64, mouth_shape: impl Into<MouthShape>) -> Self {
        Self {
            start_time: start_time.max(0.0),
            duration: duration.max(0.0),
            mouth_shape: mouth_shape.into(),
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Half-open containment: `start <= time < end`.
    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && time < self.end_time()
    }

    /// Parses `start duration shape [ignored...]`. Returns `None` for anything
    /// else, including negative or non-finite times.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let start_time: f64 = tokens.next()?.parse().ok()?;
        let duration: f64 = tokens.next()?.parse().ok()?;
        let shape = tokens.next()?;

        if !start_time.is_finite() || !duration.is_finite() || start_time < 0.0 || duration < 0.0 {
            return None;
        }

        Some(Self::new(start_time, duration, shape))
    }
}

impl fmt::Display for PhonemeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} {:.4} {}",
            self.start_time, self.duration, self.mouth_shape
        )
    }
}

/// What a display should show for a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDisplay {
    pub shape: MouthShape,
    /// `"start - end"` of the matching step, absent when falling back to rest.
    pub span: Option<String>,
}

/// Ordered collection of phoneme steps in insertion order. Nothing here sorts
/// or merges steps; lookups are linear scans that honour insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    steps: Vec<PhonemeStep>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, step: PhonemeStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[PhonemeStep] {
        &self.steps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PhonemeStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// First step (in insertion order) whose span contains `time`.
    pub fn shape_at(&self, time: f64) -> Option<&PhonemeStep> {
        self.steps.iter().find(|step| step.contains(time))
    }

    /// Display policy over [`Timeline::shape_at`]: uncovered time shows `rest`.
    pub fn display_at(&self, time: f64) -> ShapeDisplay {
        match self.shape_at(time) {
            Some(step) => ShapeDisplay {
                shape: step.mouth_shape.clone(),
                span: Some(format!("{:.2}s - {:.2}s", step.start_time, step.end_time())),
            },
            None => ShapeDisplay {
                shape: MouthShape::Rest,
                span: None,
            },
        }
    }

    /// Latest end time over all steps, or 0 when empty.
    pub fn total_duration(&self) -> f64 {
        self.steps
            .iter()
            .map(PhonemeStep::end_time)
            .fold(0.0, f64::max)
    }

    pub fn serialize(&self) -> String {
        self.steps
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Never fails: lines that are blank or malformed are skipped.
    pub fn deserialize(data: &str) -> Self {
        let mut timeline = Self::new();
        for (index, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match PhonemeStep::parse_line(line) {
                Some(step) => timeline.append(step),
                None => tracing::debug!(line = index + 1, "skipping malformed timeline line"),
            }
        }
        timeline
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(Self::deserialize(&data))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.serialize())?;
        Ok(())
    }

    /// Expands every step into per-frame rows at `fps`. See [`FrameSheet`] for
    /// how overlapping steps are represented.
    pub fn export_frame_sheet(&self, fps: u32) -> Result<FrameSheet> {
        FrameSheet::from_timeline(self, fps)
    }
}

impl FromIterator<PhonemeStep> for Timeline {
    fn from_iter<I: IntoIterator<Item = PhonemeStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a PhonemeStep;
    type IntoIter = std::slice::Iter<'a, PhonemeStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_timeline() -> Timeline {
        [
            PhonemeStep::new(0.10, 0.20, "AI"),
            PhonemeStep::new(0.30, 0.10, "MBP"),
            PhonemeStep::new(0.50, 0.25, "E"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn shape_lookup_misses_outside_steps() {
        let timeline = sample_timeline();

        assert!(timeline.shape_at(0.05).is_none());
        assert!(timeline.shape_at(0.45).is_none());
        assert!(timeline.shape_at(0.75).is_none());
        assert!(timeline.shape_at(2.0).is_none());
        assert_eq!(timeline.shape_at(0.35).unwrap().mouth_shape, MouthShape::Mbp);
        assert_eq!(timeline.shape_at(0.10).unwrap().mouth_shape, MouthShape::Ai);
    }

    #[test]
    fn overlapping_steps_resolve_to_first_inserted() {
        let mut timeline = Timeline::new();
        timeline.append(PhonemeStep::new(0.0, 1.0, "O"));
        timeline.append(PhonemeStep::new(0.5, 1.0, "U"));

        assert_eq!(timeline.shape_at(0.75).unwrap().mouth_shape, MouthShape::O);
        assert_eq!(timeline.shape_at(1.25).unwrap().mouth_shape, MouthShape::U);
    }

    #[test]
    fn display_defaults_to_rest() {
        let timeline = sample_timeline();

        let uncovered = timeline.display_at(0.45);
        assert_eq!(uncovered.shape, MouthShape::Rest);
        assert!(uncovered.span.is_none());

        let covered = timeline.display_at(0.2);
        assert_eq!(covered.shape, MouthShape::Ai);
        assert_eq!(covered.span.as_deref(), Some("0.10s - 0.30s"));
    }

    #[test]
    fn total_duration_is_latest_end() {
        assert_eq!(Timeline::new().total_duration(), 0.0);

        let mut timeline = sample_timeline();
        timeline.append(PhonemeStep::new(0.0, 0.1, "L"));
        assert!((timeline.total_duration() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn text_round_trip_preserves_steps() {
        let timeline = sample_timeline();
        let text = timeline.serialize();
        assert_eq!(text.lines().next(), Some("0.1000 0.2000 AI"));

        let restored = Timeline::deserialize(&text);
        assert_eq!(restored.len(), timeline.len());
        for (a, b) in restored.iter().zip(timeline.iter()) {
            assert!((a.start_time - b.start_time).abs() < 1e-4);
            assert!((a.duration - b.duration).abs() < 1e-4);
            assert_eq!(a.mouth_shape, b.mouth_shape);
        }
    }

    #[test]
    fn deserialize_skips_malformed_lines() {
        let text = "0.0 0.1 AI\n\
                    # hand-written note\n\
                    0.1 0.2\n\
                    abc 0.2 E\n\
                    0.2 -0.1 O\n\
                    \n\
                    0.3 0.1 N extra tokens\n";

        let timeline = Timeline::deserialize(text);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.steps()[0].mouth_shape, MouthShape::Ai);
        assert_eq!(
            timeline.steps()[1].mouth_shape,
            MouthShape::Other("N".to_string())
        );
    }

    #[test]
    fn unknown_shapes_survive_display() {
        let shape: MouthShape = "N".parse().unwrap();
        assert_eq!(shape.to_string(), "N");
        assert_eq!("etc".parse::<MouthShape>().unwrap(), MouthShape::Etc);
    }

    #[test]
    fn saves_and_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.txt");

        sample_timeline().save(&path).unwrap();
        let loaded = Timeline::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn serde_uses_plain_shape_labels() {
        let step = PhonemeStep::new(0.0, 0.5, "WQ");
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains(r#""mouth_shape":"WQ""#));

        let back: PhonemeStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }
}
