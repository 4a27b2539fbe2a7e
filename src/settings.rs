use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("minimum track length must be at least 1")]
    MinLength,
    #[error("tracking interval must be a positive number of minutes, got {0}")]
    Interval(f64),
    #[error("between 1 and 7 channels are supported, got {0}")]
    ChannelCount(usize),
    #[error("tracking channel {channel} is outside 1..={count}")]
    TrackingChannel { channel: u8, count: usize },
    #[error("channel names must be unique and non-empty")]
    ChannelNames,
    #[error("threshold '{0}' must be a finite number")]
    Threshold(&'static str),
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Detection thresholds.  Defaults match the values the lab tuned on
/// 10–30 min tracking intervals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Symmetric relative size change marking a size jump.
    pub size_jump: f64,
    /// Symmetric relative marker change marking a marker jump.
    pub tracking_marker_jump: f64,
    /// Signed z-like threshold for marker peaks; negative selects dips.
    pub tracking_marker_division_peak: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            size_jump: 0.2,
            tracking_marker_jump: 0.18,
            tracking_marker_division_peak: 1.5,
        }
    }
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// How subset files of one dataset are named: `{dataset}{delimiter}{digits}{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileNaming {
    pub suffix: String,
    /// Number of trailing digits identifying the subset; 0 = one file per dataset.
    pub digits: usize,
    pub delimiter: String,
}

impl Default for FileNaming {
    fn default() -> Self {
        Self {
            suffix: ".csv".to_string(),
            digits: 3,
            delimiter: "_".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Raw, unvalidated settings as read from a JSON file or the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub min_len: usize,
    pub tracking_interval: f64,
    pub channel_names: Vec<String>,
    pub tracking_channel: u8,
    #[serde(default)]
    pub transform: bool,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub naming: FileNaming,
}

/// Validated analysis settings.  Fields are private so a `Settings` value
/// is always consistent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    min_len: usize,
    tracking_interval: f64,
    channel_names: Vec<String>,
    tracking_channel: u8,
    transform: bool,
    thresholds: Thresholds,
    naming: FileNaming,
}

/// Compression is only meaningful when at least two frames fall in an hour.
pub const MAX_TRANSFORM_INTERVAL_MINUTES: f64 = 35.0;

impl TryFrom<SettingsFile> for Settings {
    type Error = SettingsError;

    fn try_from(raw: SettingsFile) -> Result<Self, Self::Error> {
        if raw.min_len == 0 {
            return Err(SettingsError::MinLength);
        }
        if !raw.tracking_interval.is_finite() || raw.tracking_interval <= 0.0 {
            return Err(SettingsError::Interval(raw.tracking_interval));
        }
        let count = raw.channel_names.len();
        if !(1..=7).contains(&count) {
            return Err(SettingsError::ChannelCount(count));
        }
        if raw.tracking_channel == 0 || usize::from(raw.tracking_channel) > count {
            return Err(SettingsError::TrackingChannel {
                channel: raw.tracking_channel,
                count,
            });
        }
        let mut names: Vec<&str> = raw.channel_names.iter().map(|n| n.trim()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != count || names.iter().any(|n| n.is_empty()) {
            return Err(SettingsError::ChannelNames);
        }
        let t = raw.thresholds;
        for (name, value) in [
            ("size_jump", t.size_jump),
            ("tracking_marker_jump", t.tracking_marker_jump),
            ("tracking_marker_division_peak", t.tracking_marker_division_peak),
        ] {
            if !value.is_finite() {
                return Err(SettingsError::Threshold(name));
            }
        }

        Ok(Self {
            min_len: raw.min_len,
            tracking_interval: raw.tracking_interval,
            channel_names: raw.channel_names.iter().map(|n| n.trim().to_string()).collect(),
            tracking_channel: raw.tracking_channel,
            transform: raw.transform,
            thresholds: raw.thresholds,
            naming: raw.naming,
        })
    }
}

impl Settings {
    /// Read and validate a JSON settings file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let raw: SettingsFile = serde_json::from_str(&text).context("parsing settings JSON")?;
        Ok(Self::try_from(raw)?)
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }

    /// Minutes between two frames.
    pub fn tracking_interval(&self) -> f64 {
        self.tracking_interval
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn naming(&self) -> &FileNaming {
        &self.naming
    }

    /// `(channel number, display name)` in acquisition order.
    pub fn channels(&self) -> impl Iterator<Item = (u8, &str)> {
        self.channel_names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u8 + 1, name.as_str()))
    }

    pub fn tracking_channel(&self) -> u8 {
        self.tracking_channel
    }

    pub fn tracking_marker_name(&self) -> &str {
        &self.channel_names[usize::from(self.tracking_channel) - 1]
    }

    /// Channel names used for the final plots (all but the tracking marker).
    pub fn main_channels(&self) -> Vec<&str> {
        let marker = self.tracking_marker_name();
        self.channel_names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != marker)
            .collect()
    }

    /// Whether time compression was requested *and* is valid for the interval.
    pub fn transform_active(&self) -> bool {
        self.transform && self.tracking_interval <= MAX_TRANSFORM_INTERVAL_MINUTES
    }

    pub fn transform_requested(&self) -> bool {
        self.transform
    }

    /// Subsampling factor for detection: every k-th frame is used.
    pub fn time_transformer(&self) -> usize {
        if self.transform_active() {
            ((60.0 / self.tracking_interval).round_ties_even() as usize).max(1)
        } else {
            1
        }
    }

    pub fn time_base(&self) -> TimeBase {
        TimeBase {
            interval_minutes: self.tracking_interval,
            transformer: self.time_transformer(),
        }
    }
}

// ---------------------------------------------------------------------------
// Time base: hours ↔ frame offsets
// ---------------------------------------------------------------------------

/// Converts durations in hours to frame offsets for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBase {
    pub interval_minutes: f64,
    pub transformer: usize,
}

impl TimeBase {
    pub fn new(interval_minutes: f64, transformer: usize) -> Self {
        Self {
            interval_minutes,
            transformer: transformer.max(1),
        }
    }

    /// Frame offset spanned by `hours`.  Without compression this rounds
    /// half-to-even; with compression every hour is `transformer` frames.
    pub fn hours_to_frames(&self, hours: f64) -> i64 {
        if self.transformer == 1 {
            (hours / (self.interval_minutes / 60.0)).round_ties_even() as i64
        } else {
            (hours * self.transformer as f64).round() as i64
        }
    }

    pub fn frame_to_hours(&self, frame: i64) -> f64 {
        frame as f64 * self.interval_minutes / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> SettingsFile {
        SettingsFile {
            min_len: 10,
            tracking_interval: 20.0,
            channel_names: vec!["iRFP".into(), "GFP".into(), "mCherry".into()],
            tracking_channel: 1,
            transform: false,
            thresholds: Thresholds::default(),
            naming: FileNaming::default(),
        }
    }

    #[test]
    fn accepts_valid_settings() {
        let s = Settings::try_from(raw()).unwrap();
        assert_eq!(s.tracking_marker_name(), "iRFP");
        assert_eq!(s.main_channels(), vec!["GFP", "mCherry"]);
        assert_eq!(s.channels().map(|(n, _)| n).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn rejects_bad_interval_and_channels() {
        let mut r = raw();
        r.tracking_interval = 0.0;
        assert_eq!(Settings::try_from(r).unwrap_err(), SettingsError::Interval(0.0));

        let mut r = raw();
        r.tracking_channel = 4;
        assert!(matches!(
            Settings::try_from(r),
            Err(SettingsError::TrackingChannel { channel: 4, count: 3 })
        ));

        let mut r = raw();
        r.channel_names = (0..8).map(|i| format!("c{i}")).collect();
        assert_eq!(Settings::try_from(r).unwrap_err(), SettingsError::ChannelCount(8));

        let mut r = raw();
        r.channel_names = vec!["a".into(), "a".into()];
        assert_eq!(Settings::try_from(r).unwrap_err(), SettingsError::ChannelNames);
    }

    #[test]
    fn transform_disabled_above_35_minutes() {
        let mut r = raw();
        r.transform = true;
        r.tracking_interval = 40.0;
        let s = Settings::try_from(r).unwrap();
        assert!(!s.transform_active());
        assert_eq!(s.time_transformer(), 1);

        let mut r = raw();
        r.transform = true;
        r.tracking_interval = 15.0;
        let s = Settings::try_from(r).unwrap();
        assert_eq!(s.time_transformer(), 4);
    }

    #[test]
    fn settings_json_rejects_misspelled_keys() {
        let ok = r#"{"min_len": 5, "tracking_interval": 30, "channel_names": ["H2B"],
                     "tracking_channel": 1, "thresholds": {"size_jump": 0.3}}"#;
        let parsed: SettingsFile = serde_json::from_str(ok).unwrap();
        assert_eq!(parsed.thresholds.size_jump, 0.3);
        assert_eq!(parsed.thresholds.tracking_marker_jump, 0.18);
        assert_eq!(parsed.naming, FileNaming::default());

        let typo = r#"{"min_len": 5, "tracking_interval": 30, "channel_names": ["H2B"],
                       "tracking_channel": 1, "treshold": {"size_jump": 0.3}}"#;
        assert!(serde_json::from_str::<SettingsFile>(typo).is_err());

        let nested = r#"{"min_len": 5, "tracking_interval": 30, "channel_names": ["H2B"],
                         "tracking_channel": 1, "thresholds": {"size_jmp": 0.3}}"#;
        assert!(serde_json::from_str::<SettingsFile>(nested).is_err());
    }

    #[test]
    fn hours_to_frames_rounds_half_even() {
        // 2h at 48 min = 2.5 frames
        assert_eq!(TimeBase::new(48.0, 1).hours_to_frames(2.0), 2);
        assert_eq!(TimeBase::new(60.0, 1).hours_to_frames(-2.0), -2);
        assert_eq!(TimeBase::new(15.0, 4).hours_to_frames(2.0), 8);
    }
}
