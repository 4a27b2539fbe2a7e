//! Artifact detection and cleaning of per-cell time series.
//!
//! ```text
//!  SpotRecord[]
//!       │  pivot per channel + size
//!       ▼
//!  raw tables ──► jumps (size, marker) ──┐
//!       │                                 ├─► divisions ─► flags ─► filter (marker first)
//!       └──────► peaks (marker) ─────────┘                              │
//!                                                                        ▼
//!                                            normalize ─► smooth divisions ─► AnalysisOutput
//! ```

pub mod divisions;
pub mod jumps;
pub mod peaks;
pub mod smoothing;

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use crate::data::filter::{apply_reference, filter_cells};
use crate::data::model::{SpotRecord, TableError, TimeSeriesTable};
use crate::settings::Settings;
use divisions::{
    classify_divisions, close_divisions, merge_flags, non_division_jumps, DIVISION_WINDOW_HOURS,
    MARKER_JUMP_WINDOW_HOURS,
};
use jumps::detect_jumps;
use peaks::{detect_peak_table, DEFAULT_ROLLING_WINDOW};
use smoothing::smooth_divisions;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no spots to analyse")]
    NoSpots,
    #[error("no MEAN_INTENSITY_CH{0} values in input")]
    MissingChannel(u8),
    #[error("no track of the tracking marker is longer than {0} frames")]
    NoTracks(usize),
    #[error(transparent)]
    Table(#[from] TableError),
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// All series derived for one channel, aligned on cells and frames.
#[derive(Debug, Clone)]
pub struct ChannelSeries {
    pub number: u8,
    pub name: String,
    pub raw: TimeSeriesTable,
    pub cleaned: TimeSeriesTable,
    pub cleaned_smooth: TimeSeriesTable,
    pub normalized_smooth: TimeSeriesTable,
}

/// Per-cell verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellReport {
    pub cell: String,
    pub divisions: Vec<i64>,
    pub flags: Vec<i64>,
    pub approved: bool,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub tracking_marker: String,
    pub main_channels: Vec<String>,
    /// Channels in acquisition order.
    pub channels: Vec<ChannelSeries>,
    pub cells: Vec<CellReport>,
}

impl AnalysisOutput {
    pub fn all_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn approved_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.approved).count()
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSeries> {
        self.channels.iter().find(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Intensity table of one channel, keeping tracks longer than `min_len`.
pub fn extract_channel(
    records: &[SpotRecord],
    frames: &[i64],
    number: u8,
    name: &str,
    min_len: usize,
) -> Result<TimeSeriesTable, AnalysisError> {
    if !records.iter().any(|r| r.intensities.contains_key(&number)) {
        return Err(AnalysisError::MissingChannel(number));
    }
    let mut table = TimeSeriesTable::pivot(name, records, frames, |r| {
        r.intensities.get(&number).copied().unwrap_or(f64::NAN)
    })?;
    table.retain_longer_than(min_len);
    Ok(table)
}

/// Object size table, keeping tracks longer than `min_len`.
pub fn extract_sizes(records: &[SpotRecord], frames: &[i64], min_len: usize) -> Result<TimeSeriesTable, AnalysisError> {
    let mut table = TimeSeriesTable::pivot("AREA", records, frames, |r| r.area)?;
    table.retain_longer_than(min_len);
    Ok(table)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run detection and cleaning on the spots of one dataset.
pub fn analyze(records: &[SpotRecord], settings: &Settings) -> Result<AnalysisOutput, AnalysisError> {
    if records.is_empty() {
        return Err(AnalysisError::NoSpots);
    }
    let min_len = settings.min_len();
    let thresholds = settings.thresholds();
    let marker_name = settings.tracking_marker_name().to_string();
    let frames = TimeSeriesTable::frame_index(records);

    let time = settings.time_base();
    if time.transformer > 1 {
        info!("time transformation: only using every {}. timepoint", time.transformer);
    }

    // the tracking marker defines the cell universe
    let marker_raw = extract_channel(records, &frames, settings.tracking_channel(), &marker_name, min_len)?;
    if marker_raw.is_empty() {
        return Err(AnalysisError::NoTracks(min_len));
    }
    let universe: Vec<String> = marker_raw.cells().map(str::to_string).collect();
    let align = |table: TimeSeriesTable| table.select_cells_or(universe.iter().map(String::as_str), f64::NAN);

    let mut raw_channels = Vec::new();
    for (number, name) in settings.channels() {
        let raw = if number == settings.tracking_channel() {
            marker_raw.clone()
        } else {
            align(extract_channel(records, &frames, number, name, min_len)?)
        };
        raw_channels.push((number, name.to_string(), raw));
    }
    let sizes = align(extract_sizes(records, &frames, min_len)?);
    debug!("{} cells with more than {min_len} frames", universe.len());

    // detection runs on the (optionally) compressed tables
    let marker_compressed = marker_raw.every_nth(time.transformer);
    let size_jumps = detect_jumps(&sizes.every_nth(time.transformer), thresholds.size_jump);
    let marker_jumps = detect_jumps(&marker_compressed, thresholds.tracking_marker_jump);
    let marker_peaks = detect_peak_table(
        &marker_compressed,
        thresholds.tracking_marker_division_peak,
        DEFAULT_ROLLING_WINDOW,
    );

    let divisions = classify_divisions(&marker_peaks, &size_jumps, &time);

    let size_flags = non_division_jumps(&size_jumps, &divisions, 0.0, DIVISION_WINDOW_HOURS, &time);
    let marker_flags = non_division_jumps(
        &marker_jumps,
        &divisions,
        -MARKER_JUMP_WINDOW_HOURS,
        MARKER_JUMP_WINDOW_HOURS,
        &time,
    );
    let flags = merge_flags(&size_flags, &marker_flags);
    let close = close_divisions(&divisions, settings.tracking_interval());
    if !close.is_empty() {
        debug!("cells with close divisions: {close:?}");
    }

    // the marker decides which cells and frames survive
    let reference = filter_cells(&marker_raw, &flags, &close, min_len);
    if !reference.dropped.is_empty() {
        info!(
            "{} of {} cells rejected: {:?}",
            reference.dropped.len(),
            universe.len(),
            reference.dropped
        );
    }

    let channels = raw_channels
        .into_iter()
        .map(|(number, name, raw)| {
            let cleaned = if number == settings.tracking_channel() {
                reference.table.clone()
            } else {
                apply_reference(&raw, &reference.table)
            }
            .renamed(format!("{name}_raw_acpt_cells"));
            let normalized = cleaned.divide_by_column_means();
            let interval = settings.tracking_interval();
            ChannelSeries {
                number,
                cleaned_smooth: smooth_divisions(&cleaned, &divisions, interval)
                    .renamed(format!("{name}_raw_acpt_cells_smoothDiv")),
                normalized_smooth: smooth_divisions(&normalized, &divisions, interval)
                    .renamed(format!("{name}_norm_acpt_cells_smoothDiv")),
                raw: raw.renamed(format!("{name}_raw_all_cells")),
                cleaned,
                name,
            }
        })
        .collect();

    let cells = universe
        .iter()
        .map(|cell| CellReport {
            cell: cell.clone(),
            divisions: divisions.get(cell).cloned().unwrap_or_default(),
            flags: flags.get(cell).cloned().unwrap_or_default(),
            approved: reference.table.contains_cell(cell),
        })
        .collect();

    Ok(AnalysisOutput {
        tracking_marker: marker_name,
        main_channels: settings.main_channels().into_iter().map(str::to_string).collect(),
        channels,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FileNaming, SettingsFile, Thresholds};
    use std::collections::BTreeMap;

    fn settings(min_len: usize) -> Settings {
        Settings::try_from(SettingsFile {
            min_len,
            tracking_interval: 60.0,
            channel_names: vec!["iRFP".into(), "GFP".into()],
            tracking_channel: 1,
            transform: false,
            thresholds: Thresholds::default(),
            naming: FileNaming::default(),
        })
        .unwrap()
    }

    fn spots(track: &str, marker: &[f64], size: &[f64], gfp: f64) -> Vec<SpotRecord> {
        marker
            .iter()
            .zip(size)
            .enumerate()
            .map(|(frame, (&m, &a))| SpotRecord {
                track_id: track.to_string(),
                frame: frame as i64,
                area: a,
                intensities: BTreeMap::from([(1, m), (2, gfp)]),
            })
            .collect()
    }

    #[test]
    fn clean_tracks_are_all_approved() {
        let mut records = spots("001_1", &[10.0; 30], &[100.0; 30], 5.0);
        records.extend(spots("002_1", &[12.0; 30], &[80.0; 30], 6.0));
        let out = analyze(&records, &settings(10)).unwrap();
        assert_eq!(out.all_cells(), 2);
        assert_eq!(out.approved_cells(), 2);
        assert!(out.cells.iter().all(|c| c.divisions.is_empty() && c.flags.is_empty()));
        let gfp = out.channel("GFP").unwrap();
        assert_eq!(gfp.cleaned.column("002_1").unwrap(), &[6.0; 30]);
        assert!(gfp.normalized_smooth.column("001_1").unwrap().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn division_is_smoothed_and_jump_crops_track() {
        let mut marker = vec![10.0; 60];
        marker[10] = 30.0;
        let mut size = vec![100.0; 60];
        for v in size.iter_mut().take(50).skip(11) {
            *v = 50.0;
        }
        let records = spots("c", &marker, &size, 5.0);
        let out = analyze(&records, &settings(10)).unwrap();
        let cell = &out.cells[0];
        assert_eq!(cell.divisions, vec![10]);
        assert_eq!(cell.flags, vec![50]);
        assert!(cell.approved);

        let marker = out.channel("iRFP").unwrap();
        let cleaned = marker.cleaned.column("c").unwrap();
        assert_eq!(cleaned.iter().filter(|v| !v.is_nan()).count(), 51);
        // peak at frame 10 bridged from frame 9 to 12
        assert_eq!(marker.cleaned_smooth.column("c").unwrap()[10], 10.0);

        let gfp = out.channel("GFP").unwrap();
        for (m, g) in cleaned.iter().zip(gfp.cleaned.column("c").unwrap()) {
            assert_eq!(m.is_nan(), g.is_nan());
        }
    }

    #[test]
    fn compressed_time_detects_division_on_hourly_rows() {
        // 15 min frames, every 4th row used for detection
        let settings = Settings::try_from(SettingsFile {
            min_len: 10,
            tracking_interval: 15.0,
            channel_names: vec!["iRFP".into(), "GFP".into()],
            tracking_channel: 1,
            transform: true,
            thresholds: Thresholds::default(),
            naming: FileNaming::default(),
        })
        .unwrap();
        assert_eq!(settings.time_transformer(), 4);

        let mut marker = vec![10.0; 120];
        marker[40] = 30.0;
        let mut size = vec![100.0; 120];
        for v in size.iter_mut().skip(44) {
            *v = 50.0;
        }
        let out = analyze(&spots("c", &marker, &size, 5.0), &settings).unwrap();
        let cell = &out.cells[0];
        assert_eq!(cell.divisions, vec![40]);
        assert!(cell.flags.is_empty());
        assert!(cell.approved);
    }

    #[test]
    fn close_divisions_reject_cell_in_every_channel() {
        let mut marker = vec![10.0; 60];
        marker[10] = 30.0;
        marker[20] = 30.0;
        let mut size = vec![100.0; 60];
        for (frame, v) in size.iter_mut().enumerate() {
            if frame >= 21 {
                *v = 25.0;
            } else if frame >= 11 {
                *v = 50.0;
            }
        }
        let out = analyze(&spots("c", &marker, &size, 5.0), &settings(10)).unwrap();
        let cell = &out.cells[0];
        assert_eq!(cell.divisions, vec![10, 20]);
        assert!(!cell.approved);
        assert_eq!(out.approved_cells(), 0);
        for channel in &out.channels {
            assert_eq!(channel.raw.n_cells(), 1);
            assert_eq!(channel.cleaned.n_cells(), 0, "{}", channel.name);
            assert_eq!(channel.normalized_smooth.n_cells(), 0, "{}", channel.name);
        }
    }

    #[test]
    fn short_tracks_are_excluded_before_analysis() {
        let mut records = spots("long", &[10.0; 30], &[100.0; 30], 1.0);
        records.extend(spots("short", &[10.0; 10], &[100.0; 10], 1.0));
        let out = analyze(&records, &settings(10)).unwrap();
        assert_eq!(out.cells.len(), 1);
        assert_eq!(out.cells[0].cell, "long");
    }

    #[test]
    fn missing_channel_fails() {
        let records: Vec<SpotRecord> = spots("a", &[1.0; 20], &[1.0; 20], 1.0)
            .into_iter()
            .map(|mut r| {
                r.intensities.remove(&2);
                r
            })
            .collect();
        assert!(matches!(
            analyze(&records, &settings(5)),
            Err(AnalysisError::MissingChannel(2))
        ));
    }
}
