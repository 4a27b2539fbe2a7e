use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::jumps::{jump_frames, Jump, JumpTable};
use super::peaks::{peak_frames, PeakTable};
use crate::settings::TimeBase;

/// Hours after a marker peak in which a size drop marks a division.
pub const DIVISION_WINDOW_HOURS: f64 = 2.0;
/// Marker jumps this close (before or after) to a division belong to it.
pub const MARKER_JUMP_WINDOW_HOURS: f64 = 2.0;
/// Two divisions closer than this are treated as a tracking failure.
pub const MIN_DIVISION_SPACING_HOURS: f64 = 15.0;

/// Frames around `anchors` from `rel_start` to `rel_end` hours (inclusive).
///
/// Steps by the time transformer so only frames present in a compressed
/// table are produced.  Frames `<= 0` are discarded.
pub fn surrounding_timepoints(
    anchors: &[i64],
    rel_start_hours: f64,
    rel_end_hours: f64,
    time: &TimeBase,
) -> BTreeSet<i64> {
    let start = time.hours_to_frames(rel_start_hours);
    let end = time.hours_to_frames(rel_end_hours);
    anchors
        .iter()
        .flat_map(|&tp| ((tp + start)..=(tp + end)).step_by(time.transformer))
        .filter(|&frame| frame > 0)
        .collect()
}

/// Drop peak frames that directly follow another peak frame.
pub fn collapse_consecutive(peaks: &[i64], step: usize) -> Vec<i64> {
    let set: BTreeSet<i64> = peaks.iter().copied().collect();
    peaks
        .iter()
        .copied()
        .filter(|&t| !set.contains(&(t - step as i64)))
        .collect()
}

/// Division frames per cell: a (collapsed) marker peak followed within
/// [`DIVISION_WINDOW_HOURS`] by a size down-jump.
///
/// Cells are taken from the peak table; a cell without size data has no
/// divisions.
pub fn classify_divisions(
    peaks: &PeakTable,
    size_jumps: &JumpTable,
    time: &TimeBase,
) -> BTreeMap<String, Vec<i64>> {
    let window = time.hours_to_frames(DIVISION_WINDOW_HOURS);
    peaks
        .cells()
        .map(|cell| {
            let peak_times = peak_frames(peaks, cell);
            debug!("tracking marker peaks of cell {cell}: {peak_times:?}");
            let divisions: Vec<i64> = collapse_consecutive(&peak_times, time.transformer)
                .into_iter()
                .filter(|&t| {
                    size_jumps
                        .frame_range(cell, t, t + window)
                        .any(|(_, jump)| *jump == Jump::Down)
                })
                .collect();
            (cell.to_string(), divisions)
        })
        .collect()
}

/// Cells with two consecutive divisions closer than [`MIN_DIVISION_SPACING_HOURS`].
pub fn close_divisions(divisions: &BTreeMap<String, Vec<i64>>, interval_minutes: f64) -> BTreeSet<String> {
    let min_gap = MIN_DIVISION_SPACING_HOURS / (interval_minutes / 60.0);
    divisions
        .iter()
        .filter(|(_, times)| times.windows(2).any(|w| ((w[1] - w[0]) as f64) < min_gap))
        .map(|(cell, _)| cell.clone())
        .collect()
}

/// Jump frames of every cell that are not explained by a division of that cell.
///
/// A jump is explained when it falls within `rel_start..=rel_end` hours of
/// any division.
pub fn non_division_jumps(
    jumps: &JumpTable,
    divisions: &BTreeMap<String, Vec<i64>>,
    rel_start_hours: f64,
    rel_end_hours: f64,
    time: &TimeBase,
) -> BTreeMap<String, Vec<i64>> {
    jumps
        .cells()
        .map(|cell| {
            let cell_divisions = divisions.get(cell).map(Vec::as_slice).unwrap_or(&[]);
            let explained = surrounding_timepoints(cell_divisions, rel_start_hours, rel_end_hours, time);
            let frames = jump_frames(jumps, cell);
            debug!("{} of cell {cell}: {frames:?}", jumps.name);
            let unexplained = frames.into_iter().filter(|f| !explained.contains(f)).collect();
            (cell.to_string(), unexplained)
        })
        .collect()
}

/// Union of two per-cell flag lists, sorted and deduplicated.
pub fn merge_flags(
    a: &BTreeMap<String, Vec<i64>>,
    b: &BTreeMap<String, Vec<i64>>,
) -> BTreeMap<String, Vec<i64>> {
    let mut merged: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    for (cell, frames) in a.iter().chain(b.iter()) {
        merged.entry(cell.clone()).or_default().extend(frames);
    }
    merged
        .into_iter()
        .map(|(cell, frames)| (cell, frames.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::jumps::detect_jumps;
    use crate::analysis::peaks::{detect_peak_table, DEFAULT_ROLLING_WINDOW};
    use crate::data::model::TimeSeriesTable;

    fn hourly() -> TimeBase {
        TimeBase::new(60.0, 1)
    }

    fn single(name: &str, cell: &str, values: Vec<f64>) -> TimeSeriesTable {
        let mut t = TimeSeriesTable::new(name, (0..values.len() as i64).collect()).unwrap();
        t.insert_column(cell, values).unwrap();
        t
    }

    #[test]
    fn surrounding_one_sample_per_hour() {
        let tps = surrounding_timepoints(&[20], 0.0, 2.0, &hourly());
        assert_eq!(tps.into_iter().collect::<Vec<_>>(), vec![20, 21, 22]);
    }

    #[test]
    fn surrounding_drops_non_positive_and_dedups() {
        let tps = surrounding_timepoints(&[1, 2], -2.0, 2.0, &hourly());
        assert_eq!(tps.into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn surrounding_with_compression_steps_by_transformer() {
        let tps = surrounding_timepoints(&[20], 0.0, 2.0, &TimeBase::new(15.0, 4));
        assert_eq!(tps.into_iter().collect::<Vec<_>>(), vec![20, 24, 28]);
    }

    #[test]
    fn collapses_runs_to_first_peak() {
        assert_eq!(collapse_consecutive(&[3, 4, 5, 9, 11], 1), vec![3, 9, 11]);
        assert_eq!(collapse_consecutive(&[4, 8, 16], 4), vec![4, 16]);
    }

    #[test]
    fn close_divisions_flags_any_short_gap() {
        let divisions = BTreeMap::from([
            ("close".to_string(), vec![0, 5, 40]),
            ("fine".to_string(), vec![0, 20, 40]),
            ("single".to_string(), vec![3]),
        ]);
        let close = close_divisions(&divisions, 60.0);
        assert_eq!(close, BTreeSet::from(["close".to_string()]));
    }

    #[test]
    fn peak_with_size_drop_is_division_and_late_jump_is_flag() {
        let mut marker = vec![10.0; 60];
        marker[10] = 30.0;
        let mut size = vec![100.0; 60];
        for v in size.iter_mut().take(50).skip(11) {
            *v = 50.0;
        }
        let marker = single("marker", "c", marker);
        let size = single("area", "c", size);

        let time = hourly();
        let peaks = detect_peak_table(&marker, 1.5, DEFAULT_ROLLING_WINDOW);
        let size_jumps = detect_jumps(&size, 0.2);
        let marker_jumps = detect_jumps(&marker, 0.18);
        let divisions = classify_divisions(&peaks, &size_jumps, &time);
        assert_eq!(divisions["c"], vec![10]);

        let size_flags = non_division_jumps(&size_jumps, &divisions, 0.0, DIVISION_WINDOW_HOURS, &time);
        let marker_flags = non_division_jumps(&marker_jumps, &divisions, -MARKER_JUMP_WINDOW_HOURS, MARKER_JUMP_WINDOW_HOURS, &time);
        assert_eq!(size_flags["c"], vec![50]);
        assert!(marker_flags["c"].is_empty());
        assert_eq!(merge_flags(&size_flags, &marker_flags)["c"], vec![50]);
    }

    #[test]
    fn divisions_are_drawn_from_peaks_only() {
        // size drops without any marker peak
        let marker = single("marker", "c", vec![10.0; 40]);
        let mut size = vec![100.0; 40];
        size[20] = 40.0;
        let size = single("area", "c", size);
        let peaks = detect_peak_table(&marker, 1.5, DEFAULT_ROLLING_WINDOW);
        let divisions = classify_divisions(&peaks, &detect_jumps(&size, 0.2), &hourly());
        assert!(divisions["c"].is_empty());
        let peak_set: BTreeSet<i64> = peak_frames(&peaks, "c").into_iter().collect();
        assert!(divisions["c"].iter().all(|d| peak_set.contains(d)));
    }

    #[test]
    fn size_drop_outside_window_is_not_a_division() {
        let mut marker = vec![10.0; 60];
        marker[10] = 30.0;
        let mut size = vec![100.0; 60];
        for v in size.iter_mut().skip(14) {
            *v = 50.0;
        }
        let peaks = detect_peak_table(&single("marker", "c", marker), 1.5, DEFAULT_ROLLING_WINDOW);
        let jumps = detect_jumps(&single("area", "c", size), 0.2);
        let divisions = classify_divisions(&peaks, &jumps, &hourly());
        assert!(divisions["c"].is_empty());
    }
}
