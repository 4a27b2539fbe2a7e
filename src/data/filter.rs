use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::model::TimeSeriesTable;

// ---------------------------------------------------------------------------
// Filter outcome on the reference channel
// ---------------------------------------------------------------------------

/// Result of filtering the reference channel.  Its table is the mask every
/// other channel is cropped to.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Kept cells, cropped to their longest flag-free interval.
    pub table: TimeSeriesTable,
    /// Cells removed for close divisions or a too short clean interval.
    pub dropped: BTreeSet<String>,
}

/// Inclusive frame range of the longest gap between consecutive flags.
///
/// The series start and end act as flags one frame outside the series.  Ties
/// resolve to the earliest interval.
pub fn longest_flag_free_interval(first: i64, last: i64, flags: &[i64]) -> (i64, i64) {
    let mut bounds: Vec<i64> = Vec::with_capacity(flags.len() + 2);
    bounds.push(first - 1);
    bounds.extend_from_slice(flags);
    bounds.push(last + 1);
    bounds.sort_unstable();

    let mut best = 0;
    for i in 1..bounds.len() - 1 {
        if bounds[i + 1] - bounds[i] > bounds[best + 1] - bounds[best] {
            best = i;
        }
    }
    (bounds[best], bounds[best + 1])
}

/// Crop or drop the cells of the reference channel.
///
/// * cells in `close_divisions` are dropped
/// * cells without flags are kept unchanged
/// * otherwise the series is cropped to its longest flag-free interval and
///   dropped if fewer than `min_len` samples remain
///
/// Cells of `table` missing from `flags` are kept unchanged.
pub fn filter_cells(
    table: &TimeSeriesTable,
    flags: &BTreeMap<String, Vec<i64>>,
    close_divisions: &BTreeSet<String>,
    min_len: usize,
) -> FilterOutcome {
    let mut filtered = table.clone();
    let mut dropped = BTreeSet::new();

    for (cell, cell_flags) in flags {
        if close_divisions.contains(cell) {
            debug!("cell {cell} dropped: close divisions");
            dropped.insert(cell.clone());
            continue;
        }
        if cell_flags.is_empty() {
            continue;
        }

        let samples: Vec<(i64, f64)> = table.samples(cell).collect();
        let (Some(&(first, _)), Some(&(last, _))) = (samples.first(), samples.last()) else {
            dropped.insert(cell.clone());
            continue;
        };
        let (start, end) = longest_flag_free_interval(first, last, cell_flags);
        let kept = samples.iter().filter(|(f, _)| (start..=end).contains(f)).count();

        if kept < min_len {
            debug!("cell {cell} dropped: {kept} frames in {start}..={end} after flags {cell_flags:?}");
            dropped.insert(cell.clone());
        } else if let Some(column) = filtered.column_mut(cell) {
            for (value, frame) in column.iter_mut().zip(table.frames()) {
                if !(start..=end).contains(frame) {
                    *value = f64::NAN;
                }
            }
        }
    }

    filtered.retain_cells(|cell, _| !dropped.contains(cell));
    FilterOutcome { table: filtered, dropped }
}

/// Apply the reference channel's outcome to another channel: same kept
/// cells, same missing frames.
pub fn apply_reference(raw: &TimeSeriesTable, reference: &TimeSeriesTable) -> TimeSeriesTable {
    raw.select_cells_or(reference.cells(), f64::NAN)
        .mask_missing(reference)
}
