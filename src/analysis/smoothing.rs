use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

use crate::data::model::TimeSeriesTable;

/// Time span bridged around each division.
pub const SMOOTHING_SPAN_HOURS: f64 = 2.0;

#[derive(Debug, Error, PartialEq)]
enum InterpolationError {
    #[error("cell not in table")]
    UnknownCell,
    #[error("frame {0} not in index")]
    MissingFrame(i64),
    #[error("window around frame {0} is not contiguous")]
    Gap(i64),
    #[error("no sample at anchor frame {0}")]
    MissingAnchor(i64),
}

/// Number of frames replaced per division and how they split around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    before: i64,
    after: i64,
}

impl Window {
    fn for_interval(interval_minutes: f64) -> Self {
        let width = ((SMOOTHING_SPAN_HOURS / (interval_minutes / 60.0)) as i64).max(2);
        let before = (width - 2) / 2;
        Self {
            before,
            after: width - before,
        }
    }

    fn width(self) -> i64 {
        self.before + self.after
    }
}

/// Replace the samples around each division by a straight line between the
/// samples just outside the window.
///
/// A division that cannot be bridged (edge of the series, gap, cell already
/// dropped) is left as is.
pub fn smooth_divisions(
    table: &TimeSeriesTable,
    divisions: &BTreeMap<String, Vec<i64>>,
    interval_minutes: f64,
) -> TimeSeriesTable {
    let window = Window::for_interval(interval_minutes);
    let mut smoothed = table.clone();
    for (cell, times) in divisions {
        for &division in times {
            if let Err(err) = bridge(&mut smoothed, cell, division, window) {
                debug!("division at {division} of cell {cell} not smoothed: {err}");
            }
        }
    }
    smoothed
}

fn bridge(table: &mut TimeSeriesTable, cell: &str, division: i64, window: Window) -> Result<(), InterpolationError> {
    let lo_frame = division - window.before - 1;
    let hi_frame = division + window.after;
    let lo = table
        .position(lo_frame)
        .ok_or(InterpolationError::MissingFrame(lo_frame))?;
    let hi = table
        .position(hi_frame)
        .ok_or(InterpolationError::MissingFrame(hi_frame))?;
    // frames are strictly increasing, so equal spans mean no gaps
    if (hi - lo) as i64 != window.width() + 1 {
        return Err(InterpolationError::Gap(division));
    }

    let values = table.column_mut(cell).ok_or(InterpolationError::UnknownCell)?;
    let (start, end) = (values[lo], values[hi]);
    if start.is_nan() {
        return Err(InterpolationError::MissingAnchor(lo_frame));
    }
    if end.is_nan() {
        return Err(InterpolationError::MissingAnchor(hi_frame));
    }

    let steps = (hi - lo) as f64;
    for (offset, value) in values[lo + 1..hi].iter_mut().enumerate() {
        *value = start + (end - start) * (offset + 1) as f64 / steps;
    }
    Ok(())
}
