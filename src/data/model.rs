use std::collections::{BTreeMap, BTreeSet, HashSet};

use thiserror::Error;

// ---------------------------------------------------------------------------
// SpotRecord – one row of a TrackMate spot table
// ---------------------------------------------------------------------------

/// A single tracked spot (one row of a subset export).
#[derive(Debug, Clone, PartialEq)]
pub struct SpotRecord {
    /// Subset-qualified track id, e.g. `003_17`.
    pub track_id: String,
    pub frame: i64,
    pub area: f64,
    /// `MEAN_INTENSITY_CH{n}` values keyed by channel number.
    pub intensities: BTreeMap<u8, f64>,
}

/// Prefix a raw TrackMate track id with its subset identifier.
pub fn qualified_track_id(subset: &str, track: i64) -> String {
    if subset.is_empty() {
        track.to_string()
    } else {
        format!("{subset}_{track}")
    }
}

// ---------------------------------------------------------------------------
// FrameTable – frame-indexed columns per cell
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("column '{cell}' has {got} rows, table has {expected}")]
    Length {
        cell: String,
        got: usize,
        expected: usize,
    },
    #[error("frame index must be strictly increasing")]
    UnsortedFrames,
}

/// A named table with one row per frame and one column per cell.
///
/// All columns share the frame index, so two tables built from the same
/// records line up row by row.  Absent samples of an `f64` table are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTable<T> {
    pub name: String,
    frames: Vec<i64>,
    columns: BTreeMap<String, Vec<T>>,
}

/// Measurement table: NaN marks a frame without a sample.
pub type TimeSeriesTable = FrameTable<f64>;

impl<T: Clone> FrameTable<T> {
    /// Empty table over the given frame index.
    pub fn new(name: impl Into<String>, frames: Vec<i64>) -> Result<Self, TableError> {
        if frames.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TableError::UnsortedFrames);
        }
        Ok(Self {
            name: name.into(),
            frames,
            columns: BTreeMap::new(),
        })
    }

    pub fn insert_column(&mut self, cell: impl Into<String>, values: Vec<T>) -> Result<(), TableError> {
        let cell = cell.into();
        if values.len() != self.frames.len() {
            return Err(TableError::Length {
                cell,
                got: values.len(),
                expected: self.frames.len(),
            });
        }
        self.columns.insert(cell, values);
        Ok(())
    }

    pub fn frames(&self) -> &[i64] {
        &self.frames
    }

    /// Row position of a frame label.
    pub fn position(&self, frame: i64) -> Option<usize> {
        self.frames.binary_search(&frame).ok()
    }

    pub fn cells(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn contains_cell(&self, cell: &str) -> bool {
        self.columns.contains_key(cell)
    }

    pub fn column(&self, cell: &str) -> Option<&[T]> {
        self.columns.get(cell).map(Vec::as_slice)
    }

    pub fn column_mut(&mut self, cell: &str) -> Option<&mut [T]> {
        self.columns.get_mut(cell).map(Vec::as_mut_slice)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn n_cells(&self) -> usize {
        self.columns.len()
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `(frame, value)` pairs of one cell in frame order.
    pub fn iter_column<'a>(&'a self, cell: &str) -> impl Iterator<Item = (i64, &'a T)> + 'a {
        let values = self.columns.get(cell).map(Vec::as_slice).unwrap_or(&[]);
        self.frames.iter().copied().zip(values.iter())
    }

    /// Values of one cell whose frame lies in `start..=end`.
    pub fn frame_range<'a>(&'a self, cell: &str, start: i64, end: i64) -> impl Iterator<Item = (i64, &'a T)> + 'a {
        self.iter_column(cell)
            .filter(move |(frame, _)| (start..=end).contains(frame))
    }

    /// Apply `f` to every column, producing a table of another cell type.
    pub fn map_columns<U>(&self, f: impl Fn(&[T]) -> Vec<U>) -> FrameTable<U> {
        FrameTable {
            name: self.name.clone(),
            frames: self.frames.clone(),
            columns: self
                .columns
                .iter()
                .map(|(cell, values)| (cell.clone(), f(values)))
                .collect(),
        }
    }

    /// Keep only the columns for which `keep` returns true.
    pub fn retain_cells(&mut self, mut keep: impl FnMut(&str, &[T]) -> bool) {
        self.columns.retain(|cell, values| keep(cell, values));
    }

    /// Re-index onto `cells`; cells absent from this table get a `fill` column.
    pub fn select_cells_or<'a>(&self, cells: impl IntoIterator<Item = &'a str>, fill: T) -> Self {
        let columns = cells
            .into_iter()
            .map(|cell| {
                let values = self
                    .columns
                    .get(cell)
                    .cloned()
                    .unwrap_or_else(|| vec![fill.clone(); self.frames.len()]);
                (cell.to_string(), values)
            })
            .collect();
        Self {
            name: self.name.clone(),
            frames: self.frames.clone(),
            columns,
        }
    }

    /// Every `k`-th row starting with the first.
    pub fn every_nth(&self, k: usize) -> Self {
        let k = k.max(1);
        Self {
            name: self.name.clone(),
            frames: self.frames.iter().copied().step_by(k).collect(),
            columns: self
                .columns
                .iter()
                .map(|(cell, values)| (cell.clone(), values.iter().cloned().step_by(k).collect()))
                .collect(),
        }
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl TimeSeriesTable {
    /// Pivot spot records into a frame × cell table.
    ///
    /// `frames` is the shared frame index; duplicate (track, frame) records
    /// keep their first occurrence.
    pub fn pivot(
        name: impl Into<String>,
        records: &[SpotRecord],
        frames: &[i64],
        value: impl Fn(&SpotRecord) -> f64,
    ) -> Result<Self, TableError> {
        let mut table = Self::new(name, frames.to_vec())?;
        let mut columns: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut seen: HashSet<(&str, i64)> = HashSet::new();
        for rec in records {
            if !seen.insert((rec.track_id.as_str(), rec.frame)) {
                continue;
            }
            let Some(pos) = table.position(rec.frame) else {
                continue;
            };
            let column = columns
                .entry(rec.track_id.as_str())
                .or_insert_with(|| vec![f64::NAN; frames.len()]);
            column[pos] = value(rec);
        }
        for (cell, values) in columns {
            table.insert_column(cell, values)?;
        }
        Ok(table)
    }

    /// Sorted union of the frames of all records.
    pub fn frame_index(records: &[SpotRecord]) -> Vec<i64> {
        records
            .iter()
            .map(|r| r.frame)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Present `(frame, value)` samples of one cell.
    pub fn samples<'a>(&'a self, cell: &str) -> impl Iterator<Item = (i64, f64)> + 'a {
        self.iter_column(cell)
            .filter(|(_, v)| !v.is_nan())
            .map(|(f, v)| (f, *v))
    }

    /// Drop columns with `min_len` or fewer samples.
    pub fn retain_longer_than(&mut self, min_len: usize) {
        self.retain_cells(|_, values| values.iter().filter(|v| !v.is_nan()).count() > min_len);
    }

    /// `(v[t] - v[t-1]) / v[t]` over consecutive rows; the first row is NaN.
    pub fn relative_change(&self) -> Self {
        self.map_columns(|values| {
            std::iter::once(f64::NAN)
                .chain(values.windows(2).map(|w| (w[1] - w[0]) / w[1]))
                .take(values.len())
                .collect()
        })
    }

    /// NaN out every sample whose frame is absent (NaN or missing column)
    /// in `reference`.
    pub fn mask_missing(&self, reference: &TimeSeriesTable) -> Self {
        let mut masked = self.clone();
        for (cell, values) in masked.columns.iter_mut() {
            let ref_col = reference.column(cell);
            for (value, frame) in values.iter_mut().zip(self.frames.iter()) {
                let present = ref_col
                    .zip(reference.position(*frame))
                    .is_some_and(|(col, pos)| !col[pos].is_nan());
                if !present {
                    *value = f64::NAN;
                }
            }
        }
        masked
    }

    /// NaN-skipping mean of each column.
    pub fn column_means(&self) -> BTreeMap<String, f64> {
        self.columns
            .iter()
            .map(|(cell, values)| (cell.clone(), nan_mean(values)))
            .collect()
    }

    /// Every column divided by its own mean.
    pub fn divide_by_column_means(&self) -> Self {
        self.map_columns(|values| {
            let mean = nan_mean(values);
            values.iter().map(|v| v / mean).collect()
        })
    }

    /// Mean over all columns' means (NaN if the table is empty).
    pub fn grand_mean(&self) -> f64 {
        let means: Vec<f64> = self.column_means().into_values().collect();
        nan_mean(&means)
    }

    fn row(&self, pos: usize) -> impl Iterator<Item = f64> + '_ {
        self.columns
            .values()
            .map(move |values| values[pos])
            .filter(|v| !v.is_nan())
    }

    /// Per-frame mean across cells.
    pub fn row_means(&self) -> Vec<f64> {
        (0..self.frames.len())
            .map(|pos| nan_mean(&self.row(pos).collect::<Vec<_>>()))
            .collect()
    }

    /// Per-frame median across cells.
    pub fn row_medians(&self) -> Vec<f64> {
        (0..self.frames.len())
            .map(|pos| median(self.row(pos).collect()))
            .collect()
    }

    /// Per-frame number of cells with a sample.
    pub fn row_counts(&self) -> Vec<usize> {
        (0..self.frames.len()).map(|pos| self.row(pos).count()).collect()
    }
}

// ---------------------------------------------------------------------------
// NaN-aware statistics
// ---------------------------------------------------------------------------

pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Sample standard deviation (ddof = 1) of the non-NaN values.
pub fn nan_std(values: &[f64]) -> f64 {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if present.len() < 2 {
        return f64::NAN;
    }
    let mean = nan_mean(&present);
    let ss: f64 = present.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (present.len() - 1) as f64).sqrt()
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
