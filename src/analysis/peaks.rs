use crate::data::model::{nan_mean, nan_std, FrameTable, TimeSeriesTable};

/// Default width of the centered smoothing window, in rows.
pub const DEFAULT_ROLLING_WINDOW: usize = 7;

pub type PeakTable = FrameTable<bool>;

/// Centered rolling mean.  A window that leaves the series or contains a
/// gap yields NaN.  For even widths the window spans one more row before
/// the centre than after it.
pub fn centered_rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let window = window.max(1);
    (0..n)
        .map(|i| {
            let Some(start) = i.checked_sub(window / 2) else {
                return f64::NAN;
            };
            let end = start + window;
            if end > n {
                return f64::NAN;
            }
            let slice = &values[start..end];
            if slice.iter().any(|v| v.is_nan()) {
                f64::NAN
            } else {
                slice.iter().sum::<f64>() / window as f64
            }
        })
        .collect()
}

/// Classify each sample as peak / non-peak.
///
/// The residual to the rolling mean is compared with the residual's global
/// mean and standard deviation, so slow drift is tolerated while sharp local
/// excursions stand out.  A negative `threshold` looks for dips instead.
pub fn detect_peaks(values: &[f64], threshold: f64, window: usize) -> Vec<bool> {
    let smooth = centered_rolling_mean(values, window);
    let residuals: Vec<f64> = values.iter().zip(&smooth).map(|(v, s)| v - s).collect();
    let mean = nan_mean(&residuals);
    let std = nan_std(&residuals);
    let cutoff = mean + threshold * std;

    residuals
        .iter()
        .map(|&r| {
            if threshold >= 0.0 {
                r > cutoff
            } else {
                r < cutoff
            }
        })
        .collect()
}

/// Peak labels for every cell of a table.
pub fn detect_peak_table(table: &TimeSeriesTable, threshold: f64, window: usize) -> PeakTable {
    table
        .map_columns(|values| detect_peaks(values, threshold, window))
        .renamed(format!("{}_peaks", table.name))
}

/// Frames of one cell flagged as peaks, in order.
pub fn peak_frames(peaks: &PeakTable, cell: &str) -> Vec<i64> {
    peaks
        .iter_column(cell)
        .filter(|(_, is_peak)| **is_peak)
        .map(|(frame, _)| frame)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike_series(len: usize, at: usize, base: f64, height: f64) -> Vec<f64> {
        (0..len).map(|i| if i == at { height } else { base }).collect()
    }

    #[test]
    fn rolling_mean_edges_are_nan() {
        let m = centered_rolling_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!(m[0].is_nan() && m[4].is_nan());
        assert_eq!(&m[1..4], &[2.0, 3.0, 4.0]);

        let even = centered_rolling_mean(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], 4);
        assert!(even[1].is_nan());
        assert_eq!(even[2], 1.5);
        assert!(even[5].is_nan());
    }

    #[test]
    fn finds_single_spike() {
        let values = spike_series(60, 10, 10.0, 30.0);
        let peaks = detect_peaks(&values, 1.5, DEFAULT_ROLLING_WINDOW);
        let hits: Vec<usize> = peaks.iter().enumerate().filter(|(_, p)| **p).map(|(i, _)| i).collect();
        assert_eq!(hits, vec![10]);
    }

    #[test]
    fn negative_threshold_finds_dips() {
        let values = spike_series(60, 20, 10.0, 1.0);
        let peaks = detect_peaks(&values, -1.5, DEFAULT_ROLLING_WINDOW);
        assert!(peaks[20]);
        assert_eq!(peaks.iter().filter(|p| **p).count(), 1);
    }

    #[test]
    fn flat_series_and_edges_have_no_peaks() {
        let flat = vec![5.0; 30];
        assert!(detect_peaks(&flat, 1.5, DEFAULT_ROLLING_WINDOW).iter().all(|p| !p));

        // spike inside the NaN edge of the rolling window
        let values = spike_series(30, 1, 10.0, 50.0);
        assert!(!detect_peaks(&values, 1.5, DEFAULT_ROLLING_WINDOW)[1]);
    }
}
