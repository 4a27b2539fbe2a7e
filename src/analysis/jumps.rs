use serde::Serialize;

use crate::data::model::{FrameTable, TimeSeriesTable};

/// Direction of an abrupt frame-to-frame change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Jump {
    Up,
    Down,
    #[default]
    None,
}

impl Jump {
    /// Classify a relative change against a symmetric threshold.
    /// Both bounds are inclusive; NaN never counts as a jump.
    pub fn classify(relative_change: f64, threshold: f64) -> Self {
        if relative_change >= threshold {
            Jump::Up
        } else if relative_change <= -threshold {
            Jump::Down
        } else {
            Jump::None
        }
    }

    pub fn is_jump(self) -> bool {
        self != Jump::None
    }
}

pub type JumpTable = FrameTable<Jump>;

/// Label every sample of every cell by its relative change to the previous row.
pub fn detect_jumps(table: &TimeSeriesTable, threshold: f64) -> JumpTable {
    table
        .relative_change()
        .map_columns(|changes| changes.iter().map(|&c| Jump::classify(c, threshold)).collect())
        .renamed(format!("{}_jumps", table.name))
}

/// Frames of one cell carrying any jump.
pub fn jump_frames(jumps: &JumpTable, cell: &str) -> Vec<i64> {
    jumps
        .iter_column(cell)
        .filter(|(_, j)| j.is_jump())
        .map(|(frame, _)| frame)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(Jump::classify(0.2, 0.2), Jump::Up);
        assert_eq!(Jump::classify(0.2 - 1e-12, 0.2), Jump::None);
        assert_eq!(Jump::classify(-0.2, 0.2), Jump::Down);
        assert_eq!(Jump::classify(-0.2 + 1e-12, 0.2), Jump::None);
        assert_eq!(Jump::classify(f64::NAN, 0.2), Jump::None);
        assert_eq!(Jump::classify(f64::INFINITY, 0.2), Jump::Up);
    }

    #[test]
    fn labels_series_start_as_no_jump() {
        let mut t = TimeSeriesTable::new("area", vec![0, 1, 2, 3]).unwrap();
        t.insert_column("c", vec![100.0, 100.0, 50.0, 100.0]).unwrap();
        let jumps = detect_jumps(&t, 0.2);
        assert_eq!(
            jumps.column("c").unwrap(),
            &[Jump::None, Jump::None, Jump::Down, Jump::Up]
        );
        assert_eq!(jump_frames(&jumps, "c"), vec![2, 3]);
        assert_eq!(jumps.name, "area_jumps");
    }

    #[test]
    fn gap_next_to_sample_is_not_a_jump() {
        let mut t = TimeSeriesTable::new("area", vec![0, 1, 2]).unwrap();
        t.insert_column("c", vec![100.0, f64::NAN, 100.0]).unwrap();
        let jumps = detect_jumps(&t, 0.2);
        assert!(jump_frames(&jumps, "c").is_empty());
    }
}
