use std::path::Path;

use anyhow::{Context, Result};

use crate::analysis::AnalysisOutput;
use crate::data::model::TimeSeriesTable;
use crate::settings::TimeBase;

fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

fn format_frames(frames: &[i64]) -> String {
    frames
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(";")
}

/// One row per frame, one column per cell.  Missing samples are empty cells.
pub fn write_table(table: &TimeSeriesTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let mut header = vec!["FRAME".to_string()];
    header.extend(table.cells().map(str::to_string));
    writer.write_record(&header)?;

    let columns: Vec<&[f64]> = table.columns().map(|(_, values)| values).collect();
    for (pos, frame) in table.frames().iter().enumerate() {
        let mut row = vec![frame.to_string()];
        row.extend(columns.iter().map(|values| format_value(values[pos])));
        writer.write_record(&row)?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Cell counts and mean signal per channel.
pub fn write_overview(output: &AnalysisOutput, min_len: usize, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["key", "value"])?;
    writer.write_record(["cells".to_string(), output.all_cells().to_string()])?;
    writer.write_record(["approved_cells".to_string(), output.approved_cells().to_string()])?;
    writer.write_record(["minimum length".to_string(), min_len.to_string()])?;
    for channel in &output.channels {
        writer.write_record([
            format!("mean signal {} (CH{})", channel.name, channel.number),
            format_value(channel.cleaned.grand_mean()),
        ])?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Mean cleaned signal of every cell per channel.  Rejected cells keep
/// their row with empty means.
pub fn write_cell_means(output: &AnalysisOutput, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let mut header = vec!["cell_number".to_string(), "approved".to_string()];
    header.extend(output.channels.iter().map(|c| format!("{} (CH{})", c.name, c.number)));
    writer.write_record(&header)?;

    let means: Vec<_> = output.channels.iter().map(|c| c.cleaned.column_means()).collect();
    for cell in &output.cells {
        let mut row = vec![cell.cell.clone(), cell.approved.to_string()];
        row.extend(
            means
                .iter()
                .map(|m| m.get(&cell.cell).map_or_else(String::new, |&v| format_value(v))),
        );
        writer.write_record(&row)?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Divisions, flags and approval of every cell.
pub fn write_div_flags(output: &AnalysisOutput, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["cell_number", "divisions", "flags", "approved"])?;
    for cell in &output.cells {
        writer.write_record([
            cell.cell.clone(),
            format_frames(&cell.divisions),
            format_frames(&cell.flags),
            cell.approved.to_string(),
        ])?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Population traces of the normalized, division-smoothed main channels.
pub fn write_traces(output: &AnalysisOutput, time: &TimeBase, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let main: Vec<_> = output
        .main_channels
        .iter()
        .filter_map(|name| output.channel(name))
        .collect();
    let Some(marker) = output.channel(&output.tracking_marker) else {
        return Ok(());
    };

    let mut header = vec!["FRAME".to_string(), "hours".to_string()];
    for channel in &main {
        header.push(format!("{} mean", channel.name));
        header.push(format!("{} median", channel.name));
    }
    header.push("cell count".to_string());
    writer.write_record(&header)?;

    let stats: Vec<(Vec<f64>, Vec<f64>)> = main
        .iter()
        .map(|c| (c.normalized_smooth.row_means(), c.normalized_smooth.row_medians()))
        .collect();
    let counts = marker.normalized_smooth.row_counts();

    for (pos, &frame) in marker.normalized_smooth.frames().iter().enumerate() {
        let mut row = vec![frame.to_string(), format!("{:.3}", time.frame_to_hours(frame))];
        for (means, medians) in &stats {
            row.push(format_value(means[pos]));
            row.push(format_value(medians[pos]));
        }
        row.push(counts[pos].to_string());
        writer.write_record(&row)?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}
