/// Export layer: spreadsheets, long-format parquet and the overview figure.
///
/// ```text
///   AnalysisOutput
///        │
///        ├──► sheets    overview / div_flags / per-channel tables / traces (.csv)
///        ├──► long_table every exported table in long format
///        └──► overview  heatmap + mean/median strip (.png)
/// ```
pub mod long_table;
pub mod overview;
pub mod sheets;

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use crate::analysis::AnalysisOutput;
use crate::settings::Settings;

/// Files written for one dataset.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub figure: PathBuf,
    pub parquet: PathBuf,
}

/// Write all outputs of one dataset into `folder`.
pub fn write_report(
    output: &AnalysisOutput,
    settings: &Settings,
    dataset: &str,
    folder: &Path,
) -> Result<ReportPaths> {
    sheets::write_overview(output, settings.min_len(), &folder.join(format!("overview_{dataset}.csv")))?;
    sheets::write_div_flags(output, &folder.join(format!("div_flags_{dataset}.csv")))?;
    sheets::write_cell_means(output, &folder.join(format!("mean_signal_per_cell_{dataset}.csv")))?;
    sheets::write_traces(output, &settings.time_base(), &folder.join(format!("traces_{dataset}.csv")))?;

    let mut long_tables = Vec::new();
    for channel in &output.channels {
        for table in [
            &channel.raw,
            &channel.cleaned,
            &channel.cleaned_smooth,
            &channel.normalized_smooth,
        ] {
            sheets::write_table(table, &folder.join(format!("{}.csv", table.name)))?;
            long_tables.push((channel.name.as_str(), table));
        }
    }

    let parquet = folder.join(format!("cleaned_series_{dataset}.parquet"));
    let rows = long_table::write_long_table(&long_tables, &parquet)?;
    debug!("wrote {rows} samples to {}", parquet.display());

    let figure = folder.join(format!("overview_accepted_cells_{dataset}.png"));
    overview::render_overview(output, &figure)?;

    Ok(ReportPaths { figure, parquet })
}
