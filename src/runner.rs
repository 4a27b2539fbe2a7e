use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use anyhow::{Context, Result};
use log::{debug, error, info};
use serde::Serialize;

use crate::analysis::analyze;
use crate::data::loader::{load_dataset, Dataset};
use crate::report::write_report;
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Results and events
// ---------------------------------------------------------------------------

/// Outcome of one dataset.  Failures never escape a dataset: they are
/// recorded here and the run moves on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetResult {
    pub dataset: String,
    pub run_complete: bool,
    pub error: Option<String>,
    pub output_folder: PathBuf,
    pub figure_path: Option<PathBuf>,
    pub all_cells: Option<usize>,
    pub approved_cells: Option<usize>,
}

/// Progress notifications sent from the worker to the caller.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started { datasets: usize, files: usize },
    DatasetFinished { index: usize, total: usize, result: DatasetResult },
    Cancelled { completed: usize },
    Finished,
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub settings: Settings,
    pub datasets: Vec<Dataset>,
    pub output_root: PathBuf,
}

#[derive(Serialize)]
struct UsedSettings<'a> {
    settings: &'a Settings,
    datasets: Vec<&'a str>,
    files: Vec<&'a Path>,
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Analyse all datasets one after the other.
///
/// `cancel` is checked before each dataset; a dataset already in progress
/// always finishes.  Returns the results of the datasets that ran, which are
/// also written to `run_summary.json` whether or not the run was cancelled.
pub fn run(job: &RunJob, events: &Sender<RunEvent>, cancel: &AtomicBool) -> Result<Vec<DatasetResult>> {
    std::fs::create_dir_all(&job.output_root)
        .with_context(|| format!("creating {}", job.output_root.display()))?;
    write_used_settings(job)?;

    let files = job.datasets.iter().map(|d| d.subsets.len()).sum();
    info!(
        "Start processing {files} files from {} datasets, output at {}",
        job.datasets.len(),
        job.output_root.display()
    );
    let _ = events.send(RunEvent::Started {
        datasets: job.datasets.len(),
        files,
    });

    let total = job.datasets.len();
    let mut results = Vec::with_capacity(total);
    for (index, dataset) in job.datasets.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            info!("process aborted manually after {index} datasets");
            write_run_summary(&job.output_root, &results)?;
            let _ = events.send(RunEvent::Cancelled { completed: index });
            return Ok(results);
        }
        let result = run_dataset(dataset, &job.settings, &job.output_root);
        let _ = events.send(RunEvent::DatasetFinished {
            index: index + 1,
            total,
            result: result.clone(),
        });
        results.push(result);
    }

    write_run_summary(&job.output_root, &results)?;
    let _ = events.send(RunEvent::Finished);
    Ok(results)
}

/// Analyse one dataset, turning every error or panic into a failed result.
pub fn run_dataset(dataset: &Dataset, settings: &Settings, output_root: &Path) -> DatasetResult {
    info!("analysing dataset {}", dataset.name);
    let output_folder = output_root.join(&dataset.name);
    let mut result = DatasetResult {
        dataset: dataset.name.clone(),
        run_complete: false,
        error: None,
        output_folder: output_folder.clone(),
        figure_path: None,
        all_cells: None,
        approved_cells: None,
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        process_dataset(dataset, settings, &output_folder)
    }));
    match outcome {
        Ok(Ok(summary)) => {
            result.run_complete = true;
            result.figure_path = Some(summary.figure);
            result.all_cells = Some(summary.all_cells);
            result.approved_cells = Some(summary.approved_cells);
        }
        Ok(Err(err)) => {
            error!("error while analysing dataset {}: {err:#}", dataset.name);
            result.error = Some(format!("{err:#}"));
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown error".to_string());
            error!("panic while analysing dataset {}: {message}", dataset.name);
            result.error = Some(message);
        }
    }
    result
}

struct DatasetSummary {
    figure: PathBuf,
    all_cells: usize,
    approved_cells: usize,
}

fn process_dataset(dataset: &Dataset, settings: &Settings, folder: &Path) -> Result<DatasetSummary> {
    std::fs::create_dir_all(folder).with_context(|| format!("creating {}", folder.display()))?;
    let records = load_dataset(dataset)?;
    let output = analyze(&records, settings)
        .with_context(|| format!("analysing {}", dataset.name))?;
    let paths = write_report(&output, settings, &dataset.name, folder)?;
    debug!("long table of {} at {}", dataset.name, paths.parquet.display());
    Ok(DatasetSummary {
        figure: paths.figure,
        all_cells: output.all_cells(),
        approved_cells: output.approved_cells(),
    })
}

fn write_used_settings(job: &RunJob) -> Result<()> {
    let used = UsedSettings {
        settings: &job.settings,
        datasets: job.datasets.iter().map(|d| d.name.as_str()).collect(),
        files: job
            .datasets
            .iter()
            .flat_map(|d| d.subsets.iter().map(|s| s.path.as_path()))
            .collect(),
    };
    let path = job.output_root.join("used_settings.json");
    let text = serde_json::to_string_pretty(&used).context("serializing settings")?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    info!("settings stored at {}", path.display());
    Ok(())
}

fn write_run_summary(root: &Path, results: &[DatasetResult]) -> Result<()> {
    let path = root.join("run_summary.json");
    let text = serde_json::to_string_pretty(results).context("serializing run summary")?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
