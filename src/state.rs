use crate::runner::{DatasetResult, RunEvent};

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Aggregated state of one batch run, fed by `RunEvent`s.
#[derive(Debug, Default)]
pub struct RunState {
    /// Datasets announced at start.
    pub total_datasets: usize,

    /// Files announced at start.
    pub total_files: usize,

    /// Results received so far, in processing order.
    pub results: Vec<DatasetResult>,

    pub cancelled: bool,
    pub finished: bool,
}

impl RunState {
    /// Fold one worker event into the state.
    pub fn apply(&mut self, event: RunEvent) {
        match event {
            RunEvent::Started { datasets, files } => {
                self.total_datasets = datasets;
                self.total_files = files;
            }
            RunEvent::DatasetFinished { result, .. } => self.results.push(result),
            RunEvent::Cancelled { .. } => {
                self.cancelled = true;
                self.finished = true;
            }
            RunEvent::Finished => self.finished = true,
        }
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| !r.run_complete).count()
    }

    /// Fraction of datasets processed, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_datasets == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        self.completed() as f64 / self.total_datasets as f64
    }

    /// One-line progress text, e.g. `2/5 datasets (1 error)`.
    pub fn progress_text(&self) -> String {
        let errors = match self.error_count() {
            0 => String::new(),
            1 => " (1 error)".to_string(),
            n => format!(" ({n} errors)"),
        };
        let mut text = format!("{}/{} datasets{errors}", self.completed(), self.total_datasets);
        if self.cancelled {
            text.push_str(", aborted");
        }
        text
    }

    /// One line per failed dataset: `name: error`.
    pub fn error_report(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.run_complete)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.dataset,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }
}
