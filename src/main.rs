mod analysis;
mod color;
mod data;
mod report;
mod runner;
mod settings;
mod state;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};

use data::loader::discover_datasets;
use runner::{RunEvent, RunJob};
use settings::{FileNaming, Settings, SettingsFile, Thresholds};
use state::RunState;

/// Post-processing of TrackMate spot tables: division detection, cell
/// filtering and population traces.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Folder containing the TrackMate spot tables
    input: PathBuf,

    /// JSON settings file; replaces all analysis flags below
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Minimum number of frames a track must exceed
    #[arg(long, default_value_t = 20)]
    min_len: usize,

    /// Minutes between two frames
    #[arg(long)]
    interval: Option<f64>,

    /// Channel names in acquisition order, comma separated
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,

    /// Channel number (1-based) of the tracking marker
    #[arg(long, default_value_t = 1)]
    tracking_channel: u8,

    /// Compress time to one frame per hour for detection
    #[arg(long)]
    transform: bool,

    /// Relative size change counted as a jump
    #[arg(long, default_value_t = 0.2)]
    size_jump: f64,

    /// Relative marker change counted as a jump
    #[arg(long, default_value_t = 0.18)]
    marker_jump: f64,

    /// Marker peak threshold in standard deviations
    #[arg(long, default_value_t = 1.5)]
    division_peak: f64,

    /// File suffix of the spot tables
    #[arg(long, default_value = ".csv")]
    suffix: String,

    /// Number of subset digits at the end of each file stem (0: one file per dataset)
    #[arg(long, default_value_t = 3)]
    digits: usize,

    /// Separator between dataset name and subset digits
    #[arg(long, default_value = "_")]
    delimiter: String,

    /// Where the run folder is created (default: the input folder)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        if let Some(path) = &self.settings {
            return Settings::from_json_file(path);
        }
        let Some(interval) = self.interval else {
            bail!("--interval is required without a settings file");
        };
        let raw = SettingsFile {
            min_len: self.min_len,
            tracking_interval: interval,
            channel_names: self.channels.clone(),
            tracking_channel: self.tracking_channel,
            transform: self.transform,
            thresholds: Thresholds {
                size_jump: self.size_jump,
                tracking_marker_jump: self.marker_jump,
                tracking_marker_division_peak: self.division_peak,
            },
            naming: FileNaming {
                suffix: self.suffix.clone(),
                digits: self.digits,
                delimiter: self.delimiter.clone(),
            },
        };
        Ok(Settings::try_from(raw)?)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Input validation aborts before any dataset is touched.
    let settings = cli.settings().context("invalid settings")?;
    if settings.transform_requested() && !settings.transform_active() {
        warn!(
            "time transformation ignored: interval {} min is above {} min",
            settings.tracking_interval(),
            settings::MAX_TRANSFORM_INTERVAL_MINUTES
        );
    }
    let datasets = discover_datasets(&cli.input, settings.naming())?;

    let stamp = chrono::Local::now().format("%y-%m-%d_%H-%M");
    let output_root = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.clone())
        .join(format!("post_script_output_{stamp}"));

    let job = RunJob {
        settings,
        datasets,
        output_root,
    };
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            warn!("abort requested, stopping after the current dataset");
            cancel.store(true, Ordering::SeqCst);
        })
        .context("installing Ctrl-C handler")?;
    }
    let (tx, rx) = mpsc::channel();

    let worker = {
        let cancel = Arc::clone(&cancel);
        thread::spawn(move || runner::run(&job, &tx, &cancel))
    };

    let mut state = RunState::default();
    for event in rx {
        if let RunEvent::DatasetFinished { index, total, result } = &event {
            match &result.error {
                None => info!(
                    "[{index}/{total}] {}: {} of {} cells approved",
                    result.dataset,
                    result.approved_cells.unwrap_or(0),
                    result.all_cells.unwrap_or(0)
                ),
                Some(err) => error!("[{index}/{total}] {}: {err}", result.dataset),
            }
        }
        state.apply(event);
        info!("progress {} ({:.0}%)", state.progress_text(), state.fraction() * 100.0);
    }

    match worker.join() {
        Ok(outcome) => {
            outcome?;
        }
        Err(_) => bail!("worker thread panicked"),
    }

    let failures = state.error_report();
    if failures.is_empty() {
        info!("Process finished without errors");
    } else {
        warn!("Process finished with {} errors:", failures.len());
        for line in &failures {
            warn!("  {line}");
        }
    }
    Ok(())
}
