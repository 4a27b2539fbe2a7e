use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::DataType;
use log::{debug, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;

use super::model::{qualified_track_id, SpotRecord};
use crate::settings::FileNaming;

/// TrackMate writes three descriptive rows below the CSV header.
const CSV_HEADER_ROWS: usize = 3;
const INTENSITY_PREFIX: &str = "MEAN_INTENSITY_CH";

// ---------------------------------------------------------------------------
// Dataset discovery
// ---------------------------------------------------------------------------

/// One file of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subset {
    /// Subset identifier used to qualify track ids ("" for single-file datasets).
    pub id: String,
    pub path: PathBuf,
}

/// A group of subset files sharing a name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub name: String,
    pub subsets: Vec<Subset>,
}

/// Split a file name into `(dataset, subset)` according to `naming`.
pub fn parse_file_name(file_name: &str, naming: &FileNaming) -> Result<(String, String)> {
    let stem = file_name
        .strip_suffix(naming.suffix.as_str())
        .with_context(|| format!("file {file_name} does not end with {}", naming.suffix))?;
    if naming.digits == 0 {
        return Ok((stem.to_string(), String::new()));
    }

    let split = stem
        .len()
        .checked_sub(naming.digits)
        .filter(|&at| stem.is_char_boundary(at))
        .with_context(|| format!("problem with file {file_name}, wrong amount of digits?"))?;
    let (prefix, subset) = stem.split_at(split);
    if !subset.chars().all(|c| c.is_ascii_digit()) {
        bail!("problem with file {file_name}, wrong amount of digits?");
    }
    let name = if naming.delimiter.is_empty() {
        prefix
    } else {
        prefix
            .strip_suffix(naming.delimiter.as_str())
            .with_context(|| format!("problem with file {file_name}, separator not found"))?
    };
    Ok((name.to_string(), subset.to_string()))
}

/// Group the files of `folder` ending with the configured suffix into datasets,
/// sorted by name.
pub fn discover_datasets(folder: &Path, naming: &FileNaming) -> Result<Vec<Dataset>> {
    let mut files: Vec<String> = std::fs::read_dir(folder)
        .with_context(|| format!("listing {}", folder.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(naming.suffix.as_str()))
        .collect();
    files.sort();
    if files.is_empty() {
        bail!(
            "no datasets found in {}, check input folder and suffix '{}'",
            folder.display(),
            naming.suffix
        );
    }

    let mut datasets: BTreeMap<String, Vec<Subset>> = BTreeMap::new();
    for file in &files {
        let (name, id) = parse_file_name(file, naming)?;
        datasets.entry(name).or_default().push(Subset {
            id,
            path: folder.join(file),
        });
    }
    Ok(datasets
        .into_iter()
        .map(|(name, subsets)| Dataset { name, subsets })
        .collect())
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load all subsets of a dataset.  Missing or unreadable subsets are skipped
/// with a warning; a dataset without any readable subset is an error.
pub fn load_dataset(dataset: &Dataset) -> Result<Vec<SpotRecord>> {
    let mut records = Vec::new();
    let mut loaded = 0usize;
    for subset in &dataset.subsets {
        if !subset.path.exists() {
            warn!("file: {} not found", subset.path.display());
            continue;
        }
        debug!("processing file {}", subset.path.display());
        match load_file(&subset.path, &subset.id) {
            Ok(spots) => {
                records.extend(spots);
                loaded += 1;
            }
            Err(err) => {
                warn!("subset {} of {} could not be loaded: {err:#}", subset.id, dataset.name);
            }
        }
    }
    if loaded == 0 {
        bail!("could not load any subset of dataset {}", dataset.name);
    }
    Ok(records)
}

/// Load a TrackMate spot table.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – TrackMate spot export (header + 3 descriptive rows)
/// * `.parquet` – same columns, typed, no descriptive rows
pub fn load_file(path: &Path, subset: &str) -> Result<Vec<SpotRecord>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path, subset),
        "csv" | "txt" => load_csv(path, subset),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// Column layout shared by both formats
// ---------------------------------------------------------------------------

struct Columns {
    track_id: usize,
    frame: usize,
    area: usize,
    /// channel number → column index
    intensities: Vec<(u8, usize)>,
}

impl Columns {
    fn locate<'a>(headers: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let headers: Vec<&str> = headers.into_iter().collect();
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .with_context(|| format!("missing '{name}' column"))
        };
        let intensities = headers
            .iter()
            .enumerate()
            .filter_map(|(idx, h)| {
                let channel = h.trim().strip_prefix(INTENSITY_PREFIX)?.parse::<u8>().ok()?;
                Some((channel, idx))
            })
            .collect();
        Ok(Self {
            track_id: find("TRACK_ID")?,
            frame: find("FRAME")?,
            area: find("AREA")?,
            intensities,
        })
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
}

fn parse_value(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// TrackMate CSV layout: header row with feature names, then three rows of
/// labels/units which are skipped.  Rows without a TRACK_ID (untracked
/// spots) are dropped.
fn load_csv(path: &Path, subset: &str) -> Result<Vec<SpotRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .context("opening CSV")?;
    let columns = Columns::locate(reader.headers().context("reading CSV headers")?.iter())?;

    let mut spots = Vec::new();
    for (row_no, result) in reader.records().enumerate().skip(CSV_HEADER_ROWS) {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let Some(track) = record.get(columns.track_id).and_then(parse_integer) else {
            continue;
        };
        let frame_text = record.get(columns.frame).unwrap_or("");
        let frame = parse_integer(frame_text)
            .with_context(|| format!("CSV row {row_no}: FRAME '{frame_text}' is not a number"))?;

        let intensities = columns
            .intensities
            .iter()
            .map(|&(channel, idx)| (channel, record.get(idx).map_or(f64::NAN, parse_value)))
            .collect();

        spots.push(SpotRecord {
            track_id: qualified_track_id(subset, track),
            frame,
            area: record.get(columns.area).map_or(f64::NAN, parse_value),
            intensities,
        });
    }
    Ok(spots)
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet spot table with the TrackMate column names.  Numeric
/// columns may be integer or float; string columns are parsed.
fn load_parquet(path: &Path, subset: &str) -> Result<Vec<SpotRecord>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut spots = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let columns = Columns::locate(schema.fields().iter().map(|f| f.name().as_str()))?;

        for row in 0..batch.num_rows() {
            let Some(track) = cell_as_f64(batch.column(columns.track_id), row)
                .filter(|v| v.is_finite())
                .map(|v| v as i64)
            else {
                continue;
            };
            let frame = cell_as_f64(batch.column(columns.frame), row)
                .filter(|v| v.is_finite())
                .with_context(|| format!("Row {row}: missing FRAME"))? as i64;

            let intensities = columns
                .intensities
                .iter()
                .map(|&(channel, idx)| {
                    (channel, cell_as_f64(batch.column(idx), row).unwrap_or(f64::NAN))
                })
                .collect();

            spots.push(SpotRecord {
                track_id: qualified_track_id(subset, track),
                frame,
                area: cell_as_f64(batch.column(columns.area), row).unwrap_or(f64::NAN),
                intensities,
            });
        }
    }

    Ok(spots)
}

// -- Parquet / Arrow helpers --

/// Read a single numeric value from an Arrow column at a given row.
fn cell_as_f64(col: &Arc<dyn Array>, row: usize) -> Option<f64> {
    if col.is_null(row) {
        return None;
    }
    match col.data_type() {
        DataType::Float64 => col
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| a.value(row)),
        DataType::Float32 => col
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| a.value(row) as f64),
        DataType::Int64 => col
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(row) as f64),
        DataType::Int32 => col
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| a.value(row) as f64),
        DataType::Utf8 => col
            .as_any()
            .downcast_ref::<StringArray>()
            .and_then(|a| a.value(row).trim().parse().ok()),
        DataType::LargeUtf8 => col.as_string::<i64>().value(row).trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("trackmate-post-loader-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const CSV: &str = "\
LABEL,ID,TRACK_ID,QUALITY,FRAME,AREA,MEAN_INTENSITY_CH1,MEAN_INTENSITY_CH2
Label,Spot ID,Track ID,Quality,Frame,Area,Mean ch1,Mean ch2
Label,Spot ID,Track ID,Quality,Frame,Area,Mean ch1,Mean ch2
,,,(quality),,(micron^2),(counts),(counts)
ID1,1,4,1.0,0,120.5,33.0,7.5
ID2,2,,1.0,0,99.0,1.0,1.0
ID3,3,4,1.0,1,121.0,,8.0
";

    #[test]
    fn parses_file_names() {
        let naming = FileNaming::default();
        assert_eq!(
            parse_file_name("exp1_002.csv", &naming).unwrap(),
            ("exp1".to_string(), "002".to_string())
        );
        assert!(parse_file_name("exp1_02a.csv", &naming).is_err());
        assert!(parse_file_name("exp1-002.csv", &naming).is_err());

        let single = FileNaming { digits: 0, ..FileNaming::default() };
        assert_eq!(
            parse_file_name("whole_run.csv", &single).unwrap(),
            ("whole_run".to_string(), String::new())
        );
    }

    #[test]
    fn groups_subsets_into_datasets() {
        let dir = scratch_dir("discover");
        for f in ["b_001.csv", "a_002.csv", "a_001.csv", "notes.txt"] {
            std::fs::write(dir.join(f), "").unwrap();
        }
        let datasets = discover_datasets(&dir, &FileNaming::default()).unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].name, "a");
        assert_eq!(
            datasets[0].subsets.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["001", "002"]
        );
    }

    #[test]
    fn loads_trackmate_csv() {
        let dir = scratch_dir("csv");
        let path = dir.join("exp_003.csv");
        std::fs::write(&path, CSV).unwrap();
        let spots = load_file(&path, "003").unwrap();
        assert_eq!(spots.len(), 2);
        assert_eq!(spots[0].track_id, "003_4");
        assert_eq!(spots[0].area, 120.5);
        assert_eq!(spots[0].intensities[&1], 33.0);
        assert!(spots[1].intensities[&1].is_nan());
        assert_eq!(spots[1].frame, 1);
    }

    #[test]
    fn missing_subset_is_skipped_but_empty_dataset_fails() {
        let dir = scratch_dir("skip");
        let good = dir.join("exp_001.csv");
        std::fs::write(&good, CSV).unwrap();
        let dataset = Dataset {
            name: "exp".into(),
            subsets: vec![
                Subset { id: "001".into(), path: good },
                Subset { id: "002".into(), path: dir.join("exp_002.csv") },
            ],
        };
        assert_eq!(load_dataset(&dataset).unwrap().len(), 2);

        let empty = Dataset {
            name: "none".into(),
            subsets: vec![Subset { id: "001".into(), path: dir.join("none_001.csv") }],
        };
        assert!(load_dataset(&empty).is_err());
    }
}
