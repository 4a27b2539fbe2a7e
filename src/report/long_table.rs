use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::data::model::TimeSeriesTable;

/// Write tables in long format: one row per present sample with columns
/// `channel`, `table`, `cell`, `frame`, `value`.
pub fn write_long_table(tables: &[(&str, &TimeSeriesTable)], path: &Path) -> Result<usize> {
    let mut channels: Vec<&str> = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    let mut cells: Vec<&str> = Vec::new();
    let mut frames: Vec<i64> = Vec::new();
    let mut values: Vec<f64> = Vec::new();

    for &(channel, table) in tables {
        for (cell, column) in table.columns() {
            for (&frame, &value) in table.frames().iter().zip(column) {
                if value.is_nan() {
                    continue;
                }
                channels.push(channel);
                names.push(&table.name);
                cells.push(cell);
                frames.push(frame);
                values.push(value);
            }
        }
    }
    let rows = values.len();

    let schema = Arc::new(Schema::new(vec![
        Field::new("channel", DataType::Utf8, false),
        Field::new("table", DataType::Utf8, false),
        Field::new("cell", DataType::Utf8, false),
        Field::new("frame", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(channels)),
            Arc::new(StringArray::from(names)),
            Arc::new(StringArray::from(cells)),
            Arc::new(Int64Array::from(frames)),
            Arc::new(Float64Array::from(values)),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(rows)
}
