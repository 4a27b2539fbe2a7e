use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};

use crate::analysis::{AnalysisOutput, ChannelSeries};
use crate::color::{generate_palette, ColorScale};
use crate::data::model::TimeSeriesTable;

const MARGIN: u32 = 10;
const PANEL_GAP: u32 = 12;
const FRAME_PX: u32 = 2;
const CELL_PX: u32 = 3;
const TRACE_HEIGHT: u32 = 120;

/// Heatmap colour range of the normalized signal.
const HEATMAP_RANGE: (f64, f64) = (0.2, 2.6);
/// Value range shown in the mean/median strip.
const TRACE_RANGE: (f64, f64) = (0.3, 2.5);

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([200, 200, 200]);
const MEDIAN: Rgb<u8> = Rgb([60, 60, 60]);
const COUNT: Rgb<u8> = Rgb([120, 120, 120]);

/// Cells ordered by the frame of their maximum; cells without samples last.
pub fn cells_by_peak_time(table: &TimeSeriesTable) -> Vec<&str> {
    let mut cells: Vec<(usize, &str)> = table
        .columns()
        .map(|(cell, values)| {
            let argmax = values
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_nan())
                .fold(None::<(usize, f64)>, |best, (i, &v)| match best {
                    Some((_, b)) if b >= v => best,
                    _ => Some((i, v)),
                })
                .map_or(usize::MAX, |(i, _)| i);
            (argmax, cell)
        })
        .collect();
    cells.sort_by_key(|&(argmax, _)| argmax);
    cells.into_iter().map(|(_, cell)| cell).collect()
}

/// Render one heatmap + trace panel per main channel side by side.
pub fn render_overview(output: &AnalysisOutput, path: &Path) -> Result<()> {
    let mut panels: Vec<&ChannelSeries> = output
        .main_channels
        .iter()
        .filter_map(|name| output.channel(name))
        .collect();
    if panels.is_empty() {
        panels.extend(output.channel(&output.tracking_marker));
    }

    let n_frames = panels.first().map_or(0, |c| c.normalized_smooth.n_frames()) as u32;
    let n_cells = panels.first().map_or(0, |c| c.normalized_smooth.n_cells()).max(1) as u32;
    let panel_width = (n_frames * FRAME_PX).max(1);
    let heatmap_height = n_cells * CELL_PX;
    let n_panels = panels.len().max(1) as u32;

    let width = 2 * MARGIN + n_panels * panel_width + (n_panels - 1) * PANEL_GAP;
    let height = 2 * MARGIN + heatmap_height + 2 * (PANEL_GAP + TRACE_HEIGHT);
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    let scale = ColorScale::viridis(HEATMAP_RANGE.0, HEATMAP_RANGE.1);
    let colors = generate_palette(panels.len());

    for (i, channel) in panels.iter().enumerate() {
        let x0 = MARGIN + i as u32 * (panel_width + PANEL_GAP);
        let table = &channel.normalized_smooth;
        draw_heatmap(&mut img, table, &scale, x0, MARGIN);

        let strip_top = MARGIN + heatmap_height + PANEL_GAP;
        draw_frame(&mut img, x0, strip_top, panel_width, TRACE_HEIGHT);
        draw_trace(&mut img, &table.row_medians(), x0, strip_top, MEDIAN);
        draw_trace(&mut img, &table.row_means(), x0, strip_top, colors[i]);

        let count_top = strip_top + TRACE_HEIGHT + PANEL_GAP;
        draw_frame(&mut img, x0, count_top, panel_width, TRACE_HEIGHT);
        let counts = table.row_counts();
        let max = counts.iter().copied().max().unwrap_or(0).max(1);
        let counts: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        draw_polyline(&mut img, &counts, x0, COUNT, |c| count_y(c, max, count_top));
    }

    img.save(path)
        .with_context(|| format!("saving {}", path.display()))?;
    Ok(())
}

fn draw_heatmap(img: &mut RgbImage, table: &TimeSeriesTable, scale: &ColorScale, x0: u32, y0: u32) {
    for (row, cell) in cells_by_peak_time(table).into_iter().enumerate() {
        let Some(values) = table.column(cell) else {
            continue;
        };
        for (col, &v) in values.iter().enumerate() {
            let color = scale.color_for(v);
            for dy in 0..CELL_PX {
                for dx in 0..FRAME_PX {
                    img.put_pixel(x0 + col as u32 * FRAME_PX + dx, y0 + row as u32 * CELL_PX + dy, color);
                }
            }
        }
    }
}

fn draw_frame(img: &mut RgbImage, x0: u32, y0: u32, width: u32, height: u32) {
    for x in x0..x0 + width {
        img.put_pixel(x, y0, AXIS);
        img.put_pixel(x, y0 + height - 1, AXIS);
    }
    for y in y0..y0 + height {
        img.put_pixel(x0, y, AXIS);
        img.put_pixel(x0 + width - 1, y, AXIS);
    }
}

fn trace_y(value: f64, top: u32) -> u32 {
    let t = ((value - TRACE_RANGE.0) / (TRACE_RANGE.1 - TRACE_RANGE.0)).clamp(0.0, 1.0);
    top + ((1.0 - t) * f64::from(TRACE_HEIGHT - 1)).round() as u32
}

/// Number of cells present, scaled so `max` touches the top of the strip.
fn count_y(count: f64, max: usize, top: u32) -> u32 {
    let t = (count / max as f64).clamp(0.0, 1.0);
    top + ((1.0 - t) * f64::from(TRACE_HEIGHT - 1)).round() as u32
}

fn draw_trace(img: &mut RgbImage, values: &[f64], x0: u32, top: u32, color: Rgb<u8>) {
    draw_polyline(img, values, x0, color, |v| trace_y(v, top));
}

/// Polyline through the non-NaN points; gaps break the line.
fn draw_polyline(img: &mut RgbImage, values: &[f64], x0: u32, color: Rgb<u8>, to_y: impl Fn(f64) -> u32) {
    let mut previous: Option<u32> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            previous = None;
            continue;
        }
        let y = to_y(v);
        let (lo, hi) = match previous {
            Some(p) => (p.min(y), p.max(y)),
            None => (y, y),
        };
        for dx in 0..FRAME_PX {
            for yy in lo..=hi {
                img.put_pixel(x0 + i as u32 * FRAME_PX + dx, yy, color);
            }
        }
        previous = Some(y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_cells_by_time_of_maximum() {
        let mut t = TimeSeriesTable::new("x", vec![0, 1, 2]).unwrap();
        t.insert_column("late", vec![1.0, 2.0, 3.0]).unwrap();
        t.insert_column("early", vec![3.0, 2.0, 1.0]).unwrap();
        t.insert_column("empty", vec![f64::NAN; 3]).unwrap();
        t.insert_column("mid", vec![f64::NAN, 5.0, 1.0]).unwrap();
        assert_eq!(cells_by_peak_time(&t), vec!["early", "mid", "late", "empty"]);
    }

    #[test]
    fn cell_count_strip_scales_to_maximum() {
        assert_eq!(count_y(4.0, 4, 100), 100);
        assert_eq!(count_y(0.0, 4, 100), 100 + TRACE_HEIGHT - 1);
    }

    #[test]
    fn figure_has_heatmap_and_two_strips() {
        use crate::analysis::{CellReport, ChannelSeries};

        let mut t = TimeSeriesTable::new("GFP_norm_acpt_cells_smoothDiv", vec![0, 1, 2, 3]).unwrap();
        t.insert_column("a", vec![0.5, 1.0, 1.5, f64::NAN]).unwrap();
        t.insert_column("b", vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        let output = AnalysisOutput {
            tracking_marker: "iRFP".into(),
            main_channels: vec!["GFP".into()],
            channels: vec![ChannelSeries {
                number: 2,
                name: "GFP".into(),
                raw: t.clone(),
                cleaned: t.clone(),
                cleaned_smooth: t.clone(),
                normalized_smooth: t,
            }],
            cells: vec![CellReport { cell: "a".into(), divisions: vec![], flags: vec![], approved: true }],
        };
        let dir = std::env::temp_dir().join(format!("trackmate-post-figure-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("overview.png");
        render_overview(&output, &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.width(), 2 * MARGIN + 4 * FRAME_PX);
        assert_eq!(img.height(), 2 * MARGIN + 2 * CELL_PX + 2 * (PANEL_GAP + TRACE_HEIGHT));
    }

    #[test]
    fn trace_range_is_clamped_to_strip() {
        assert_eq!(trace_y(2.5, 0), 0);
        assert_eq!(trace_y(0.3, 0), TRACE_HEIGHT - 1);
        assert_eq!(trace_y(100.0, 5), 5);
    }
}
