use crate::core::timeseries::AlignedTimeSeriesTable;
use crate::render::frame::format_value;
use crate::types::{No2Error, No2Result};
use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const PAD_LEFT: f32 = 80.0;
const PAD_RIGHT: f32 = 150.0;
const PAD_TOP: f32 = 20.0;
const PAD_BOTTOM: f32 = 40.0;
const LABEL_SCALE: f32 = 14.0;

const INK: Rgba<u8> = Rgba([30, 30, 30, 255]);

fn series_color(column: &str) -> Rgba<u8> {
    match column {
        "Mean" => Rgba([31, 119, 180, 255]),
        "Max" => Rgba([214, 39, 40, 255]),
        "MovingAverage" => Rgba([44, 160, 44, 255]),
        "Smooth" => Rgba([255, 127, 14, 255]),
        _ => Rgba([148, 103, 189, 255]),
    }
}

/// Draw every column of the table as a line over time, with a legend.
/// Null cells break the line.
pub fn render_time_series(
    table: &AlignedTimeSeriesTable,
    width: u32,
    height: u32,
    font: Option<&FontVec>,
) -> No2Result<RgbaImage> {
    let rows = table.rows();
    if rows.is_empty() {
        return Err(No2Error::ArtifactIo("cannot plot an empty time series".to_string()));
    }

    let columns: Vec<(&str, Vec<Option<f64>>)> = table
        .columns()
        .into_iter()
        .filter_map(|name| table.column(name).map(|v| (name, v)))
        .collect();

    let (lo, hi) = columns
        .iter()
        .flat_map(|(_, v)| v.iter().flatten().copied())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return Err(No2Error::ArtifactIo("time series holds no values".to_string()));
    }
    let span_y = if hi > lo { hi - lo } else { 1.0 };

    let t0 = rows[0].timestamp.timestamp() as f64;
    let t1 = rows[rows.len() - 1].timestamp.timestamp() as f64;
    let span_t = if t1 > t0 { t1 - t0 } else { 1.0 };

    let plot_w = width as f32 - PAD_LEFT - PAD_RIGHT;
    let plot_h = height as f32 - PAD_TOP - PAD_BOTTOM;
    let to_x = |ts: i64| PAD_LEFT + ((ts as f64 - t0) / span_t) as f32 * plot_w;
    let to_y = |v: f64| PAD_TOP + plot_h - ((v - lo) / span_y) as f32 * plot_h;

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    // axes
    let (x_axis_y, y_axis_x) = (PAD_TOP + plot_h, PAD_LEFT);
    draw_line_segment_mut(&mut canvas, (y_axis_x, PAD_TOP), (y_axis_x, x_axis_y), INK);
    draw_line_segment_mut(&mut canvas, (y_axis_x, x_axis_y), (PAD_LEFT + plot_w, x_axis_y), INK);

    for (name, values) in &columns {
        let color = series_color(name);
        let mut previous: Option<(f32, f32)> = None;
        for (row, value) in rows.iter().zip(values) {
            match value {
                Some(v) => {
                    let point = (to_x(row.timestamp.timestamp()), to_y(*v));
                    if let Some(prev) = previous {
                        draw_line_segment_mut(&mut canvas, prev, point, color);
                    }
                    previous = Some(point);
                }
                None => previous = None,
            }
        }
    }

    // legend swatches
    let legend_x = (PAD_LEFT + plot_w + 15.0) as i32;
    for (i, (name, _)) in columns.iter().enumerate() {
        let y = PAD_TOP as i32 + i as i32 * 22;
        draw_filled_rect_mut(&mut canvas, Rect::at(legend_x, y + 4).of_size(16, 8), series_color(name));
        if let Some(font) = font {
            draw_text_mut(&mut canvas, INK, legend_x + 22, y, PxScale::from(LABEL_SCALE), font, name);
        }
    }

    if let Some(font) = font {
        let scale = PxScale::from(LABEL_SCALE);
        let first = rows[0].timestamp.format("%Y-%m-%d").to_string();
        let last = rows[rows.len() - 1].timestamp.format("%Y-%m-%d").to_string();
        let below = x_axis_y as i32 + 8;
        draw_text_mut(&mut canvas, INK, PAD_LEFT as i32, below, scale, font, &first);
        draw_text_mut(&mut canvas, INK, (PAD_LEFT + plot_w) as i32 - 80, below, scale, font, &last);
        draw_text_mut(&mut canvas, INK, 4, PAD_TOP as i32, scale, font, &format_value(hi as f32));
        draw_text_mut(&mut canvas, INK, 4, x_axis_y as i32 - 14, scale, font, &format_value(lo as f32));
    }

    Ok(canvas)
}

pub fn save_time_series_chart<P: AsRef<Path>>(
    table: &AlignedTimeSeriesTable,
    width: u32,
    height: u32,
    font: Option<&FontVec>,
    path: P,
) -> No2Result<()> {
    let img = render_time_series(table, width, height, font)?;
    img.save_with_format(path.as_ref(), image::ImageFormat::Png)?;
    log::info!("Saved time series chart to {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timeseries::TimeSeriesAssembler;
    use crate::types::{TimeSeries, TimeSeriesPoint};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_chart_size_and_empty_table() {
        let points = (1..=5)
            .map(|d| TimeSeriesPoint {
                timestamp: Utc.with_ymd_and_hms(2019, 7, d, 0, 0, 0).unwrap(),
                value: if d == 3 { None } else { Some(d as f64) },
            })
            .collect();
        let series = TimeSeries::from_points(points);
        let table = TimeSeriesAssembler::new(3).assemble(&series, &series, &series);

        let img = render_time_series(&table, 400, 200, None).unwrap();
        assert_eq!(img.dimensions(), (400, 200));

        let empty = TimeSeriesAssembler::new(3).assemble(
            &TimeSeries::default(),
            &TimeSeries::default(),
            &TimeSeries::default(),
        );
        assert!(render_time_series(&empty, 400, 200, None).is_err());
    }
}
