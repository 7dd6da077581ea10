#![cfg(feature = "web")]
//! PNG line charts
//!
//! Charts are drawn by plotters into an in-memory RGB buffer and encoded as
//! PNG, so concurrent requests never share a scratch file. Time series are
//! plotted against seconds elapsed since their first sample; the axis
//! formatter turns the offset back into a wall-clock label.

use chrono::{Duration, NaiveDateTime};
use plotters::prelude::*;
use std::error::Error;
use std::io::Cursor;
use std::str::FromStr;

use crate::dataset::{Dataset, TIMESTAMP_COLUMN};
use crate::error::{EnergyError, Result};
use crate::meter::MeterWindow;
use crate::resample::{TimePoints, prepare_series, time_series};

/// Most columns drawn on one comparison chart
pub const MAX_COMPARE_COLUMNS: usize = 3;

/// The live chart is drawn only once there are more points than this
pub const MIN_LIVE_POINTS: usize = 5;

/// Axis label format for single-day meter charts
pub const TIME_AXIS_FORMAT: &str = "%H:%M";

/// Axis label format for comparison charts
pub const DATE_TIME_AXIS_FORMAT: &str = "%m-%d %H:%M";

const ORANGE: RGBColor = RGBColor(255, 140, 0);
const DARK_GREEN: RGBColor = RGBColor(0, 140, 60);
const PALETTE: [RGBColor; 3] = [RGBColor(31, 119, 180), RGBColor(214, 39, 40), RGBColor(44, 160, 44)];

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,

    /// chrono format used for time-axis labels
    pub time_format: &'static str,
}

impl Default for ChartOptions {
    /// Creates a default configuration for chart rendering
    ///
    /// # Returns
    /// * `ChartOptions` - 900x400 pixels, generic labels, `%H:%M` time axis
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            x_label: "Time".to_string(),
            y_label: "Value".to_string(),
            width: 900,
            height: 400,
            time_format: TIME_AXIS_FORMAT,
        }
    }
}

/// One named line on a time chart
#[derive(Clone, Debug)]
pub struct ChartSeries {
    pub name: String,
    pub points: TimePoints,
    pub color: RGBColor,
}

/// The three per-parameter meter charts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeterSeries {
    Voltage,
    Power,
    PowerFactor,
}

impl MeterSeries {
    pub fn title(&self) -> &'static str {
        match self {
            MeterSeries::Voltage => "Voltage Over Time",
            MeterSeries::Power => "Power Over Time",
            MeterSeries::PowerFactor => "Power Factor Over Time",
        }
    }

    pub fn color(&self) -> RGBColor {
        match self {
            MeterSeries::Voltage => ORANGE,
            MeterSeries::Power => DARK_GREEN,
            MeterSeries::PowerFactor => BLUE,
        }
    }

    /// Name of the backing column in a meter window
    pub fn column<'a>(&self, window: &'a MeterWindow) -> &'a str {
        match self {
            MeterSeries::Voltage => &window.columns.voltage,
            MeterSeries::Power => &window.columns.power,
            MeterSeries::PowerFactor => &window.columns.power_factor,
        }
    }
}

impl FromStr for MeterSeries {
    type Err = EnergyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "voltage" => Ok(MeterSeries::Voltage),
            "power" => Ok(MeterSeries::Power),
            "pf" | "power_factor" | "power-factor" => Ok(MeterSeries::PowerFactor),
            other => Err(EnergyError::InvalidInput(format!(
                "unknown meter series '{}', expected voltage, power or pf",
                other
            ))),
        }
    }
}

/// Build the series of a parameter comparison chart
///
/// # Arguments
/// * `dataset` - A normalized dataset
/// * `requested` - Columns to draw; empty means the first numeric columns
/// * `resample_above` - Series longer than this are reduced to 1-minute means
///
/// # Returns
/// * Up to [`MAX_COMPARE_COLUMNS`] series
///
/// # Errors
/// * `EnergyError::InvalidInput` if the dataset has no time column or no
///   numeric column
/// * `EnergyError::UnknownColumn` if a requested column is not numeric
pub fn compare_series(
    dataset: &Dataset,
    requested: &[String],
    resample_above: usize,
) -> Result<Vec<ChartSeries>> {
    if dataset.timestamps(TIMESTAMP_COLUMN).is_none() {
        return Err(EnergyError::InvalidInput("No time column found".to_string()));
    }

    let numeric = dataset.numeric_column_names();
    let columns: Vec<String> = if requested.is_empty() {
        numeric.into_iter().take(MAX_COMPARE_COLUMNS).collect()
    } else {
        for name in requested {
            if !numeric.contains(name) {
                return Err(EnergyError::UnknownColumn(name.clone()));
            }
        }
        requested.iter().take(MAX_COMPARE_COLUMNS).cloned().collect()
    };

    if columns.is_empty() {
        return Err(EnergyError::InvalidInput("no numeric column to chart".to_string()));
    }

    Ok(columns
        .into_iter()
        .zip(PALETTE)
        .map(|(name, color)| {
            let points = prepare_series(time_series(dataset, TIMESTAMP_COLUMN, &name), resample_above);
            ChartSeries { name, points, color }
        })
        .collect())
}

/// Render the parameter comparison chart as PNG
pub fn compare_chart(
    dataset: &Dataset,
    requested: &[String],
    resample_above: usize,
) -> Result<Vec<u8>> {
    let series = compare_series(dataset, requested, resample_above)?;
    let options = ChartOptions {
        title: "Parameter Comparison Over Time".to_string(),
        time_format: DATE_TIME_AXIS_FORMAT,
        ..ChartOptions::default()
    };
    render_time_chart(&series, &options)
}

/// Render one meter parameter over a window as PNG
pub fn meter_chart(window: &MeterWindow, which: MeterSeries, resample_above: usize) -> Result<Vec<u8>> {
    let column = which.column(window);
    let points = prepare_series(
        time_series(&window.dataset, &window.columns.timestamp, column),
        resample_above,
    );
    let series = ChartSeries {
        name: column.to_string(),
        points,
        color: which.color(),
    };
    let options = ChartOptions {
        title: which.title().to_string(),
        y_label: column.to_string(),
        ..ChartOptions::default()
    };
    render_time_chart(&[series], &options)
}

/// Render the live stream chart as PNG
///
/// # Returns
/// * `None` while there are at most [`MIN_LIVE_POINTS`] numeric samples
pub fn live_chart(points: &[(usize, f64)]) -> Result<Option<Vec<u8>>> {
    if points.len() <= MIN_LIVE_POINTS {
        return Ok(None);
    }
    let options = ChartOptions {
        title: "Live Stream".to_string(),
        x_label: "Sample".to_string(),
        ..ChartOptions::default()
    };
    let data: Vec<(f64, f64)> = points.iter().map(|&(i, v)| (i as f64, v)).collect();
    let buffer = draw(&options, |area| {
        draw_lines(area, &options, &[("payload".to_string(), data, BLUE)], &|x: &f64| {
            format!("{:.0}", x)
        })
    })?;
    encode_png(buffer, &options).map(Some)
}

/// Render named time series on one chart as PNG
///
/// # Errors
/// * `EnergyError::Chart` if there is nothing to draw or plotting fails
pub fn render_time_chart(series: &[ChartSeries], options: &ChartOptions) -> Result<Vec<u8>> {
    let origin = series
        .iter()
        .filter_map(|s| s.points.first().map(|p| p.0))
        .min()
        .ok_or_else(|| EnergyError::Chart("no points to draw".to_string()))?;

    let lines: Vec<(String, Vec<(f64, f64)>, RGBColor)> = series
        .iter()
        .map(|s| {
            let data = s
                .points
                .iter()
                .map(|(t, v)| (seconds_since(origin, *t), *v))
                .collect();
            (s.name.clone(), data, s.color)
        })
        .collect();

    let format = options.time_format;
    let buffer = draw(options, |area| {
        draw_lines(area, options, &lines, &|x: &f64| axis_label(origin, *x, format))
    })?;
    encode_png(buffer, options)
}

fn seconds_since(origin: NaiveDateTime, t: NaiveDateTime) -> f64 {
    (t - origin).num_milliseconds() as f64 / 1000.0
}

/// Wall-clock label for an axis offset in seconds
pub fn axis_label(origin: NaiveDateTime, offset_secs: f64, format: &str) -> String {
    let t = origin + Duration::milliseconds((offset_secs * 1000.0).round() as i64);
    t.format(format).to_string()
}

/// Padded axis range that is never empty
fn span(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if lo == hi {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

type Area<'a> = DrawingArea<BitMapBackend<'a>, plotters::coord::Shift>;

fn draw<F>(options: &ChartOptions, paint: F) -> Result<Vec<u8>>
where
    F: FnOnce(&Area<'_>) -> std::result::Result<(), Box<dyn Error>>,
{
    let mut buffer = vec![0u8; options.width as usize * options.height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (options.width, options.height))
            .into_drawing_area();
        paint(&root).map_err(|e| EnergyError::Chart(e.to_string()))?;
        root.present()
            .map_err(|e| EnergyError::Chart(e.to_string()))?;
    }
    Ok(buffer)
}

fn draw_lines(
    root: &Area<'_>,
    options: &ChartOptions,
    lines: &[(String, Vec<(f64, f64)>, RGBColor)],
    x_formatter: &dyn Fn(&f64) -> String,
) -> std::result::Result<(), Box<dyn Error>> {
    root.fill(&WHITE)?;

    let (min_x, max_x) = span(lines.iter().flat_map(|l| l.1.iter().map(|p| p.0)));
    let (min_y, max_y) = span(lines.iter().flat_map(|l| l.1.iter().map(|p| p.1)));

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 24).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(min_x..max_x, min_y..max_y)?;

    chart
        .configure_mesh()
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .x_labels(8)
        .x_label_formatter(x_formatter)
        .draw()?;

    for (name, data, color) in lines {
        let color = *color;
        chart
            .draw_series(LineSeries::new(data.iter().copied(), color.stroke_width(2)))?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    if lines.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn encode_png(buffer: Vec<u8>, options: &ChartOptions) -> Result<Vec<u8>> {
    let image = image::RgbImage::from_raw(options.width, options.height, buffer)
        .ok_or_else(|| EnergyError::Chart("chart buffer has the wrong size".to_string()))?;
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .map_err(|e| EnergyError::Chart(e.to_string()))?;
    Ok(out.into_inner())
}
