//! PNG charts embedded in the per-system report.
//!
//! Plots are drawn into an in-memory RGB buffer and encoded as PNG. Any drawing or encoding
//! failure is logged and yields an empty buffer; charts never fail a run. Titles and values
//! are carried by the HTML around each image.

use std::error::Error;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use plotters::coord::Shift;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{ServiceTotal, Snapshot};
use crate::trend::{TrendPoint, TrendResult};

pub const WIDTH: u32 = 900;
pub const HEIGHT: u32 = 300;
pub const TOP_SERVICES: usize = 10;
pub const SLA_TARGET_PCT: f64 = 95.0;

type DrawResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    ErrorTrend,
    TopServices,
    ErrorDensity,
    Reliability,
}

impl ChartKind {
    pub const ALL: [ChartKind; 4] = [
        ChartKind::ErrorTrend,
        ChartKind::TopServices,
        ChartKind::ErrorDensity,
        ChartKind::Reliability,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            ChartKind::ErrorTrend => "Total errors with forecast",
            ChartKind::TopServices => "Top services by errors",
            ChartKind::ErrorDensity => "Error density",
            ChartKind::Reliability => "Reliability vs SLA target",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChart {
    pub kind: ChartKind,
    pub png: Vec<u8>,
}

fn rasterize<F>(draw: F) -> Result<Vec<u8>, Box<dyn Error>>
where
    F: FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>) -> DrawResult,
{
    let mut rgb = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut rgb, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE)?;
        draw(&root)?;
        root.present()?;
    }
    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(&rgb, WIDTH, HEIGHT, ExtendedColorType::Rgb8)?;
    Ok(png)
}

fn y_ceiling(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(1.0_f64, f64::max) * 1.15
}

/// Four light horizontal rules. Axis labels are not drawn: no font backend is compiled in.
fn grid_lines(x_max: f64, y_max: f64) -> impl Iterator<Item = PathElement<(f64, f64)>> {
    (1..=4).map(move |k| {
        let y = y_max * f64::from(k) / 5.0;
        PathElement::new(
            vec![(0.0, y), (x_max, y)],
            RGBColor(0xe0, 0xe0, 0xe0).stroke_width(1),
        )
    })
}

fn draw_error_trend(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    series: &[TrendPoint],
    predicted: i64,
) -> DrawResult {
    let n = series.len();
    let values: Vec<f64> = series.iter().map(|p| p.total_errors as f64).collect();
    let top = y_ceiling(values.iter().copied().chain([predicted as f64]));
    let mut chart = ChartBuilder::on(root)
        .margin(12)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..n as f64, 0f64..top)?;
    chart.draw_series(grid_lines(n as f64, top))?;
    chart.draw_series(LineSeries::new(
        values.iter().enumerate().map(|(i, v)| (i as f64, *v)),
        BLUE.stroke_width(2),
    ))?;
    chart.draw_series(
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Circle::new((i as f64, *v), 3, BLUE.filled())),
    )?;

    // Dashed segment from the last observation to the forecast point.
    let (x0, y0) = ((n - 1) as f64, values[n - 1]);
    let (x1, y1) = (n as f64, predicted as f64);
    let dashes = 10;
    chart.draw_series((0..dashes).step_by(2).map(|k| {
        let a = k as f64 / dashes as f64;
        let b = (k + 1) as f64 / dashes as f64;
        PathElement::new(
            vec![
                (x0 + (x1 - x0) * a, y0 + (y1 - y0) * a),
                (x0 + (x1 - x0) * b, y0 + (y1 - y0) * b),
            ],
            RED.stroke_width(2),
        )
    }))?;
    chart.draw_series(std::iter::once(Circle::new((x1, y1), 4, RED.filled())))?;
    Ok(())
}

fn draw_bars(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    values: &[f64],
    color: RGBColor,
) -> DrawResult {
    let top = y_ceiling(values.iter().copied());
    let mut chart = ChartBuilder::on(root)
        .margin(12)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..values.len() as f64, 0f64..top)?;
    chart.draw_series(grid_lines(values.len() as f64, top))?;
    chart.draw_series(values.iter().enumerate().map(|(i, v)| {
        Rectangle::new(
            [(i as f64 + 0.15, 0.0), (i as f64 + 0.85, *v)],
            color.filled(),
        )
    }))?;
    Ok(())
}

fn draw_reliability(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    series: &[TrendPoint],
) -> DrawResult {
    let x_max = (series.len().max(2) - 1) as f64;
    let mut chart = ChartBuilder::on(root)
        .margin(12)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..x_max, 0f64..105f64)?;
    chart.draw_series(grid_lines(x_max, 100.0))?;
    chart.draw_series(LineSeries::new(
        series.iter().enumerate().map(|(i, p)| (i as f64, p.reliability)),
        GREEN.stroke_width(2),
    ))?;
    chart.draw_series(LineSeries::new(
        [(0.0, SLA_TARGET_PCT), (x_max, SLA_TARGET_PCT)],
        RED.stroke_width(1),
    ))?;
    Ok(())
}

fn top_services(services: &[ServiceTotal]) -> Vec<&ServiceTotal> {
    let mut sorted: Vec<&ServiceTotal> = services.iter().collect();
    sorted.sort_by(|a, b| b.errors.cmp(&a.errors).then_with(|| a.name.cmp(&b.name)));
    sorted.truncate(TOP_SERVICES);
    sorted
}

/// One chart, or an empty buffer when its inputs are absent or drawing fails.
pub fn render_chart(
    kind: ChartKind,
    trend: Option<&TrendResult>,
    snapshot: Option<&Snapshot>,
) -> Vec<u8> {
    let result = match kind {
        ChartKind::ErrorTrend => match trend {
            Some(t) if !t.series.is_empty() => {
                rasterize(|root| draw_error_trend(root, &t.series, t.predictions.consensus))
            }
            _ => return Vec::new(),
        },
        ChartKind::TopServices => {
            let Some(snap) = snapshot.filter(|s| s.total_services() > 0) else {
                return Vec::new();
            };
            let values: Vec<f64> = top_services(snap.by_service())
                .iter()
                .map(|s| s.errors as f64)
                .collect();
            rasterize(|root| draw_bars(root, &values, RGBColor(0xc6, 0x28, 0x28)))
        }
        ChartKind::ErrorDensity => match trend {
            Some(t) if !t.series.is_empty() => {
                let values: Vec<f64> = t.series.iter().map(|p| p.error_density).collect();
                rasterize(|root| draw_bars(root, &values, RGBColor(0xf9, 0xa8, 0x25)))
            }
            _ => return Vec::new(),
        },
        ChartKind::Reliability => match trend {
            Some(t) if !t.series.is_empty() => rasterize(|root| draw_reliability(root, &t.series)),
            _ => return Vec::new(),
        },
    };

    match result {
        Ok(png) => png,
        Err(e) => {
            tracing::warn!(chart = ?kind, error = %e, "chart rendering failed");
            Vec::new()
        }
    }
}

/// All charts that produced bytes, in `ChartKind::ALL` order.
pub fn render_charts(trend: Option<&TrendResult>, snapshot: Option<&Snapshot>) -> Vec<RenderedChart> {
    ChartKind::ALL
        .iter()
        .map(|kind| RenderedChart {
            kind: *kind,
            png: render_chart(*kind, trend, snapshot),
        })
        .filter(|c| !c.png.is_empty())
        .collect()
}
