use crate::models::SeriesTable;
use chrono::{DateTime, Duration, Utc};
use plotters::prelude::*;

/// One entry of the HTML legend rendered under a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendItem {
    pub label: String,
    pub color: String,
}

/// Rendered line chart: inline SVG plus its legend.
#[derive(Debug, Clone, Default)]
pub struct Chart {
    pub svg: String,
    pub legend: Vec<LegendItem>,
}

impl Chart {
    pub fn is_empty(&self) -> bool {
        self.svg.is_empty()
    }
}

fn hex(color: &PaletteColor<Palette99>) -> String {
    let c = color.to_rgba();
    format!("#{:02x}{:02x}{:02x}", c.0, c.1, c.2)
}

/// Line chart of every column of `table`, one series per column.
/// NaN values are skipped; an all-NaN table yields an empty chart.
///
/// # Errors
/// Returns error if chart generation fails
pub fn line_chart_svg(
    table: &SeriesTable,
    y_desc: &str,
    width: u32,
    height: u32,
) -> Result<Chart, Box<dyn std::error::Error>> {
    let series: Vec<(usize, Vec<(DateTime<Utc>, f64)>)> = (0..table.columns.len())
        .map(|c| (c, table.points(c)))
        .filter(|(_, pts)| !pts.is_empty())
        .collect();

    if series.is_empty() {
        return Ok(Chart::default());
    }

    let all = series.iter().flat_map(|(_, pts)| pts.iter());
    let (mut first, mut last) = (DateTime::<Utc>::MAX_UTC, DateTime::<Utc>::MIN_UTC);
    let (mut y_min, mut y_max) = (0.0f64, f64::NEG_INFINITY);
    for (t, v) in all {
        first = first.min(*t);
        last = last.max(*t);
        y_min = y_min.min(*v);
        y_max = y_max.max(*v);
    }
    if last <= first {
        last = first + Duration::hours(1);
    }
    let y_max = if y_max > y_min { y_max * 1.1 } else { y_min + 1.0 };

    let days = (last - first).num_days().max(1) as usize;
    let mut svg_data = String::new();
    let mut legend = Vec::new();

    {
        let root = SVGBackend::with_string(&mut svg_data, (width, height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(first..last, y_min..y_max)?;

        chart
            .configure_mesh()
            .y_desc(y_desc)
            .x_labels(days + 1)
            .y_labels(8)
            .x_label_formatter(&|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .light_line_style(RGBColor(235, 235, 235))
            .draw()?;

        for (c, points) in series {
            let color = Palette99::pick(c);
            chart.draw_series(LineSeries::new(points, color.stroke_width(2)))?;
            legend.push(LegendItem {
                label: table.columns[c].clone(),
                color: hex(&color),
            });
        }

        root.present()?;
    }

    Ok(Chart {
        svg: svg_data,
        legend,
    })
}
