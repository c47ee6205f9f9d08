use std::{collections::BTreeMap, path::Path};

use ndarray::Array3;
use plotters::{coord::Shift, prelude::*};

use crate::{
    error::{PhysiGymError, PhysiGymResult, RenderError},
    render::{Colorbar, ContourLayer, Figure, Frame, Layer, ScatterLayer},
};

const MARGIN: u32 = 10;
const CAPTION_SIZE: u32 = 14;
const X_LABEL_AREA: u32 = 30;
const Y_LABEL_AREA: u32 = 50;
const COLORBAR_WIDTH: u32 = 90;
const COLORBAR_STEPS: usize = 64;

/// One panel of a stacked line plot: a named series per group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinePanel {
    pub title: String,
    pub ylabel: String,
    pub series: BTreeMap<String, Vec<(f64, f64)>>,
}

/// Draws the figure into an in-memory RGB buffer.
pub fn rasterize(fig: &Figure) -> PhysiGymResult<Frame> {
    let (width, height) = fig.size();
    let mut buf = vec![0u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buf, (width, height)).into_drawing_area();
        draw_figure(&root, fig)?;
        root.present().map_err(draw_err)?;
    }
    let pixels = Array3::from_shape_vec((height as usize, width as usize, 3), buf)
        .map_err(|e| RenderError::InvalidFigure(format!("frame buffer: {e}")))?;
    Ok(Frame {
        width,
        height,
        pixels,
    })
}

pub fn save_png(fig: &Figure, path: &Path) -> PhysiGymResult<()> {
    let root = BitMapBackend::new(path, fig.size()).into_drawing_area();
    draw_figure(&root, fig)?;
    root.present().map_err(draw_err)
}

/// Stacks `panels` vertically under a common title and writes a PNG.
pub fn save_line_panels(
    path: &Path,
    size: (u32, u32),
    title: &str,
    panels: &[LinePanel],
) -> PhysiGymResult<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;
    let root = root.titled(title, ("sans-serif", 22)).map_err(draw_err)?;

    let areas = root.split_evenly((panels.len().max(1), 1));
    for (area, panel) in areas.iter().zip(panels) {
        draw_line_panel(area, panel)?;
    }
    root.present().map_err(draw_err)
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn draw_err<E: std::fmt::Display>(e: E) -> PhysiGymError {
    RenderError::Draw(e.to_string()).into()
}

fn rgb((r, g, b): (u8, u8, u8)) -> RGBColor {
    RGBColor(r, g, b)
}

fn draw_figure<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, fig: &Figure) -> PhysiGymResult<()> {
    root.fill(&WHITE).map_err(draw_err)?;

    let (width, _) = fig.size();
    let bars = fig.colorbars();
    let plot_area = if bars.is_empty() {
        root.clone()
    } else {
        let strip = (COLORBAR_WIDTH * bars.len() as u32).min(width / 2);
        let (plot, strip) = root.split_horizontally(width - strip);
        for (area, bar) in strip.split_evenly((1, bars.len())).iter().zip(bars) {
            draw_colorbar(area, bar)?;
        }
        plot
    };

    let Some(axes) = fig.axes() else {
        return Ok(());
    };
    let Some((mut xlim, mut ylim)) = axes.bounds() else {
        return Ok(());
    };
    if axes.equal_aspect {
        let (w, h) = plot_area.dim_in_pixel();
        let caption = if axes.title.is_some() { CAPTION_SIZE + MARGIN } else { 0 };
        let w = w.saturating_sub(Y_LABEL_AREA + 2 * MARGIN).max(1);
        let h = h.saturating_sub(X_LABEL_AREA + 2 * MARGIN + caption).max(1);
        (xlim, ylim) = equalize(xlim, ylim, (w, h));
    }

    let mut builder = ChartBuilder::on(&plot_area);
    builder
        .margin(MARGIN)
        .x_label_area_size(X_LABEL_AREA)
        .y_label_area_size(Y_LABEL_AREA);
    if let Some(title) = &axes.title {
        builder.caption(title, ("sans-serif", CAPTION_SIZE));
    }
    let mut chart = builder
        .build_cartesian_2d(xlim.0..xlim.1, ylim.0..ylim.1)
        .map_err(draw_err)?;

    for layer in &axes.layers {
        match layer {
            Layer::Contour(contour) => {
                chart
                    .draw_series(
                        contour_cells(contour)
                            .into_iter()
                            .map(|(corners, color)| Rectangle::new(corners, rgb(color).filled())),
                    )
                    .map_err(draw_err)?;
            }
            Layer::Scatter(scatter) => {
                let ScatterLayer {
                    points,
                    norm,
                    cmap,
                    radius,
                } = scatter;
                chart
                    .draw_series(points.iter().map(|(x, y, v)| {
                        Circle::new((*x, *y), *radius, rgb(cmap.rgb(norm.apply(*v))).filled())
                    }))
                    .map_err(draw_err)?;
            }
        }
    }

    let mut mesh = chart.configure_mesh();
    if !axes.grid {
        mesh.disable_mesh();
    }
    if let Some(label) = &axes.xlabel {
        mesh.x_desc(label.as_str());
    }
    if let Some(label) = &axes.ylabel {
        mesh.y_desc(label.as_str());
    }
    mesh.draw().map_err(draw_err)
}

fn draw_colorbar<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, bar: &Colorbar) -> PhysiGymResult<()> {
    let (lo, hi) = if bar.norm.vmax > bar.norm.vmin {
        (bar.norm.vmin, bar.norm.vmax)
    } else {
        (bar.norm.vmin, bar.norm.vmin + 1.0)
    };

    let mut chart = ChartBuilder::on(area)
        .margin(MARGIN)
        .x_label_area_size(X_LABEL_AREA)
        .y_label_area_size(Y_LABEL_AREA)
        .build_cartesian_2d(0.0..1.0, lo..hi)
        .map_err(draw_err)?;

    let dv = (hi - lo) / COLORBAR_STEPS as f64;
    chart
        .draw_series((0..COLORBAR_STEPS).map(|i| {
            let v0 = lo + dv * i as f64;
            let color = rgb(bar.cmap.rgb(bar.norm.apply(v0 + dv / 2.0)));
            Rectangle::new([(0.0, v0), (1.0, v0 + dv)], color.filled())
        }))
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(0)
        .y_desc(bar.label.as_str())
        .draw()
        .map_err(draw_err)
}

fn draw_line_panel<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, panel: &LinePanel) -> PhysiGymResult<()> {
    let points = panel.series.values().flatten();
    let (mut x_min, mut x_max, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY, 0.0f64);
    for (x, y) in points.filter(|(x, y)| x.is_finite() && y.is_finite()) {
        x_min = x_min.min(*x);
        x_max = x_max.max(*x);
        y_max = y_max.max(*y);
    }
    if !(x_min < x_max) {
        (x_min, x_max) = if x_min.is_finite() {
            (x_min - 1.0, x_min + 1.0)
        } else {
            (0.0, 1.0)
        };
    }
    let y_hi = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let mut chart = ChartBuilder::on(area)
        .caption(&panel.title, ("sans-serif", 18))
        .margin(MARGIN)
        .x_label_area_size(X_LABEL_AREA + 10)
        .y_label_area_size(Y_LABEL_AREA + 10)
        .build_cartesian_2d(x_min..x_max, 0.0..y_hi)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .x_desc("time")
        .y_desc(panel.ylabel.as_str())
        .draw()
        .map_err(draw_err)?;

    for (i, (name, points)) in panel.series.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
            .map_err(draw_err)?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    if !panel.series.is_empty() {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(draw_err)?;
    }
    Ok(())
}

type Corners = [(f64, f64); 2];

/// Filled mesh cells, one rectangle per finite value, coloured at the
/// centre of its contour level.
fn contour_cells(layer: &ContourLayer) -> Vec<(Corners, (u8, u8, u8))> {
    let x_edges = cell_edges(&layer.xs);
    let y_edges = cell_edges(&layer.ys);
    let levels = layer.levels.max(1) as f64;

    let mut out = Vec::with_capacity(layer.z.len());
    for ((row, col), value) in layer.z.indexed_iter() {
        if !value.is_finite() {
            continue;
        }
        let t = layer.norm.apply(*value);
        let level = ((t * levels).floor().min(levels - 1.0) + 0.5) / levels;
        out.push((
            [
                (x_edges[col], y_edges[row]),
                (x_edges[col + 1], y_edges[row + 1]),
            ],
            layer.cmap.rgb(level),
        ));
    }
    out
}

/// Boundaries halfway between neighbouring centres, `n + 1` of them.
fn cell_edges(centers: &[f64]) -> Vec<f64> {
    match centers {
        [] => Vec::new(),
        [only] => vec![only - 0.5, only + 0.5],
        _ => {
            let n = centers.len();
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(centers[0] - (centers[1] - centers[0]) / 2.0);
            edges.extend(centers.windows(2).map(|w| (w[0] + w[1]) / 2.0));
            edges.push(centers[n - 1] + (centers[n - 1] - centers[n - 2]) / 2.0);
            edges
        }
    }
}

/// Widens one axis so a data unit spans the same number of pixels on both.
fn equalize(xlim: (f64, f64), ylim: (f64, f64), (w, h): (u32, u32)) -> ((f64, f64), (f64, f64)) {
    let (dx, dy) = (xlim.1 - xlim.0, ylim.1 - ylim.0);
    let scale = (dx / w as f64).max(dy / h as f64);
    let grow = |(lo, hi): (f64, f64), span: f64| {
        let mid = (lo + hi) / 2.0;
        (mid - span / 2.0, mid + span / 2.0)
    };
    (grow(xlim, scale * w as f64), grow(ylim, scale * h as f64))
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::render::{Colormap, Norm};

    #[test]
    fn test_cell_edges() {
        assert_eq!(cell_edges(&[0.0, 10.0, 20.0]), vec![-5.0, 5.0, 15.0, 25.0]);
        assert_eq!(cell_edges(&[3.0]), vec![2.5, 3.5]);
        assert!(cell_edges(&[]).is_empty());
    }

    #[test]
    fn test_contour_cells_skip_nan_and_quantize() {
        let layer = ContourLayer {
            xs: vec![0.0, 10.0],
            ys: vec![0.0],
            z: array![[0.0, f64::NAN]],
            norm: Norm::new(0.0, 1.0),
            cmap: Colormap::Reds,
            levels: 2,
        };
        let cells = contour_cells(&layer);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].0, [(-5.0, -0.5), (5.0, 0.5)]);
        assert_eq!(cells[0].1, Colormap::Reds.rgb(0.25));
    }

    #[test]
    fn test_equalize_widens_the_short_axis() {
        let (x, y) = equalize((0.0, 100.0), (0.0, 100.0), (200, 100));
        assert_eq!(x, (-50.0, 150.0));
        assert_eq!(y, (0.0, 100.0));
    }

    #[test]
    fn test_rasterize_empty_figure_is_white() {
        let fig = Figure::new(40, 30);
        let frame = rasterize(&fig).unwrap();
        assert_eq!(frame.pixels.dim(), (30, 40, 3));
        assert_eq!(frame.pixel(0, 0), Some((255, 255, 255)));
        assert_eq!(frame.pixel(39, 29), Some((255, 255, 255)));
        assert_eq!(frame.pixel(40, 0), None);
    }
}
