//! Retained-mode figure the render callback draws into.
//!
//! The figure only records what should be drawn. [`raster`] turns it into
//! pixels with `plotters`, either as an in-memory RGB [`Frame`] or a PNG.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{PhysiGymResult, RenderError};

pub mod raster;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Colormap {
    Reds,
    Viridis,
}

impl Colormap {
    fn anchors(&self) -> &'static [(u8, u8, u8)] {
        match self {
            Self::Reds => &[
                (255, 245, 240),
                (252, 187, 161),
                (251, 106, 74),
                (203, 24, 29),
                (103, 0, 13),
            ],
            Self::Viridis => &[
                (68, 1, 84),
                (59, 82, 139),
                (33, 145, 140),
                (94, 201, 98),
                (253, 231, 37),
            ],
        }
    }

    /// Colour at `t` in `[0, 1]`, linearly interpolated between anchors.
    pub fn rgb(&self, t: f64) -> (u8, u8, u8) {
        let anchors = self.anchors();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let pos = t * (anchors.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(anchors.len() - 1);
        let frac = pos - lo as f64;
        let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
        let (a, b) = (anchors[lo], anchors[hi]);
        (lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
    }
}

/// Linear mapping of data values onto `[0, 1]`, clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Norm {
    pub vmin: f64,
    pub vmax: f64,
}

impl Norm {
    pub fn new(vmin: f64, vmax: f64) -> Self {
        Self { vmin, vmax }
    }

    pub fn apply(&self, v: f64) -> f64 {
        let span = self.vmax - self.vmin;
        if span <= 0.0 {
            return 0.0;
        }
        ((v - self.vmin) / span).clamp(0.0, 1.0)
    }
}

/// Filled contour over a rectilinear mesh. `z[(row, col)]` sits at
/// `(xs[col], ys[row])`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourLayer {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub z: Array2<f64>,
    pub norm: Norm,
    pub cmap: Colormap,
    pub levels: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterLayer {
    /// `(x, y, value)` triples; `value` is mapped through `norm` and `cmap`.
    pub points: Vec<(f64, f64, f64)>,
    pub norm: Norm,
    pub cmap: Colormap,
    pub radius: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Contour(ContourLayer),
    Scatter(ScatterLayer),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Axes {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub xlim: Option<(f64, f64)>,
    pub ylim: Option<(f64, f64)>,
    pub equal_aspect: bool,
    pub grid: bool,
    pub layers: Vec<Layer>,
}

impl Axes {
    pub fn contourf(&mut self, layer: ContourLayer) -> PhysiGymResult<&mut Self> {
        let (rows, cols) = layer.z.dim();
        if rows != layer.ys.len() || cols != layer.xs.len() {
            return Err(RenderError::InvalidFigure(format!(
                "contour mesh is {rows}x{cols} but axes have {} y and {} x values",
                layer.ys.len(),
                layer.xs.len()
            ))
            .into());
        }
        self.layers.push(Layer::Contour(layer));
        Ok(self)
    }

    pub fn scatter(&mut self, layer: ScatterLayer) -> &mut Self {
        self.layers.push(Layer::Scatter(layer));
        self
    }

    /// Explicit limits if set, otherwise the extent of all layers.
    pub fn bounds(&self) -> Option<((f64, f64), (f64, f64))> {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for layer in &self.layers {
            match layer {
                Layer::Contour(c) => {
                    xs.extend_from_slice(&c.xs);
                    ys.extend_from_slice(&c.ys);
                }
                Layer::Scatter(s) => {
                    xs.extend(s.points.iter().map(|p| p.0));
                    ys.extend(s.points.iter().map(|p| p.1));
                }
            }
        }
        let xlim = self.xlim.or_else(|| extent(&xs))?;
        let ylim = self.ylim.or_else(|| extent(&ys))?;
        Some((xlim, ylim))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Colorbar {
    pub norm: Norm,
    pub cmap: Colormap,
    pub label: String,
}

/// Persistent drawing surface owned by the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    width: u32,
    height: u32,
    axes: Option<Axes>,
    colorbars: Vec<Colorbar>,
}

impl Figure {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            axes: None,
            colorbars: Vec::new(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn clear(&mut self) {
        self.axes = None;
        self.colorbars.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_none() && self.colorbars.is_empty()
    }

    /// The single subplot, created on first use.
    pub fn axes_mut(&mut self) -> &mut Axes {
        self.axes.get_or_insert_with(Axes::default)
    }

    pub fn axes(&self) -> Option<&Axes> {
        self.axes.as_ref()
    }

    pub fn colorbar(&mut self, colorbar: Colorbar) {
        self.colorbars.push(colorbar);
    }

    pub fn colorbars(&self) -> &[Colorbar] {
        &self.colorbars
    }
}

/// Rasterised figure, `height x width x 3` RGB.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Array3<u8>,
}

impl Frame {
    pub fn pixel(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        let (x, y) = (x as usize, y as usize);
        if y >= self.height as usize || x >= self.width as usize {
            return None;
        }
        Some((
            self.pixels[(y, x, 0)],
            self.pixels[(y, x, 1)],
            self.pixels[(y, x, 2)],
        ))
    }
}

fn extent(values: &[f64]) -> Option<(f64, f64)> {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if min > max {
        return None;
    }
    if min == max {
        return Some((min - 0.5, max + 0.5));
    }
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colormap_endpoints() {
        assert_eq!(Colormap::Viridis.rgb(0.0), (68, 1, 84));
        assert_eq!(Colormap::Viridis.rgb(1.0), (253, 231, 37));
        assert_eq!(Colormap::Reds.rgb(-3.0), Colormap::Reds.rgb(0.0));
        assert_eq!(Colormap::Reds.rgb(f64::NAN), Colormap::Reds.rgb(0.0));
    }

    #[test]
    fn test_norm_clamps() {
        let norm = Norm::new(0.0, 1.0);
        assert_eq!(norm.apply(0.5), 0.5);
        assert_eq!(norm.apply(2.0), 1.0);
        assert_eq!(norm.apply(-1.0), 0.0);
        assert_eq!(Norm::new(1.0, 1.0).apply(1.0), 0.0);
    }

    #[test]
    fn test_clear_drops_layers_and_colorbars() {
        let mut fig = Figure::new(80, 60);
        fig.axes_mut().scatter(ScatterLayer {
            points: vec![(0.0, 0.0, 0.5)],
            norm: Norm::new(0.0, 1.0),
            cmap: Colormap::Viridis,
            radius: 2,
        });
        fig.colorbar(Colorbar {
            norm: Norm::new(0.0, 1.0),
            cmap: Colormap::Reds,
            label: "drug_concentration".to_string(),
        });
        assert!(!fig.is_empty());

        fig.clear();
        assert!(fig.is_empty());
        assert_eq!(fig.size(), (80, 60));
    }

    #[test]
    fn test_contour_shape_is_checked() {
        let mut fig = Figure::new(80, 60);
        let layer = ContourLayer {
            xs: vec![0.0, 1.0],
            ys: vec![0.0],
            z: Array2::zeros((2, 2)),
            norm: Norm::new(0.0, 1.0),
            cmap: Colormap::Reds,
            levels: 8,
        };
        assert!(fig.axes_mut().contourf(layer).is_err());
    }

    #[test]
    fn test_bounds_prefer_explicit_limits() {
        let mut axes = Axes::default();
        axes.scatter(ScatterLayer {
            points: vec![(-1.0, 2.0, 0.0), (3.0, 4.0, 0.0)],
            norm: Norm::new(0.0, 1.0),
            cmap: Colormap::Viridis,
            radius: 2,
        });
        assert_eq!(axes.bounds(), Some(((-1.0, 3.0), (2.0, 4.0))));

        axes.xlim = Some((-500.0, 500.0));
        assert_eq!(axes.bounds(), Some(((-500.0, 500.0), (2.0, 4.0))));
    }
}
