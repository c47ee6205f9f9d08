use std::collections::BTreeMap;

use ndarray::Array2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PhysiGymResult, SystemError},
    gym::{
        Reward,
        space::{DType, Space, SpaceValue, Tensor},
    },
    model::{Model, ModelCtx},
    render::{Colorbar, Colormap, ContourLayer, Figure, Norm, ScatterLayer},
    sim::MicroenvTable,
};

/// Cell count the reward is centred on.
pub const TARGET_CELL_COUNT: f64 = 128.0;

/// Upper clip of the cell count before the reward is computed.
pub const MAX_REWARDED_CELL_COUNT: f64 = 256.0;

const CONTOUR_LEVELS: usize = 10;
const CELL_RADIUS: u32 = 3;

/// Template policy: dose a drug, observe the population, reward staying near
/// [`TARGET_CELL_COUNT`] cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugDoseModel {
    /// Action field, forwarded to the user parameter of the same name.
    dose_label: String,

    /// User parameter the simulation keeps in sync with the population size.
    count_label: String,

    /// Substrate drawn as a filled contour.
    substrate: String,

    /// Per-cell variable the scatter is coloured by.
    color_variable: String,
}

impl Default for DrugDoseModel {
    fn default() -> Self {
        Self {
            dose_label: "drug_dose".to_string(),
            count_label: "cell_count".to_string(),
            substrate: "drug".to_string(),
            color_variable: "apoptosis_rate".to_string(),
        }
    }
}

impl DrugDoseModel {
    pub fn with_dose_label(self, label: impl Into<String>) -> Self {
        Self {
            dose_label: label.into(),
            ..self
        }
    }

    pub fn with_count_label(self, label: impl Into<String>) -> Self {
        Self {
            count_label: label.into(),
            ..self
        }
    }

    pub fn with_substrate(self, substrate: impl Into<String>) -> Self {
        Self {
            substrate: substrate.into(),
            ..self
        }
    }

    pub fn with_color_variable(self, variable: impl Into<String>) -> Self {
        Self {
            color_variable: variable.into(),
            ..self
        }
    }

    pub fn dose_label(&self) -> &str {
        &self.dose_label
    }

    fn cell_count(&self, ctx: &ModelCtx<'_>) -> PhysiGymResult<f64> {
        ctx.sim.parameter_f64(&self.count_label)
    }
}

impl Model for DrugDoseModel {
    fn get_action_space(&self) -> PhysiGymResult<Space> {
        Ok(Space::dict([(
            self.dose_label.clone(),
            Space::boxed(0.0, 1.0, &[1], DType::F64)?,
        )]))
    }

    fn get_observation_space(&self) -> PhysiGymResult<Space> {
        Ok(Space::boxed(0.0, u16::MAX as f64, &[1], DType::U16)?)
    }

    fn get_observation(&self, ctx: &ModelCtx<'_>) -> PhysiGymResult<SpaceValue> {
        let count = self.cell_count(ctx)?;
        Ok(SpaceValue::Box(Tensor::scalar_u16(saturate_u16(count))))
    }

    fn get_terminated(&self, ctx: &ModelCtx<'_>) -> PhysiGymResult<bool> {
        Ok(self.cell_count(ctx)? <= 0.0)
    }

    fn get_reward(&self, ctx: &ModelCtx<'_>) -> PhysiGymResult<Reward> {
        Ok(cell_count_reward(self.cell_count(ctx)?))
    }

    fn get_img(&self, ctx: &ModelCtx<'_>, fig: &mut Figure) -> PhysiGymResult<()> {
        fig.clear();
        let domain = ctx.settings.domain;
        let unit = Norm::new(0.0, 1.0);

        // Substrate.
        let conc = ctx.sim.microenv(&self.substrate)?;
        let mesh = pivot_plane(&conc)?;
        let axes = fig.axes_mut();
        if let Some((xs, ys, z)) = mesh {
            axes.contourf(ContourLayer {
                xs,
                ys,
                z,
                norm: unit,
                cmap: Colormap::Reds,
                levels: CONTOUR_LEVELS,
            })?;
        }

        // Cells.
        let cells = ctx.sim.cells()?;
        let colors = ctx.sim.variable(&self.color_variable)?;
        if colors.len() != cells.len() {
            return Err(SystemError::InvariantViolation(format!(
                "variable '{}' has {} values for {} cells",
                self.color_variable,
                colors.len(),
                cells.len()
            ))
            .into());
        }
        let points: Vec<(f64, f64, f64)> = (0..cells.len())
            .filter_map(|row| {
                let pos = cells.position(row);
                (pos[2] == 0.0).then(|| (pos[0], pos[1], colors[row]))
            })
            .collect();
        let n_plane = points.len();

        axes.scatter(ScatterLayer {
            points,
            norm: unit,
            cmap: Colormap::Viridis,
            radius: CELL_RADIUS,
        });
        axes.xlim = Some(domain.x_range());
        axes.ylim = Some(domain.y_range());
        axes.equal_aspect = true;
        axes.grid = true;
        axes.xlabel = Some("x".to_string());
        axes.ylabel = Some("y".to_string());
        axes.title = Some(format!(
            "dt_gym env step {:04} episode {:03} episode step {:03} : {} / {} [cell]",
            ctx.counters.step_env,
            ctx.counters.episode,
            ctx.counters.step_episode,
            n_plane,
            TARGET_CELL_COUNT
        ));

        fig.colorbar(Colorbar {
            norm: unit,
            cmap: Colormap::Reds,
            label: format!("{}_concentration", self.substrate),
        });
        fig.colorbar(Colorbar {
            norm: unit,
            cmap: Colormap::Viridis,
            label: self.color_variable.clone(),
        });
        Ok(())
    }
}

/// Reward for a population size: 1.0 at the target, falling off linearly to
/// 0.0 at an empty population and at twice the target.
pub fn cell_count_reward(cell_count: f64) -> Reward {
    let c = cell_count.clamp(0.0, MAX_REWARDED_CELL_COUNT);
    let reward = if c == TARGET_CELL_COUNT {
        1.0
    } else if c < TARGET_CELL_COUNT {
        c / TARGET_CELL_COUNT
    } else {
        1.0 - (c - TARGET_CELL_COUNT) / TARGET_CELL_COUNT
    };
    reward.into()
}

fn saturate_u16(value: f64) -> u16 {
    value.clamp(0.0, u16::MAX as f64).round() as u16
}

type Mesh = (Vec<f64>, Vec<f64>, Array2<f64>);

/// Pivots the `z == 0` voxels into a `(y, x)` mesh. Voxels missing from the
/// table stay `NaN`.
fn pivot_plane(table: &MicroenvTable) -> PhysiGymResult<Option<Mesh>> {
    let mut grid: BTreeMap<OrderedFloat<f64>, BTreeMap<OrderedFloat<f64>, f64>> = BTreeMap::new();
    for (row, value) in table.values.iter().enumerate() {
        let coord = table.coords.row(row);
        if coord[2] != 0.0 {
            continue;
        }
        grid.entry(OrderedFloat(coord[1]))
            .or_default()
            .insert(OrderedFloat(coord[0]), *value);
    }
    if grid.is_empty() {
        return Ok(None);
    }

    let mut xs: Vec<f64> = grid
        .values()
        .flat_map(|row| row.keys().map(|x| x.0))
        .collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    let ys: Vec<f64> = grid.keys().map(|y| y.0).collect();

    let mut z = Array2::from_elem((ys.len(), xs.len()), f64::NAN);
    for (i, row) in grid.values().enumerate() {
        for (x, value) in row {
            let j = xs
                .binary_search_by(|probe| probe.total_cmp(&x.0))
                .map_err(|_| SystemError::InvariantViolation(format!("x = {} not in mesh", x.0)))?;
            z[(i, j)] = *value;
        }
    }
    Ok(Some((xs, ys, z)))
}
