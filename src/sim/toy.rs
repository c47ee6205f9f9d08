//! Small deterministic stand-in for the agent-based engine.
//!
//! Cells sit on the `z == 0` plane (or anywhere in 3-D domains), substrates
//! relax towards the matching `<substrate>_dose` user parameter, cells die
//! with a probability driven by the local drug and divide at a fixed rate.
//! Every gym step writes a snapshot pair into the output folder in the
//! layout [`crate::timeseries`] reads back.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Instant,
};

use ndarray::{Array1, Array2};
use polars::prelude::{Column, DataFrame};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::{
    error::{PhysiGymResult, SimError},
    io::{self, polars_err},
    settings::{CustomData, Domain, Settings},
    sim::{CellTable, MicroenvTable, ParamValue, Simulation, SimulationAccessor},
};

/// Per-step division probability of every cell.
const BIRTH_PROBABILITY: f64 = 0.05;

/// Fraction of the gap to the dosed level a voxel closes per step.
const RELAXATION: f64 = 0.5;

/// Division stops at this population size.
const MAX_CELLS: usize = 2048;

/// Initial population when `number_of_cells` is not a user parameter.
const DEFAULT_CELLS: usize = 32;

const APOPTOSIS_RATE: &str = "apoptosis_rate";
const DEATH_RATE: &str = "death_rates_0";
const SENSITIVITY: &str = "sensitivity";
const CELL_COUNT: &str = "cell_count";

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    id: u64,
    position: [f64; 3],
    cell_type: String,
    variables: BTreeMap<String, f64>,
    vectors: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone)]
struct Voxels {
    xs: Vec<f64>,
    ys: Vec<f64>,
    zs: Vec<f64>,
    /// `n x 3` centres, x fastest.
    coords: Array2<f64>,
}

impl Voxels {
    fn new(domain: &Domain) -> Self {
        let xs = Domain::voxel_centers(domain.x_min, domain.x_max, domain.dx);
        let ys = Domain::voxel_centers(domain.y_min, domain.y_max, domain.dy);
        let zs = if domain.use_2d {
            vec![0.0]
        } else {
            Domain::voxel_centers(domain.z_min, domain.z_max, domain.dz)
        };

        let mut flat = Vec::with_capacity(xs.len() * ys.len() * zs.len() * 3);
        for z in &zs {
            for y in &ys {
                for x in &xs {
                    flat.extend_from_slice(&[*x, *y, *z]);
                }
            }
        }
        let n = flat.len() / 3;
        let coords = Array2::from_shape_vec((n, 3), flat).unwrap_or_else(|_| Array2::zeros((0, 3)));
        Self { xs, ys, zs, coords }
    }

    fn len(&self) -> usize {
        self.coords.nrows()
    }

    /// Index of the voxel containing `position`, clamped into the mesh.
    fn index_of(&self, domain: &Domain, position: &[f64; 3]) -> Option<usize> {
        if self.len() == 0 {
            return None;
        }
        let axis = |v: f64, min: f64, d: f64, n: usize| -> usize {
            (((v - min) / d).floor().max(0.0) as usize).min(n - 1)
        };
        let ix = axis(position[0], domain.x_min, domain.dx, self.xs.len());
        let iy = axis(position[1], domain.y_min, domain.dy, self.ys.len());
        let iz = if domain.use_2d {
            0
        } else {
            axis(position[2], domain.z_min, domain.dz, self.zs.len())
        };
        Some((iz * self.ys.len() + iy) * self.xs.len() + ix)
    }
}

#[derive(Debug)]
struct Run {
    rng: StdRng,
    time: f64,
    snapshot: u32,
    next_id: u64,
    cells: Vec<Cell>,
    conc: BTreeMap<String, Array1<f64>>,
    started_at: Instant,
}

/// Deterministic given the seed, apart from the `runtime` snapshot column.
#[derive(Debug)]
pub struct ToySimulation {
    settings: Settings,
    parameters: BTreeMap<String, ParamValue>,
    output_dir: PathBuf,
    voxels: Voxels,
    run: Option<Run>,
}

impl ToySimulation {
    pub fn new(settings: &Settings, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            voxels: Voxels::new(&settings.domain),
            parameters: settings.user_parameters.clone(),
            settings: settings.clone(),
            output_dir: output_dir.into(),
            run: None,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    fn run(&self) -> PhysiGymResult<&Run> {
        self.run.as_ref().ok_or_else(|| SimError::NotStarted.into())
    }

    fn run_mut(&mut self) -> PhysiGymResult<&mut Run> {
        self.run.as_mut().ok_or_else(|| SimError::NotStarted.into())
    }

    fn is_variable(&self, name: &str) -> bool {
        name == APOPTOSIS_RATE
            || name == DEATH_RATE
            || matches!(self.settings.custom_data(name), Some(CustomData::Scalar(_)))
    }

    fn is_vector(&self, name: &str) -> bool {
        matches!(self.settings.custom_data(name), Some(CustomData::Vector(_)))
    }

    fn initial_cells(&self, rng: &mut StdRng) -> PhysiGymResult<Vec<Cell>> {
        let n = match self.parameters.get("number_of_cells") {
            Some(v) => v.try_f64("number_of_cells")?.max(0.0) as usize,
            None => DEFAULT_CELLS,
        };

        let domain = self.settings.domain;
        if domain.x_max <= domain.x_min
            || domain.y_max <= domain.y_min
            || (!domain.use_2d && domain.z_max <= domain.z_min)
        {
            return Err(SimError::Backend("domain has no volume to place cells in".to_string()).into());
        }
        let defs = &self.settings.cell_definitions;
        let mut cells = Vec::with_capacity(n);
        for i in 0..n {
            let position = [
                rng.random_range(domain.x_min..domain.x_max),
                rng.random_range(domain.y_min..domain.y_max),
                if domain.use_2d {
                    0.0
                } else {
                    rng.random_range(domain.z_min..domain.z_max)
                },
            ];

            let mut variables = BTreeMap::from([
                (APOPTOSIS_RATE.to_string(), 0.0),
                (DEATH_RATE.to_string(), 0.0),
            ]);
            let mut vectors = BTreeMap::new();
            // Every cell carries every declared label so snapshot columns line up.
            for def in defs {
                for (label, data) in &def.custom_data {
                    match data {
                        CustomData::Scalar(_) => {
                            variables.entry(label.clone()).or_insert(0.0);
                        }
                        CustomData::Vector(v) => {
                            vectors.entry(label.clone()).or_insert(vec![0.0; v.len()]);
                        }
                    }
                }
            }

            let cell_type = match defs.get(i % defs.len().max(1)) {
                Some(def) => {
                    for (label, data) in &def.custom_data {
                        match data {
                            CustomData::Scalar(v) => {
                                variables.insert(label.clone(), *v);
                            }
                            CustomData::Vector(v) => {
                                vectors.insert(label.clone(), v.clone());
                            }
                        }
                    }
                    def.name.clone()
                }
                None => "default".to_string(),
            };

            cells.push(Cell {
                id: i as u64,
                position,
                cell_type,
                variables,
                vectors,
            });
        }
        Ok(cells)
    }

    fn dose(&self, substrate: &str) -> PhysiGymResult<f64> {
        let label = format!("{substrate}_dose");
        match self.parameters.get(&label) {
            Some(v) => Ok(v.try_f64(&label)?.clamp(0.0, 1.0)),
            None => Ok(0.0),
        }
    }

    fn advance(&mut self) -> PhysiGymResult<()> {
        let domain = self.settings.domain;
        let dt = self.settings.dt_gym;
        let doses = self
            .settings
            .substrates
            .iter()
            .map(|s| -> PhysiGymResult<(String, f64)> { Ok((s.clone(), self.dose(s)?)) })
            .collect::<PhysiGymResult<Vec<_>>>()?;
        let drug = self.settings.substrates.first().cloned();

        let voxels = &self.voxels;
        let Some(run) = self.run.as_mut() else {
            return Err(SimError::NotStarted.into());
        };

        // Substrates, dosed from the x_min boundary.
        let width = (domain.x_max - domain.x_min).max(f64::EPSILON);
        for (substrate, dose) in &doses {
            if let Some(conc) = run.conc.get_mut(substrate) {
                for (i, c) in conc.iter_mut().enumerate() {
                    let profile = 1.0 - 0.5 * (voxels.coords[(i, 0)] - domain.x_min) / width;
                    *c += RELAXATION * (dose * profile - *c);
                }
            }
        }

        // Cell responses.
        for cell in &mut run.cells {
            let local = match (&drug, voxels.index_of(&domain, &cell.position)) {
                (Some(s), Some(v)) => run.conc.get(s).map_or(0.0, |c| c[v]),
                _ => 0.0,
            };
            let sensitivity = cell.variables.get(SENSITIVITY).copied().unwrap_or(1.0);
            let apoptosis = match local * sensitivity {
                v if v.is_finite() => v.clamp(0.0, 1.0),
                _ => 0.0,
            };
            cell.variables.insert(APOPTOSIS_RATE.to_string(), apoptosis);
            cell.variables.insert(DEATH_RATE.to_string(), apoptosis / dt);
        }

        // Death.
        let rng = &mut run.rng;
        run.cells.retain(|cell| {
            let p = cell.variables.get(APOPTOSIS_RATE).copied().unwrap_or(0.0);
            !rng.random_bool(p)
        });

        // Division.
        let parents = run.cells.len();
        for i in 0..parents {
            if run.cells.len() >= MAX_CELLS {
                break;
            }
            if !run.rng.random_bool(BIRTH_PROBABILITY) {
                continue;
            }
            let mut daughter = run.cells[i].clone();
            let jitter = [
                run.rng.random_range(-0.5..0.5) * domain.dx,
                run.rng.random_range(-0.5..0.5) * domain.dy,
                0.0,
            ];
            daughter.position = [
                (daughter.position[0] + jitter[0]).clamp(domain.x_min, domain.x_max),
                (daughter.position[1] + jitter[1]).clamp(domain.y_min, domain.y_max),
                daughter.position[2],
            ];
            daughter.id = run.next_id;
            run.next_id += 1;
            run.cells.push(daughter);
        }

        run.time += dt;
        run.snapshot += 1;
        let count = run.cells.len() as i64;
        self.parameters
            .insert(CELL_COUNT.to_string(), ParamValue::Int(count));
        Ok(())
    }

    fn write_snapshot(&self) -> PhysiGymResult<()> {
        let run = self.run()?;
        let runtime = run.started_at.elapsed().as_secs_f64();
        let n = run.cells.len();
        let domain = self.settings.domain;

        let mut columns = vec![
            Column::new("ID".into(), run.cells.iter().map(|c| c.id).collect::<Vec<_>>()),
            Column::new("time".into(), vec![run.time; n]),
            Column::new("runtime".into(), vec![runtime; n]),
            Column::new("x".into(), run.cells.iter().map(|c| c.position[0]).collect::<Vec<_>>()),
            Column::new("y".into(), run.cells.iter().map(|c| c.position[1]).collect::<Vec<_>>()),
            Column::new("z".into(), run.cells.iter().map(|c| c.position[2]).collect::<Vec<_>>()),
            Column::new(
                "cell_type".into(),
                run.cells.iter().map(|c| c.cell_type.as_str()).collect::<Vec<_>>(),
            ),
        ];
        let mut labels: Vec<&str> = vec![APOPTOSIS_RATE, DEATH_RATE];
        for def in &self.settings.cell_definitions {
            for (label, data) in &def.custom_data {
                if matches!(data, CustomData::Scalar(_)) && !labels.contains(&label.as_str()) {
                    labels.push(label);
                }
            }
        }
        for label in labels {
            let values: Vec<f64> = run
                .cells
                .iter()
                .map(|c| c.variables.get(label).copied().unwrap_or(0.0))
                .collect();
            columns.push(Column::new(label.into(), values));
        }
        for substrate in &self.settings.substrates {
            let values: Vec<f64> = run
                .cells
                .iter()
                .map(|c| {
                    match (run.conc.get(substrate), self.voxels.index_of(&domain, &c.position)) {
                        (Some(conc), Some(v)) => conc[v],
                        _ => 0.0,
                    }
                })
                .collect();
            columns.push(Column::new(substrate.as_str().into(), values));
        }
        let mut cells = DataFrame::new(columns).map_err(|e| polars_err("Failed to build cell snapshot", e))?;

        let m = self.voxels.len();
        let coord = |k: usize| self.voxels.coords.column(k).to_vec();
        let mut columns = vec![
            Column::new("time".into(), vec![run.time; m]),
            Column::new("runtime".into(), vec![runtime; m]),
            Column::new("x".into(), coord(0)),
            Column::new("y".into(), coord(1)),
            Column::new("z".into(), coord(2)),
        ];
        for substrate in &self.settings.substrates {
            let values = run
                .conc
                .get(substrate)
                .map(|c| c.to_vec())
                .unwrap_or_else(|| vec![0.0; m]);
            columns.push(Column::new(substrate.as_str().into(), values));
        }
        let mut microenv =
            DataFrame::new(columns).map_err(|e| polars_err("Failed to build microenvironment snapshot", e))?;

        io::write_csv(&mut cells, self.output_dir.join(snapshot_name("cells", run.snapshot)))?;
        io::write_csv(&mut microenv, self.output_dir.join(snapshot_name("microenv", run.snapshot)))?;
        debug!(snapshot = run.snapshot, cells = n, "Snapshot written");
        Ok(())
    }
}

impl SimulationAccessor for ToySimulation {
    fn parameter(&self, name: &str) -> PhysiGymResult<ParamValue> {
        self.parameters
            .get(name)
            .cloned()
            .ok_or_else(|| SimError::UnknownParameter(name.to_string()).into())
    }

    fn variable(&self, name: &str) -> PhysiGymResult<Array1<f64>> {
        if !self.is_variable(name) {
            return Err(SimError::UnknownVariable(name.to_string()).into());
        }
        let run = self.run()?;
        Ok(run
            .cells
            .iter()
            .map(|c| c.variables.get(name).copied().unwrap_or(0.0))
            .collect())
    }

    fn vector(&self, name: &str) -> PhysiGymResult<Array2<f64>> {
        let Some(CustomData::Vector(template)) = self.settings.custom_data(name) else {
            return Err(SimError::UnknownVector(name.to_string()).into());
        };
        let run = self.run()?;
        let dim = template.len();
        let mut out = Array2::zeros((run.cells.len(), dim));
        for (row, cell) in run.cells.iter().enumerate() {
            if let Some(v) = cell.vectors.get(name) {
                for (k, value) in v.iter().take(dim).enumerate() {
                    out[(row, k)] = *value;
                }
            }
        }
        Ok(out)
    }

    fn cells(&self) -> PhysiGymResult<CellTable> {
        let run = self.run()?;
        let flat: Vec<f64> = run.cells.iter().flat_map(|c| c.position).collect();
        let positions = Array2::from_shape_vec((run.cells.len(), 3), flat)
            .map_err(|e| SimError::Backend(format!("cell positions: {e}")))?;
        Ok(CellTable {
            ids: run.cells.iter().map(|c| c.id).collect(),
            positions,
            cell_types: run.cells.iter().map(|c| c.cell_type.clone()).collect(),
        })
    }

    fn microenv(&self, substrate: &str) -> PhysiGymResult<MicroenvTable> {
        let run = self.run()?;
        let values = run
            .conc
            .get(substrate)
            .cloned()
            .ok_or_else(|| SimError::UnknownSubstrate(substrate.to_string()))?;
        Ok(MicroenvTable {
            substrate: substrate.to_string(),
            coords: self.voxels.coords.clone(),
            values,
        })
    }
}

impl Simulation for ToySimulation {
    fn start(&mut self, seed: Option<u64>) -> PhysiGymResult<()> {
        let mut rng = match seed.or(self.settings.random_seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        io::recreate_dir(&self.output_dir)?;

        self.parameters = self.settings.user_parameters.clone();
        let cells = self.initial_cells(&mut rng)?;
        let conc = self
            .settings
            .substrates
            .iter()
            .map(|s| (s.clone(), Array1::zeros(self.voxels.len())))
            .collect();
        self.parameters
            .insert(CELL_COUNT.to_string(), ParamValue::Int(cells.len() as i64));

        self.run = Some(Run {
            rng,
            time: 0.0,
            snapshot: 0,
            next_id: cells.len() as u64,
            cells,
            conc,
            started_at: Instant::now(),
        });
        self.write_snapshot()
    }

    fn step(&mut self) -> PhysiGymResult<()> {
        self.advance()?;
        self.write_snapshot()
    }

    fn stop(&mut self) -> PhysiGymResult<()> {
        self.run = None;
        Ok(())
    }

    fn time(&self) -> f64 {
        self.run.as_ref().map_or(0.0, |r| r.time)
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> PhysiGymResult<()> {
        match self.parameters.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(SimError::UnknownParameter(name.to_string()).into()),
        }
    }

    fn set_variable(&mut self, name: &str, value: f64) -> PhysiGymResult<()> {
        if !self.is_variable(name) {
            return Err(SimError::UnknownVariable(name.to_string()).into());
        }
        for cell in &mut self.run_mut()?.cells {
            cell.variables.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn set_vector(&mut self, name: &str, value: &[f64]) -> PhysiGymResult<()> {
        if !self.is_vector(name) {
            return Err(SimError::UnknownVector(name.to_string()).into());
        }
        for cell in &mut self.run_mut()?.cells {
            cell.vectors.insert(name.to_string(), value.to_vec());
        }
        Ok(())
    }
}

pub(crate) fn snapshot_name(kind: &str, index: u32) -> String {
    format!("{kind}_{index:08}.csv")
}
