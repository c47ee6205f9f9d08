//! Time-series view over the snapshot files a simulation leaves in its
//! output folder.
//!
//! Every gym step produces `cells_########.csv` and `microenv_########.csv`.
//! [`TimeSeries::load`] stacks them, in snapshot order, into one cell table
//! and one concentration table and drops the wall-clock `runtime` column.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use polars::prelude::{
    DataFrame, DataType, IntoLazy, PlSmallStr, Selector, SortMultipleOptions, UnionArgs, col, len,
};
use regex::Regex;
use tracing::debug;

use crate::{
    error::{DataError, IoError, PhysiGymResult},
    io::{self, polars_err},
};

/// Wall-clock column every snapshot carries. Never reproducible.
pub const RUNTIME_COL: &str = "runtime";
pub const TIME_COL: &str = "time";

const VALUE_COL: &str = "value";

static SNAPSHOT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(cells|microenv)_(\d{8})\.csv$").expect("static regex is valid")
});

#[derive(Debug, Clone, Default)]
struct SnapshotFiles {
    cells: Option<PathBuf>,
    microenv: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TimeSeries {
    dir: PathBuf,
    snapshots: usize,
    cells: DataFrame,
    conc: DataFrame,
}

impl TimeSeries {
    #[tracing::instrument(fields(dir = %dir.as_ref().display()), skip(dir))]
    pub fn load(dir: impl AsRef<Path>) -> PhysiGymResult<Self> {
        let dir = dir.as_ref();
        let snapshots = scan(dir)?;
        if snapshots.is_empty() {
            return Err(DataError::NoSnapshots(dir.display().to_string()).into());
        }

        let cells = stack(snapshots.values().filter_map(|s| s.cells.as_deref()))?;
        let conc = stack(snapshots.values().filter_map(|s| s.microenv.as_deref()))?;
        debug!(
            snapshots = snapshots.len(),
            cell_rows = cells.height(),
            conc_rows = conc.height(),
            "Time series loaded"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            snapshots: snapshots.len(),
            cells,
            conc,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of snapshot indices found, empty ones included.
    pub fn len(&self) -> usize {
        self.snapshots
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots == 0
    }

    /// One row per cell per snapshot.
    pub fn get_cell_df(&self) -> &DataFrame {
        &self.cells
    }

    /// One row per voxel per snapshot.
    pub fn get_conc_df(&self) -> &DataFrame {
        &self.conc
    }

    /// Per-group curve over time from the cell table.
    ///
    /// Without `value` each point is the number of cells in the group at that
    /// time; with `value` it is the group mean of that column.
    pub fn plot_timeseries(
        &self,
        focus: &str,
        value: Option<&str>,
    ) -> PhysiGymResult<BTreeMap<String, Vec<(f64, f64)>>> {
        if self.cells.height() == 0 {
            return Ok(BTreeMap::new());
        }
        for name in [Some(TIME_COL), Some(focus), value].into_iter().flatten() {
            if self.cells.column(name).is_err() {
                return Err(DataError::MissingColumn(name.to_string()).into());
            }
        }

        let agg = match value {
            None => len().cast(DataType::Float64),
            Some(v) => col(v).cast(DataType::Float64).mean(),
        };
        let df = self
            .cells
            .clone()
            .lazy()
            .group_by([
                col(TIME_COL).cast(DataType::Float64),
                col(focus).cast(DataType::String),
            ])
            .agg([agg.alias(VALUE_COL)])
            .sort([TIME_COL, focus], SortMultipleOptions::default())
            .collect()
            .map_err(|e| polars_err("Failed to aggregate time series", e))?;

        let time = df
            .column(TIME_COL)
            .and_then(|c| c.f64())
            .map_err(|e| polars_err("time column", e))?;
        let keys = df
            .column(focus)
            .and_then(|c| c.str())
            .map_err(|e| polars_err("focus column", e))?;
        let values = df
            .column(VALUE_COL)
            .and_then(|c| c.f64())
            .map_err(|e| polars_err("value column", e))?;

        let mut out: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        for ((t, k), v) in time.into_iter().zip(keys).zip(values) {
            if let (Some(t), Some(k), Some(v)) = (t, k, v) {
                out.entry(k.to_string()).or_default().push((t, v));
            }
        }
        Ok(out)
    }
}

fn scan(dir: &Path) -> PhysiGymResult<BTreeMap<u32, SnapshotFiles>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        IoError::FileSystem(format!("Failed to list {}: {e}", dir.display()))
    })?;

    let mut out: BTreeMap<u32, SnapshotFiles> = BTreeMap::new();
    for entry in entries {
        let path = entry.map_err(IoError::Io)?.path();
        let Ok(name) = io::file_name_of(&path) else {
            continue;
        };
        let Some(caps) = SNAPSHOT_FILE.captures(name) else {
            continue;
        };
        let Ok(index) = caps[2].parse::<u32>() else {
            continue;
        };
        let slot = out.entry(index).or_default();
        match &caps[1] {
            "cells" => slot.cells = Some(path),
            _ => slot.microenv = Some(path),
        }
    }
    Ok(out)
}

/// Reads and vertically stacks non-empty tables, without `runtime`.
fn stack<'a>(paths: impl Iterator<Item = &'a Path>) -> PhysiGymResult<DataFrame> {
    let mut frames = Vec::new();
    for path in paths {
        let df = io::read_csv(path)?;
        if df.height() > 0 {
            frames.push(df.lazy());
        }
    }
    if frames.is_empty() {
        return Ok(DataFrame::empty());
    }

    polars::prelude::concat(
        frames,
        UnionArgs {
            parallel: true,
            rechunk: true,
            to_supertypes: true,
            ..Default::default()
        },
    )
    .map_err(|e| polars_err("Merge plan failed", e))?
    .drop(Selector::ByName {
        names: Arc::from([PlSmallStr::from(RUNTIME_COL)]),
        strict: false,
    })
    .collect()
    .map_err(|e| polars_err("Execution failed", e))
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    fn write_snapshot(dir: &Path, index: u32, time: f64, types: &[&str], drug: &[f64]) {
        let n = types.len();
        let mut cells = df!(
            "ID" => (0..n as i64).collect::<Vec<_>>(),
            "time" => vec![time; n],
            "runtime" => vec![0.123 * (index + 1) as f64; n],
            "cell_type" => types.to_vec(),
            "drug" => drug.to_vec(),
        )
        .unwrap();
        io::write_csv(&mut cells, dir.join(format!("cells_{index:08}.csv"))).unwrap();

        let mut conc = df!(
            "time" => &[time, time],
            "runtime" => &[0.5, 0.5],
            "x" => &[-10.0, 10.0],
            "drug" => &[0.1, 0.2],
        )
        .unwrap();
        io::write_csv(&mut conc, dir.join(format!("microenv_{index:08}.csv"))).unwrap();
    }

    #[test]
    fn test_load_stacks_in_snapshot_order_and_drops_runtime() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), 1, 60.0, &["a", "b", "b"], &[0.1, 0.2, 0.4]);
        write_snapshot(dir.path(), 0, 0.0, &["a", "b"], &[0.0, 0.0]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let ts = TimeSeries::load(dir.path()).unwrap();
        assert_eq!(ts.len(), 2);

        let cells = ts.get_cell_df();
        assert_eq!(cells.height(), 5);
        assert!(cells.column(RUNTIME_COL).is_err());
        let time: Vec<_> = cells.column("time").unwrap().f64().unwrap().into_no_null_iter().collect();
        assert_eq!(time, vec![0.0, 0.0, 60.0, 60.0, 60.0]);

        assert_eq!(ts.get_conc_df().height(), 4);
        assert!(ts.get_conc_df().column(RUNTIME_COL).is_err());
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TimeSeries::load(dir.path()).is_err());
    }

    #[test]
    fn test_plot_timeseries_counts_and_means() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), 0, 0.0, &["a", "b"], &[0.0, 0.0]);
        write_snapshot(dir.path(), 1, 60.0, &["a", "b", "b"], &[0.1, 0.2, 0.4]);
        let ts = TimeSeries::load(dir.path()).unwrap();

        let counts = ts.plot_timeseries("cell_type", None).unwrap();
        assert_eq!(counts["a"], vec![(0.0, 1.0), (60.0, 1.0)]);
        assert_eq!(counts["b"], vec![(0.0, 1.0), (60.0, 2.0)]);

        let drug = ts.plot_timeseries("cell_type", Some("drug")).unwrap();
        let (t, mean) = drug["b"][1];
        assert_eq!(t, 60.0);
        assert!((mean - 0.3).abs() < 1e-12);

        assert!(ts.plot_timeseries("cell_type", Some("oxygen")).is_err());
    }
}
