use std::{collections::BTreeMap, fmt, path::Path};

use polars::prelude::{Column, DataFrame};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{error::PhysiGymResult, io::{self, Artifact}};

/// Row label column written in front of every persisted table.
pub const INDEX_COL: &str = "index";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Cell,
    Conc,
}

impl TableKind {
    pub fn artifact(&self) -> Artifact {
        match self {
            Self::Cell => Artifact::CellTable,
            Self::Conc => Artifact::ConcTable,
        }
    }
}

/// One difference between an episode's table and the baseline episode's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum DriftFinding {
    /// Same labels, different values.
    ColumnMismatch {
        kind: TableKind,
        episode: u32,
        column: String,
    },

    /// Row count or row labels differ, so columns cannot be compared.
    NotIdenticallyLabeled {
        kind: TableKind,
        episode: u32,
        baseline_shape: (usize, usize),
        episode_shape: (usize, usize),
    },

    /// A baseline column is absent from the episode's table.
    MissingColumn {
        kind: TableKind,
        episode: u32,
        column: String,
    },
}

impl DriftFinding {
    pub fn kind(&self) -> TableKind {
        match self {
            Self::ColumnMismatch { kind, .. }
            | Self::NotIdenticallyLabeled { kind, .. }
            | Self::MissingColumn { kind, .. } => *kind,
        }
    }

    pub fn episode(&self) -> u32 {
        match self {
            Self::ColumnMismatch { episode, .. }
            | Self::NotIdenticallyLabeled { episode, .. }
            | Self::MissingColumn { episode, .. } => *episode,
        }
    }
}

impl fmt::Display for DriftFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnMismatch {
                kind,
                episode,
                column,
            } => write!(f, "{kind} episode: {episode}\tcolumn: {column}"),
            Self::NotIdenticallyLabeled {
                kind,
                episode,
                baseline_shape,
                episode_shape,
            } => write!(
                f,
                "{kind} episode: {episode}\t{baseline_shape:?} {episode_shape:?}\terror: series not identically labeled"
            ),
            Self::MissingColumn {
                kind,
                episode,
                column,
            } => write!(f, "{kind} episode: {episode}\tcolumn: {column}\terror: missing column"),
        }
    }
}

/// Reads every persisted table of `kind` in `workdir`, keyed by the episode
/// number in its file name.
pub fn load_tables(
    kind: TableKind,
    workdir: &Path,
    output: &str,
) -> PhysiGymResult<BTreeMap<u32, DataFrame>> {
    kind.artifact()
        .scan(workdir, output)?
        .into_iter()
        .map(|(episode, path)| -> PhysiGymResult<(u32, DataFrame)> {
            Ok((episode, io::read_csv(&path)?))
        })
        .collect()
}

/// Compares every episode against the lowest-numbered one.
pub fn diff_tables(kind: TableKind, tables: &BTreeMap<u32, DataFrame>) -> Vec<DriftFinding> {
    let Some((_, baseline)) = tables.first_key_value() else {
        return Vec::new();
    };
    tables
        .iter()
        .flat_map(|(episode, table)| compare(kind, baseline, *episode, table))
        .collect()
}

/// Column-wise equality of `table` against `baseline`.
pub fn compare(kind: TableKind, baseline: &DataFrame, episode: u32, table: &DataFrame) -> Vec<DriftFinding> {
    if !identically_labeled(baseline, table) {
        return vec![DriftFinding::NotIdenticallyLabeled {
            kind,
            episode,
            baseline_shape: data_shape(baseline),
            episode_shape: data_shape(table),
        }];
    }

    baseline
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != INDEX_COL)
        .filter_map(|expected| {
            let column = expected.name().to_string();
            match table.column(&column) {
                Err(_) => Some(DriftFinding::MissingColumn {
                    kind,
                    episode,
                    column,
                }),
                Ok(actual) if !columns_equal(expected, actual) => {
                    Some(DriftFinding::ColumnMismatch {
                        kind,
                        episode,
                        column,
                    })
                }
                Ok(_) => None,
            }
        })
        .collect()
}

fn identically_labeled(a: &DataFrame, b: &DataFrame) -> bool {
    if a.height() != b.height() {
        return false;
    }
    match (a.column(INDEX_COL), b.column(INDEX_COL)) {
        (Ok(x), Ok(y)) => columns_equal(x, y),
        (Err(_), Err(_)) => true,
        _ => false,
    }
}

fn columns_equal(a: &Column, b: &Column) -> bool {
    let (a, b) = (a.as_materialized_series(), b.as_materialized_series());
    if a.dtype() == b.dtype() {
        return a.equals_missing(b);
    }
    b.cast(a.dtype()).is_ok_and(|b| a.equals_missing(&b))
}

/// Shape without the row label column.
fn data_shape(df: &DataFrame) -> (usize, usize) {
    let labels = usize::from(df.column(INDEX_COL).is_ok());
    (df.height(), df.width() - labels)
}
