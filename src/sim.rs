//! Accessor contract of the external agent-based simulation.
//!
//! The environment never steps cells or solves diffusion itself. Everything
//! it knows about the running model comes through [`SimulationAccessor`],
//! and everything it changes goes through [`Simulation`].

use std::fmt;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{PhysiGymResult, SimError};

pub mod toy;

/// Value of a user parameter as declared in the settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            Self::Text(_) => None,
        }
    }

    /// Numeric view of a named parameter, failing on text values.
    pub fn try_f64(&self, name: &str) -> Result<f64, SimError> {
        self.as_f64().ok_or_else(|| SimError::NotNumeric {
            name: name.to_string(),
            value: self.to_string(),
        })
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Snapshot of all live cells. Rows line up with the arrays returned by
/// [`SimulationAccessor::variable`] and [`SimulationAccessor::vector`].
#[derive(Debug, Clone, PartialEq)]
pub struct CellTable {
    pub ids: Vec<u64>,
    /// `n x 3` positions (`x`, `y`, `z`).
    pub positions: Array2<f64>,
    pub cell_types: Vec<String>,
}

impl CellTable {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn position(&self, row: usize) -> ArrayView1<'_, f64> {
        self.positions.row(row)
    }
}

/// Snapshot of one substrate over the voxel mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroenvTable {
    pub substrate: String,
    /// `n x 3` voxel centres (`x`, `y`, `z`).
    pub coords: Array2<f64>,
    pub values: Array1<f64>,
}

impl MicroenvTable {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Read access to a running simulation.
pub trait SimulationAccessor {
    fn parameter(&self, name: &str) -> PhysiGymResult<ParamValue>;

    /// One value per live cell.
    fn variable(&self, name: &str) -> PhysiGymResult<Array1<f64>>;

    /// One row per live cell.
    fn vector(&self, name: &str) -> PhysiGymResult<Array2<f64>>;

    fn cells(&self) -> PhysiGymResult<CellTable>;

    fn microenv(&self, substrate: &str) -> PhysiGymResult<MicroenvTable>;

    /// Numeric parameter lookup that rejects text and non-finite values.
    fn parameter_f64(&self, name: &str) -> PhysiGymResult<f64> {
        let value = self.parameter(name)?.try_f64(name)?;
        if !value.is_finite() {
            return Err(SimError::NonFinite {
                name: name.to_string(),
                value,
            }
            .into());
        }
        Ok(value)
    }
}

/// Lifecycle and write access the environment core drives.
pub trait Simulation: SimulationAccessor {
    /// Starts a fresh run. `None` defers to the seed in the settings document.
    fn start(&mut self, seed: Option<u64>) -> PhysiGymResult<()>;

    /// Advances the model by one gym step.
    fn step(&mut self) -> PhysiGymResult<()>;

    fn stop(&mut self) -> PhysiGymResult<()>;

    /// Current simulated time, in the settings' time unit.
    fn time(&self) -> f64;

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> PhysiGymResult<()>;

    /// Sets a scalar custom variable on every live cell.
    fn set_variable(&mut self, name: &str, value: f64) -> PhysiGymResult<()>;

    /// Sets a vector custom variable on every live cell.
    fn set_vector(&mut self, name: &str, value: &[f64]) -> PhysiGymResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_value_numeric_views() {
        assert_eq!(ParamValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(ParamValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(ParamValue::Real(0.25).as_f64(), Some(0.25));
        assert_eq!(ParamValue::Text("x".into()).as_f64(), None);

        let err = ParamValue::Text("abc".into()).try_f64("label").unwrap_err();
        assert!(matches!(err, SimError::NotNumeric { ref name, .. } if name == "label"));
    }

    #[test]
    fn test_param_value_serde_is_untagged() {
        let json = serde_json::to_string(&ParamValue::Int(128)).unwrap();
        assert_eq!(json, "128");
        let back: ParamValue = serde_json::from_str("0.5").unwrap();
        assert_eq!(back, ParamValue::Real(0.5));
    }
}
