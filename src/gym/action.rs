use std::collections::BTreeMap;

use crate::{
    error::{EnvError, PhysiGymError, PhysiGymResult},
    gym::space::{SpaceValue, Tensor},
    sim::ParamValue,
};

/// Named action fields, validated against a Dict action space.
///
/// Labels must match a user parameter, a scalar custom variable, or a vector
/// custom variable of the running model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Action(BTreeMap<String, SpaceValue>);

impl Action {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, value: SpaceValue) -> Self {
        self.0.insert(label.into(), value);
        self
    }

    /// Shorthand for a single `f64` box field of shape `(1,)`.
    pub fn with_scalar(self, label: impl Into<String>, value: f64) -> Self {
        self.with(label, SpaceValue::Box(Tensor::scalar_f64(value)))
    }

    pub fn get(&self, label: &str) -> Option<&SpaceValue> {
        self.0.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SpaceValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_space_value(&self) -> SpaceValue {
        SpaceValue::Dict(self.0.clone())
    }
}

impl TryFrom<SpaceValue> for Action {
    type Error = PhysiGymError;

    fn try_from(value: SpaceValue) -> Result<Self, Self::Error> {
        match value {
            SpaceValue::Dict(fields) => Ok(Self(fields)),
            other => Err(EnvError::InvalidAction(format!(
                "actions are dictionaries of named fields, got a {} value",
                other.kind()
            ))
            .into()),
        }
    }
}

/// How one action field reaches the simulation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Forward {
    Scalar(ParamValue),
    Vector(Vec<f64>),
}

impl Forward {
    pub(crate) fn from_value(label: &str, value: &SpaceValue) -> PhysiGymResult<Self> {
        let unsupported = |msg: String| -> PhysiGymError {
            EnvError::UnsupportedActionValue {
                label: label.to_string(),
                msg,
            }
            .into()
        };

        match value {
            SpaceValue::Discrete(v) => Ok(Self::Scalar(ParamValue::Int(*v))),
            SpaceValue::Text(s) => Ok(Self::Scalar(ParamValue::Text(s.clone()))),
            SpaceValue::MultiBinary(bits) if bits.len() == 1 => {
                Ok(Self::Scalar(ParamValue::Bool(bits[0])))
            }
            SpaceValue::MultiBinary(bits) => Ok(Self::Vector(
                bits.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect(),
            )),
            SpaceValue::MultiDiscrete(vals) => {
                Ok(Self::Vector(vals.iter().map(|v| *v as f64).collect()))
            }
            SpaceValue::Box(tensor) => match tensor.len() {
                0 => Err(unsupported("empty array".to_string())),
                1 => {
                    let v = tensor.to_f64_vec()[0];
                    Ok(Self::Scalar(match tensor {
                        Tensor::I64(_) | Tensor::U16(_) => ParamValue::Int(v as i64),
                        Tensor::F32(_) | Tensor::F64(_) => ParamValue::Real(v),
                    }))
                }
                _ => Ok(Self::Vector(tensor.to_f64_vec())),
            },
            SpaceValue::Dict(_) | SpaceValue::Tuple(_) => Err(unsupported(format!(
                "nested {} values cannot be forwarded to the simulation",
                value.kind()
            ))),
        }
    }
}
