//! Declarative action and observation schemas.
//!
//! Spaces are plain data: a tagged variant per kind, a membership test and a
//! seeded sampler. They deliberately mirror the Gymnasium space kinds without
//! depending on any framework.

use std::collections::BTreeMap;

use itertools::Itertools;
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::SpaceError;

const DEFAULT_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    I64,
    U16,
}

impl DType {
    /// Inclusive value range representable by the dtype.
    pub fn limits(&self) -> (f64, f64) {
        match self {
            Self::F32 => (f32::MIN as f64, f32::MAX as f64),
            Self::F64 => (f64::MIN, f64::MAX),
            Self::I64 => (i64::MIN as f64, i64::MAX as f64),
            Self::U16 => (0.0, u16::MAX as f64),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::I64 | Self::U16)
    }
}

/// Dense, typed array value of a [`Space::Box`].
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I64(ArrayD<i64>),
    U16(ArrayD<u16>),
}

impl Tensor {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I64(_) => DType::I64,
            Self::U16(_) => DType::U16,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(a) => a.shape(),
            Self::F64(a) => a.shape(),
            Self::I64(a) => a.shape(),
            Self::U16(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major copy of the elements, widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Self::F32(a) => a.iter().map(|v| *v as f64).collect(),
            Self::F64(a) => a.iter().copied().collect(),
            Self::I64(a) => a.iter().map(|v| *v as f64).collect(),
            Self::U16(a) => a.iter().map(|v| *v as f64).collect(),
        }
    }

    pub fn scalar_f64(value: f64) -> Self {
        Self::F64(ArrayD::from_elem(IxDyn(&[1]), value))
    }

    pub fn scalar_u16(value: u16) -> Self {
        Self::U16(ArrayD::from_elem(IxDyn(&[1]), value))
    }
}

/// A concrete value drawn from (or checked against) a [`Space`].
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceValue {
    Discrete(i64),
    MultiBinary(Vec<bool>),
    MultiDiscrete(Vec<u64>),
    Box(Tensor),
    Text(String),
    Dict(BTreeMap<String, SpaceValue>),
    Tuple(Vec<SpaceValue>),
}

impl SpaceValue {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Box(t) => Some(t),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discrete(_) => "discrete",
            Self::MultiBinary(_) => "multi_binary",
            Self::MultiDiscrete(_) => "multi_discrete",
            Self::Box(_) => "box",
            Self::Text(_) => "text",
            Self::Dict(_) => "dict",
            Self::Tuple(_) => "tuple",
        }
    }
}

/// Bounded, shaped, typed continuous or integer array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    low: f64,
    high: f64,
    shape: Vec<usize>,
    dtype: DType,
}

impl BoxSpace {
    pub fn new(low: f64, high: f64, shape: &[usize], dtype: DType) -> Result<Self, SpaceError> {
        let (min, max) = dtype.limits();
        let invalid = || SpaceError::InvalidBounds {
            low,
            high,
            dtype: dtype.to_string(),
        };

        if !low.is_finite() || !high.is_finite() || low > high || low < min || high > max {
            return Err(invalid());
        }
        if dtype.is_integer() && low.ceil() > high.floor() {
            return Err(invalid());
        }
        if shape.is_empty() {
            return Err(SpaceError::InvalidDefinition(
                "box shape must have at least one dimension".to_string(),
            ));
        }

        Ok(Self {
            low,
            high,
            shape: shape.to_vec(),
            dtype,
        })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    fn within(&self, v: f64) -> bool {
        v.is_finite() && v >= self.low && v <= self.high
    }

    pub fn contains(&self, tensor: &Tensor) -> bool {
        tensor.dtype() == self.dtype
            && tensor.shape() == self.shape.as_slice()
            && tensor.to_f64_vec().into_iter().all(|v| self.within(v))
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Tensor {
        let shape = IxDyn(&self.shape);
        match self.dtype {
            DType::F32 => {
                let (lo, hi) = (self.low as f32, self.high as f32);
                Tensor::F32(ArrayD::from_shape_fn(shape, |_| rng.random_range(lo..=hi)))
            }
            DType::F64 => {
                let (lo, hi) = (self.low, self.high);
                Tensor::F64(ArrayD::from_shape_fn(shape, |_| rng.random_range(lo..=hi)))
            }
            DType::I64 => {
                let (lo, hi) = (self.low.ceil() as i64, self.high.floor() as i64);
                Tensor::I64(ArrayD::from_shape_fn(shape, |_| rng.random_range(lo..=hi)))
            }
            DType::U16 => {
                let (lo, hi) = (self.low.ceil() as u16, self.high.floor() as u16);
                Tensor::U16(ArrayD::from_shape_fn(shape, |_| rng.random_range(lo..=hi)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Space {
    /// Integers `start, start + 1, ..., start + n - 1`.
    Discrete { n: u64, start: i64 },
    MultiBinary { n: usize },
    /// One independent discrete choice per entry, each in `0..nvec[i]`.
    MultiDiscrete { nvec: Vec<u64> },
    Box(BoxSpace),
    Text {
        min_length: usize,
        max_length: usize,
        charset: String,
    },
    Dict(BTreeMap<String, Space>),
    Tuple(Vec<Space>),
}

impl Space {
    pub fn discrete(n: u64) -> Result<Self, SpaceError> {
        Self::discrete_from(n, 0)
    }

    pub fn discrete_from(n: u64, start: i64) -> Result<Self, SpaceError> {
        if n == 0 {
            return Err(SpaceError::InvalidDefinition(
                "discrete space needs at least one choice".to_string(),
            ));
        }
        Ok(Self::Discrete { n, start })
    }

    pub fn multi_discrete(nvec: Vec<u64>) -> Result<Self, SpaceError> {
        if nvec.iter().any(|n| *n == 0) {
            return Err(SpaceError::InvalidDefinition(format!(
                "multi-discrete sizes must be positive: [{}]",
                nvec.iter().join(", ")
            )));
        }
        Ok(Self::MultiDiscrete { nvec })
    }

    pub fn boxed(low: f64, high: f64, shape: &[usize], dtype: DType) -> Result<Self, SpaceError> {
        BoxSpace::new(low, high, shape, dtype).map(Self::Box)
    }

    pub fn text(min_length: usize, max_length: usize) -> Result<Self, SpaceError> {
        if min_length > max_length {
            return Err(SpaceError::InvalidDefinition(format!(
                "text length range {min_length}..={max_length} is empty"
            )));
        }
        Ok(Self::Text {
            min_length,
            max_length,
            charset: DEFAULT_CHARSET.to_string(),
        })
    }

    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Space)>,
    {
        Self::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn contains(&self, value: &SpaceValue) -> bool {
        match (self, value) {
            (Self::Discrete { n, start }, SpaceValue::Discrete(v)) => {
                *v >= *start && ((*v - *start) as u64) < *n
            }
            (Self::MultiBinary { n }, SpaceValue::MultiBinary(bits)) => bits.len() == *n,
            (Self::MultiDiscrete { nvec }, SpaceValue::MultiDiscrete(vals)) => {
                vals.len() == nvec.len() && vals.iter().zip(nvec).all(|(v, n)| v < n)
            }
            (Self::Box(space), SpaceValue::Box(tensor)) => space.contains(tensor),
            (
                Self::Text {
                    min_length,
                    max_length,
                    charset,
                },
                SpaceValue::Text(s),
            ) => {
                let len = s.chars().count();
                len >= *min_length && len <= *max_length && s.chars().all(|c| charset.contains(c))
            }
            (Self::Dict(spaces), SpaceValue::Dict(values)) => {
                spaces.len() == values.len()
                    && spaces
                        .iter()
                        .all(|(k, s)| values.get(k).is_some_and(|v| s.contains(v)))
            }
            (Self::Tuple(spaces), SpaceValue::Tuple(values)) => {
                spaces.len() == values.len()
                    && spaces.iter().zip(values).all(|(s, v)| s.contains(v))
            }
            _ => false,
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> SpaceValue {
        match self {
            Self::Discrete { n, start } => {
                SpaceValue::Discrete(*start + rng.random_range(0..*n) as i64)
            }
            Self::MultiBinary { n } => {
                SpaceValue::MultiBinary((0..*n).map(|_| rng.random_bool(0.5)).collect())
            }
            Self::MultiDiscrete { nvec } => {
                SpaceValue::MultiDiscrete(nvec.iter().map(|n| rng.random_range(0..*n)).collect())
            }
            Self::Box(space) => SpaceValue::Box(space.sample(rng)),
            Self::Text {
                min_length,
                max_length,
                charset,
            } => {
                let chars: Vec<char> = charset.chars().collect();
                let len = rng.random_range(*min_length..=*max_length);
                let text = if chars.is_empty() {
                    String::new()
                } else {
                    (0..len)
                        .map(|_| chars[rng.random_range(0..chars.len())])
                        .collect()
                };
                SpaceValue::Text(text)
            }
            Self::Dict(spaces) => SpaceValue::Dict(
                spaces
                    .iter()
                    .map(|(k, s)| (k.clone(), s.sample(rng)))
                    .collect(),
            ),
            Self::Tuple(spaces) => {
                SpaceValue::Tuple(spaces.iter().map(|s| s.sample(rng)).collect())
            }
        }
    }

    /// Human-readable reason why `value` is not a member, if it is not.
    pub fn explain_mismatch(&self, value: &SpaceValue) -> Option<String> {
        if self.contains(value) {
            return None;
        }
        let reason = match (self, value) {
            (Self::Box(space), SpaceValue::Box(tensor)) => format!(
                "expected {} array of shape {:?} in [{}, {}], got {} array of shape {:?}: [{}]",
                space.dtype,
                space.shape,
                space.low,
                space.high,
                tensor.dtype(),
                tensor.shape(),
                tensor.to_f64_vec().iter().join(", ")
            ),
            (Self::Dict(spaces), SpaceValue::Dict(values)) => {
                let mut missing = spaces.keys().filter(|k| !values.contains_key(*k));
                let mut extra = values.keys().filter(|k| !spaces.contains_key(*k));
                let mut invalid = spaces.iter().filter_map(|(k, s)| {
                    let reason = values.get(k).and_then(|v| s.explain_mismatch(v))?;
                    Some(format!("{k}: {reason}"))
                });
                format!(
                    "missing [{}], unexpected [{}], invalid [{}]",
                    missing.join(", "),
                    extra.join(", "),
                    invalid.join("; ")
                )
            }
            (space, value) => format!("{} value is not a member of {space:?}", value.kind()),
        };
        Some(reason)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn dose_space() -> Space {
        Space::dict([(
            "drug_dose",
            Space::boxed(0.0, 1.0, &[1], DType::F64).unwrap(),
        )])
    }

    #[test]
    fn test_box_rejects_invalid_bounds() {
        assert!(BoxSpace::new(1.0, 0.0, &[1], DType::F64).is_err());
        assert!(BoxSpace::new(-1.0, 10.0, &[1], DType::U16).is_err());
        assert!(BoxSpace::new(0.0, 70_000.0, &[1], DType::U16).is_err());
        assert!(BoxSpace::new(0.0, f64::INFINITY, &[1], DType::F64).is_err());
        assert!(BoxSpace::new(0.2, 0.8, &[1], DType::I64).is_err());
        assert!(BoxSpace::new(0.0, 1.0, &[], DType::F64).is_err());
        assert!(BoxSpace::new(0.0, 65_535.0, &[1], DType::U16).is_ok());
    }

    #[test]
    fn test_box_contains_checks_dtype_shape_and_range() {
        let space = Space::boxed(0.0, 65_535.0, &[1], DType::U16).unwrap();

        assert!(space.contains(&SpaceValue::Box(Tensor::scalar_u16(0))));
        assert!(space.contains(&SpaceValue::Box(Tensor::scalar_u16(u16::MAX))));
        // Right values, wrong dtype.
        assert!(!space.contains(&SpaceValue::Box(Tensor::scalar_f64(3.0))));
        // Wrong shape.
        let two = Tensor::U16(ArrayD::from_elem(IxDyn(&[2]), 1));
        assert!(!space.contains(&SpaceValue::Box(two)));
    }

    #[test]
    fn test_box_contains_rejects_out_of_range_and_nan() {
        let space = Space::boxed(0.0, 1.0, &[1], DType::F64).unwrap();
        assert!(space.contains(&SpaceValue::Box(Tensor::scalar_f64(1.0))));
        assert!(!space.contains(&SpaceValue::Box(Tensor::scalar_f64(1.0001))));
        assert!(!space.contains(&SpaceValue::Box(Tensor::scalar_f64(f64::NAN))));
    }

    #[test]
    fn test_samples_are_members() {
        let mut rng = StdRng::seed_from_u64(0);
        let spaces = [
            Space::discrete_from(3, -1).unwrap(),
            Space::MultiBinary { n: 4 },
            Space::multi_discrete(vec![2, 5, 7]).unwrap(),
            Space::boxed(-2.0, 2.0, &[2, 3], DType::F32).unwrap(),
            Space::boxed(0.0, 65_535.0, &[1], DType::U16).unwrap(),
            Space::boxed(-5.0, 5.0, &[3], DType::I64).unwrap(),
            Space::text(1, 8).unwrap(),
            dose_space(),
            Space::Tuple(vec![Space::discrete(2).unwrap(), dose_space()]),
        ];

        for space in &spaces {
            for _ in 0..200 {
                let value = space.sample(&mut rng);
                assert!(
                    space.contains(&value),
                    "sample {value:?} not contained in {space:?}"
                );
            }
        }
    }

    #[test]
    fn test_sampling_is_deterministic_per_seed() {
        let space = dose_space();
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| space.sample(&mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| space.sample(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_dict_requires_exact_keys() {
        let space = dose_space();
        let mut values = BTreeMap::new();
        values.insert("drug_dose".to_string(), SpaceValue::Box(Tensor::scalar_f64(0.5)));
        assert!(space.contains(&SpaceValue::Dict(values.clone())));

        values.insert("other".to_string(), SpaceValue::Discrete(0));
        let value = SpaceValue::Dict(values);
        assert!(!space.contains(&value));

        let reason = space.explain_mismatch(&value).unwrap();
        assert!(reason.contains("unexpected [other]"), "{reason}");
    }

    #[test]
    fn test_discrete_with_offset() {
        let space = Space::discrete_from(3, 5).unwrap();
        assert!(!space.contains(&SpaceValue::Discrete(4)));
        assert!(space.contains(&SpaceValue::Discrete(5)));
        assert!(space.contains(&SpaceValue::Discrete(7)));
        assert!(!space.contains(&SpaceValue::Discrete(8)));
        assert!(Space::discrete(0).is_err());
    }
}
