//! Conversion between named parameter sets and normalized vectors.

use ridge_types::{ParamDict, ParamRange, ParamVector, RangeSpec, ShapeError};

/// Bidirectional map between [`ParamDict`] and [`ParamVector`] for one
/// [`RangeSpec`].
///
/// A variable dimension with range `[lower, upper]` and scale `s` maps its
/// midpoint to `0` and its bounds to `±s/2`. Fixed dimensions always encode
/// to `0` and decode to their declared value.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamCodec {
    spec: RangeSpec,
}

impl ParamCodec {
    pub fn new(spec: RangeSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &RangeSpec {
        &self.spec
    }

    pub fn dim(&self) -> usize {
        self.spec.len()
    }

    pub fn encode(&self, params: &ParamDict) -> Result<ParamVector, ShapeError> {
        if params.len() != self.spec.len() {
            return Err(ShapeError::LengthMismatch {
                expected: self.spec.len(),
                actual: params.len(),
            });
        }

        self.spec
            .parameters
            .iter()
            .map(|def| -> Result<f64, ShapeError> {
                let value = params
                    .get(&def.name)
                    .ok_or_else(|| ShapeError::MissingParameter {
                        name: def.name.clone(),
                    })?;
                Ok(match def.range {
                    ParamRange::Fixed(_) => 0.0,
                    ParamRange::Variable {
                        lower,
                        upper,
                        scale,
                    } => scale * (value - (lower + upper) / 2.0) / (upper - lower),
                })
            })
            .collect()
    }

    pub fn decode(&self, x: &[f64]) -> Result<ParamDict, ShapeError> {
        if x.len() != self.spec.len() {
            return Err(ShapeError::LengthMismatch {
                expected: self.spec.len(),
                actual: x.len(),
            });
        }

        Ok(self
            .spec
            .parameters
            .iter()
            .zip(x)
            .map(|(def, x_i)| {
                let value = match def.range {
                    ParamRange::Fixed(value) => value,
                    ParamRange::Variable {
                        lower,
                        upper,
                        scale,
                    } => (lower + upper) / 2.0 + x_i * (upper - lower) / scale,
                };
                (def.name.clone(), value)
            })
            .collect())
    }
}

/// Keeps candidate vectors inside the normalized search box.
pub struct BoundsGuard;

impl BoundsGuard {
    /// Clamp every component to its dimension's normalized bounds.
    ///
    /// Fixed dimensions become exactly `0`. A NaN component is treated as the
    /// midpoint.
    pub fn clip(x: &[f64], spec: &RangeSpec) -> Result<ParamVector, ShapeError> {
        if x.len() != spec.len() {
            return Err(ShapeError::LengthMismatch {
                expected: spec.len(),
                actual: x.len(),
            });
        }

        Ok(spec
            .parameters
            .iter()
            .zip(x)
            .map(|(def, &x_i)| {
                let (lb, ub) = def.range.normalized_bounds();
                if x_i.is_nan() {
                    0.0
                } else if x_i < lb {
                    lb
                } else if x_i > ub {
                    ub
                } else {
                    x_i
                }
            })
            .collect())
    }

    /// Whether every component already lies within bounds.
    pub fn contains(x: &[f64], spec: &RangeSpec) -> bool {
        x.len() == spec.len()
            && spec.parameters.iter().zip(x).all(|(def, &x_i)| {
                let (lb, ub) = def.range.normalized_bounds();
                lb <= x_i && x_i <= ub
            })
    }
}
