//! Parameter ranges, named parameter sets and normalized vectors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ConfigError;

/// Named parameter values in natural simulator units.
pub type ParamDict = BTreeMap<String, f64>;

/// Flat parameter vector in normalized, centered coordinates.
///
/// Component `i` corresponds to entry `i` of the [`RangeSpec`] it was built
/// against; `0` is the midpoint of the range.
pub type ParamVector = Vec<f64>;

/// How a single parameter is allowed to vary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamRange {
    /// Held at a constant value.
    Fixed(f64),
    /// Free within `[lower, upper]`; `scale` sets the normalized width.
    Variable { lower: f64, upper: f64, scale: f64 },
}

impl ParamRange {
    /// Parse the operator-facing list form: `[value]` or `[lower, upper, scale]`.
    pub fn from_values(name: &str, values: &[f64]) -> Result<Self, ConfigError> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::RangeNotFinite {
                name: name.to_string(),
            });
        }
        match *values {
            [value] => Ok(Self::Fixed(value)),
            [lower, upper, scale] => {
                if upper <= lower {
                    return Err(ConfigError::RangeBounds {
                        name: name.to_string(),
                        lower,
                        upper,
                    });
                }
                if scale <= 0.0 {
                    return Err(ConfigError::RangeScale {
                        name: name.to_string(),
                        scale,
                    });
                }
                Ok(Self::Variable {
                    lower,
                    upper,
                    scale,
                })
            }
            _ => Err(ConfigError::RangeArity {
                name: name.to_string(),
                arity: values.len(),
            }),
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// Bounds of this dimension in normalized coordinates.
    pub fn normalized_bounds(&self) -> (f64, f64) {
        match *self {
            Self::Fixed(_) => (0.0, 0.0),
            Self::Variable { scale, .. } => (-scale / 2.0, scale / 2.0),
        }
    }
}

/// A single named dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub range: ParamRange,
}

/// The ordered search space.
///
/// The order of entries fixes the vector index of every parameter, so it must
/// stay stable for the lifetime of a searcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub parameters: Vec<ParamDef>,
}

impl RangeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fixed(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.push(ParamDef {
            name: name.into(),
            range: ParamRange::Fixed(value),
        });
        self
    }

    pub fn add_variable(
        mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        scale: f64,
    ) -> Self {
        self.parameters.push(ParamDef {
            name: name.into(),
            range: ParamRange::Variable {
                lower,
                upper,
                scale,
            },
        });
        self
    }

    /// Build and validate from the list form used in configuration files.
    pub fn from_entries(entries: &[(String, Vec<f64>)]) -> Result<Self, ConfigError> {
        let mut parameters: Vec<ParamDef> = Vec::with_capacity(entries.len());
        for (name, values) in entries {
            if parameters.iter().any(|p| &p.name == name) {
                return Err(ConfigError::DuplicateParameter { name: name.clone() });
            }
            parameters.push(ParamDef {
                name: name.clone(),
                range: ParamRange::from_values(name, values)?,
            });
        }
        Ok(Self { parameters })
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }
}
