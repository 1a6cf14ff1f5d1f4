//! Live search configuration.
//!
//! Operators edit the serialized [`RawSearchConfig`] while workers run. Every
//! iteration reloads it and passes it through [`RawSearchConfig::validate`],
//! which either produces a typed [`SearchConfig`] or reports everything that
//! is wrong with it as a [`ConfigError`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::params::{ParamDict, RangeSpec};
use crate::records::SearcherId;

const DEFAULT_ERROR_BACKOFF_SECS: f64 = 5.0;
const DEFAULT_MAX_SEED: u64 = (1 << 31) - 1;
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Named starting points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// A fresh random point.
    Random,
    /// The midpoint of every range.
    Center,
}

impl Preset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "random" => Some(Self::Random),
            "center" => Some(Self::Center),
            _ => None,
        }
    }
}

/// One forced candidate: a named preset or a literal parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForceEntry {
    Preset(Preset),
    Params(ParamDict),
}

impl ForceEntry {
    /// Presets restart the walk; literal parameter sets continue it.
    pub fn is_preset(&self) -> bool {
        matches!(self, Self::Preset(_))
    }
}

/// Serialized form of a force entry before preset names are checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawForce {
    Name(String),
    Params(ParamDict),
}

/// Blend of the three closeness criteria into one fitness value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub propagation: f64,
    pub activity: f64,
    pub speed: f64,
    /// Normalizer; must equal the sum of the three components.
    pub sum: f64,
}

/// Constants for one use of the history weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightingParams {
    pub temperature: f64,
    pub blend: BlendWeights,
}

/// Activity and speed targets with their exponential decay lengths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    pub activity: f64,
    pub speed: f64,
    pub eta_activity: f64,
    pub eta_speed: f64,
}

/// Directed-step constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepParams {
    /// Mean of the exponential step-length distribution.
    pub mean_length: f64,
    /// Length of the estimated bias direction.
    pub bias_length: f64,
    /// Maximum number of own recent trials used to estimate the bias.
    pub window: usize,
}

/// Validated configuration for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub simulation_id: String,
    pub start: ForceEntry,
    pub ranges: RangeSpec,
    pub required_params: Vec<String>,
    pub q_jump: f64,
    pub q_new: f64,
    pub sigma_rand: f64,
    pub prev: WeightingParams,
    pub step: StepParams,
    pub phi: WeightingParams,
    pub targets: Targets,
    pub force: BTreeMap<SearcherId, Vec<ForceEntry>>,
    pub error_backoff: Duration,
    pub max_seed: u64,
}

impl SearchConfig {
    /// The forced sequence configured for a searcher, if any.
    pub fn forces_for(&self, searcher_id: SearcherId) -> Option<&[ForceEntry]> {
        self.force.get(&searcher_id).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWeighting {
    pub temperature: Option<f64>,
    pub propagation: Option<f64>,
    pub activity: Option<f64>,
    pub speed: Option<f64>,
    pub sum: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTargets {
    pub activity: Option<f64>,
    pub speed: Option<f64>,
    pub eta_activity: Option<f64>,
    pub eta_speed: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStep {
    pub mean_length: Option<f64>,
    pub bias_length: Option<f64>,
    pub window: Option<usize>,
}

/// Operator-editable configuration as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSearchConfig {
    pub simulation_id: Option<String>,
    pub start: Option<RawForce>,
    pub ranges: Option<Vec<(String, Vec<f64>)>>,
    pub required_params: Vec<String>,
    pub q_jump: Option<f64>,
    pub q_new: Option<f64>,
    pub sigma_rand: Option<f64>,
    pub prev: Option<RawWeighting>,
    pub step: Option<RawStep>,
    pub phi: Option<RawWeighting>,
    pub targets: Option<RawTargets>,
    pub force: BTreeMap<SearcherId, Vec<RawForce>>,
    pub error_backoff_secs: Option<f64>,
    pub max_seed: Option<u64>,
}

/// Collects the names of absent settings while unpacking.
#[derive(Default)]
struct Missing(Vec<String>);

impl Missing {
    fn take<T: Clone>(&mut self, name: &str, value: &Option<T>) -> Option<T> {
        if value.is_none() {
            self.0.push(name.to_string());
        }
        value.clone()
    }

    fn weighting(&mut self, group: &str, raw: &Option<RawWeighting>) -> Option<WeightingParams> {
        let raw = raw.clone().unwrap_or_default();
        let temperature = self.take(&format!("{group}.temperature"), &raw.temperature);
        let propagation = self.take(&format!("{group}.propagation"), &raw.propagation);
        let activity = self.take(&format!("{group}.activity"), &raw.activity);
        let speed = self.take(&format!("{group}.speed"), &raw.speed);
        let sum = self.take(&format!("{group}.sum"), &raw.sum);
        Some(WeightingParams {
            temperature: temperature?,
            blend: BlendWeights {
                propagation: propagation?,
                activity: activity?,
                speed: speed?,
                sum: sum?,
            },
        })
    }
}

impl RawSearchConfig {
    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Unreadable {
            message: e.to_string(),
        })
    }

    /// Validate every setting and produce the typed configuration.
    pub fn validate(&self) -> Result<SearchConfig, ConfigError> {
        let mut missing = Missing::default();

        let simulation_id = missing.take("simulation_id", &self.simulation_id);
        let start = missing.take("start", &self.start);
        let ranges = missing.take("ranges", &self.ranges);
        let q_jump = missing.take("q_jump", &self.q_jump);
        let q_new = missing.take("q_new", &self.q_new);
        let sigma_rand = missing.take("sigma_rand", &self.sigma_rand);
        let prev = missing.weighting("prev", &self.prev);
        let phi = missing.weighting("phi", &self.phi);

        let raw_step = self.step.clone().unwrap_or_default();
        let mean_length = missing.take("step.mean_length", &raw_step.mean_length);
        let bias_length = missing.take("step.bias_length", &raw_step.bias_length);
        let window = missing.take("step.window", &raw_step.window);

        let raw_targets = self.targets.clone().unwrap_or_default();
        let k_targ = missing.take("targets.activity", &raw_targets.activity);
        let s_targ = missing.take("targets.speed", &raw_targets.speed);
        let eta_k = missing.take("targets.eta_activity", &raw_targets.eta_activity);
        let eta_s = missing.take("targets.eta_speed", &raw_targets.eta_speed);

        let unpacked = (|| {
            Some((
                simulation_id?,
                start?,
                ranges?,
                (q_jump?, q_new?, sigma_rand?),
                (prev?, phi?),
                StepParams {
                    mean_length: mean_length?,
                    bias_length: bias_length?,
                    window: window?,
                },
                Targets {
                    activity: k_targ?,
                    speed: s_targ?,
                    eta_activity: eta_k?,
                    eta_speed: eta_s?,
                },
            ))
        })();
        let Some((simulation_id, start, ranges, (q_jump, q_new, sigma_rand), (prev, phi), step, targets)) =
            unpacked.filter(|_| missing.0.is_empty())
        else {
            return Err(ConfigError::MissingSettings { names: missing.0 });
        };

        let ranges = RangeSpec::from_entries(&ranges)?;
        let absent: Vec<String> = self
            .required_params
            .iter()
            .filter(|name| !ranges.contains(name))
            .cloned()
            .collect();
        if !absent.is_empty() {
            return Err(ConfigError::MissingParameters { names: absent });
        }

        let scalars = [
            ("q_jump", q_jump),
            ("q_new", q_new),
            ("sigma_rand", sigma_rand),
            ("prev.temperature", prev.temperature),
            ("prev.propagation", prev.blend.propagation),
            ("prev.activity", prev.blend.activity),
            ("prev.speed", prev.blend.speed),
            ("prev.sum", prev.blend.sum),
            ("step.mean_length", step.mean_length),
            ("step.bias_length", step.bias_length),
            ("phi.temperature", phi.temperature),
            ("phi.propagation", phi.blend.propagation),
            ("phi.activity", phi.blend.activity),
            ("phi.speed", phi.blend.speed),
            ("phi.sum", phi.blend.sum),
            ("targets.activity", targets.activity),
            ("targets.speed", targets.speed),
            ("targets.eta_activity", targets.eta_activity),
            ("targets.eta_speed", targets.eta_speed),
            (
                "error_backoff_secs",
                self.error_backoff_secs.unwrap_or(DEFAULT_ERROR_BACKOFF_SECS),
            ),
        ];
        let invalid: Vec<String> = scalars
            .iter()
            .filter(|(_, v)| !v.is_finite() || *v < 0.0)
            .map(|(name, _)| name.to_string())
            .collect();
        if !invalid.is_empty() {
            return Err(ConfigError::InvalidSettings { names: invalid });
        }

        // Divisors.
        let zero: Vec<String> = [
            ("prev.sum", prev.blend.sum),
            ("phi.sum", phi.blend.sum),
            ("targets.eta_activity", targets.eta_activity),
            ("targets.eta_speed", targets.eta_speed),
        ]
        .iter()
        .filter(|(_, v)| *v == 0.0)
        .map(|(name, _)| name.to_string())
        .collect();
        if !zero.is_empty() {
            return Err(ConfigError::InvalidSettings { names: zero });
        }

        for (name, value) in [("q_jump", q_jump), ("q_new", q_new)] {
            if value > 1.0 {
                return Err(ConfigError::InvalidProbability {
                    name: name.to_string(),
                    value,
                });
            }
        }

        check_blend("prev", &prev.blend)?;
        check_blend("phi", &phi.blend)?;

        let start = resolve_force("start", &start, &ranges)?;
        let mut force = BTreeMap::new();
        for (searcher_id, entries) in &self.force {
            let owner = searcher_id.to_string();
            let resolved = entries
                .iter()
                .map(|entry| resolve_force(&owner, entry, &ranges))
                .collect::<Result<Vec<_>, _>>()?;
            force.insert(*searcher_id, resolved);
        }

        let backoff = self.error_backoff_secs.unwrap_or(DEFAULT_ERROR_BACKOFF_SECS);
        let error_backoff =
            Duration::try_from_secs_f64(backoff).map_err(|_| ConfigError::InvalidSettings {
                names: vec!["error_backoff_secs".to_string()],
            })?;

        Ok(SearchConfig {
            simulation_id,
            start,
            ranges,
            required_params: self.required_params.clone(),
            q_jump,
            q_new,
            sigma_rand,
            prev,
            step,
            phi,
            targets,
            force,
            error_backoff,
            max_seed: self.max_seed.unwrap_or(DEFAULT_MAX_SEED).max(1),
        })
    }
}

fn check_blend(group: &str, blend: &BlendWeights) -> Result<(), ConfigError> {
    let actual = blend.propagation + blend.activity + blend.speed;
    if (actual - blend.sum).abs() > WEIGHT_SUM_TOLERANCE * blend.sum.abs().max(1.0) {
        return Err(ConfigError::UnnormalizedWeights {
            group: group.to_string(),
            actual,
            declared: blend.sum,
        });
    }
    Ok(())
}

fn resolve_force(owner: &str, raw: &RawForce, ranges: &RangeSpec) -> Result<ForceEntry, ConfigError> {
    match raw {
        RawForce::Name(name) => Preset::from_name(name)
            .map(ForceEntry::Preset)
            .ok_or_else(|| ConfigError::UnknownPreset {
                owner: owner.to_string(),
                preset: name.clone(),
            }),
        RawForce::Params(params) => {
            let missing: Vec<String> = ranges
                .names()
                .filter(|name| !params.contains_key(*name))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(ConfigError::ForceMissingKeys {
                    owner: owner.to_string(),
                    missing,
                });
            }
            if params.len() != ranges.len() {
                let unknown: Vec<String> = params
                    .keys()
                    .filter(|key| !ranges.contains(key))
                    .cloned()
                    .collect();
                return Err(ConfigError::ForceUnknownKeys {
                    owner: owner.to_string(),
                    unknown,
                });
            }
            Ok(ForceEntry::Params(params.clone()))
        }
    }
}
