use serde::{Deserialize, Serialize};

use crate::errors::ObjectiveError;

/// Metrics reported by the objective for one evaluated parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Fraction of replicate runs that propagated, in `[0, 1]`.
    pub propagation: f64,
    /// Mean activity level, non-negative.
    pub activity: f64,
    /// Mean propagation speed. Only meaningful when something propagated;
    /// [`Outcome::normalized`] drops it otherwise.
    pub speed: Option<f64>,
}

impl Outcome {
    pub fn new(propagation: f64, activity: f64, speed: Option<f64>) -> Self {
        Self {
            propagation,
            activity,
            speed,
        }
    }

    /// An outcome in which no replicate propagated.
    pub fn silent(activity: f64) -> Self {
        Self::new(0.0, activity, None)
    }

    pub fn propagated(&self) -> bool {
        self.propagation > 0.0
    }

    /// Canonical form: a silent outcome carries no speed, whatever the
    /// objective reported for it.
    pub fn normalized(mut self) -> Self {
        if !self.propagated() {
            self.speed = None;
        }
        self
    }

    /// Check the ranges promised by the objective contract.
    pub fn validate(&self) -> Result<(), ObjectiveError> {
        if !(0.0..=1.0).contains(&self.propagation) {
            return Err(ObjectiveError::InvalidOutcome {
                message: format!("propagation {} outside [0, 1]", self.propagation),
            });
        }
        if !self.activity.is_finite() || self.activity < 0.0 {
            return Err(ObjectiveError::InvalidOutcome {
                message: format!("activity {} must be finite and non-negative", self.activity),
            });
        }
        match self.speed {
            Some(speed) if !speed.is_finite() => Err(ObjectiveError::InvalidOutcome {
                message: format!("speed {speed} must be finite"),
            }),
            None if self.propagated() => Err(ObjectiveError::InvalidOutcome {
                message: "speed must be reported when propagation occurred".to_string(),
            }),
            _ => Ok(()),
        }
    }
}
