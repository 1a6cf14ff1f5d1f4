//! Boundary to the external simulator.

use ridge_types::{ObjectiveError, Outcome, ParamDict};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// An expensive, randomized evaluation of one parameter set.
///
/// Implementations must be deterministic for a fixed `seed`.
pub trait Objective {
    fn evaluate(&self, params: &ParamDict, seed: u64) -> Result<Outcome, ObjectiveError>;
}

impl<F> Objective for F
where
    F: Fn(&ParamDict, u64) -> Result<Outcome, ObjectiveError>,
{
    fn evaluate(&self, params: &ParamDict, seed: u64) -> Result<Outcome, ObjectiveError> {
        self(params, seed)
    }
}

/// Run the objective with panics contained and the outcome contract checked.
pub(crate) fn evaluate_contained<O: Objective + ?Sized>(
    objective: &O,
    params: &ParamDict,
    seed: u64,
) -> Result<Outcome, ObjectiveError> {
    let outcome = catch_unwind(AssertUnwindSafe(|| objective.evaluate(params, seed)))
        .map_err(|payload| ObjectiveError::Panicked {
            message: payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string()),
        })??;
    outcome.validate()?;
    Ok(outcome.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_objectives() {
        let obj = |p: &ParamDict, seed: u64| -> Result<Outcome, ObjectiveError> {
            Ok(Outcome::new(1.0, p.len() as f64, Some(seed as f64)))
        };
        let out = evaluate_contained(&obj, &ParamDict::new(), 4).unwrap();
        assert_eq!(out.speed, Some(4.0));
    }

    #[test]
    fn panics_become_objective_errors() {
        let obj = |_: &ParamDict, _: u64| -> Result<Outcome, ObjectiveError> {
            panic!("integrator blew up")
        };
        match evaluate_contained(&obj, &ParamDict::new(), 0) {
            Err(ObjectiveError::Panicked { message }) => {
                assert!(message.contains("integrator blew up"))
            }
            other => panic!("expected panic error, got {other:?}"),
        }
    }

    #[test]
    fn silent_outcome_speed_is_dropped() {
        let obj = |_: &ParamDict, _: u64| -> Result<Outcome, ObjectiveError> {
            Ok(Outcome::new(0.0, 2.0, Some(0.0)))
        };
        let out = evaluate_contained(&obj, &ParamDict::new(), 0).unwrap();
        assert_eq!(out, Outcome::silent(2.0));
    }

    #[test]
    fn invalid_outcomes_are_rejected() {
        let obj = |_: &ParamDict, _: u64| -> Result<Outcome, ObjectiveError> {
            Ok(Outcome::new(2.0, 1.0, Some(1.0)))
        };
        assert!(matches!(
            evaluate_contained(&obj, &ParamDict::new(), 0),
            Err(ObjectiveError::InvalidOutcome { .. })
        ));
    }
}
