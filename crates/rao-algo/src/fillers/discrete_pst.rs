use rao_core::RangeAction;

use super::{FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{ConstraintKey, LinearProblem, RaKey, VariableKey, VariableKind};
use crate::result::RangeActionActivationResult;
use crate::sensitivity::SensitivitySnapshot;

/// Integer tap model of the PSTs, linearized around their current tap.
///
/// ```text
/// setpoint - up_slope * tap_up + down_slope * tap_down = angle(current tap)
/// tap_up   <= max_up * up_binary
/// tap_down <= max_down * down_binary
/// up_binary + down_binary <= 1
/// ```
///
/// The slopes are the mean angle change per tap between the current tap and
/// the ends of the admissible tap range, so they are recomputed whenever the
/// current tap moves.
pub struct DiscretePstTapFiller<'a> {
    ctx: FillerContext<'a>,
}

/// Linearization of one PST around a tap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TapModel {
    angle: f64,
    max_up: i32,
    max_down: i32,
    up_slope: f64,
    down_slope: f64,
}

impl<'a> DiscretePstTapFiller<'a> {
    pub fn new(ctx: FillerContext<'a>) -> Self {
        Self { ctx }
    }

    fn tap_model(&self, ra: &RangeAction, setpoint: f64) -> Result<Option<TapModel>, OptimizationError> {
        let (min, max) = self.ctx.admissible_range(ra)?;
        let Some((lowest, highest)) = ra.tap_range() else {
            return Ok(None);
        };
        let admissible: Vec<i32> = (lowest..=highest)
            .filter(|tap| {
                ra.tap_to_angle(*tap)
                    .is_some_and(|angle| angle >= min - 1e-9 && angle <= max + 1e-9)
            })
            .collect();
        let (Some(&min_tap), Some(&max_tap)) = (admissible.first(), admissible.last()) else {
            return Ok(None);
        };
        let Some(current) = ra.closest_tap(setpoint) else {
            return Ok(None);
        };
        let current = current.clamp(min_tap, max_tap);
        let angle_of = |tap: i32| ra.tap_to_angle(tap).unwrap_or(setpoint);
        let angle = angle_of(current);
        let max_up = max_tap - current;
        let max_down = current - min_tap;
        let up_slope = if max_up > 0 {
            (angle_of(max_tap) - angle) / max_up as f64
        } else {
            0.0
        };
        let down_slope = if max_down > 0 {
            (angle - angle_of(min_tap)) / max_down as f64
        } else {
            0.0
        };
        Ok(Some(TapModel {
            angle,
            max_up,
            max_down,
            up_slope,
            down_slope,
        }))
    }

    fn build(
        &self,
        problem: &mut LinearProblem,
        key: &RaKey,
        model: &TapModel,
    ) -> Result<(), OptimizationError> {
        let setpoint = problem.variable(&VariableKey::Setpoint(key.clone()))?;
        let tap_up = problem.add_variable(
            VariableKey::TapUpwardVariation(key.clone()),
            VariableKind::Integer,
            0.0,
            f64::from(model.max_up),
        )?;
        let tap_down = problem.add_variable(
            VariableKey::TapDownwardVariation(key.clone()),
            VariableKind::Integer,
            0.0,
            f64::from(model.max_down),
        )?;
        let up_binary = problem.add_variable(
            VariableKey::TapUpwardBinary(key.clone()),
            VariableKind::Binary,
            0.0,
            1.0,
        )?;
        let down_binary = problem.add_variable(
            VariableKey::TapDownwardBinary(key.clone()),
            VariableKind::Binary,
            0.0,
            1.0,
        )?;

        let c = problem.add_constraint(
            ConstraintKey::TapToAngle(key.clone()),
            model.angle,
            model.angle,
        )?;
        problem.set_coefficient(c, setpoint, 1.0)?;
        problem.set_coefficient(c, tap_up, -model.up_slope)?;
        problem.set_coefficient(c, tap_down, model.down_slope)?;

        let c = problem.add_constraint(
            ConstraintKey::TapUpwardRelaxation(key.clone()),
            f64::NEG_INFINITY,
            0.0,
        )?;
        problem.set_coefficient(c, tap_up, 1.0)?;
        problem.set_coefficient(c, up_binary, -f64::from(model.max_up))?;

        let c = problem.add_constraint(
            ConstraintKey::TapDownwardRelaxation(key.clone()),
            f64::NEG_INFINITY,
            0.0,
        )?;
        problem.set_coefficient(c, tap_down, 1.0)?;
        problem.set_coefficient(c, down_binary, -f64::from(model.max_down))?;

        let c = problem.add_constraint(ConstraintKey::TapDirection(key.clone()), f64::NEG_INFINITY, 1.0)?;
        problem.set_coefficient(c, up_binary, 1.0)?;
        problem.set_coefficient(c, down_binary, 1.0)?;
        Ok(())
    }

    fn recenter(
        &self,
        problem: &mut LinearProblem,
        activation: &RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        for (key, ra) in self.ctx.range_actions()? {
            if !ra.is_pst() {
                continue;
            }
            if let Some(model) = self.tap_model(ra, activation.setpoint(&key))? {
                self.build(problem, &key, &model)?;
            }
        }
        Ok(())
    }
}

impl ProblemFiller for DiscretePstTapFiller<'_> {
    fn name(&self) -> &'static str {
        "discrete_pst_tap"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        for (key, ra) in self.ctx.range_actions()? {
            if !ra.is_pst() {
                continue;
            }
            let start = self.ctx.pre_perimeter_setpoint(ra);
            if let Some(model) = self.tap_model(ra, start)? {
                self.build(problem, &key, &model)?;
            }
        }
        Ok(())
    }

    fn update_between_sensitivity_iteration(
        &mut self,
        problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
        activation: &RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        self.recenter(problem, activation)
    }

    fn update_between_search_iteration(
        &mut self,
        problem: &mut LinearProblem,
        activation: &RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        self.recenter(problem, activation)
    }
}
