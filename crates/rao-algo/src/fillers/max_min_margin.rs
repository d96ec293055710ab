use super::{unit_factor, FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{
    BoundSide, ConstraintKey, LinearProblem, VariableHandle, VariableKey, VariableKind,
};
use crate::sensitivity::SensitivitySnapshot;

/// Maximize the smallest margin of the optimized CNECs:
///
/// ```text
/// minimize  -M
/// s.t.      M <= factor * (max - flow)
///           M <= factor * (flow - min)
/// ```
pub struct MaxMinMarginFiller<'a> {
    ctx: FillerContext<'a>,
}

impl<'a> MaxMinMarginFiller<'a> {
    pub fn new(ctx: FillerContext<'a>) -> Self {
        Self { ctx }
    }
}

/// Add the minimum margin variable and its per-CNEC constraints.
pub(super) fn add_minimum_margin(
    problem: &mut LinearProblem,
    ctx: &FillerContext<'_>,
) -> Result<VariableHandle, OptimizationError> {
    let optimized = ctx.perimeter.optimized_flow_cnecs();
    // nothing to maximize: pin the margin instead of leaving it unbounded
    let (lb, ub) = if optimized.is_empty() {
        (0.0, 0.0)
    } else {
        (f64::NEG_INFINITY, f64::INFINITY)
    };
    let margin = problem.add_variable(VariableKey::MinimumMargin, VariableKind::Continuous, lb, ub)?;

    for cnec_id in optimized {
        let cnec = ctx.crac.flow_cnec(cnec_id)?;
        let flow = problem.variable(&VariableKey::Flow {
            cnec: cnec_id.clone(),
        })?;
        let factor = unit_factor(ctx, cnec);
        if let Some(max) = cnec.upper_bound_mw() {
            let c = problem.add_constraint(
                ConstraintKey::MinimumMargin {
                    cnec: cnec_id.clone(),
                    side: BoundSide::Upper,
                },
                f64::NEG_INFINITY,
                factor * max,
            )?;
            problem.set_coefficient(c, margin, 1.0)?;
            problem.set_coefficient(c, flow, factor)?;
        }
        if let Some(min) = cnec.lower_bound_mw() {
            let c = problem.add_constraint(
                ConstraintKey::MinimumMargin {
                    cnec: cnec_id.clone(),
                    side: BoundSide::Lower,
                },
                f64::NEG_INFINITY,
                -factor * min,
            )?;
            problem.set_coefficient(c, margin, 1.0)?;
            problem.set_coefficient(c, flow, -factor)?;
        }
    }
    Ok(margin)
}

impl ProblemFiller for MaxMinMarginFiller<'_> {
    fn name(&self) -> &'static str {
        "max_min_margin"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        let margin = add_minimum_margin(problem, &self.ctx)?;
        problem.set_objective_coefficient(margin, -1.0)?;
        Ok(())
    }
}
