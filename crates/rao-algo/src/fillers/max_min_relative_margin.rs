use super::max_min_margin::add_minimum_margin;
use super::{unit_factor, FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{
    BoundSide, ConstraintKey, LinearProblem, VariableKey, VariableKind,
};
use crate::sensitivity::SensitivitySnapshot;

/// Maximize the smallest margin, and once every margin is positive, the
/// smallest margin divided by the zonal PTDF sum of its CNEC.
///
/// A binary `P` switches between the two regimes:
///
/// ```text
/// minimize  -M - MR
/// s.t.      M  >= -big * (1 - P)
///           MR <= big * P
///           MR <= factor * (max - flow) / ptdf + big * (1 - P)
///           MR <= factor * (flow - min) / ptdf + big * (1 - P)
/// ```
pub struct MaxMinRelativeMarginFiller<'a> {
    ctx: FillerContext<'a>,
}

impl<'a> MaxMinRelativeMarginFiller<'a> {
    pub fn new(ctx: FillerContext<'a>) -> Self {
        Self { ctx }
    }

    fn ptdf(&self, sensitivity: &SensitivitySnapshot, cnec: &str) -> f64 {
        sensitivity
            .ptdf_sum(cnec)
            .unwrap_or(1.0)
            .abs()
            .max(self.ctx.parameters.relative_margins.ptdf_sum_lower_bound)
    }

    /// Bound on any relative margin reachable in the perimeter.
    fn big_m(&self, sensitivity: &SensitivitySnapshot) -> Result<f64, OptimizationError> {
        let range_actions = self.ctx.range_actions()?;
        let mut big: f64 = 1.0;
        for cnec_id in self.ctx.perimeter.optimized_flow_cnecs() {
            let cnec = self.ctx.crac.flow_cnec(cnec_id)?;
            let mut reach = sensitivity.flow(cnec_id).unwrap_or(0.0).abs();
            for (key, ra) in &range_actions {
                let s = sensitivity
                    .sensitivity(cnec_id, &key.range_action)
                    .unwrap_or(0.0);
                let (min, max) = self.ctx.admissible_range(ra)?;
                reach += s.abs() * (max - min);
            }
            let threshold = cnec
                .upper_bound_mw()
                .into_iter()
                .chain(cnec.lower_bound_mw())
                .map(f64::abs)
                .fold(0.0, f64::max);
            let margin = unit_factor(&self.ctx, cnec) * (threshold + reach);
            big = big.max(margin / self.ptdf(sensitivity, cnec_id));
        }
        Ok(2.0 * big)
    }

    fn build_relative_constraints(
        &self,
        problem: &mut LinearProblem,
        sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        let big = self.big_m(sensitivity)?;
        let margin = problem.variable(&VariableKey::MinimumMargin)?;
        let relative = problem.add_variable(
            VariableKey::MinimumRelativeMargin,
            VariableKind::Continuous,
            0.0,
            big,
        )?;
        let positive = problem.add_variable(
            VariableKey::MarginSignBinary,
            VariableKind::Binary,
            0.0,
            1.0,
        )?;

        // M - big * P >= -big
        let sign = problem.add_constraint(ConstraintKey::MarginSign, -big, f64::INFINITY)?;
        problem.set_coefficient(sign, margin, 1.0)?;
        problem.set_coefficient(sign, positive, -big)?;

        // MR - big * P <= 0
        let relative_sign =
            problem.add_constraint(ConstraintKey::RelativeMarginSign, f64::NEG_INFINITY, 0.0)?;
        problem.set_coefficient(relative_sign, relative, 1.0)?;
        problem.set_coefficient(relative_sign, positive, -big)?;

        for cnec_id in self.ctx.perimeter.optimized_flow_cnecs() {
            let cnec = self.ctx.crac.flow_cnec(cnec_id)?;
            let flow = problem.variable(&VariableKey::Flow {
                cnec: cnec_id.clone(),
            })?;
            let factor = unit_factor(&self.ctx, cnec) / self.ptdf(sensitivity, cnec_id);
            let sides = [
                (BoundSide::Upper, cnec.upper_bound_mw(), factor),
                (BoundSide::Lower, cnec.lower_bound_mw().map(|min| -min), -factor),
            ];
            for (side, bound, flow_coefficient) in sides {
                let Some(bound) = bound else {
                    continue;
                };
                let c = problem.add_constraint(
                    ConstraintKey::MinimumRelativeMargin {
                        cnec: cnec_id.clone(),
                        side,
                    },
                    f64::NEG_INFINITY,
                    factor * bound + big,
                )?;
                problem.set_coefficient(c, relative, 1.0)?;
                problem.set_coefficient(c, flow, flow_coefficient)?;
                problem.set_coefficient(c, positive, big)?;
            }
        }
        problem.set_objective_coefficient(relative, -1.0)?;
        Ok(())
    }
}

impl ProblemFiller for MaxMinRelativeMarginFiller<'_> {
    fn name(&self) -> &'static str {
        "max_min_relative_margin"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        let margin = add_minimum_margin(problem, &self.ctx)?;
        problem.set_objective_coefficient(margin, -1.0)?;
        self.build_relative_constraints(problem, sensitivity)
    }

    fn update_between_sensitivity_iteration(
        &mut self,
        problem: &mut LinearProblem,
        sensitivity: &SensitivitySnapshot,
        _activation: &crate::result::RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        // PTDF sums and reachable margins move with the operating point
        self.build_relative_constraints(problem, sensitivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fillers::CoreFiller;
    use crate::linear_problem::LpSolverKind;
    use crate::parameters::{ObjectiveFunctionType, RaoParameters};
    use crate::sensitivity::SensitivityComputer;
    use crate::test_utils::{single_pst_crac, single_pst_sensitivity, FillerFixture};

    fn solve(reference_flow: f64, ptdf: f64) -> LinearProblem {
        let mut params = RaoParameters::default();
        params.objective_function.objective_type = ObjectiveFunctionType::MaxMinRelativeMargin;
        let fixture = FillerFixture::new(single_pst_crac(), params);
        let request = fixture
            .perimeter
            .sensitivity_request(&fixture.pre_perimeter, &fixture.network_actions);
        let sensi = single_pst_sensitivity(reference_flow, -5.0)
            .with_ptdf_sum("cnec", ptdf)
            .compute(&fixture.crac, &request)
            .unwrap();
        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        CoreFiller::new(fixture.context())
            .fill(&mut problem, &sensi)
            .unwrap();
        MaxMinRelativeMarginFiller::new(fixture.context())
            .fill(&mut problem, &sensi)
            .unwrap();
        assert!(problem.solve().is_ok());
        problem
    }

    #[test]
    fn test_positive_margins_are_divided_by_ptdf() {
        // flow 900 - 10x, best x = 5: margin 150, relative 300
        let problem = solve(900.0, 0.5);
        assert!(problem.value_of(&VariableKey::MarginSignBinary).unwrap() > 0.5);
        let relative = problem.value_of(&VariableKey::MinimumRelativeMargin).unwrap();
        assert!((relative - 300.0).abs() < 1e-4);
    }

    #[test]
    fn test_negative_margin_disables_relative_term() {
        let problem = solve(1100.0, 0.5);
        assert!(problem.value_of(&VariableKey::MarginSignBinary).unwrap() < 0.5);
        assert!(problem.value_of(&VariableKey::MinimumRelativeMargin).unwrap().abs() < 1e-4);
        let margin = problem.value_of(&VariableKey::MinimumMargin).unwrap();
        assert!((margin + 50.0).abs() < 1e-4);
    }
}
