use rao_core::{RangeAction, VariationDirection};

use super::{add_is_variation, unit_factor, FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{
    BoundSide, ConstraintKey, LinearProblem, RaKey, VariableKey, VariableKind,
};
use crate::objective::OVERLOAD_PENALTY_PER_MW;
use crate::sensitivity::SensitivitySnapshot;

/// Min-cost objective: pay for every activation and every unit of variation,
/// and heavily for the overload of the most limiting element.
///
/// ```text
/// minimize  sum(activation_cost * is_variation)
///         + sum(up_cost * upward + down_cost * downward)
///         + 10000 * V
/// s.t.      setpoint - upward + downward = pre-perimeter setpoint
///           V >= -margin(cnec)   for every optimized CNEC
/// ```
///
/// PST variation costs are given per tap and converted to cost per degree
/// with the average tap step.
pub struct RaCostFiller<'a> {
    ctx: FillerContext<'a>,
}

impl<'a> RaCostFiller<'a> {
    pub fn new(ctx: FillerContext<'a>) -> Self {
        Self { ctx }
    }

    fn variation_cost(&self, ra: &RangeAction, direction: VariationDirection) -> f64 {
        let per_unit = ra.variation_cost(direction).unwrap_or_else(|| {
            self.ctx
                .parameters
                .range_actions_optimization
                .penalty_cost(ra.kind.label())
        });
        match ra.average_tap_step() {
            Some(step) if step > 0.0 => per_unit / step,
            _ => per_unit,
        }
    }

    fn add_range_action_costs(
        &self,
        problem: &mut LinearProblem,
        key: &RaKey,
        ra: &RangeAction,
    ) -> Result<(), OptimizationError> {
        let setpoint = problem.variable(&VariableKey::Setpoint(key.clone()))?;
        let upward = problem.add_variable(
            VariableKey::UpwardVariation(key.clone()),
            VariableKind::Continuous,
            0.0,
            f64::INFINITY,
        )?;
        let downward = problem.add_variable(
            VariableKey::DownwardVariation(key.clone()),
            VariableKind::Continuous,
            0.0,
            f64::INFINITY,
        )?;
        let pre = self.ctx.pre_perimeter_setpoint(ra);
        let c = problem.add_constraint(ConstraintKey::VariationDecomposition(key.clone()), pre, pre)?;
        problem.set_coefficient(c, setpoint, 1.0)?;
        problem.set_coefficient(c, upward, -1.0)?;
        problem.set_coefficient(c, downward, 1.0)?;
        problem.set_objective_coefficient(upward, self.variation_cost(ra, VariationDirection::Up))?;
        problem.set_objective_coefficient(
            downward,
            self.variation_cost(ra, VariationDirection::Down),
        )?;

        if let Some(cost) = ra.activation_cost.filter(|c| *c > 0.0) {
            let is_variation = add_is_variation(problem, &self.ctx, key, ra)?;
            problem.set_objective_coefficient(is_variation, cost)?;
        }
        Ok(())
    }

    fn add_margin_violation(&self, problem: &mut LinearProblem) -> Result<(), OptimizationError> {
        let violation = problem.add_variable(
            VariableKey::MarginViolation,
            VariableKind::Continuous,
            0.0,
            f64::INFINITY,
        )?;
        problem.set_objective_coefficient(violation, OVERLOAD_PENALTY_PER_MW)?;
        for cnec_id in self.ctx.perimeter.optimized_flow_cnecs() {
            let cnec = self.ctx.crac.flow_cnec(cnec_id)?;
            let flow = problem.variable(&VariableKey::Flow {
                cnec: cnec_id.clone(),
            })?;
            let factor = unit_factor(&self.ctx, cnec);
            if let Some(max) = cnec.upper_bound_mw() {
                // V - factor * flow >= -factor * max
                let c = problem.add_constraint(
                    ConstraintKey::MarginViolation {
                        cnec: cnec_id.clone(),
                        side: BoundSide::Upper,
                    },
                    -factor * max,
                    f64::INFINITY,
                )?;
                problem.set_coefficient(c, violation, 1.0)?;
                problem.set_coefficient(c, flow, -factor)?;
            }
            if let Some(min) = cnec.lower_bound_mw() {
                // V + factor * flow >= factor * min
                let c = problem.add_constraint(
                    ConstraintKey::MarginViolation {
                        cnec: cnec_id.clone(),
                        side: BoundSide::Lower,
                    },
                    factor * min,
                    f64::INFINITY,
                )?;
                problem.set_coefficient(c, violation, 1.0)?;
                problem.set_coefficient(c, flow, factor)?;
            }
        }
        Ok(())
    }
}

impl ProblemFiller for RaCostFiller<'_> {
    fn name(&self) -> &'static str {
        "ra_cost"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        for (key, ra) in self.ctx.range_actions()? {
            self.add_range_action_costs(problem, &key, ra)?;
        }
        self.add_margin_violation(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fillers::CoreFiller;
    use crate::linear_problem::LpSolverKind;
    use crate::parameters::{ObjectiveFunctionType, RaoParameters};
    use crate::sensitivity::SensitivityComputer;
    use crate::test_utils::{preventive, single_pst_sensitivity, FillerFixture, PST_STEP_DEG};
    use rao_core::{CracBuilder, FlowCnec, SetpointRange, Threshold, Unit, UsageMethod, UsageRule};

    fn costly_pst_crac() -> rao_core::Crac {
        CracBuilder::new("costly-pst")
            .add_flow_cnec(
                FlowCnec::new("cnec", "line-1", preventive())
                    .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0)),
            )
            .add_range_action(
                RangeAction::linear_pst("pst", "pst-element", -10, 10, PST_STEP_DEG, 0)
                    .with_range(SetpointRange::absolute(-10.0, 10.0))
                    .with_activation_cost(100.0)
                    .with_variation_cost(VariationDirection::Up, 10.0)
                    .with_variation_cost(VariationDirection::Down, 10.0)
                    .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available)),
            )
            .build()
            .unwrap()
    }

    fn solve(reference_flow: f64) -> LinearProblem {
        let mut params = RaoParameters::default();
        params.objective_function.objective_type = ObjectiveFunctionType::MinCost;
        let fixture = FillerFixture::new(costly_pst_crac(), params);
        let request = fixture
            .perimeter
            .sensitivity_request(&fixture.pre_perimeter, &fixture.network_actions);
        let sensi = single_pst_sensitivity(reference_flow, -5.0)
            .compute(&fixture.crac, &request)
            .unwrap();
        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        CoreFiller::new(fixture.context())
            .fill(&mut problem, &sensi)
            .unwrap();
        RaCostFiller::new(fixture.context())
            .fill(&mut problem, &sensi)
            .unwrap();
        assert!(problem.solve().is_ok());
        problem
    }

    #[test]
    fn test_secure_network_costs_nothing() {
        let problem = solve(900.0);
        assert!(problem.objective_value().unwrap().abs() < 1e-6);
        let key = VariableKey::IsVariation(RaKey::new("pst", preventive()));
        assert!(problem.value_of(&key).unwrap() < 0.5);
    }

    #[test]
    fn test_cheapest_setpoint_removes_the_overload() {
        let problem = solve(1020.0);
        let setpoint = problem
            .value_of(&VariableKey::Setpoint(RaKey::new("pst", preventive())))
            .unwrap();
        // 20 MW at 10 MW per degree
        assert!((setpoint - 2.0).abs() < 1e-4);
        assert!(problem.value_of(&VariableKey::MarginViolation).unwrap() < 1e-4);
        // activation plus 4 taps at 10 per tap
        assert!((problem.objective_value().unwrap() - 140.0).abs() < 1e-3);
    }
}
