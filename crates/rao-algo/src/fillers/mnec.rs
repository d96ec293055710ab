use std::collections::BTreeMap;

use rao_core::Unit;

use super::{FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{BoundSide, ConstraintKey, LinearProblem, VariableKey, VariableKind};
use crate::sensitivity::SensitivitySnapshot;

/// Keep monitored-only CNECs from losing more than the acceptable margin
/// compared with the initial network, a violation being paid in the objective.
///
/// The floor of an MNEC is `min(initial_margin - acceptable_decrease, 0)`;
/// a CNEC that was already overloaded may not get worse, one that was secure
/// may use its margin down to zero.
pub struct MnecFiller<'a> {
    ctx: FillerContext<'a>,
    initial_flows: BTreeMap<String, f64>,
}

impl<'a> MnecFiller<'a> {
    pub fn new(ctx: FillerContext<'a>, initial: &SensitivitySnapshot) -> Self {
        let initial_flows = ctx
            .perimeter
            .monitored_flow_cnecs()
            .iter()
            .filter_map(|id| initial.flow(id).map(|flow| (id.clone(), flow)))
            .collect();
        Self { ctx, initial_flows }
    }
}

impl ProblemFiller for MnecFiller<'_> {
    fn name(&self) -> &'static str {
        "mnec"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        let mnec = &self.ctx.parameters.mnec;
        for cnec_id in self.ctx.perimeter.monitored_flow_cnecs() {
            let Some(initial_flow) = self.initial_flows.get(cnec_id) else {
                continue;
            };
            let cnec = self.ctx.crac.flow_cnec(cnec_id)?;
            let initial_margin = cnec.margin(*initial_flow, Unit::Megawatt);
            let floor = (initial_margin - mnec.acceptable_margin_decrease).min(0.0);
            let adjustment = mnec.constraint_adjustment_coefficient;

            let flow = problem.variable(&VariableKey::Flow {
                cnec: cnec_id.clone(),
            })?;
            let violation = problem.add_variable(
                VariableKey::MnecViolation {
                    cnec: cnec_id.clone(),
                },
                VariableKind::Continuous,
                0.0,
                f64::INFINITY,
            )?;
            problem.set_objective_coefficient(violation, mnec.violation_cost)?;

            if let Some(max) = cnec.upper_bound_mw() {
                // flow - violation <= max - floor
                let c = problem.add_constraint(
                    ConstraintKey::Mnec {
                        cnec: cnec_id.clone(),
                        side: BoundSide::Upper,
                    },
                    f64::NEG_INFINITY,
                    max - floor - adjustment,
                )?;
                problem.set_coefficient(c, flow, 1.0)?;
                problem.set_coefficient(c, violation, -1.0)?;
            }
            if let Some(min) = cnec.lower_bound_mw() {
                // flow + violation >= min + floor
                let c = problem.add_constraint(
                    ConstraintKey::Mnec {
                        cnec: cnec_id.clone(),
                        side: BoundSide::Lower,
                    },
                    min + floor + adjustment,
                    f64::INFINITY,
                )?;
                problem.set_coefficient(c, flow, 1.0)?;
                problem.set_coefficient(c, violation, 1.0)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fillers::{CoreFiller, MaxMinMarginFiller};
    use crate::linear_problem::{LpSolverKind, RaKey};
    use crate::parameters::RaoParameters;
    use crate::sensitivity::{LinearSystemModel, SensitivityComputer};
    use crate::test_utils::{preventive, FillerFixture, PST_STEP_DEG};
    use rao_core::{
        CracBuilder, FlowCnec, RangeAction, SetpointRange, Threshold, UsageMethod, UsageRule,
    };

    fn crac() -> rao_core::Crac {
        CracBuilder::new("mnec")
            .add_flow_cnec(
                FlowCnec::new("cnec", "line-1", preventive())
                    .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0)),
            )
            .add_flow_cnec(
                FlowCnec::new("mnec", "line-2", preventive())
                    .with_threshold(Threshold::symmetric(Unit::Megawatt, 500.0))
                    .monitored_only(),
            )
            .add_range_action(
                RangeAction::linear_pst("pst", "pst-element", -10, 10, PST_STEP_DEG, 0)
                    .with_range(SetpointRange::absolute(-10.0, 10.0))
                    .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_mnec_limits_the_optimization() {
        let fixture = FillerFixture::new(crac(), RaoParameters::default());
        // moving the PST up relieves cnec and loads mnec
        let model = LinearSystemModel::new()
            .with_reference_flow("cnec", 1100.0)
            .with_sensitivity("cnec", "pst", -10.0)
            .with_reference_flow("mnec", 480.0)
            .with_sensitivity("mnec", "pst", 10.0);
        let request = fixture
            .perimeter
            .sensitivity_request(&fixture.pre_perimeter, &fixture.network_actions);
        let sensi = model.compute(&fixture.crac, &request).unwrap();

        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        CoreFiller::new(fixture.context())
            .fill(&mut problem, &sensi)
            .unwrap();
        MaxMinMarginFiller::new(fixture.context())
            .fill(&mut problem, &sensi)
            .unwrap();
        let mut filler = MnecFiller::new(fixture.context(), &sensi);
        filler.fill(&mut problem, &sensi).unwrap();

        // initial margin 20, floor 0: mnec flow may reach 500
        let c = problem
            .constraint(&ConstraintKey::Mnec {
                cnec: "mnec".into(),
                side: BoundSide::Upper,
            })
            .unwrap();
        assert_eq!(problem.constraint_bounds(c).unwrap().1, 500.0);

        assert!(problem.solve().is_ok());
        let setpoint = problem
            .value_of(&VariableKey::Setpoint(RaKey::new("pst", preventive())))
            .unwrap();
        // each degree gains 10 MW of margin and costs 10 * violation_cost
        assert!((setpoint - 2.0).abs() < 1e-4);
    }
}
