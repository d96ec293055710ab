use std::collections::BTreeMap;

use rao_core::RangeAction;

use super::{FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{
    BoundSide, ConstraintKey, LinearProblem, RaKey, VariableKey, VariableKind,
};
use crate::parameters::{ObjectiveFunctionType, RaRangeShrinking};
use crate::result::RangeActionActivationResult;
use crate::sensitivity::SensitivitySnapshot;

/// Setpoint variables of the range actions and flow variables of the CNECs,
/// linked by the linearized network:
///
/// ```text
/// flow - sum(s_i * x_i) = reference_flow - sum(s_i * x_i_ref)
/// ```
///
/// where `x_ref` is the setpoint the snapshot was computed at. Also models
/// the absolute variation of every range action, its penalty cost, and
/// equal setpoints inside range action groups.
pub struct CoreFiller<'a> {
    ctx: FillerContext<'a>,
    sensitivity_iteration: u32,
}

impl<'a> CoreFiller<'a> {
    pub fn new(ctx: FillerContext<'a>) -> Self {
        Self {
            ctx,
            sensitivity_iteration: 0,
        }
    }

    fn add_range_action_variables(
        &self,
        problem: &mut LinearProblem,
        key: &RaKey,
        ra: &RangeAction,
    ) -> Result<(), OptimizationError> {
        let (min, max) = self.ctx.admissible_range(ra)?;
        let pre = self.ctx.pre_perimeter_setpoint(ra);
        let setpoint =
            problem.add_variable(VariableKey::Setpoint(key.clone()), VariableKind::Continuous, min, max)?;
        let absolute = problem.add_variable(
            VariableKey::AbsoluteVariation(key.clone()),
            VariableKind::Continuous,
            0.0,
            f64::INFINITY,
        )?;

        // absolute >= setpoint - pre
        let lower = problem.add_constraint(
            ConstraintKey::AbsoluteVariation {
                ra: key.clone(),
                side: BoundSide::Lower,
            },
            -pre,
            f64::INFINITY,
        )?;
        problem.set_coefficient(lower, absolute, 1.0)?;
        problem.set_coefficient(lower, setpoint, -1.0)?;

        // absolute >= pre - setpoint
        let upper = problem.add_constraint(
            ConstraintKey::AbsoluteVariation {
                ra: key.clone(),
                side: BoundSide::Upper,
            },
            pre,
            f64::INFINITY,
        )?;
        problem.set_coefficient(upper, absolute, 1.0)?;
        problem.set_coefficient(upper, setpoint, 1.0)?;

        if self.ctx.objective_type() != ObjectiveFunctionType::MinCost {
            let penalty = self
                .ctx
                .parameters
                .range_actions_optimization
                .penalty_cost(ra.kind.label());
            problem.set_objective_coefficient(absolute, penalty)?;
        }
        Ok(())
    }

    fn add_group_constraints(
        &self,
        problem: &mut LinearProblem,
        range_actions: &[(RaKey, &RangeAction)],
    ) -> Result<(), OptimizationError> {
        let mut groups: BTreeMap<(&str, &rao_core::StateId), Vec<&RaKey>> = BTreeMap::new();
        for (key, ra) in range_actions {
            if let Some(group) = &ra.group_id {
                groups.entry((group.as_str(), &key.state)).or_default().push(key);
            }
        }
        for ((group, _), members) in groups {
            let Some((leader, followers)) = members.split_first() else {
                continue;
            };
            let leader_var = problem.variable(&VariableKey::Setpoint((*leader).clone()))?;
            for follower in followers {
                let follower_var = problem.variable(&VariableKey::Setpoint((*follower).clone()))?;
                let c = problem.add_constraint(
                    ConstraintKey::Group {
                        group: group.to_string(),
                        ra: (*follower).clone(),
                    },
                    0.0,
                    0.0,
                )?;
                problem.set_coefficient(c, follower_var, 1.0)?;
                problem.set_coefficient(c, leader_var, -1.0)?;
            }
        }
        Ok(())
    }

    fn build_flow_constraints(
        &self,
        problem: &mut LinearProblem,
        sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        let range_actions = &self.ctx.parameters.range_actions_optimization;
        for cnec_id in self.ctx.perimeter.flow_cnecs() {
            let reference = sensitivity.flow(cnec_id).ok_or_else(|| {
                OptimizationError::ModelBuild(format!("no reference flow for cnec {}", cnec_id))
            })?;
            let flow = problem.add_variable(
                VariableKey::Flow {
                    cnec: cnec_id.clone(),
                },
                VariableKind::Continuous,
                f64::NEG_INFINITY,
                f64::INFINITY,
            )?;

            let mut rhs = reference;
            let mut terms = Vec::new();
            for key in self.ctx.perimeter.range_actions_affecting(cnec_id) {
                let ra = self.ctx.crac.range_action(&key.range_action)?;
                let s = sensitivity
                    .sensitivity(cnec_id, &key.range_action)
                    .ok_or_else(|| {
                        OptimizationError::ModelBuild(format!(
                            "no sensitivity of cnec {} to range action {}",
                            cnec_id, key.range_action
                        ))
                    })?;
                if s.abs() < range_actions.sensitivity_threshold(ra.kind.label()) {
                    continue;
                }
                let at = sensitivity
                    .setpoint(&key.range_action)
                    .unwrap_or_else(|| self.ctx.pre_perimeter_setpoint(ra));
                rhs -= s * at;
                terms.push((problem.variable(&VariableKey::Setpoint(key.clone()))?, s));
            }

            let c = problem.add_constraint(
                ConstraintKey::Flow {
                    cnec: cnec_id.clone(),
                },
                rhs,
                rhs,
            )?;
            problem.set_coefficient(c, flow, 1.0)?;
            for (var, s) in terms {
                problem.set_coefficient(c, var, -s)?;
            }
        }
        Ok(())
    }

    /// Shrink setpoint bounds around the last solution, the window
    /// contracting geometrically with the sensitivity iteration.
    fn shrink_ranges(
        &self,
        problem: &mut LinearProblem,
        activation: &RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        let ratio = self.ctx.parameters.range_actions_optimization.range_shrink_ratio;
        let factor = ratio.powi(self.sensitivity_iteration as i32);
        for (key, ra) in self.ctx.range_actions()? {
            let (min, max) = self.ctx.admissible_range(ra)?;
            let current = activation.setpoint(&key).clamp(min, max);
            let half_width = (max - min) * factor / 2.0;
            let var = problem.variable(&VariableKey::Setpoint(key))?;
            problem.set_variable_bounds(
                var,
                (current - half_width).max(min),
                (current + half_width).min(max),
            )?;
        }
        Ok(())
    }
}

impl ProblemFiller for CoreFiller<'_> {
    fn name(&self) -> &'static str {
        "core"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        let range_actions = self.ctx.range_actions()?;
        for (key, ra) in &range_actions {
            self.add_range_action_variables(problem, key, ra)?;
        }
        self.add_group_constraints(problem, &range_actions)?;
        self.build_flow_constraints(problem, sensitivity)
    }

    fn update_between_sensitivity_iteration(
        &mut self,
        problem: &mut LinearProblem,
        sensitivity: &SensitivitySnapshot,
        activation: &RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        self.sensitivity_iteration += 1;
        self.build_flow_constraints(problem, sensitivity)?;
        if self.ctx.parameters.range_actions_optimization.ra_range_shrinking
            == RaRangeShrinking::Enabled
        {
            self.shrink_ranges(problem, activation)?;
        }
        Ok(())
    }
}
