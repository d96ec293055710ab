use std::collections::{BTreeMap, BTreeSet};

use rao_core::{RangeAction, StateId};

use super::{add_is_variation, FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{
    ConstraintKey, LinearProblem, RaKey, VariableHandle, VariableKey, VariableKind,
};
use crate::parameters::RaUsageLimits;
use crate::sensitivity::SensitivitySnapshot;

/// Limits on how many range actions, operators and PSTs may move at one
/// state. Network actions already applied in the leaf consume the same
/// budgets at the main state.
pub struct UsageLimitsFiller<'a> {
    ctx: FillerContext<'a>,
}

struct StateActions<'a> {
    state: StateId,
    limits: &'a RaUsageLimits,
    range_actions: Vec<(RaKey, &'a RangeAction)>,
}

impl<'a> UsageLimitsFiller<'a> {
    pub fn new(ctx: FillerContext<'a>) -> Self {
        Self { ctx }
    }

    fn limited_states(&self) -> Result<Vec<StateActions<'a>>, OptimizationError> {
        let mut by_state: BTreeMap<StateId, Vec<(RaKey, &'a RangeAction)>> = BTreeMap::new();
        for (key, ra) in self.ctx.range_actions()? {
            by_state.entry(key.state.clone()).or_default().push((key, ra));
        }
        let mut limited = Vec::new();
        for (state, range_actions) in by_state {
            let instant = &self.ctx.crac.state(&state)?.instant().id;
            let Some(limits) = self.ctx.parameters.usage_limits(instant) else {
                continue;
            };
            if limits.is_unlimited() {
                continue;
            }
            limited.push(StateActions {
                state,
                limits,
                range_actions,
            });
        }
        Ok(limited)
    }

    /// Operators of the network actions applied at `state`, with their count.
    fn applied_network_actions(
        &self,
        state: &StateId,
    ) -> Result<BTreeMap<Option<String>, usize>, OptimizationError> {
        let mut by_operator = BTreeMap::new();
        if state != self.ctx.perimeter.main_state() {
            return Ok(by_operator);
        }
        for id in self.ctx.network_actions {
            let na = self.ctx.crac.network_action(id)?;
            *by_operator.entry(na.operator.clone()).or_insert(0) += 1;
        }
        Ok(by_operator)
    }

    fn add_max_ra(
        problem: &mut LinearProblem,
        state: &StateId,
        limit: usize,
        already_used: usize,
        is_variations: &[VariableHandle],
    ) -> Result<(), OptimizationError> {
        let remaining = limit.saturating_sub(already_used) as f64;
        let c = problem.add_constraint(
            ConstraintKey::MaxRa {
                state: state.clone(),
            },
            f64::NEG_INFINITY,
            remaining,
        )?;
        for var in is_variations {
            problem.set_coefficient(c, *var, 1.0)?;
        }
        Ok(())
    }

    fn add_max_tso(
        problem: &mut LinearProblem,
        actions: &StateActions<'_>,
        limit: usize,
        operators_with_network_actions: &BTreeSet<String>,
        is_variations: &BTreeMap<RaKey, VariableHandle>,
    ) -> Result<(), OptimizationError> {
        let remaining = limit.saturating_sub(operators_with_network_actions.len()) as f64;
        let max_tso = problem.add_constraint(
            ConstraintKey::MaxTso {
                state: actions.state.clone(),
            },
            f64::NEG_INFINITY,
            remaining,
        )?;
        let operators: BTreeSet<&str> = actions
            .range_actions
            .iter()
            .filter_map(|(_, ra)| ra.operator.as_deref())
            .filter(|op| !operators_with_network_actions.contains(*op))
            .collect();
        for operator in operators {
            let used = problem.add_variable(
                VariableKey::TsoRaUsed {
                    operator: operator.to_string(),
                    state: actions.state.clone(),
                },
                VariableKind::Binary,
                0.0,
                1.0,
            )?;
            problem.set_coefficient(max_tso, used, 1.0)?;
            // tso_ra_used >= is_variation of every range action of the operator
            for (key, ra) in &actions.range_actions {
                if ra.operator.as_deref() != Some(operator) {
                    continue;
                }
                let c = problem.add_constraint(
                    ConstraintKey::TsoRaUsed {
                        operator: operator.to_string(),
                        ra: key.clone(),
                    },
                    0.0,
                    f64::INFINITY,
                )?;
                problem.set_coefficient(c, used, 1.0)?;
                if let Some(is_variation) = is_variations.get(key) {
                    problem.set_coefficient(c, *is_variation, -1.0)?;
                }
            }
        }
        Ok(())
    }

    fn add_per_tso_limits(
        problem: &mut LinearProblem,
        actions: &StateActions<'_>,
        applied: &BTreeMap<Option<String>, usize>,
        is_variations: &BTreeMap<RaKey, VariableHandle>,
    ) -> Result<(), OptimizationError> {
        for (operator, limit) in &actions.limits.max_ra_per_tso {
            let used = applied.get(&Some(operator.clone())).copied().unwrap_or(0);
            let c = problem.add_constraint(
                ConstraintKey::MaxRaPerTso {
                    operator: operator.clone(),
                    state: actions.state.clone(),
                },
                f64::NEG_INFINITY,
                limit.saturating_sub(used) as f64,
            )?;
            for (key, ra) in &actions.range_actions {
                if ra.operator.as_deref() == Some(operator.as_str()) {
                    if let Some(var) = is_variations.get(key) {
                        problem.set_coefficient(c, *var, 1.0)?;
                    }
                }
            }
        }
        for (operator, limit) in &actions.limits.max_pst_per_tso {
            let c = problem.add_constraint(
                ConstraintKey::MaxPstPerTso {
                    operator: operator.clone(),
                    state: actions.state.clone(),
                },
                f64::NEG_INFINITY,
                *limit as f64,
            )?;
            for (key, ra) in &actions.range_actions {
                if ra.is_pst() && ra.operator.as_deref() == Some(operator.as_str()) {
                    if let Some(var) = is_variations.get(key) {
                        problem.set_coefficient(c, *var, 1.0)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl ProblemFiller for UsageLimitsFiller<'_> {
    fn name(&self) -> &'static str {
        "usage_limits"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        for actions in self.limited_states()? {
            let mut is_variations = BTreeMap::new();
            for (key, ra) in &actions.range_actions {
                let var = add_is_variation(problem, &self.ctx, key, ra)?;
                is_variations.insert(key.clone(), var);
            }
            let applied = self.applied_network_actions(&actions.state)?;

            if let Some(limit) = actions.limits.max_ra {
                let already_used = applied.values().sum();
                let vars: Vec<VariableHandle> = is_variations.values().copied().collect();
                Self::add_max_ra(problem, &actions.state, limit, already_used, &vars)?;
            }
            if let Some(limit) = actions.limits.max_tso {
                let operators: BTreeSet<String> = applied.keys().flatten().cloned().collect();
                Self::add_max_tso(problem, &actions, limit, &operators, &is_variations)?;
            }
            Self::add_per_tso_limits(problem, &actions, &applied, &is_variations)?;
        }
        Ok(())
    }
}
