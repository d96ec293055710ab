//! Scope of one optimization run.

use std::collections::{BTreeMap, BTreeSet};

use rao_core::{Crac, RaoError, RaoResult, RemedialActionInfo, State, StateId, UsageMethod};

use crate::linear_problem::RaKey;
use crate::result::RangeActionSetpointResult;
use crate::sensitivity::SensitivityRequest;

/// The states, CNECs and remedial actions one search tree works on.
///
/// Range actions are attached to the state they are optimized at. A range
/// action acts on a CNEC when its state is the preventive state of the same
/// timestamp, or an earlier-or-equal state of the same contingency.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationPerimeter {
    main_state: StateId,
    monitored_states: BTreeSet<StateId>,
    range_actions: BTreeMap<StateId, BTreeSet<String>>,
    network_actions: BTreeSet<String>,
    forced_network_actions: BTreeSet<String>,
    flow_cnecs: BTreeSet<String>,
    optimized_flow_cnecs: BTreeSet<String>,
    monitored_flow_cnecs: BTreeSet<String>,
    voltage_cnecs: BTreeSet<String>,
    angle_cnecs: BTreeSet<String>,
    affecting: BTreeMap<String, Vec<RaKey>>,
}

fn acts_on(optimization_state: &State, cnec_state: &State) -> bool {
    if optimization_state.timestamp() != cnec_state.timestamp() {
        return false;
    }
    if optimization_state.is_preventive() {
        return true;
    }
    optimization_state.contingency() == cnec_state.contingency()
        && optimization_state.instant().order <= cnec_state.instant().order
}

/// Whether remedial actions may be used at `state` at all.
fn has_actions(crac: &Crac, state: &State) -> bool {
    !state.instant().is_outage() && crac.has_remedial_actions(state)
}

impl OptimizationPerimeter {
    fn build(
        crac: &Crac,
        main_state: &State,
        optimization_states: &[&State],
        monitored_states: &[&State],
        overloaded: &BTreeSet<String>,
    ) -> RaoResult<Self> {
        let mut range_actions = BTreeMap::new();
        let mut network_actions = BTreeSet::new();
        let mut forced_network_actions = BTreeSet::new();
        for state in optimization_states {
            let mut ids: BTreeSet<String> = BTreeSet::new();
            for method in [UsageMethod::Available, UsageMethod::Forced] {
                ids.extend(
                    crac.range_actions_for(state, method, overloaded)
                        .into_iter()
                        .map(|ra| ra.id.clone()),
                );
            }
            range_actions.insert(state.id().clone(), ids);
        }
        network_actions.extend(
            crac.network_actions_for(main_state, UsageMethod::Available, overloaded)
                .into_iter()
                .map(|na| na.id.clone()),
        );
        forced_network_actions.extend(
            crac.network_actions_for(main_state, UsageMethod::Forced, overloaded)
                .into_iter()
                .map(|na| na.id.clone()),
        );

        let mut perimeter = Self {
            main_state: main_state.id().clone(),
            monitored_states: monitored_states.iter().map(|s| s.id().clone()).collect(),
            range_actions,
            network_actions,
            forced_network_actions,
            flow_cnecs: BTreeSet::new(),
            optimized_flow_cnecs: BTreeSet::new(),
            monitored_flow_cnecs: BTreeSet::new(),
            voltage_cnecs: BTreeSet::new(),
            angle_cnecs: BTreeSet::new(),
            affecting: BTreeMap::new(),
        };

        for state in monitored_states {
            for cnec in crac.flow_cnecs_of_state(state.id()) {
                perimeter.flow_cnecs.insert(cnec.id.clone());
                if cnec.optimized {
                    perimeter.optimized_flow_cnecs.insert(cnec.id.clone());
                }
                if cnec.monitored {
                    perimeter.monitored_flow_cnecs.insert(cnec.id.clone());
                }
                let mut keys = Vec::new();
                for opt_state in optimization_states {
                    if !acts_on(opt_state, state) {
                        continue;
                    }
                    if let Some(ids) = perimeter.range_actions.get(opt_state.id()) {
                        keys.extend(ids.iter().map(|id| RaKey::new(id.clone(), opt_state.id().clone())));
                    }
                }
                perimeter.affecting.insert(cnec.id.clone(), keys);
            }
        }
        perimeter.voltage_cnecs = crac
            .voltage_cnecs()
            .filter(|c| perimeter.monitored_states.contains(&c.state))
            .map(|c| c.id.clone())
            .collect();
        perimeter.angle_cnecs = crac
            .angle_cnecs()
            .filter(|c| perimeter.monitored_states.contains(&c.state))
            .map(|c| c.id.clone())
            .collect();
        Ok(perimeter)
    }

    /// The preventive perimeter: the preventive state, every outage state and
    /// the post-contingency states no later remedial action can improve.
    pub fn preventive(crac: &Crac, overloaded: &BTreeSet<String>) -> RaoResult<Self> {
        let preventive = crac.preventive_state()?;
        let monitored = Self::preventively_monitored(crac, preventive);
        Self::build(crac, preventive, &[preventive], &monitored, overloaded)
    }

    fn preventively_monitored<'c>(crac: &'c Crac, preventive: &'c State) -> Vec<&'c State> {
        let mut monitored = vec![preventive];
        for contingency in crac.contingencies() {
            for state in crac.states_of_contingency(&contingency.id) {
                if state.timestamp() != preventive.timestamp() {
                    continue;
                }
                if has_actions(crac, state) {
                    break;
                }
                monitored.push(state);
            }
        }
        monitored
    }

    /// Perimeter of a post-contingency state with remedial actions: the state
    /// itself and the following states of its contingency up to the next one
    /// that has remedial actions.
    pub fn post_contingency(
        crac: &Crac,
        state: &StateId,
        overloaded: &BTreeSet<String>,
    ) -> RaoResult<Self> {
        let main = crac.state(state)?;
        let contingency = main.contingency().ok_or_else(|| {
            RaoError::Validation(format!("state {} is not a post-contingency state", state))
        })?;
        let mut monitored = vec![main];
        for later in crac.states_of_contingency(contingency) {
            if later.timestamp() != main.timestamp() || !main.instant().comes_before(later.instant())
            {
                continue;
            }
            if has_actions(crac, later) {
                break;
            }
            monitored.push(later);
        }
        Self::build(crac, main, &[main], &monitored, overloaded)
    }

    /// One perimeter over every timestamp of a merged CRAC: preventive range
    /// actions of each timestamp act on every state of that timestamp.
    pub fn multi_timestamp(crac: &Crac, overloaded: &BTreeSet<String>) -> RaoResult<Self> {
        Self::global(crac, overloaded)
    }

    /// Every state monitored, preventive range actions optimized. Used to
    /// evaluate the initial and final situations of a run.
    pub fn global(crac: &Crac, overloaded: &BTreeSet<String>) -> RaoResult<Self> {
        let states = crac.states();
        let preventive: Vec<&State> = states.iter().copied().filter(|s| s.is_preventive()).collect();
        let main = preventive
            .first()
            .copied()
            .ok_or_else(|| RaoError::not_found("state", "preventive"))?;
        Self::build(crac, main, &preventive, &states, overloaded)
    }

    /// Stop optimizing curative CNECs of operators that have no remedial
    /// action in this perimeter; they are only kept from degrading.
    pub fn exclude_operators_without_actions(mut self, crac: &Crac) -> RaoResult<Self> {
        let main = crac.state(&self.main_state)?;
        if !main.instant().is_curative() {
            return Ok(self);
        }
        let mut operators: BTreeSet<String> = BTreeSet::new();
        for id in self.range_action_ids() {
            if let Some(op) = crac.range_action(&id)?.operator() {
                operators.insert(op.to_string());
            }
        }
        for id in &self.network_actions {
            if let Some(op) = crac.network_action(id)?.operator() {
                operators.insert(op.to_string());
            }
        }
        let mut excluded = Vec::new();
        for id in &self.optimized_flow_cnecs {
            let cnec = crac.flow_cnec(id)?;
            if let Some(op) = &cnec.operator {
                if !operators.contains(op) {
                    excluded.push(id.clone());
                }
            }
        }
        for id in excluded {
            self.optimized_flow_cnecs.remove(&id);
            self.monitored_flow_cnecs.insert(id);
        }
        Ok(self)
    }

    pub fn main_state(&self) -> &StateId {
        &self.main_state
    }

    pub fn monitored_states(&self) -> &BTreeSet<StateId> {
        &self.monitored_states
    }

    /// States with range actions, in order.
    pub fn optimization_states(&self) -> impl Iterator<Item = &StateId> {
        self.range_actions.keys()
    }

    pub fn range_actions_at(&self, state: &StateId) -> impl Iterator<Item = &String> {
        self.range_actions.get(state).into_iter().flatten()
    }

    /// Every (range action, state) pair optimized in this perimeter.
    pub fn range_action_keys(&self) -> Vec<RaKey> {
        self.range_actions
            .iter()
            .flat_map(|(state, ids)| ids.iter().map(move |id| RaKey::new(id.clone(), state.clone())))
            .collect()
    }

    pub fn range_action_ids(&self) -> BTreeSet<String> {
        self.range_actions.values().flatten().cloned().collect()
    }

    /// Range actions whose setpoint moves the flow of `cnec`.
    pub fn range_actions_affecting(&self, cnec: &str) -> &[RaKey] {
        self.affecting.get(cnec).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn network_actions(&self) -> &BTreeSet<String> {
        &self.network_actions
    }

    /// Network actions applied at the root of the search tree.
    pub fn forced_network_actions(&self) -> &BTreeSet<String> {
        &self.forced_network_actions
    }

    pub fn flow_cnecs(&self) -> &BTreeSet<String> {
        &self.flow_cnecs
    }

    pub fn optimized_flow_cnecs(&self) -> &BTreeSet<String> {
        &self.optimized_flow_cnecs
    }

    /// CNECs that must not degrade beyond the acceptable margin decrease.
    pub fn monitored_flow_cnecs(&self) -> &BTreeSet<String> {
        &self.monitored_flow_cnecs
    }

    pub fn voltage_cnecs(&self) -> &BTreeSet<String> {
        &self.voltage_cnecs
    }

    pub fn angle_cnecs(&self) -> &BTreeSet<String> {
        &self.angle_cnecs
    }

    pub fn has_range_actions(&self) -> bool {
        self.range_actions.values().any(|ids| !ids.is_empty())
    }

    /// Sensitivity request of this perimeter at the given operating point.
    pub fn sensitivity_request(
        &self,
        setpoints: &RangeActionSetpointResult,
        network_actions: &BTreeSet<String>,
    ) -> SensitivityRequest {
        SensitivityRequest {
            states: self.monitored_states.iter().cloned().collect(),
            flow_cnecs: self.flow_cnecs.iter().cloned().collect(),
            voltage_cnecs: self.voltage_cnecs.iter().cloned().collect(),
            angle_cnecs: self.angle_cnecs.iter().cloned().collect(),
            range_actions: self.range_action_ids().into_iter().collect(),
            setpoints: setpoints.as_map().clone(),
            network_actions: network_actions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::{
        Contingency, CracBuilder, FlowCnec, NetworkAction, RangeAction, SetpointRange, Threshold,
        Unit, UsageRule,
    };

    fn crac() -> Crac {
        let limit = Threshold::symmetric(Unit::Megawatt, 1000.0);
        CracBuilder::new("crac")
            .add_contingency(Contingency::new("co1", vec!["line-2".into()]))
            .add_contingency(Contingency::new("co2", vec!["line-3".into()]))
            .add_flow_cnec(
                FlowCnec::new("prev", "line-1", StateId::new("preventive"))
                    .with_threshold(limit.clone())
                    .with_operator("FR"),
            )
            .add_flow_cnec(
                FlowCnec::new("co1-out", "line-1", StateId::new("co1 - outage"))
                    .with_threshold(limit.clone()),
            )
            .add_flow_cnec(
                FlowCnec::new("co1-cur", "line-1", StateId::new("co1 - curative"))
                    .with_threshold(limit.clone())
                    .with_operator("BE"),
            )
            .add_flow_cnec(
                FlowCnec::new("co2-cur", "line-1", StateId::new("co2 - curative"))
                    .with_threshold(limit),
            )
            .add_range_action(
                RangeAction::injection("prev-inj", "gen-1", 0.0)
                    .with_range(SetpointRange::absolute(-100.0, 100.0))
                    .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available)),
            )
            .add_range_action(
                RangeAction::injection("cur-inj", "gen-2", 0.0)
                    .with_operator("FR")
                    .with_range(SetpointRange::absolute(-100.0, 100.0))
                    .with_usage_rule(UsageRule::on_contingency_state(
                        "co1",
                        "curative",
                        UsageMethod::Available,
                    )),
            )
            .add_network_action(
                NetworkAction::topology("open", "line-4", rao_core::ActionType::Open)
                    .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_preventive_perimeter_monitors_states_without_actions() {
        let crac = crac();
        let perimeter = OptimizationPerimeter::preventive(&crac, &BTreeSet::new()).unwrap();
        assert_eq!(perimeter.main_state().as_str(), "preventive");
        let states: Vec<&str> = perimeter
            .monitored_states()
            .iter()
            .map(StateId::as_str)
            .collect();
        assert!(states.contains(&"co1 - outage"));
        assert!(states.contains(&"co2 - curative"));
        assert!(!states.contains(&"co1 - curative"));
        assert!(perimeter.flow_cnecs().contains("co2-cur"));
        assert_eq!(perimeter.range_action_ids().len(), 1);
        assert_eq!(perimeter.range_actions_affecting("co1-out").len(), 1);
        assert!(perimeter.network_actions().contains("open"));
    }

    #[test]
    fn test_curative_perimeter() {
        let crac = crac();
        let perimeter = OptimizationPerimeter::post_contingency(
            &crac,
            &StateId::new("co1 - curative"),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(perimeter.flow_cnecs().len(), 1);
        let keys = perimeter.range_actions_affecting("co1-cur");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].range_action, "cur-inj");
        assert!(perimeter.network_actions().is_empty());

        let restricted = perimeter.exclude_operators_without_actions(&crac).unwrap();
        assert!(restricted.optimized_flow_cnecs().is_empty());
        assert!(restricted.monitored_flow_cnecs().contains("co1-cur"));
    }

    #[test]
    fn test_preventive_state_is_not_post_contingency() {
        let crac = crac();
        assert!(OptimizationPerimeter::post_contingency(
            &crac,
            &StateId::new("preventive"),
            &BTreeSet::new()
        )
        .is_err());
    }
}
