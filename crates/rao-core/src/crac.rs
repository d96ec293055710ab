//! The CRAC: contingencies, remedial actions and CNECs of one study.
//!
//! A [`Crac`] is immutable once built. The optimizer only reads it; every
//! result is held in separate structures keyed by the ids defined here.

use crate::cnec::{AngleCnec, FlowCnec, VoltageCnec};
use crate::error::{RaoError, RaoResult};
use crate::remedial_action::{NetworkAction, RangeAction, RemedialActionInfo};
use crate::state::{timestamped_id, Contingency, Instant, InstantKind, State, StateId};
use crate::usage_rule::{UsageMethod, UsageRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crac {
    id: String,
    instants: Vec<Instant>,
    contingencies: BTreeMap<String, Contingency>,
    states: BTreeMap<StateId, State>,
    flow_cnecs: BTreeMap<String, FlowCnec>,
    voltage_cnecs: BTreeMap<String, VoltageCnec>,
    angle_cnecs: BTreeMap<String, AngleCnec>,
    range_actions: BTreeMap<String, RangeAction>,
    network_actions: BTreeMap<String, NetworkAction>,
}

impl Crac {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instants(&self) -> &[Instant] {
        &self.instants
    }

    pub fn instant(&self, id: &str) -> RaoResult<&Instant> {
        self.instants
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| RaoError::not_found("instant", id))
    }

    /// Curative instants, in chronological order.
    pub fn curative_instants(&self) -> Vec<&Instant> {
        self.instants.iter().filter(|i| i.is_curative()).collect()
    }

    pub fn contingencies(&self) -> impl Iterator<Item = &Contingency> {
        self.contingencies.values()
    }

    pub fn contingency(&self, id: &str) -> RaoResult<&Contingency> {
        self.contingencies
            .get(id)
            .ok_or_else(|| RaoError::not_found("contingency", id))
    }

    /// All states, in chronological order.
    pub fn states(&self) -> Vec<&State> {
        let mut states: Vec<&State> = self.states.values().collect();
        states.sort();
        states
    }

    pub fn state(&self, id: &StateId) -> RaoResult<&State> {
        self.states
            .get(id)
            .ok_or_else(|| RaoError::not_found("state", id.as_str()))
    }

    /// The first preventive state (the only one outside multi-timestamp CRACs).
    pub fn preventive_state(&self) -> RaoResult<&State> {
        self.states()
            .into_iter()
            .find(|s| s.is_preventive())
            .ok_or_else(|| RaoError::not_found("state", "preventive"))
    }

    /// Post-contingency state of `contingency` at `instant`, if it exists.
    pub fn post_contingency_state(&self, contingency: &str, instant: &str) -> Option<&State> {
        self.states.values().find(|s| {
            s.contingency() == Some(contingency) && s.instant().id == instant
        })
    }

    /// Post-contingency states of one contingency, in chronological order.
    pub fn states_of_contingency(&self, contingency: &str) -> Vec<&State> {
        self.states()
            .into_iter()
            .filter(|s| s.contingency() == Some(contingency))
            .collect()
    }

    pub fn flow_cnecs(&self) -> impl Iterator<Item = &FlowCnec> {
        self.flow_cnecs.values()
    }

    pub fn flow_cnec(&self, id: &str) -> RaoResult<&FlowCnec> {
        self.flow_cnecs
            .get(id)
            .ok_or_else(|| RaoError::not_found("flow cnec", id))
    }

    pub fn flow_cnecs_of_state(&self, state: &StateId) -> Vec<&FlowCnec> {
        self.flow_cnecs
            .values()
            .filter(|c| &c.state == state)
            .collect()
    }

    pub fn voltage_cnecs(&self) -> impl Iterator<Item = &VoltageCnec> {
        self.voltage_cnecs.values()
    }

    pub fn voltage_cnec(&self, id: &str) -> RaoResult<&VoltageCnec> {
        self.voltage_cnecs
            .get(id)
            .ok_or_else(|| RaoError::not_found("voltage cnec", id))
    }

    pub fn angle_cnecs(&self) -> impl Iterator<Item = &AngleCnec> {
        self.angle_cnecs.values()
    }

    pub fn angle_cnec(&self, id: &str) -> RaoResult<&AngleCnec> {
        self.angle_cnecs
            .get(id)
            .ok_or_else(|| RaoError::not_found("angle cnec", id))
    }

    pub fn range_actions(&self) -> impl Iterator<Item = &RangeAction> {
        self.range_actions.values()
    }

    pub fn range_action(&self, id: &str) -> RaoResult<&RangeAction> {
        self.range_actions
            .get(id)
            .ok_or_else(|| RaoError::not_found("range action", id))
    }

    pub fn network_actions(&self) -> impl Iterator<Item = &NetworkAction> {
        self.network_actions.values()
    }

    pub fn network_action(&self, id: &str) -> RaoResult<&NetworkAction> {
        self.network_actions
            .get(id)
            .ok_or_else(|| RaoError::not_found("network action", id))
    }

    /// Range actions usable at `state` with the given method.
    pub fn range_actions_for(
        &self,
        state: &State,
        method: UsageMethod,
        overloaded_cnecs: &BTreeSet<String>,
    ) -> Vec<&RangeAction> {
        self.range_actions
            .values()
            .filter(|ra| ra.usage_method(state, overloaded_cnecs) == Some(method))
            .collect()
    }

    /// Network actions usable at `state` with the given method.
    pub fn network_actions_for(
        &self,
        state: &State,
        method: UsageMethod,
        overloaded_cnecs: &BTreeSet<String>,
    ) -> Vec<&NetworkAction> {
        self.network_actions
            .values()
            .filter(|na| na.usage_method(state, overloaded_cnecs) == Some(method))
            .collect()
    }

    /// Whether any remedial action can be used at `state`.
    pub fn has_remedial_actions(&self, state: &State) -> bool {
        let none = BTreeSet::new();
        let flagged: BTreeSet<String> = self.flow_cnecs.keys().cloned().collect();
        let usable = |rules: &[UsageRule]| {
            crate::usage_rule::resolve_usage_method(rules, state, &flagged).is_some()
                || crate::usage_rule::resolve_usage_method(rules, state, &none).is_some()
        };
        self.range_actions.values().any(|ra| usable(&ra.usage_rules))
            || self.network_actions.values().any(|na| usable(&na.usage_rules))
    }

    /// Merge one CRAC per timestamp into a single CRAC whose states, CNECs and
    /// remedial actions are suffixed with `" @ <timestamp>"`.
    ///
    /// Usage rules are resolved against each source CRAC and rewritten as
    /// [`UsageRule::OnState`] rules. Flow-constraint rules become unconditional
    /// on the states of their instant.
    pub fn merge_timestamps(
        id: impl Into<String>,
        cracs: Vec<(DateTime<Utc>, Crac)>,
    ) -> RaoResult<Crac> {
        let id = id.into();
        let Some(instants) = cracs.first().map(|(_, crac)| crac.instants.clone()) else {
            return Err(RaoError::Validation(format!(
                "CRAC '{}' merges no timestamp",
                id
            )));
        };
        let mut merged = Crac {
            id,
            instants,
            contingencies: BTreeMap::new(),
            states: BTreeMap::new(),
            flow_cnecs: BTreeMap::new(),
            voltage_cnecs: BTreeMap::new(),
            angle_cnecs: BTreeMap::new(),
            range_actions: BTreeMap::new(),
            network_actions: BTreeMap::new(),
        };
        let mut timestamps = BTreeSet::new();
        for (ts, crac) in cracs {
            if !timestamps.insert(ts) {
                return Err(RaoError::Validation(format!("Duplicate timestamp {}", ts)));
            }
            let scoped = |value: &str| timestamped_id(value, &ts);
            for co in crac.contingencies.values() {
                merged
                    .contingencies
                    .entry(co.id.clone())
                    .or_insert_with(|| co.clone());
            }
            for state in crac.states.values() {
                let state = state.clone().with_timestamp(ts);
                merged.states.insert(state.id().clone(), state);
            }
            for cnec in crac.flow_cnecs.values() {
                let mut cnec = cnec.clone();
                cnec.id = scoped(&cnec.id);
                cnec.state = StateId::new(scoped(cnec.state.as_str()));
                insert_unique(&mut merged.flow_cnecs, cnec.id.clone(), cnec, "flow cnec")?;
            }
            for cnec in crac.voltage_cnecs.values() {
                let mut cnec = cnec.clone();
                cnec.id = scoped(&cnec.id);
                cnec.state = StateId::new(scoped(cnec.state.as_str()));
                insert_unique(&mut merged.voltage_cnecs, cnec.id.clone(), cnec, "voltage cnec")?;
            }
            for cnec in crac.angle_cnecs.values() {
                let mut cnec = cnec.clone();
                cnec.id = scoped(&cnec.id);
                cnec.state = StateId::new(scoped(cnec.state.as_str()));
                insert_unique(&mut merged.angle_cnecs, cnec.id.clone(), cnec, "angle cnec")?;
            }
            for ra in crac.range_actions.values() {
                let mut ra = ra.clone();
                ra.usage_rules = crac.state_scoped_rules(&ra.usage_rules, &ts);
                ra.id = scoped(&ra.id);
                ra.group_id = ra.group_id.as_deref().map(scoped);
                insert_unique(&mut merged.range_actions, ra.id.clone(), ra, "range action")?;
            }
            for na in crac.network_actions.values() {
                let mut na = na.clone();
                na.usage_rules = crac.state_scoped_rules(&na.usage_rules, &ts);
                na.id = scoped(&na.id);
                insert_unique(&mut merged.network_actions, na.id.clone(), na, "network action")?;
            }
        }
        Ok(merged)
    }

    fn state_scoped_rules(&self, rules: &[UsageRule], ts: &DateTime<Utc>) -> Vec<UsageRule> {
        let all_cnecs: BTreeSet<String> = self.flow_cnecs.keys().cloned().collect();
        self.states()
            .into_iter()
            .filter_map(|state| {
                crate::usage_rule::resolve_usage_method(rules, state, &all_cnecs).map(|method| {
                    UsageRule::OnState {
                        state: StateId::new(timestamped_id(state.id().as_str(), ts)),
                        instant: state.instant().id.clone(),
                        method,
                    }
                })
            })
            .collect()
    }
}

/// Validating builder for [`Crac`].
///
/// States are derived from instants and contingencies: one preventive state
/// plus one state per (contingency, post-contingency instant).
#[derive(Debug, Clone)]
pub struct CracBuilder {
    id: String,
    instants: Vec<Instant>,
    contingencies: Vec<Contingency>,
    flow_cnecs: Vec<FlowCnec>,
    voltage_cnecs: Vec<VoltageCnec>,
    angle_cnecs: Vec<AngleCnec>,
    range_actions: Vec<RangeAction>,
    network_actions: Vec<NetworkAction>,
}

impl CracBuilder {
    /// Builder with the usual instants: preventive, outage, auto, curative.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instants: vec![
                Instant::preventive(),
                Instant::outage(),
                Instant::auto(),
                Instant::curative(1),
            ],
            contingencies: Vec::new(),
            flow_cnecs: Vec::new(),
            voltage_cnecs: Vec::new(),
            angle_cnecs: Vec::new(),
            range_actions: Vec::new(),
            network_actions: Vec::new(),
        }
    }

    /// Replace the instant list.
    pub fn instants(mut self, instants: Vec<Instant>) -> Self {
        self.instants = instants;
        self
    }

    pub fn add_instant(mut self, instant: Instant) -> Self {
        self.instants.push(instant);
        self
    }

    pub fn add_contingency(mut self, contingency: Contingency) -> Self {
        self.contingencies.push(contingency);
        self
    }

    pub fn add_flow_cnec(mut self, cnec: FlowCnec) -> Self {
        self.flow_cnecs.push(cnec);
        self
    }

    pub fn add_voltage_cnec(mut self, cnec: VoltageCnec) -> Self {
        self.voltage_cnecs.push(cnec);
        self
    }

    pub fn add_angle_cnec(mut self, cnec: AngleCnec) -> Self {
        self.angle_cnecs.push(cnec);
        self
    }

    pub fn add_range_action(mut self, ra: RangeAction) -> Self {
        self.range_actions.push(ra);
        self
    }

    pub fn add_network_action(mut self, na: NetworkAction) -> Self {
        self.network_actions.push(na);
        self
    }

    pub fn build(self) -> RaoResult<Crac> {
        let mut instants = self.instants;
        instants.sort();
        let preventive_count = instants
            .iter()
            .filter(|i| i.kind == InstantKind::Preventive)
            .count();
        if preventive_count != 1 {
            return Err(RaoError::Validation(format!(
                "CRAC '{}' must have exactly one preventive instant, found {}",
                self.id, preventive_count
            )));
        }
        let mut instant_ids = BTreeSet::new();
        for instant in &instants {
            if !instant_ids.insert(instant.id.clone()) {
                return Err(RaoError::Validation(format!(
                    "Duplicate instant '{}'",
                    instant.id
                )));
            }
        }

        let mut contingencies = BTreeMap::new();
        for co in self.contingencies {
            if contingencies.contains_key(&co.id) {
                return Err(RaoError::Validation(format!(
                    "Duplicate contingency '{}'",
                    co.id
                )));
            }
            contingencies.insert(co.id.clone(), co);
        }

        let mut states = BTreeMap::new();
        for instant in &instants {
            if instant.is_preventive() {
                let state = State::preventive(instant.clone());
                states.insert(state.id().clone(), state);
            } else {
                for co in contingencies.keys() {
                    let state = State::post_contingency(co.clone(), instant.clone());
                    states.insert(state.id().clone(), state);
                }
            }
        }

        let mut flow_cnecs = BTreeMap::new();
        for cnec in self.flow_cnecs {
            cnec.validate()?;
            check_state(&states, &cnec.id, &cnec.state)?;
            insert_unique(&mut flow_cnecs, cnec.id.clone(), cnec, "flow cnec")?;
        }
        let mut voltage_cnecs = BTreeMap::new();
        for cnec in self.voltage_cnecs {
            cnec.validate()?;
            check_state(&states, &cnec.id, &cnec.state)?;
            insert_unique(&mut voltage_cnecs, cnec.id.clone(), cnec, "voltage cnec")?;
        }
        let mut angle_cnecs = BTreeMap::new();
        for cnec in self.angle_cnecs {
            cnec.validate()?;
            check_state(&states, &cnec.id, &cnec.state)?;
            insert_unique(&mut angle_cnecs, cnec.id.clone(), cnec, "angle cnec")?;
        }

        let mut remedial_action_ids = BTreeSet::new();
        let mut range_actions = BTreeMap::new();
        for ra in self.range_actions {
            ra.validate()?;
            check_usage_rules(&ra.id, &ra.usage_rules, &instants, &contingencies, &flow_cnecs, &states)?;
            if !remedial_action_ids.insert(ra.id.clone()) {
                return Err(RaoError::Validation(format!(
                    "Duplicate remedial action '{}'",
                    ra.id
                )));
            }
            range_actions.insert(ra.id.clone(), ra);
        }
        let mut network_actions = BTreeMap::new();
        for na in self.network_actions {
            na.validate()?;
            check_usage_rules(&na.id, &na.usage_rules, &instants, &contingencies, &flow_cnecs, &states)?;
            if !remedial_action_ids.insert(na.id.clone()) {
                return Err(RaoError::Validation(format!(
                    "Duplicate remedial action '{}'",
                    na.id
                )));
            }
            network_actions.insert(na.id.clone(), na);
        }

        Ok(Crac {
            id: self.id,
            instants,
            contingencies,
            states,
            flow_cnecs,
            voltage_cnecs,
            angle_cnecs,
            range_actions,
            network_actions,
        })
    }
}

fn check_state(states: &BTreeMap<StateId, State>, cnec_id: &str, state: &StateId) -> RaoResult<()> {
    if states.contains_key(state) {
        Ok(())
    } else {
        Err(RaoError::Validation(format!(
            "Cnec '{}' refers to unknown state '{}'",
            cnec_id, state
        )))
    }
}

fn insert_unique<T>(
    map: &mut BTreeMap<String, T>,
    id: String,
    value: T,
    kind: &str,
) -> RaoResult<()> {
    if map.contains_key(&id) {
        return Err(RaoError::Validation(format!("Duplicate {} '{}'", kind, id)));
    }
    map.insert(id, value);
    Ok(())
}

fn check_usage_rules(
    ra_id: &str,
    rules: &[UsageRule],
    instants: &[Instant],
    contingencies: &BTreeMap<String, Contingency>,
    flow_cnecs: &BTreeMap<String, FlowCnec>,
    states: &BTreeMap<StateId, State>,
) -> RaoResult<()> {
    for rule in rules {
        let Some(instant) = instants.iter().find(|i| i.id == rule.instant()) else {
            return Err(RaoError::Validation(format!(
                "Remedial action '{}' has a usage rule on unknown instant '{}'",
                ra_id,
                rule.instant()
            )));
        };
        if instant.is_outage() {
            return Err(RaoError::Validation(format!(
                "Remedial action '{}' cannot be used at the outage instant",
                ra_id
            )));
        }
        match rule {
            UsageRule::OnContingencyState { contingency, .. }
                if !contingencies.contains_key(contingency) =>
            {
                return Err(RaoError::Validation(format!(
                    "Remedial action '{}' refers to unknown contingency '{}'",
                    ra_id, contingency
                )));
            }
            UsageRule::OnFlowConstraint { cnec, .. } if !flow_cnecs.contains_key(cnec) => {
                return Err(RaoError::Validation(format!(
                    "Remedial action '{}' refers to unknown cnec '{}'",
                    ra_id, cnec
                )));
            }
            UsageRule::OnState { state, .. } if !states.contains_key(state) => {
                return Err(RaoError::Validation(format!(
                    "Remedial action '{}' refers to unknown state '{}'",
                    ra_id, state
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnec::Threshold;
    use crate::units::Unit;

    fn builder() -> CracBuilder {
        CracBuilder::new("crac")
            .add_contingency(Contingency::new("co1", vec!["line-2".into()]))
            .add_flow_cnec(
                FlowCnec::new("cnec-prev", "line-1", StateId::new("preventive"))
                    .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0)),
            )
            .add_flow_cnec(
                FlowCnec::new("cnec-cur", "line-1", StateId::new("co1 - curative"))
                    .with_threshold(Threshold::symmetric(Unit::Megawatt, 1200.0)),
            )
    }

    #[test]
    fn test_states_are_derived() {
        let crac = builder().build().unwrap();
        let ids: Vec<&str> = crac.states().iter().map(|s| s.id().as_str()).collect();
        assert_eq!(
            ids,
            vec!["preventive", "co1 - outage", "co1 - auto", "co1 - curative"]
        );
        assert_eq!(crac.states_of_contingency("co1").len(), 3);
        assert!(crac.post_contingency_state("co1", "auto").is_some());
        assert_eq!(crac.flow_cnecs_of_state(&StateId::new("preventive")).len(), 1);
    }

    #[test]
    fn test_cnec_on_unknown_state_is_rejected() {
        let err = builder()
            .add_flow_cnec(
                FlowCnec::new("bad", "line-1", StateId::new("co9 - curative"))
                    .with_threshold(Threshold::upper(Unit::Megawatt, 10.0)),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown state"), "{}", err);
    }

    #[test]
    fn test_duplicate_remedial_action_ids_are_rejected() {
        let pst = RangeAction::linear_pst("ra", "pst", -5, 5, 1.0, 0);
        let na = NetworkAction::topology("ra", "line", crate::remedial_action::ActionType::Open);
        assert!(builder()
            .add_range_action(pst)
            .add_network_action(na)
            .build()
            .is_err());
    }

    #[test]
    fn test_availability_queries() {
        let prev_rule = UsageRule::on_instant("preventive", UsageMethod::Available);
        let cur_rule = UsageRule::on_contingency_state("co1", "curative", UsageMethod::Available);
        let crac = builder()
            .add_range_action(
                RangeAction::linear_pst("pst", "pst-el", -5, 5, 1.0, 0).with_usage_rule(prev_rule),
            )
            .add_network_action(
                NetworkAction::topology("open", "line-3", crate::remedial_action::ActionType::Open)
                    .with_usage_rule(cur_rule),
            )
            .build()
            .unwrap();
        let none = BTreeSet::new();
        let prev = crac.preventive_state().unwrap();
        let cur = crac.post_contingency_state("co1", "curative").unwrap();
        assert_eq!(crac.range_actions_for(prev, UsageMethod::Available, &none).len(), 1);
        assert!(crac.range_actions_for(cur, UsageMethod::Available, &none).is_empty());
        assert_eq!(crac.network_actions_for(cur, UsageMethod::Available, &none).len(), 1);
        assert!(crac.has_remedial_actions(cur));
        let auto = crac.post_contingency_state("co1", "auto").unwrap();
        assert!(!crac.has_remedial_actions(auto));
    }

    #[test]
    fn test_merge_timestamps_scopes_ids() {
        use chrono::TimeZone;
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let make = || {
            builder()
                .add_range_action(
                    RangeAction::linear_pst("pst", "pst-el", -5, 5, 1.0, 0).with_usage_rule(
                        UsageRule::on_instant("preventive", UsageMethod::Available),
                    ),
                )
                .build()
                .unwrap()
        };
        let merged = Crac::merge_timestamps("multi", vec![(t0, make()), (t1, make())]).unwrap();
        assert_eq!(merged.states().len(), 8);
        assert_eq!(merged.range_actions().count(), 2);
        let cnec = merged.flow_cnec("cnec-prev @ 2024-01-01T01:00Z").unwrap();
        assert_eq!(cnec.state.as_str(), "preventive @ 2024-01-01T01:00Z");

        let none = BTreeSet::new();
        let prev_t0 = merged
            .state(&StateId::new("preventive @ 2024-01-01T00:00Z"))
            .unwrap();
        let available = merged.range_actions_for(prev_t0, UsageMethod::Available, &none);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "pst @ 2024-01-01T00:00Z");
        assert!(Crac::merge_timestamps("empty", vec![]).is_err());
    }

    #[test]
    fn test_usage_rule_on_outage_is_rejected() {
        let ra = RangeAction::linear_pst("pst", "pst-el", -5, 5, 1.0, 0)
            .with_usage_rule(UsageRule::on_instant("outage", UsageMethod::Available));
        assert!(builder().add_range_action(ra).build().is_err());
    }
}
