//! Setpoint, activation and run results.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use rao_core::{Crac, RaoResult as CoreResult, StateId};
use serde::{Deserialize, Serialize};

use crate::linear_problem::{RaKey, EPSILON};
use crate::objective::ObjectiveFunctionResult;

/// Setpoint of every range action on the network, keyed by range action id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeActionSetpointResult {
    setpoints: BTreeMap<String, f64>,
}

impl RangeActionSetpointResult {
    pub fn new(setpoints: BTreeMap<String, f64>) -> Self {
        Self { setpoints }
    }

    /// Every range action at its initial setpoint.
    pub fn initial(crac: &Crac) -> Self {
        Self {
            setpoints: crac
                .range_actions()
                .map(|ra| (ra.id.clone(), ra.initial_setpoint))
                .collect(),
        }
    }

    pub fn setpoint(&self, range_action: &str) -> Option<f64> {
        self.setpoints.get(range_action).copied()
    }

    pub fn set(&mut self, range_action: impl Into<String>, setpoint: f64) {
        self.setpoints.insert(range_action.into(), setpoint);
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.setpoints
    }

    /// Tap of a PST range action at its current setpoint.
    pub fn tap(&self, crac: &Crac, range_action: &str) -> CoreResult<Option<i32>> {
        let ra = crac.range_action(range_action)?;
        let setpoint = self.setpoint(range_action).unwrap_or(ra.initial_setpoint);
        Ok(ra.closest_tap(setpoint))
    }
}

/// Optimized setpoints of one leaf, compared with the pre-perimeter setpoints.
///
/// A range action is activated when its setpoint differs from the
/// pre-perimeter one by more than [`EPSILON`].
#[derive(Debug, Clone, PartialEq)]
pub struct RangeActionActivationResult {
    pre_perimeter: RangeActionSetpointResult,
    setpoints: BTreeMap<RaKey, f64>,
}

impl RangeActionActivationResult {
    pub fn new(pre_perimeter: RangeActionSetpointResult) -> Self {
        Self {
            pre_perimeter,
            setpoints: BTreeMap::new(),
        }
    }

    pub fn pre_perimeter(&self) -> &RangeActionSetpointResult {
        &self.pre_perimeter
    }

    pub fn set_setpoint(&mut self, key: RaKey, setpoint: f64) {
        self.setpoints.insert(key, setpoint);
    }

    pub fn pre_perimeter_setpoint(&self, range_action: &str) -> f64 {
        self.pre_perimeter.setpoint(range_action).unwrap_or(0.0)
    }

    /// Optimized setpoint, or the pre-perimeter one when not optimized.
    pub fn setpoint(&self, key: &RaKey) -> f64 {
        self.setpoints
            .get(key)
            .copied()
            .unwrap_or_else(|| self.pre_perimeter_setpoint(&key.range_action))
    }

    pub fn variation(&self, key: &RaKey) -> f64 {
        self.setpoint(key) - self.pre_perimeter_setpoint(&key.range_action)
    }

    pub fn is_activated(&self, key: &RaKey) -> bool {
        self.variation(key).abs() > EPSILON
    }

    pub fn activated(&self) -> Vec<&RaKey> {
        self.setpoints
            .keys()
            .filter(|key| self.is_activated(key))
            .collect()
    }

    pub fn activated_at(&self, state: &StateId) -> Vec<&RaKey> {
        self.activated()
            .into_iter()
            .filter(|key| &key.state == state)
            .collect()
    }

    pub fn optimized_setpoints(&self) -> &BTreeMap<RaKey, f64> {
        &self.setpoints
    }

    /// Tap variation of a PST, `None` for other range actions.
    pub fn tap_variation(&self, crac: &Crac, key: &RaKey) -> CoreResult<Option<i32>> {
        let ra = crac.range_action(&key.range_action)?;
        let before = ra.closest_tap(self.pre_perimeter_setpoint(&key.range_action));
        let after = ra.closest_tap(self.setpoint(key));
        Ok(before.zip(after).map(|(b, a)| a - b))
    }

    /// Network operating point after this activation.
    pub fn to_setpoint_result(&self) -> RangeActionSetpointResult {
        let mut result = self.pre_perimeter.clone();
        for (key, setpoint) in &self.setpoints {
            result.set(key.range_action.clone(), *setpoint);
        }
        result
    }

    /// Whether two activations lead to the same setpoints (within [`EPSILON`]).
    pub fn same_setpoints(&self, other: &RangeActionActivationResult) -> bool {
        self.setpoints.len() == other.setpoints.len()
            && self
                .setpoints
                .iter()
                .all(|(key, value)| (other.setpoint(key) - value).abs() <= EPSILON)
    }
}

/// Remedial actions and cost of one state in the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResult {
    pub state: StateId,
    pub network_actions: BTreeSet<String>,
    /// Setpoints of the range actions activated at this state
    pub range_action_setpoints: BTreeMap<String, f64>,
    pub pst_taps: BTreeMap<String, i32>,
    pub cost: ObjectiveFunctionResult,
}

impl StateResult {
    pub fn is_secure(&self) -> bool {
        self.cost.is_secure()
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaoStatus {
    Optimized,
    /// The optimized solution was worse than doing nothing
    FellBackToInitial,
    /// The deadline interrupted the search
    TimedOut,
}

/// Output of a complete optimization, consumed by result exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaoResult {
    pub status: RaoStatus,
    pub initial_cost: ObjectiveFunctionResult,
    pub final_cost: ObjectiveFunctionResult,
    pub states: BTreeMap<StateId, StateResult>,
    /// Flow (MW) of every flow CNEC after optimization
    pub flows: BTreeMap<String, f64>,
    /// Range action setpoints after the preventive optimization
    pub final_setpoints: RangeActionSetpointResult,
}

impl RaoResult {
    pub fn state(&self, state: &StateId) -> Option<&StateResult> {
        self.states.get(state)
    }

    pub fn activated_network_actions(&self) -> BTreeSet<&str> {
        self.states
            .values()
            .flat_map(|s| s.network_actions.iter().map(String::as_str))
            .collect()
    }

    pub fn is_secure(&self) -> bool {
        self.final_cost.is_secure()
    }

    /// Export to JSON format
    pub fn to_json(&self, path: &Path) -> anyhow::Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("serializing RaoResult to JSON")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing JSON to {}", path.display()))?;
        Ok(())
    }

    /// Convert to JSON value (for streaming/stdout)
    pub fn to_json_value(&self) -> anyhow::Result<serde_json::Value> {
        serde_json::to_value(self).context("converting RaoResult to JSON value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::{CracBuilder, RangeAction, SetpointRange};

    #[test]
    fn test_activation_against_pre_perimeter() {
        let pre = RangeActionSetpointResult::new([("ra".to_string(), 10.0)].into_iter().collect());
        let mut activation = RangeActionActivationResult::new(pre);
        let key = RaKey::new("ra", StateId::new("preventive"));
        assert_eq!(activation.setpoint(&key), 10.0);
        assert!(!activation.is_activated(&key));

        activation.set_setpoint(key.clone(), 10.0 + EPSILON / 2.0);
        assert!(activation.activated().is_empty());

        activation.set_setpoint(key.clone(), 25.0);
        assert_eq!(activation.variation(&key), 15.0);
        assert_eq!(activation.activated(), vec![&key]);
        assert_eq!(activation.to_setpoint_result().setpoint("ra"), Some(25.0));
    }

    #[test]
    fn test_tap_variation() {
        let crac = CracBuilder::new("crac")
            .add_range_action(
                RangeAction::linear_pst("pst", "el", -10, 10, 0.5, 0)
                    .with_range(SetpointRange::absolute(-10.0, 10.0)),
            )
            .build()
            .unwrap();
        let mut activation = RangeActionActivationResult::new(RangeActionSetpointResult::initial(&crac));
        let key = RaKey::new("pst", StateId::new("preventive"));
        activation.set_setpoint(key.clone(), -2.4);
        assert_eq!(activation.tap_variation(&crac, &key).unwrap(), Some(-5));
    }
}
