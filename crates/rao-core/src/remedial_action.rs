//! Remedial actions: discrete network actions and continuous range actions.
//!
//! Remedial actions form a closed set of kinds. Every kind answers the same
//! capability questions through [`RemedialActionInfo`] (id, operator, cost,
//! usage rules); range actions additionally expose their admissible setpoint
//! interval.
//!
//! PST range actions are optimized in angle (degrees). Their ranges are given
//! in taps and converted through the tap-to-angle map.

use crate::error::{RaoError, RaoResult};
use crate::state::State;
use crate::usage_rule::{resolve_usage_method, UsageMethod, UsageRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Capabilities shared by every remedial action kind.
pub trait RemedialActionInfo {
    fn id(&self) -> &str;
    fn operator(&self) -> Option<&str>;
    fn activation_cost(&self) -> Option<f64>;
    fn usage_rules(&self) -> &[UsageRule];

    /// Usage method at `state`, `None` when the action is unavailable there.
    fn usage_method(
        &self,
        state: &State,
        overloaded_cnecs: &BTreeSet<String>,
    ) -> Option<UsageMethod> {
        resolve_usage_method(self.usage_rules(), state, overloaded_cnecs)
    }
}

/// How a range's bounds are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeType {
    Absolute,
    RelativeToInitialNetwork,
    RelativeToPreviousInstant,
}

/// One range constraint of a range action, in taps for PSTs and in setpoint
/// units (MW) otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointRange {
    pub range_type: RangeType,
    pub min: f64,
    pub max: f64,
}

impl SetpointRange {
    pub fn absolute(min: f64, max: f64) -> Self {
        Self {
            range_type: RangeType::Absolute,
            min,
            max,
        }
    }

    pub fn relative_to_initial(min: f64, max: f64) -> Self {
        Self {
            range_type: RangeType::RelativeToInitialNetwork,
            min,
            max,
        }
    }

    pub fn relative_to_previous(min: f64, max: f64) -> Self {
        Self {
            range_type: RangeType::RelativeToPreviousInstant,
            min,
            max,
        }
    }

    fn anchored(&self, initial: f64, previous: f64) -> (f64, f64) {
        match self.range_type {
            RangeType::Absolute => (self.min, self.max),
            RangeType::RelativeToInitialNetwork => (initial + self.min, initial + self.max),
            RangeType::RelativeToPreviousInstant => (previous + self.min, previous + self.max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationDirection {
    Up,
    Down,
}

/// The closed set of range action kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RangeActionKind {
    Pst {
        tap_to_angle: BTreeMap<i32, f64>,
        initial_tap: i32,
    },
    Hvdc,
    Injection,
}

impl RangeActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            RangeActionKind::Pst { .. } => "pst",
            RangeActionKind::Hvdc => "hvdc",
            RangeActionKind::Injection => "injection",
        }
    }
}

/// A continuously (or tap-wise) adjustable remedial action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeAction {
    pub id: String,
    pub name: Option<String>,
    pub operator: Option<String>,
    pub network_element: String,
    pub kind: RangeActionKind,
    pub ranges: Vec<SetpointRange>,
    /// Setpoint in the initial network (angle in degrees for PSTs)
    pub initial_setpoint: f64,
    pub activation_cost: Option<f64>,
    pub variation_cost_up: Option<f64>,
    pub variation_cost_down: Option<f64>,
    /// Range actions of a group must share the same setpoint
    pub group_id: Option<String>,
    pub usage_rules: Vec<UsageRule>,
}

impl RangeAction {
    fn with_kind(
        id: impl Into<String>,
        network_element: impl Into<String>,
        kind: RangeActionKind,
        initial_setpoint: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            operator: None,
            network_element: network_element.into(),
            kind,
            ranges: Vec::new(),
            initial_setpoint,
            activation_cost: None,
            variation_cost_up: None,
            variation_cost_down: None,
            group_id: None,
            usage_rules: Vec::new(),
        }
    }

    /// A phase-shifting transformer. The initial setpoint is the angle of
    /// `initial_tap` (0 if the tap is not in the map, caught by `validate`).
    pub fn pst(
        id: impl Into<String>,
        network_element: impl Into<String>,
        tap_to_angle: BTreeMap<i32, f64>,
        initial_tap: i32,
    ) -> Self {
        let initial_angle = tap_to_angle.get(&initial_tap).copied().unwrap_or(0.0);
        Self::with_kind(
            id,
            network_element,
            RangeActionKind::Pst {
                tap_to_angle,
                initial_tap,
            },
            initial_angle,
        )
    }

    /// A PST whose angle grows linearly with the tap: `angle = tap * step`.
    pub fn linear_pst(
        id: impl Into<String>,
        network_element: impl Into<String>,
        min_tap: i32,
        max_tap: i32,
        step_deg: f64,
        initial_tap: i32,
    ) -> Self {
        let map = (min_tap..=max_tap)
            .map(|tap| (tap, tap as f64 * step_deg))
            .collect();
        Self::pst(id, network_element, map, initial_tap)
    }

    pub fn hvdc(
        id: impl Into<String>,
        network_element: impl Into<String>,
        initial_setpoint: f64,
    ) -> Self {
        Self::with_kind(id, network_element, RangeActionKind::Hvdc, initial_setpoint)
    }

    pub fn injection(
        id: impl Into<String>,
        network_element: impl Into<String>,
        initial_setpoint: f64,
    ) -> Self {
        Self::with_kind(
            id,
            network_element,
            RangeActionKind::Injection,
            initial_setpoint,
        )
    }

    pub fn with_range(mut self, range: SetpointRange) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_activation_cost(mut self, cost: f64) -> Self {
        self.activation_cost = Some(cost);
        self
    }

    pub fn with_variation_cost(mut self, direction: VariationDirection, cost: f64) -> Self {
        match direction {
            VariationDirection::Up => self.variation_cost_up = Some(cost),
            VariationDirection::Down => self.variation_cost_down = Some(cost),
        }
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rules.push(rule);
        self
    }

    pub fn is_pst(&self) -> bool {
        matches!(self.kind, RangeActionKind::Pst { .. })
    }

    pub fn variation_cost(&self, direction: VariationDirection) -> Option<f64> {
        match direction {
            VariationDirection::Up => self.variation_cost_up,
            VariationDirection::Down => self.variation_cost_down,
        }
    }

    fn tap_map(&self) -> Option<&BTreeMap<i32, f64>> {
        match &self.kind {
            RangeActionKind::Pst { tap_to_angle, .. } => Some(tap_to_angle),
            _ => None,
        }
    }

    pub fn tap_to_angle(&self, tap: i32) -> Option<f64> {
        self.tap_map().and_then(|map| map.get(&tap).copied())
    }

    pub fn initial_tap(&self) -> Option<i32> {
        match &self.kind {
            RangeActionKind::Pst { initial_tap, .. } => Some(*initial_tap),
            _ => None,
        }
    }

    /// Lowest and highest tap of the tap-to-angle map.
    pub fn tap_range(&self) -> Option<(i32, i32)> {
        let map = self.tap_map()?;
        Some((*map.keys().next()?, *map.keys().next_back()?))
    }

    /// Tap whose angle is closest to `angle`; on a tie the lowest tap wins.
    pub fn closest_tap(&self, angle: f64) -> Option<i32> {
        let map = self.tap_map()?;
        let mut best: Option<(i32, f64)> = None;
        for (&tap, &tap_angle) in map {
            let distance = (tap_angle - angle).abs();
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((tap, distance)),
            }
        }
        best.map(|(tap, _)| tap)
    }

    /// Mean absolute angle difference between consecutive taps.
    pub fn average_tap_step(&self) -> Option<f64> {
        let map = self.tap_map()?;
        if map.len() < 2 {
            return None;
        }
        let angles: Vec<f64> = map.values().copied().collect();
        let total: f64 = angles.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        Some(total / (angles.len() - 1) as f64)
    }

    /// Admissible setpoint interval when the previous instant left the action
    /// at `previous_setpoint`. All ranges are intersected; an empty
    /// intersection collapses onto the previous setpoint.
    pub fn admissible_range(&self, previous_setpoint: f64) -> (f64, f64) {
        match &self.kind {
            RangeActionKind::Pst {
                tap_to_angle,
                initial_tap,
            } => {
                let (Some(&lowest), Some(&highest)) =
                    (tap_to_angle.keys().next(), tap_to_angle.keys().next_back())
                else {
                    return (previous_setpoint, previous_setpoint);
                };
                let previous_tap = self.closest_tap(previous_setpoint).unwrap_or(*initial_tap);
                let mut min_tap = lowest as f64;
                let mut max_tap = highest as f64;
                for range in &self.ranges {
                    let (lo, hi) = range.anchored(*initial_tap as f64, previous_tap as f64);
                    min_tap = min_tap.max(lo.ceil());
                    max_tap = max_tap.min(hi.floor());
                }
                if min_tap > max_tap {
                    return (previous_setpoint, previous_setpoint);
                }
                let a = tap_to_angle.get(&(min_tap as i32)).copied().unwrap_or(previous_setpoint);
                let b = tap_to_angle.get(&(max_tap as i32)).copied().unwrap_or(previous_setpoint);
                (a.min(b), a.max(b))
            }
            _ => {
                let mut min = f64::NEG_INFINITY;
                let mut max = f64::INFINITY;
                for range in &self.ranges {
                    let (lo, hi) = range.anchored(self.initial_setpoint, previous_setpoint);
                    min = min.max(lo);
                    max = max.min(hi);
                }
                if min > max {
                    (previous_setpoint, previous_setpoint)
                } else {
                    (min, max)
                }
            }
        }
    }

    pub fn validate(&self) -> RaoResult<()> {
        for range in &self.ranges {
            if range.min > range.max {
                return Err(RaoError::Validation(format!(
                    "Range action '{}' has a range with min {} > max {}",
                    self.id, range.min, range.max
                )));
            }
        }
        match &self.kind {
            RangeActionKind::Pst {
                tap_to_angle,
                initial_tap,
            } => {
                if tap_to_angle.is_empty() {
                    return Err(RaoError::Validation(format!(
                        "PST range action '{}' has an empty tap-to-angle map",
                        self.id
                    )));
                }
                if !tap_to_angle.contains_key(initial_tap) {
                    return Err(RaoError::Validation(format!(
                        "PST range action '{}' has initial tap {} outside its map",
                        self.id, initial_tap
                    )));
                }
            }
            _ => {
                if self.ranges.is_empty() {
                    return Err(RaoError::Validation(format!(
                        "Range action '{}' has no range",
                        self.id
                    )));
                }
            }
        }
        for cost in [
            self.activation_cost,
            self.variation_cost_up,
            self.variation_cost_down,
        ]
        .into_iter()
        .flatten()
        {
            if cost < 0.0 || !cost.is_finite() {
                return Err(RaoError::Validation(format!(
                    "Range action '{}' has an invalid cost {}",
                    self.id, cost
                )));
            }
        }
        Ok(())
    }
}

impl RemedialActionInfo for RangeAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    fn activation_cost(&self) -> Option<f64> {
        self.activation_cost
    }

    fn usage_rules(&self) -> &[UsageRule] {
        &self.usage_rules
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Open,
    Close,
}

/// One atomic modification of the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementaryAction {
    Topology {
        network_element: String,
        action_type: ActionType,
    },
    SwitchPair {
        switch_to_open: String,
        switch_to_close: String,
    },
    InjectionSetpoint {
        network_element: String,
        setpoint: f64,
    },
    PstSetpoint {
        network_element: String,
        tap: i32,
    },
}

impl ElementaryAction {
    pub fn network_elements(&self) -> Vec<&str> {
        match self {
            ElementaryAction::Topology {
                network_element, ..
            }
            | ElementaryAction::InjectionSetpoint {
                network_element, ..
            }
            | ElementaryAction::PstSetpoint {
                network_element, ..
            } => vec![network_element.as_str()],
            ElementaryAction::SwitchPair {
                switch_to_open,
                switch_to_close,
            } => vec![switch_to_open.as_str(), switch_to_close.as_str()],
        }
    }
}

/// A discrete remedial action made of one or several elementary actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAction {
    pub id: String,
    pub name: Option<String>,
    pub operator: Option<String>,
    pub elementary_actions: Vec<ElementaryAction>,
    pub activation_cost: Option<f64>,
    pub usage_rules: Vec<UsageRule>,
}

impl NetworkAction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            operator: None,
            elementary_actions: Vec::new(),
            activation_cost: None,
            usage_rules: Vec::new(),
        }
    }

    pub fn topology(
        id: impl Into<String>,
        network_element: impl Into<String>,
        action_type: ActionType,
    ) -> Self {
        Self::new(id).with_elementary_action(ElementaryAction::Topology {
            network_element: network_element.into(),
            action_type,
        })
    }

    pub fn with_elementary_action(mut self, action: ElementaryAction) -> Self {
        self.elementary_actions.push(action);
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_activation_cost(mut self, cost: f64) -> Self {
        self.activation_cost = Some(cost);
        self
    }

    pub fn with_usage_rule(mut self, rule: UsageRule) -> Self {
        self.usage_rules.push(rule);
        self
    }

    pub fn network_elements(&self) -> BTreeSet<&str> {
        self.elementary_actions
            .iter()
            .flat_map(|a| a.network_elements())
            .collect()
    }

    /// Two network actions can be combined unless they act on a common element.
    pub fn is_compatible_with(&self, other: &NetworkAction) -> bool {
        let mine = self.network_elements();
        other
            .network_elements()
            .iter()
            .all(|element| !mine.contains(element))
    }

    pub fn validate(&self) -> RaoResult<()> {
        if self.elementary_actions.is_empty() {
            return Err(RaoError::Validation(format!(
                "Network action '{}' has no elementary action",
                self.id
            )));
        }
        if let Some(cost) = self.activation_cost {
            if cost < 0.0 || !cost.is_finite() {
                return Err(RaoError::Validation(format!(
                    "Network action '{}' has an invalid activation cost {}",
                    self.id, cost
                )));
            }
        }
        Ok(())
    }
}

impl RemedialActionInfo for NetworkAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    fn activation_cost(&self) -> Option<f64> {
        self.activation_cost
    }

    fn usage_rules(&self) -> &[UsageRule] {
        &self.usage_rules
    }
}

/// Any remedial action of a CRAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RemedialAction {
    Network(NetworkAction),
    Range(RangeAction),
}

impl RemedialAction {
    pub fn kind_label(&self) -> &'static str {
        match self {
            RemedialAction::Network(_) => "network",
            RemedialAction::Range(ra) => ra.kind.label(),
        }
    }

    pub fn as_range_action(&self) -> Option<&RangeAction> {
        match self {
            RemedialAction::Range(ra) => Some(ra),
            RemedialAction::Network(_) => None,
        }
    }

    pub fn as_network_action(&self) -> Option<&NetworkAction> {
        match self {
            RemedialAction::Network(na) => Some(na),
            RemedialAction::Range(_) => None,
        }
    }

    fn info(&self) -> &dyn RemedialActionInfo {
        match self {
            RemedialAction::Network(na) => na,
            RemedialAction::Range(ra) => ra,
        }
    }
}

impl RemedialActionInfo for RemedialAction {
    fn id(&self) -> &str {
        self.info().id()
    }

    fn operator(&self) -> Option<&str> {
        self.info().operator()
    }

    fn activation_cost(&self) -> Option<f64> {
        self.info().activation_cost()
    }

    fn usage_rules(&self) -> &[UsageRule] {
        self.info().usage_rules()
    }
}

impl From<NetworkAction> for RemedialAction {
    fn from(value: NetworkAction) -> Self {
        RemedialAction::Network(value)
    }
}

impl From<RangeAction> for RemedialAction {
    fn from(value: RangeAction) -> Self {
        RemedialAction::Range(value)
    }
}

impl fmt::Display for RemedialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id(), self.kind_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Instant;

    fn pst() -> RangeAction {
        RangeAction::linear_pst("pst", "pst-element", -10, 10, 0.5, 0)
    }

    #[test]
    fn test_pst_admissible_range_from_map() {
        let ra = pst();
        assert_eq!(ra.admissible_range(0.0), (-5.0, 5.0));
    }

    #[test]
    fn test_pst_ranges_are_intersected() {
        let ra = pst()
            .with_range(SetpointRange::absolute(-6.0, 8.0))
            .with_range(SetpointRange::relative_to_previous(-2.0, 2.0));
        // previous tap 7 (3.5 deg) -> taps [5, 8]
        assert_eq!(ra.admissible_range(3.5), (2.5, 4.0));
        // relative to initial network
        let ra = pst().with_range(SetpointRange::relative_to_initial(-3.0, 3.0));
        assert_eq!(ra.admissible_range(4.0), (-1.5, 1.5));
    }

    #[test]
    fn test_closest_tap_tie_takes_lowest() {
        let ra = pst();
        assert_eq!(ra.closest_tap(0.26), Some(1));
        assert_eq!(ra.closest_tap(0.25), Some(0));
        assert_eq!(ra.closest_tap(-0.25), Some(-1));
        assert_eq!(ra.closest_tap(100.0), Some(10));
        assert_eq!(RangeAction::hvdc("h", "line", 0.0).closest_tap(1.0), None);
    }

    #[test]
    fn test_injection_ranges() {
        let ra = RangeAction::injection("inj", "gen", 100.0)
            .with_range(SetpointRange::absolute(0.0, 500.0))
            .with_range(SetpointRange::relative_to_initial(-50.0, 50.0));
        assert_eq!(ra.admissible_range(100.0), (50.0, 150.0));
        assert!(ra.validate().is_ok());
        assert!(RangeAction::injection("i", "g", 0.0).validate().is_err());
    }

    #[test]
    fn test_empty_intersection_collapses_to_previous() {
        let ra = RangeAction::hvdc("hvdc", "line", 0.0)
            .with_range(SetpointRange::absolute(0.0, 10.0))
            .with_range(SetpointRange::absolute(20.0, 30.0));
        assert_eq!(ra.admissible_range(5.0), (5.0, 5.0));
    }

    #[test]
    fn test_pst_validation() {
        let mut map = BTreeMap::new();
        map.insert(0, 0.0);
        let ra = RangeAction::pst("pst", "el", map, 3);
        assert!(ra.validate().is_err());
        assert!(pst().validate().is_ok());
        assert_eq!(pst().average_tap_step(), Some(0.5));
    }

    #[test]
    fn test_network_action_compatibility() {
        let a = NetworkAction::topology("open-a", "line-a", ActionType::Open);
        let b = NetworkAction::topology("close-a", "line-a", ActionType::Close);
        let c = NetworkAction::topology("open-c", "line-c", ActionType::Open);
        assert!(!a.is_compatible_with(&b));
        assert!(a.is_compatible_with(&c));
        assert!(NetworkAction::new("empty").validate().is_err());
    }

    #[test]
    fn test_remedial_action_capabilities() {
        let ra: RemedialAction = pst()
            .with_operator("FR")
            .with_activation_cost(10.0)
            .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available))
            .into();
        assert_eq!(ra.id(), "pst");
        assert_eq!(ra.operator(), Some("FR"));
        assert_eq!(ra.activation_cost(), Some(10.0));
        assert_eq!(ra.kind_label(), "pst");
        let state = State::preventive(Instant::preventive());
        assert_eq!(
            ra.usage_method(&state, &BTreeSet::new()),
            Some(UsageMethod::Available)
        );
    }
}
