//! Cost evaluation of an operating point.
//!
//! The cost of a solution is split into a functional part, which is what the
//! optimizer actually pursues (the opposite of the worst margin, or the
//! remedial-action cost in min-cost mode), and virtual parts that penalize
//! things the linear problem can only approximate: MNEC degradation, voltage
//! and angle violations, diverged load flows.

use std::collections::{BTreeMap, BTreeSet};

use rao_core::{Crac, RemedialActionInfo, Unit, VariationDirection};
use serde::{Deserialize, Serialize};

use crate::error::OptimizationError;
use crate::parameters::{ObjectiveFunctionType, RaoParameters};
use crate::perimeter::OptimizationPerimeter;
use crate::result::RangeActionActivationResult;
use crate::sensitivity::SensitivitySnapshot;

/// Cost per MW of overload of the most limiting element in min-cost mode.
pub const OVERLOAD_PENALTY_PER_MW: f64 = 10_000.0;

pub const SENSITIVITY_FAILURE_COST: &str = "sensitivity-failure-cost";
pub const MNEC_COST: &str = "mnec-cost";
pub const VOLTAGE_COST: &str = "voltage-cost";
pub const ANGLE_COST: &str = "angle-cost";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveFunctionResult {
    pub functional_cost: f64,
    pub virtual_costs: BTreeMap<String, f64>,
    /// Optimized CNECs by increasing margin (objective unit)
    pub limiting_elements: Vec<(String, f64)>,
}

impl ObjectiveFunctionResult {
    pub fn cost(&self) -> f64 {
        self.functional_cost + self.virtual_cost()
    }

    pub fn virtual_cost(&self) -> f64 {
        self.virtual_costs.values().sum()
    }

    /// Smallest margin among optimized CNECs, `+inf` when there is none.
    pub fn min_margin(&self) -> f64 {
        self.limiting_elements
            .first()
            .map(|(_, margin)| *margin)
            .unwrap_or(f64::INFINITY)
    }

    /// No optimized CNEC overloaded and no virtual cost.
    pub fn is_secure(&self) -> bool {
        self.min_margin() >= 0.0 && self.virtual_cost() <= 0.0
    }

    /// CNECs with a negative margin.
    pub fn overloaded_elements(&self) -> BTreeSet<String> {
        self.limiting_elements
            .iter()
            .filter(|(_, margin)| *margin < 0.0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Evaluates solutions of one perimeter.
pub struct ObjectiveFunction<'a> {
    crac: &'a Crac,
    perimeter: &'a OptimizationPerimeter,
    parameters: &'a RaoParameters,
    /// Flows MNECs are compared with
    initial_flows: BTreeMap<String, f64>,
}

impl<'a> ObjectiveFunction<'a> {
    pub fn new(
        crac: &'a Crac,
        perimeter: &'a OptimizationPerimeter,
        parameters: &'a RaoParameters,
        initial: &SensitivitySnapshot,
    ) -> Self {
        let initial_flows = perimeter
            .monitored_flow_cnecs()
            .iter()
            .filter_map(|id| initial.flow(id).map(|f| (id.clone(), f)))
            .collect();
        Self {
            crac,
            perimeter,
            parameters,
            initial_flows,
        }
    }

    pub fn initial_flow(&self, cnec: &str) -> Option<f64> {
        self.initial_flows.get(cnec).copied()
    }

    /// Lowest cost reachable with `network_actions` applied: their activation
    /// cost in min-cost mode, unbounded for the margin objectives.
    pub fn lower_bound(
        &self,
        network_actions: &BTreeSet<String>,
    ) -> Result<Option<f64>, OptimizationError> {
        match self.parameters.objective_function.objective_type {
            ObjectiveFunctionType::MinCost => {
                let mut cost = 0.0;
                for id in network_actions {
                    cost += self.crac.network_action(id)?.activation_cost().unwrap_or(0.0);
                }
                Ok(Some(cost))
            }
            ObjectiveFunctionType::MaxMinMargin | ObjectiveFunctionType::MaxMinRelativeMargin => {
                Ok(None)
            }
        }
    }

    pub fn evaluate(
        &self,
        snapshot: &SensitivitySnapshot,
        activation: &RangeActionActivationResult,
        network_actions: &BTreeSet<String>,
    ) -> Result<ObjectiveFunctionResult, OptimizationError> {
        let objective = &self.parameters.objective_function;
        let limiting_elements = self.limiting_elements(snapshot)?;
        let min_margin = limiting_elements
            .first()
            .map(|(_, m)| *m)
            .unwrap_or(f64::INFINITY);

        let functional_cost = match objective.objective_type {
            ObjectiveFunctionType::MaxMinMargin | ObjectiveFunctionType::MaxMinRelativeMargin => {
                if min_margin.is_finite() {
                    -min_margin
                } else {
                    0.0
                }
            }
            ObjectiveFunctionType::MinCost => {
                let overload = if min_margin.is_finite() {
                    (-min_margin).max(0.0)
                } else {
                    0.0
                };
                remedial_action_cost(self.crac, self.parameters, activation, network_actions)?
                    + OVERLOAD_PENALTY_PER_MW * overload
            }
        };

        let mut virtual_costs = BTreeMap::new();
        if snapshot.has_failures() {
            virtual_costs.insert(
                SENSITIVITY_FAILURE_COST.to_string(),
                objective.sensitivity_failure_overcost,
            );
        }
        if !self.perimeter.monitored_flow_cnecs().is_empty() {
            virtual_costs.insert(MNEC_COST.to_string(), self.mnec_cost(snapshot)?);
        }
        if !self.perimeter.voltage_cnecs().is_empty() {
            let mut cost = 0.0;
            for id in self.perimeter.voltage_cnecs() {
                let cnec = self.crac.voltage_cnec(id)?;
                if let Some(v) = snapshot.voltage(id) {
                    cost += (-cnec.margin(v)).max(0.0) * objective.voltage_violation_cost;
                }
            }
            virtual_costs.insert(VOLTAGE_COST.to_string(), cost);
        }
        if !self.perimeter.angle_cnecs().is_empty() {
            let mut cost = 0.0;
            for id in self.perimeter.angle_cnecs() {
                let cnec = self.crac.angle_cnec(id)?;
                if let Some(a) = snapshot.angle(id) {
                    cost += (-cnec.margin(a)).max(0.0) * objective.angle_violation_cost;
                }
            }
            virtual_costs.insert(ANGLE_COST.to_string(), cost);
        }

        Ok(ObjectiveFunctionResult {
            functional_cost,
            virtual_costs,
            limiting_elements,
        })
    }

    fn limiting_elements(
        &self,
        snapshot: &SensitivitySnapshot,
    ) -> Result<Vec<(String, f64)>, OptimizationError> {
        let objective = &self.parameters.objective_function;
        let relative = objective.objective_type == ObjectiveFunctionType::MaxMinRelativeMargin;
        let lower_bound = self.parameters.relative_margins.ptdf_sum_lower_bound;
        let mut margins = Vec::new();
        for id in self.perimeter.optimized_flow_cnecs() {
            let cnec = self.crac.flow_cnec(id)?;
            let Some(flow) = snapshot.flow(id) else {
                continue;
            };
            let mut margin = cnec.margin(flow, objective.unit);
            if relative && margin > 0.0 && margin.is_finite() {
                let ptdf = snapshot.ptdf_sum(id).unwrap_or(1.0).abs().max(lower_bound);
                margin /= ptdf;
            }
            if margin.is_finite() {
                margins.push((id.clone(), margin));
            }
        }
        margins.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(margins)
    }

    fn mnec_cost(&self, snapshot: &SensitivitySnapshot) -> Result<f64, OptimizationError> {
        let mnec = &self.parameters.mnec;
        let mut cost = 0.0;
        for id in self.perimeter.monitored_flow_cnecs() {
            let cnec = self.crac.flow_cnec(id)?;
            let Some(flow) = snapshot.flow(id) else {
                continue;
            };
            let current = cnec.margin(flow, Unit::Megawatt);
            let initial = self
                .initial_flow(id)
                .map(|f| cnec.margin(f, Unit::Megawatt))
                .unwrap_or(current);
            if !current.is_finite() {
                continue;
            }
            let floor = (initial - mnec.acceptable_margin_decrease).min(0.0);
            cost += (floor - current).max(0.0) * mnec.violation_cost;
        }
        Ok(cost)
    }
}

/// Activation costs of the applied network actions plus activation and
/// variation costs of the activated range actions. Variations of PSTs are
/// counted in taps; a missing variation cost falls back to the penalty cost
/// of the range action kind.
pub fn remedial_action_cost(
    crac: &Crac,
    parameters: &RaoParameters,
    activation: &RangeActionActivationResult,
    network_actions: &BTreeSet<String>,
) -> Result<f64, OptimizationError> {
    let mut cost = 0.0;
    for id in network_actions {
        cost += crac.network_action(id)?.activation_cost().unwrap_or(0.0);
    }
    for key in activation.activated() {
        let ra = crac.range_action(&key.range_action)?;
        let variation = activation.variation(key);
        let amount = match activation.tap_variation(crac, key)? {
            Some(taps) => f64::from(taps.abs()),
            None => variation.abs(),
        };
        let direction = if variation > 0.0 {
            VariationDirection::Up
        } else {
            VariationDirection::Down
        };
        let unit_cost = ra.variation_cost(direction).unwrap_or_else(|| {
            parameters
                .range_actions_optimization
                .penalty_cost(ra.kind.label())
        });
        cost += ra.activation_cost().unwrap_or(0.0) + amount * unit_cost;
    }
    Ok(cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_problem::RaKey;
    use crate::result::RangeActionSetpointResult;
    use rao_core::{
        ActionType, CracBuilder, FlowCnec, NetworkAction, RangeAction, SetpointRange, StateId,
        Threshold, UsageMethod, UsageRule,
    };

    fn preventive() -> StateId {
        StateId::new("preventive")
    }

    fn cost_crac(with_cnec: bool) -> Crac {
        let rule = UsageRule::on_instant("preventive", UsageMethod::Available);
        let range = SetpointRange::absolute(-1000.0, 1000.0);
        let mut builder = CracBuilder::new("costs")
            .add_range_action(
                RangeAction::linear_pst("pst-1", "pst-el-1", -10, 10, 1.0, 0)
                    .with_variation_cost(VariationDirection::Up, 1.0)
                    .with_usage_rule(rule.clone()),
            )
            .add_range_action(
                RangeAction::linear_pst("pst-2", "pst-el-2", -10, 10, 1.0, 0)
                    .with_activation_cost(10.0)
                    .with_usage_rule(rule.clone()),
            )
            .add_range_action(
                RangeAction::injection("inj-1", "gen-1", 0.0)
                    .with_range(range.clone())
                    .with_activation_cost(5.0)
                    .with_variation_cost(VariationDirection::Up, 150.0)
                    .with_variation_cost(VariationDirection::Down, 200.0)
                    .with_usage_rule(rule.clone()),
            )
            .add_range_action(
                RangeAction::injection("inj-2", "gen-2", 0.0)
                    .with_range(range.clone())
                    .with_activation_cost(0.25)
                    .with_variation_cost(VariationDirection::Up, 200.0)
                    .with_usage_rule(rule.clone()),
            )
            .add_range_action(
                RangeAction::hvdc("hvdc-1", "hvdc-el-1", 0.0)
                    .with_range(range.clone())
                    .with_activation_cost(100.0)
                    .with_variation_cost(VariationDirection::Up, 10.0)
                    .with_variation_cost(VariationDirection::Down, 15.0)
                    .with_usage_rule(rule.clone()),
            )
            .add_range_action(
                RangeAction::hvdc("hvdc-2", "hvdc-el-2", 0.0)
                    .with_range(range)
                    .with_activation_cost(200.0)
                    .with_variation_cost(VariationDirection::Up, 0.1)
                    .with_usage_rule(rule.clone()),
            )
            .add_network_action(
                NetworkAction::topology("topo", "line-9", ActionType::Open)
                    .with_activation_cost(20.0)
                    .with_usage_rule(rule),
            );
        if with_cnec {
            builder = builder.add_flow_cnec(
                FlowCnec::new("cnec", "line-1", preventive())
                    .with_threshold(Threshold::upper(Unit::Megawatt, 1000.0)),
            );
        }
        builder.build().unwrap()
    }

    fn parameters() -> RaoParameters {
        let mut params = RaoParameters::default();
        params.objective_function.objective_type = ObjectiveFunctionType::MinCost;
        params.range_actions_optimization.pst_penalty_cost = 0.01;
        params.range_actions_optimization.injection_penalty_cost = 0.02;
        params.range_actions_optimization.hvdc_penalty_cost = 0.5;
        params
    }

    fn activation(crac: &Crac) -> RangeActionActivationResult {
        let mut activation =
            RangeActionActivationResult::new(RangeActionSetpointResult::initial(crac));
        for (id, setpoint) in [
            ("pst-1", 2.0),
            ("pst-2", -5.0),
            ("inj-1", 35.0),
            ("inj-2", -75.0),
            ("hvdc-1", 600.0),
            ("hvdc-2", -300.0),
        ] {
            activation.set_setpoint(RaKey::new(id, preventive()), setpoint);
        }
        activation
    }

    #[test]
    fn test_remedial_action_cost_without_overload() {
        let crac = cost_crac(false);
        let params = parameters();
        let perimeter = OptimizationPerimeter::preventive(&crac, &BTreeSet::new()).unwrap();
        let objective =
            ObjectiveFunction::new(&crac, &perimeter, &params, &SensitivitySnapshot::default());
        let result = objective
            .evaluate(
                &SensitivitySnapshot::default(),
                &activation(&crac),
                &["topo".to_string()].into_iter().collect(),
            )
            .unwrap();
        assert!((result.functional_cost - 11738.8).abs() < 1e-6);
        assert!(result.limiting_elements.is_empty());
    }

    #[test]
    fn test_remedial_action_cost_with_overload() {
        let crac = cost_crac(true);
        let params = parameters();
        let perimeter = OptimizationPerimeter::preventive(&crac, &BTreeSet::new()).unwrap();
        let mut snapshot = SensitivitySnapshot::default();
        snapshot.set_flow("cnec", 1001.0);
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, &snapshot);
        let result = objective
            .evaluate(
                &snapshot,
                &activation(&crac),
                &["topo".to_string()].into_iter().collect(),
            )
            .unwrap();
        assert!((result.cost() - 21738.8).abs() < 1e-6);
        assert_eq!(result.limiting_elements, vec![("cnec".to_string(), -1.0)]);
        assert!(!result.is_secure());
    }

    #[test]
    fn test_max_min_margin_and_failure_cost() {
        let crac = cost_crac(true);
        let params = RaoParameters::default();
        let perimeter = OptimizationPerimeter::preventive(&crac, &BTreeSet::new()).unwrap();
        let mut snapshot = SensitivitySnapshot::default();
        snapshot.set_flow("cnec", 900.0);
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, &snapshot);
        let no_action = RangeActionActivationResult::new(RangeActionSetpointResult::initial(&crac));
        let result = objective
            .evaluate(&snapshot, &no_action, &BTreeSet::new())
            .unwrap();
        assert_eq!(result.functional_cost, -100.0);
        assert_eq!(result.virtual_cost(), 0.0);
        assert!(result.is_secure());

        snapshot.set_status(preventive(), crate::sensitivity::ComputationStatus::Failure);
        let result = objective
            .evaluate(&snapshot, &no_action, &BTreeSet::new())
            .unwrap();
        assert_eq!(
            result.virtual_costs.get(SENSITIVITY_FAILURE_COST),
            Some(&10000.0)
        );
    }

    #[test]
    fn test_mnec_cost() {
        let crac = CracBuilder::new("mnec")
            .add_flow_cnec(
                FlowCnec::new("mnec", "line-1", preventive())
                    .with_threshold(Threshold::upper(Unit::Megawatt, 1000.0))
                    .monitored_only(),
            )
            .build()
            .unwrap();
        let params = RaoParameters::default();
        let perimeter = OptimizationPerimeter::preventive(&crac, &BTreeSet::new()).unwrap();
        let mut initial = SensitivitySnapshot::default();
        initial.set_flow("mnec", 1020.0);
        let objective = ObjectiveFunction::new(&crac, &perimeter, &params, &initial);
        let no_action = RangeActionActivationResult::new(RangeActionSetpointResult::initial(&crac));

        // initial margin -20, may go down to -70
        let mut now = SensitivitySnapshot::default();
        now.set_flow("mnec", 1060.0);
        let result = objective.evaluate(&now, &no_action, &BTreeSet::new()).unwrap();
        assert_eq!(result.virtual_costs.get(MNEC_COST), Some(&0.0));

        now.set_flow("mnec", 1080.0);
        let result = objective.evaluate(&now, &no_action, &BTreeSet::new()).unwrap();
        assert!((result.virtual_costs[MNEC_COST] - 100.0).abs() < 1e-9);
    }
}
