use std::collections::{BTreeMap, BTreeSet};

use rao_core::{Crac, NetworkAction, RaoResult};
use tracing::debug;

use super::leaf::Leaf;
use crate::parameters::{RaUsageLimits, RaoParameters};
use crate::perimeter::OptimizationPerimeter;
use crate::sensitivity::SensitivityComputer;

/// Generates the children of a leaf: one more available network action, or
/// a predefined combination completing the leaf.
pub struct NetworkActionBloomer<'a> {
    crac: &'a Crac,
    perimeter: &'a OptimizationPerimeter,
    parameters: &'a RaoParameters,
    sensitivity_computer: &'a dyn SensitivityComputer,
    limits: Option<&'a RaUsageLimits>,
}

impl<'a> NetworkActionBloomer<'a> {
    pub fn new(
        crac: &'a Crac,
        perimeter: &'a OptimizationPerimeter,
        parameters: &'a RaoParameters,
        sensitivity_computer: &'a dyn SensitivityComputer,
    ) -> RaoResult<Self> {
        let instant = &crac.state(perimeter.main_state())?.instant().id;
        Ok(Self {
            crac,
            perimeter,
            parameters,
            sensitivity_computer,
            limits: parameters.usage_limits(instant),
        })
    }

    /// Candidate network-action sets for the children of `leaf`, skipping
    /// those in `explored`.
    pub fn bloom(
        &self,
        leaf: &Leaf,
        explored: &BTreeSet<BTreeSet<String>>,
    ) -> RaoResult<Vec<BTreeSet<String>>> {
        let applied = leaf.network_actions();
        let mut candidates: Vec<BTreeSet<String>> = Vec::new();

        for id in self.perimeter.network_actions() {
            if applied.contains(id) {
                continue;
            }
            let mut combination = applied.clone();
            combination.insert(id.clone());
            if !self.is_admissible(&combination)? {
                continue;
            }
            if self.is_pruned(leaf, id) {
                debug!("Network action {} pruned: impact below threshold", id);
                continue;
            }
            candidates.push(combination);
        }

        for predefined in &self.parameters.topo_optimization.predefined_combinations {
            if predefined
                .iter()
                .any(|id| !self.perimeter.network_actions().contains(id))
            {
                continue;
            }
            if predefined.iter().all(|id| applied.contains(id)) {
                continue;
            }
            let mut combination = applied.clone();
            combination.extend(predefined.iter().cloned());
            if self.is_admissible(&combination)? {
                candidates.push(combination);
            }
        }

        let mut seen = BTreeSet::new();
        candidates.retain(|c| !explored.contains(c) && seen.insert(c.clone()));
        Ok(candidates)
    }

    /// Pairwise compatibility and network-action usage limits.
    fn is_admissible(&self, combination: &BTreeSet<String>) -> RaoResult<bool> {
        let actions: Vec<&NetworkAction> = combination
            .iter()
            .map(|id| self.crac.network_action(id))
            .collect::<RaoResult<_>>()?;
        for (i, first) in actions.iter().enumerate() {
            if actions[i + 1..]
                .iter()
                .any(|second| !first.is_compatible_with(second))
            {
                return Ok(false);
            }
        }

        let Some(limits) = self.limits else {
            return Ok(true);
        };
        if limits.max_ra.is_some_and(|max| actions.len() > max) {
            return Ok(false);
        }
        let mut per_operator: BTreeMap<&str, usize> = BTreeMap::new();
        for na in &actions {
            if let Some(op) = na.operator.as_deref() {
                *per_operator.entry(op).or_default() += 1;
            }
        }
        if limits.max_tso.is_some_and(|max| per_operator.len() > max) {
            return Ok(false);
        }
        Ok(per_operator.iter().all(|(op, count)| {
            limits
                .max_topo_per_tso
                .get(*op)
                .map_or(true, |max| count <= max)
        }))
    }

    fn is_pruned(&self, leaf: &Leaf, network_action: &str) -> bool {
        let threshold = self
            .parameters
            .topo_optimization
            .network_action_min_impact_threshold;
        if threshold <= 0.0 {
            return false;
        }
        let Some(cnec) = leaf.most_limiting_element() else {
            return false;
        };
        self.sensitivity_computer
            .estimate_network_action_impact(self.crac, network_action, cnec)
            .is_some_and(|impact| impact < threshold)
    }
}
