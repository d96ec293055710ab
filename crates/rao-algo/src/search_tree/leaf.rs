use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

use super::SearchTreeInput;
use crate::error::OptimizationError;
use crate::linear_optimizer::{
    IteratingLinearOptimizer, LinearOptimizationResult, LinearOptimizationStatus,
    LinearOptimizerInput,
};
use crate::logging::format_cost;
use crate::objective::ObjectiveFunctionResult;
use crate::result::RangeActionActivationResult;
use crate::sensitivity::SensitivitySnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum LeafStatus {
    /// Network actions applied and evaluated, range actions not optimized
    Evaluated,
    /// Range actions optimized by the linear optimizer
    Optimized,
    /// Evaluation or optimization failed; the leaf is out of the search
    Rejected { reason: String },
}

/// One combination of network actions and its optimized range actions.
#[derive(Debug, Clone)]
pub struct Leaf {
    network_actions: BTreeSet<String>,
    status: LeafStatus,
    /// Cost with the network actions applied and range actions untouched
    pre_optimization_cost: Option<ObjectiveFunctionResult>,
    result: Option<LinearOptimizationResult>,
}

impl Leaf {
    /// Evaluate a candidate, turning every failure into a rejected leaf.
    pub fn evaluate(input: &SearchTreeInput<'_>, network_actions: BTreeSet<String>) -> Self {
        match Self::try_evaluate(input, network_actions.clone(), false) {
            Ok(leaf) => leaf,
            Err(err) => {
                debug!("Leaf {:?} rejected: {}", network_actions, err);
                Self {
                    network_actions,
                    status: LeafStatus::Rejected {
                        reason: err.to_string(),
                    },
                    pre_optimization_cost: None,
                    result: None,
                }
            }
        }
    }

    /// Evaluate then optimize the range actions of a leaf.
    ///
    /// A failed sensitivity computation or linear optimization rejects a
    /// child leaf. The root keeps its failed states, paid through the
    /// sensitivity failure cost, and stays unoptimized when its linear
    /// optimization fails.
    pub(crate) fn try_evaluate(
        input: &SearchTreeInput<'_>,
        network_actions: BTreeSet<String>,
        is_root: bool,
    ) -> Result<Self, OptimizationError> {
        let applied: BTreeSet<String> = network_actions
            .union(input.previous_network_actions)
            .cloned()
            .collect();
        let request = input
            .perimeter
            .sensitivity_request(input.pre_perimeter, &applied);
        let snapshot = input.sensitivity_computer.compute(input.crac, &request)?;
        let untouched = RangeActionActivationResult::new(input.pre_perimeter.clone());
        let cost = input
            .objective
            .evaluate(&snapshot, &untouched, &network_actions)?;

        if snapshot.has_failures() {
            let failed: Vec<String> = snapshot
                .failed_states()
                .into_iter()
                .map(|s| s.to_string())
                .collect();
            if !is_root {
                return Err(OptimizationError::SensitivityFailure(format!(
                    "load flow diverged for {}",
                    failed.join(", ")
                )));
            }
            return Ok(Self::unoptimized(network_actions, untouched, snapshot, cost));
        }

        let optimizer = IteratingLinearOptimizer::new(LinearOptimizerInput {
            crac: input.crac,
            perimeter: input.perimeter,
            parameters: input.parameters,
            sensitivity_computer: input.sensitivity_computer,
            objective: input.objective,
            initial_snapshot: input.initial_snapshot,
            pre_perimeter: input.pre_perimeter,
            network_actions: &network_actions,
            previous_network_actions: input.previous_network_actions,
            deadline: input.deadline,
        });
        let result = match optimizer.optimize(snapshot.clone(), cost.clone()) {
            Ok(result) => result,
            Err(err) if is_root => {
                warn!(
                    "Range action optimization of the root leaf of {} failed, keeping it unoptimized: {}",
                    input.perimeter.main_state(),
                    err
                );
                return Ok(Self::unoptimized(network_actions, untouched, snapshot, cost));
            }
            Err(err) => return Err(err),
        };
        Ok(Self {
            network_actions,
            status: LeafStatus::Optimized,
            pre_optimization_cost: Some(cost),
            result: Some(result),
        })
    }

    /// Leaf with its network actions applied and range actions untouched.
    fn unoptimized(
        network_actions: BTreeSet<String>,
        untouched: RangeActionActivationResult,
        snapshot: SensitivitySnapshot,
        cost: ObjectiveFunctionResult,
    ) -> Self {
        let result = LinearOptimizationResult {
            status: LinearOptimizationStatus::Skipped,
            activation: untouched,
            sensitivity: snapshot,
            cost: cost.clone(),
            iterations: 0,
        };
        Self {
            network_actions,
            status: LeafStatus::Evaluated,
            pre_optimization_cost: Some(cost),
            result: Some(result),
        }
    }

    pub fn network_actions(&self) -> &BTreeSet<String> {
        &self.network_actions
    }

    pub fn status(&self) -> &LeafStatus {
        &self.status
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, LeafStatus::Rejected { .. })
    }

    /// Total cost, `+inf` for a rejected leaf.
    pub fn cost(&self) -> f64 {
        self.result
            .as_ref()
            .map(|r| r.cost.cost())
            .unwrap_or(f64::INFINITY)
    }

    pub fn pre_optimization_cost(&self) -> Option<&ObjectiveFunctionResult> {
        self.pre_optimization_cost.as_ref()
    }

    pub fn result(&self) -> Option<&LinearOptimizationResult> {
        self.result.as_ref()
    }

    pub fn cost_result(&self) -> Option<&ObjectiveFunctionResult> {
        self.result.as_ref().map(|r| &r.cost)
    }

    /// Most limiting optimized CNEC of the leaf.
    pub fn most_limiting_element(&self) -> Option<&str> {
        self.cost_result()
            .and_then(|c| c.limiting_elements.first())
            .map(|(id, _)| id.as_str())
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions = if self.network_actions.is_empty() {
            "root".to_string()
        } else {
            self.network_actions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" + ")
        };
        match &self.status {
            LeafStatus::Rejected { reason } => write!(f, "{} (rejected: {})", actions, reason),
            _ => write!(f, "{} (cost {})", actions, format_cost(self.cost())),
        }
    }
}
