//! Search over combinations of network actions.
//!
//! The root leaf applies the forced network actions of the perimeter. Each
//! depth adds one network action (or a predefined combination) to the best
//! leaves of the previous depth; every child is evaluated in parallel by
//! optimizing its range actions with the iterating linear optimizer.
//!
//! A depth is only explored further when one of its leaves improves the best
//! cost by more than `max(absolute_min_impact_threshold,
//! relative_min_impact_threshold * |best cost|)`. The cost of an evaluated
//! leaf already includes its range-action optimization, so it is also the
//! bound the search compares against.

mod bloomer;
mod leaf;

pub use bloomer::NetworkActionBloomer;
pub use leaf::{Leaf, LeafStatus};

use std::collections::BTreeSet;
use std::time::Instant;

use rao_core::Crac;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::error::OptimizationError;
use crate::linear_optimizer::LinearOptimizationStatus;
use crate::logging::{log_cost, log_most_limiting_elements, BUSINESS_TARGET};
use crate::objective::ObjectiveFunction;
use crate::parameters::{RaoParameters, StopCriterion};
use crate::perimeter::OptimizationPerimeter;
use crate::result::RangeActionSetpointResult;
use crate::sensitivity::{SensitivityComputer, SensitivitySnapshot};

/// Inputs of one search tree, shared read-only by every leaf.
#[derive(Clone, Copy)]
pub struct SearchTreeInput<'a> {
    pub crac: &'a Crac,
    pub perimeter: &'a OptimizationPerimeter,
    pub parameters: &'a RaoParameters,
    pub sensitivity_computer: &'a dyn SensitivityComputer,
    pub objective: &'a ObjectiveFunction<'a>,
    pub initial_snapshot: &'a SensitivitySnapshot,
    /// Range-action setpoints when the perimeter starts
    pub pre_perimeter: &'a RangeActionSetpointResult,
    /// Network actions applied at earlier instants
    pub previous_network_actions: &'a BTreeSet<String>,
    pub max_depth: usize,
    /// Pool the leaves of one depth are evaluated on
    pub pool: &'a ThreadPool,
    pub stop_criterion: StopCriterion,
    /// Combinations evaluated together with the first depth
    pub hints: &'a [BTreeSet<String>],
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct SearchTreeResult {
    pub root: Leaf,
    pub best: Leaf,
    /// Deepest depth explored
    pub depth: usize,
    pub leaves_evaluated: usize,
    pub timed_out: bool,
}

pub struct SearchTree<'a> {
    input: SearchTreeInput<'a>,
}

impl<'a> SearchTree<'a> {
    pub fn new(input: SearchTreeInput<'a>) -> Self {
        Self { input }
    }

    fn minimum_improvement(&self, cost: f64) -> f64 {
        let topo = &self.input.parameters.topo_optimization;
        topo.absolute_min_impact_threshold
            .max(topo.relative_min_impact_threshold * cost.abs())
    }

    fn is_good_enough(&self, best: &Leaf) -> bool {
        self.input.stop_criterion == StopCriterion::Secure
            && best.cost_result().is_some_and(|c| c.is_secure())
    }

    fn deadline_passed(&self) -> bool {
        self.input.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Hints that are not already explored and only use actions of the
    /// perimeter.
    fn hint_candidates(&self, explored: &mut BTreeSet<BTreeSet<String>>) -> Vec<BTreeSet<String>> {
        let available = self.input.perimeter.network_actions();
        let forced = self.input.perimeter.forced_network_actions();
        self.input
            .hints
            .iter()
            .filter(|hint| {
                hint.iter()
                    .all(|id| available.contains(id) || forced.contains(id))
            })
            .map(|hint| hint.union(forced).cloned().collect::<BTreeSet<String>>())
            .filter(|hint| explored.insert(hint.clone()))
            .collect()
    }

    /// Explore the tree and return its best leaf.
    ///
    /// Fails only when the network situation of the root leaf cannot be
    /// computed; failing children are rejected and the search goes on
    /// without them.
    pub fn run(&self) -> Result<SearchTreeResult, OptimizationError> {
        let input = &self.input;
        let main_state = input.perimeter.main_state();
        let root = Leaf::try_evaluate(input, input.perimeter.forced_network_actions().clone(), true)?;
        info!(target: BUSINESS_TARGET, "Root leaf of {}: {}", main_state, root);
        if let Some(cost) = root.cost_result() {
            log_cost("Root leaf", cost);
            log_most_limiting_elements(cost, 5);
        }

        let bloomer = NetworkActionBloomer::new(
            input.crac,
            input.perimeter,
            input.parameters,
            input.sensitivity_computer,
        )?;
        let mut best = root.clone();
        let mut frontier = vec![root.clone()];
        let mut explored: BTreeSet<BTreeSet<String>> = BTreeSet::new();
        explored.insert(root.network_actions().clone());
        let mut depth = 0;
        let mut leaves_evaluated = 1;
        let mut timed_out = false;

        while depth < input.max_depth {
            if self.is_good_enough(&best) {
                info!(target: BUSINESS_TARGET, "{} is secure, stopping the search", main_state);
                break;
            }
            if self.deadline_passed() {
                warn!("Deadline reached at depth {} of {}", depth, main_state);
                timed_out = true;
                break;
            }

            let mut candidates = Vec::new();
            for leaf in &frontier {
                for combination in bloomer.bloom(leaf, &explored)? {
                    if explored.insert(combination.clone()) {
                        candidates.push(combination);
                    }
                }
            }
            if depth == 0 {
                candidates.extend(self.hint_candidates(&mut explored));
            }
            if candidates.is_empty() {
                debug!("No network action left to try at depth {}", depth + 1);
                break;
            }
            depth += 1;
            info!(
                target: BUSINESS_TARGET,
                "Search depth {} of {}: {} leaves to evaluate",
                depth,
                main_state,
                candidates.len()
            );

            let children: Vec<Leaf> = input.pool.install(|| {
                candidates
                    .par_iter()
                    .map(|network_actions| Leaf::evaluate(input, network_actions.clone()))
                    .collect()
            });
            leaves_evaluated += children.len();

            let target = best.cost() - self.minimum_improvement(best.cost());
            let mut improving: Vec<Leaf> = Vec::new();
            for child in children {
                if child.is_rejected() {
                    info!(target: BUSINESS_TARGET, "Leaf {}", child);
                } else if child.cost() < target {
                    improving.push(child);
                } else {
                    debug!("Leaf {} does not improve enough", child);
                }
            }
            if improving.is_empty() {
                info!(
                    target: BUSINESS_TARGET,
                    "No leaf of depth {} improves {}, stopping the search",
                    depth,
                    best
                );
                break;
            }
            improving.sort_by(|a, b| {
                a.cost()
                    .total_cmp(&b.cost())
                    .then_with(|| a.network_actions().cmp(b.network_actions()))
            });
            let kept = input.parameters.topo_optimization.leaves_kept_per_depth.max(1);
            improving.truncate(kept);
            best = improving[0].clone();
            info!(target: BUSINESS_TARGET, "Best leaf at depth {}: {}", depth, best);
            frontier = improving;
        }

        if let Some(cost) = best.cost_result() {
            log_cost(&format!("Best leaf of {}", main_state), cost);
        }
        timed_out |= best
            .result()
            .is_some_and(|r| r.status == LinearOptimizationStatus::TimedOut);
        Ok(SearchTreeResult {
            root,
            best,
            depth,
            leaves_evaluated,
            timed_out,
        })
    }
}
