//! Optimization of a complete study, state after state.
//!
//! ```text
//! initial situation ─► preventive tree ─► per contingency (in parallel):
//!                                           auto perimeter ─► curative perimeters
//!                  ─► [second preventive tree ─► curative perimeters again]
//!                  ─► merge ─► regression guard
//! ```
//!
//! Each perimeter starts from the setpoints and network actions left by the
//! previous one. A post-contingency perimeter that cannot be optimized keeps
//! the previous instant's solution; only a failure of the initial or
//! preventive computation fails the run.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use rao_core::{Crac, RaoError, RaoResult as CoreResult, State, StateId};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::error::OptimizationError;
use crate::logging::{log_cost, log_most_limiting_elements, BUSINESS_TARGET};
use crate::objective::{remedial_action_cost, ObjectiveFunction, ObjectiveFunctionResult};
use crate::parameters::{
    ObjectiveFunctionType, RaoParameters, SecondPreventiveExecutionCondition, StopCriterion,
};
use crate::perimeter::OptimizationPerimeter;
use crate::result::{
    RangeActionActivationResult, RangeActionSetpointResult, RaoResult, RaoStatus, StateResult,
};
use crate::search_tree::{SearchTree, SearchTreeInput};
use crate::sensitivity::{ComputationStatus, SensitivityComputer, SensitivitySnapshot};

/// The no-action situation every solution is compared with.
struct InitialSituation {
    perimeter: OptimizationPerimeter,
    setpoints: RangeActionSetpointResult,
    snapshot: SensitivitySnapshot,
    cost: ObjectiveFunctionResult,
}

/// Search settings of one perimeter.
#[derive(Debug, Clone, Copy)]
struct TreeSettings<'p> {
    max_depth: usize,
    pool: &'p ThreadPool,
    stop_criterion: StopCriterion,
}

/// Worker pools of the optimization phases, built once per run.
#[derive(Debug)]
struct ThreadPools {
    contingencies: ThreadPool,
    preventive_leaves: ThreadPool,
    curative_leaves: ThreadPool,
}

impl ThreadPools {
    fn new(parameters: &RaoParameters) -> CoreResult<Self> {
        let threads = &parameters.multithreading;
        Ok(Self {
            contingencies: build_pool(
                threads.contingency_scenarios_in_parallel,
                "contingencies",
            )?,
            preventive_leaves: build_pool(
                threads.preventive_leaves_in_parallel,
                "preventive leaves",
            )?,
            curative_leaves: build_pool(threads.curative_leaves_in_parallel, "curative leaves")?,
        })
    }
}

fn build_pool(num_threads: usize, name: &str) -> CoreResult<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| RaoError::Other(format!("building thread pool for {}: {}", name, e)))
}

/// Solution of one perimeter.
#[derive(Debug, Clone)]
struct PerimeterOutcome {
    states: Vec<StateResult>,
    snapshot: SensitivitySnapshot,
    remedial_action_cost: f64,
    network_actions: BTreeSet<String>,
    /// Setpoints on the network after this perimeter
    setpoints: RangeActionSetpointResult,
    secure: bool,
    timed_out: bool,
}

#[derive(Debug, Clone, Default)]
struct ContingencyOutcome {
    perimeters: Vec<PerimeterOutcome>,
    unsecure: bool,
}

/// Everything the run found, before the regression guard.
struct MergedSolution {
    states: BTreeMap<StateId, StateResult>,
    snapshot: SensitivitySnapshot,
    cost: ObjectiveFunctionResult,
    final_setpoints: RangeActionSetpointResult,
    timed_out: bool,
}

/// Remedial action optimizer of one study.
pub struct Rao<'a> {
    crac: &'a Crac,
    parameters: &'a RaoParameters,
    sensitivity_computer: &'a dyn SensitivityComputer,
}

impl<'a> Rao<'a> {
    pub fn new(
        crac: &'a Crac,
        parameters: &'a RaoParameters,
        sensitivity_computer: &'a dyn SensitivityComputer,
    ) -> Self {
        Self {
            crac,
            parameters,
            sensitivity_computer,
        }
    }

    fn deadline(&self, started: Instant) -> Option<Instant> {
        self.parameters
            .topo_optimization
            .max_duration_seconds
            .map(|seconds| started + Duration::from_secs_f64(seconds))
    }

    fn preventive_settings<'p>(&self, pools: &'p ThreadPools) -> TreeSettings<'p> {
        TreeSettings {
            max_depth: self.parameters.topo_optimization.max_preventive_search_tree_depth,
            pool: &pools.preventive_leaves,
            stop_criterion: self.parameters.objective_function.preventive_stop_criterion,
        }
    }

    /// Optimize the preventive, auto and curative remedial actions of the study.
    pub fn run(&self) -> CoreResult<RaoResult> {
        self.parameters.validate()?;
        let started = Instant::now();
        let deadline = self.deadline(started);
        let pools = ThreadPools::new(self.parameters)?;
        info!(target: BUSINESS_TARGET, "Optimizing remedial actions of {}", self.crac.id());

        let initial = self.initial_situation()?;
        let overloaded = initial.cost.overloaded_elements();

        info!(target: BUSINESS_TARGET, "Preventive perimeter optimization [start]");
        let preventive_perimeter = OptimizationPerimeter::preventive(self.crac, &overloaded)?;
        let no_network_action = BTreeSet::new();
        let mut preventive = self.optimize_perimeter(
            &preventive_perimeter,
            &initial,
            &initial.setpoints,
            &no_network_action,
            self.preventive_settings(&pools),
            &[],
            deadline,
        )?;
        info!(target: BUSINESS_TARGET, "Preventive perimeter optimization [end]");

        let mut contingencies =
            self.optimize_contingencies(&initial, &preventive, &overloaded, &pools, deadline)?;
        let mut solution = self.merge(&initial, &preventive, &contingencies)?;

        if self.second_preventive_needed(&contingencies) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Deadline reached, skipping the second preventive optimization");
                solution.timed_out = true;
            } else {
                match self.second_preventive(&initial, &preventive, &overloaded, &pools, deadline) {
                    Ok((second, second_contingencies)) => {
                        let second_solution = self.merge(&initial, &second, &second_contingencies)?;
                        if second_solution.cost.cost() < solution.cost.cost() {
                            info!(target: BUSINESS_TARGET, "Second preventive optimization improves the solution");
                            preventive = second;
                            contingencies = second_contingencies;
                            solution = second_solution;
                        } else {
                            info!(
                                target: BUSINESS_TARGET,
                                "Second preventive optimization does not improve the solution, keeping the first one"
                            );
                        }
                    }
                    Err(err) => warn!("Second preventive optimization failed: {}", err),
                }
            }
        }
        info!(
            target: BUSINESS_TARGET,
            "{} preventive network actions, {} contingencies optimized",
            preventive.network_actions.len(),
            contingencies.len()
        );

        Ok(self.guard(initial, solution))
    }

    /// One linear optimization of the preventive range actions of every
    /// timestamp of a merged CRAC, coupled by the setpoint gradients.
    pub fn optimize_multi_timestamp(&self) -> CoreResult<RaoResult> {
        self.parameters.validate()?;
        let started = Instant::now();
        let deadline = self.deadline(started);
        let initial = self.initial_situation()?;
        let overloaded = initial.cost.overloaded_elements();
        let perimeter = OptimizationPerimeter::multi_timestamp(self.crac, &overloaded)?;
        let single_leaf = build_pool(1, "leaves")?;
        let settings = TreeSettings {
            max_depth: 0,
            pool: &single_leaf,
            stop_criterion: self.parameters.objective_function.preventive_stop_criterion,
        };
        let no_network_action = BTreeSet::new();
        let outcome = self.optimize_perimeter(
            &perimeter,
            &initial,
            &initial.setpoints,
            &no_network_action,
            settings,
            &[],
            deadline,
        )?;
        let solution = self.merge(&initial, &outcome, &[])?;
        Ok(self.guard(initial, solution))
    }

    fn initial_situation(&self) -> CoreResult<InitialSituation> {
        let perimeter = OptimizationPerimeter::global(self.crac, &BTreeSet::new())?;
        let setpoints = RangeActionSetpointResult::initial(self.crac);
        let none = BTreeSet::new();
        let snapshot = self
            .sensitivity_computer
            .compute(self.crac, &perimeter.sensitivity_request(&setpoints, &none))?;
        let objective = ObjectiveFunction::new(self.crac, &perimeter, self.parameters, &snapshot);
        let cost = objective.evaluate(
            &snapshot,
            &RangeActionActivationResult::new(setpoints.clone()),
            &none,
        )?;
        log_cost("Initial situation", &cost);
        log_most_limiting_elements(&cost, 10);
        Ok(InitialSituation {
            perimeter,
            setpoints,
            snapshot,
            cost,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn optimize_perimeter(
        &self,
        perimeter: &OptimizationPerimeter,
        initial: &InitialSituation,
        pre_perimeter: &RangeActionSetpointResult,
        previous_network_actions: &BTreeSet<String>,
        settings: TreeSettings<'_>,
        hints: &[BTreeSet<String>],
        deadline: Option<Instant>,
    ) -> Result<PerimeterOutcome, OptimizationError> {
        let objective =
            ObjectiveFunction::new(self.crac, perimeter, self.parameters, &initial.snapshot);
        let tree = SearchTree::new(SearchTreeInput {
            crac: self.crac,
            perimeter,
            parameters: self.parameters,
            sensitivity_computer: self.sensitivity_computer,
            objective: &objective,
            initial_snapshot: &initial.snapshot,
            pre_perimeter,
            previous_network_actions,
            max_depth: settings.max_depth,
            pool: settings.pool,
            stop_criterion: settings.stop_criterion,
            hints,
            deadline,
        });
        let result = tree.run()?;

        let is_curative = self
            .crac
            .state(perimeter.main_state())?
            .instant()
            .is_curative();
        if is_curative {
            if let (Some(root_cost), Some(best_cost)) =
                (result.root.pre_optimization_cost(), result.best.cost_result())
            {
                if !self.keep_curative(root_cost, best_cost) {
                    info!(
                        target: BUSINESS_TARGET,
                        "Curative actions of {} do not improve the cost enough, discarded",
                        perimeter.main_state()
                    );
                    return self.unoptimized_outcome(
                        perimeter,
                        &objective,
                        pre_perimeter,
                        previous_network_actions,
                    );
                }
            }
        }

        let best = result
            .best
            .result()
            .ok_or_else(|| OptimizationError::ModelBuild("best leaf has no result".into()))?;
        self.outcome(
            perimeter,
            result.best.network_actions(),
            &best.activation,
            best.sensitivity.clone(),
            best.cost.clone(),
            result.timed_out,
        )
    }

    /// Curative actions are kept when they improve the cost of the state by
    /// `curative_min_obj_improvement`, or when they secure an unsecure state
    /// and `enforce_curative_security` is set.
    fn keep_curative(
        &self,
        root_cost: &ObjectiveFunctionResult,
        best_cost: &ObjectiveFunctionResult,
    ) -> bool {
        let objective = &self.parameters.objective_function;
        if objective.enforce_curative_security && !root_cost.is_secure() && best_cost.is_secure() {
            return true;
        }
        root_cost.cost() - best_cost.cost() >= objective.curative_min_obj_improvement
    }

    /// The perimeter with its forced network actions only.
    fn unoptimized_outcome(
        &self,
        perimeter: &OptimizationPerimeter,
        objective: &ObjectiveFunction<'_>,
        pre_perimeter: &RangeActionSetpointResult,
        previous_network_actions: &BTreeSet<String>,
    ) -> Result<PerimeterOutcome, OptimizationError> {
        let forced = perimeter.forced_network_actions().clone();
        let applied: BTreeSet<String> = forced.union(previous_network_actions).cloned().collect();
        let snapshot = self
            .sensitivity_computer
            .compute(self.crac, &perimeter.sensitivity_request(pre_perimeter, &applied))?;
        let untouched = RangeActionActivationResult::new(pre_perimeter.clone());
        let cost = objective.evaluate(&snapshot, &untouched, &forced)?;
        self.outcome(perimeter, &forced, &untouched, snapshot, cost, false)
    }

    fn outcome(
        &self,
        perimeter: &OptimizationPerimeter,
        network_actions: &BTreeSet<String>,
        activation: &RangeActionActivationResult,
        snapshot: SensitivitySnapshot,
        cost: ObjectiveFunctionResult,
        timed_out: bool,
    ) -> Result<PerimeterOutcome, OptimizationError> {
        let mut states = Vec::new();
        for state in perimeter.optimization_states() {
            let mut range_action_setpoints = BTreeMap::new();
            let mut pst_taps = BTreeMap::new();
            for key in activation.activated_at(state) {
                let setpoint = activation.setpoint(key);
                range_action_setpoints.insert(key.range_action.clone(), setpoint);
                if let Some(tap) = self.crac.range_action(&key.range_action)?.closest_tap(setpoint) {
                    pst_taps.insert(key.range_action.clone(), tap);
                }
            }
            let state_network_actions = if state == perimeter.main_state() {
                network_actions.clone()
            } else {
                BTreeSet::new()
            };
            states.push(StateResult {
                state: state.clone(),
                network_actions: state_network_actions,
                range_action_setpoints,
                pst_taps,
                cost: cost.clone(),
            });
        }
        Ok(PerimeterOutcome {
            states,
            snapshot,
            remedial_action_cost: remedial_action_cost(
                self.crac,
                self.parameters,
                activation,
                network_actions,
            )?,
            network_actions: network_actions.clone(),
            setpoints: activation.to_setpoint_result(),
            secure: cost.is_secure(),
            timed_out,
        })
    }

    /// Outcome of a perimeter that could not be optimized: no remedial
    /// action, every monitored state flagged as failed.
    fn failed_outcome(
        &self,
        perimeter: &OptimizationPerimeter,
        pre_perimeter: &RangeActionSetpointResult,
    ) -> PerimeterOutcome {
        let mut snapshot = SensitivitySnapshot::new(pre_perimeter.as_map().clone());
        for state in perimeter.monitored_states() {
            snapshot.set_status(state.clone(), ComputationStatus::Failure);
        }
        let mut cost = ObjectiveFunctionResult::default();
        cost.virtual_costs.insert(
            crate::objective::SENSITIVITY_FAILURE_COST.to_string(),
            self.parameters.objective_function.sensitivity_failure_overcost,
        );
        let state = StateResult {
            state: perimeter.main_state().clone(),
            network_actions: BTreeSet::new(),
            range_action_setpoints: BTreeMap::new(),
            pst_taps: BTreeMap::new(),
            cost,
        };
        PerimeterOutcome {
            states: vec![state],
            snapshot,
            remedial_action_cost: 0.0,
            network_actions: BTreeSet::new(),
            setpoints: pre_perimeter.clone(),
            secure: false,
            timed_out: false,
        }
    }

    fn optimize_contingencies(
        &self,
        initial: &InitialSituation,
        preventive: &PerimeterOutcome,
        overloaded: &BTreeSet<String>,
        pools: &ThreadPools,
        deadline: Option<Instant>,
    ) -> CoreResult<Vec<ContingencyOutcome>> {
        let contingencies: Vec<&str> = self.crac.contingencies().map(|c| c.id.as_str()).collect();
        if contingencies.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            target: BUSINESS_TARGET,
            "Post-contingency perimeters optimization [start]: {} contingencies",
            contingencies.len()
        );
        let outcomes: Vec<CoreResult<ContingencyOutcome>> = pools.contingencies.install(|| {
            contingencies
                .par_iter()
                .map(|id| {
                    self.optimize_contingency(id, initial, preventive, overloaded, pools, deadline)
                })
                .collect()
        });
        info!(target: BUSINESS_TARGET, "Post-contingency perimeters optimization [end]");
        outcomes.into_iter().collect()
    }

    /// The auto perimeter is a single root leaf, so it never uses its pool.
    fn post_contingency_settings<'p>(
        &self,
        state: &State,
        pools: &'p ThreadPools,
    ) -> TreeSettings<'p> {
        if state.instant().is_auto() {
            TreeSettings {
                max_depth: 0,
                pool: &pools.curative_leaves,
                stop_criterion: StopCriterion::MinObjective,
            }
        } else {
            TreeSettings {
                max_depth: self.parameters.topo_optimization.max_curative_search_tree_depth,
                pool: &pools.curative_leaves,
                stop_criterion: self.parameters.objective_function.curative_stop_criterion,
            }
        }
    }

    fn optimize_contingency(
        &self,
        contingency: &str,
        initial: &InitialSituation,
        preventive: &PerimeterOutcome,
        overloaded: &BTreeSet<String>,
        pools: &ThreadPools,
        deadline: Option<Instant>,
    ) -> CoreResult<ContingencyOutcome> {
        let mut outcome = ContingencyOutcome::default();
        let mut setpoints = preventive.setpoints.clone();
        let mut applied = preventive.network_actions.clone();
        for state in self.crac.states_of_contingency(contingency) {
            if state.instant().is_outage() || !self.crac.has_remedial_actions(state) {
                continue;
            }
            let mut perimeter =
                OptimizationPerimeter::post_contingency(self.crac, state.id(), overloaded)?;
            if state.instant().is_curative()
                && self
                    .parameters
                    .not_optimized_cnecs
                    .do_not_optimize_curative_cnecs_for_tsos_without_cras
            {
                perimeter = perimeter.exclude_operators_without_actions(self.crac)?;
            }
            let perimeter_outcome = match self.optimize_perimeter(
                &perimeter,
                initial,
                &setpoints,
                &applied,
                self.post_contingency_settings(state, pools),
                &[],
                deadline,
            ) {
                Ok(result) => result,
                Err(err) => {
                    warn!(
                        "Optimization of {} failed, keeping the previous instant's solution: {}",
                        state.id(),
                        err
                    );
                    self.failed_outcome(&perimeter, &setpoints)
                }
            };
            if !perimeter_outcome.secure {
                outcome.unsecure = true;
            }
            setpoints = perimeter_outcome.setpoints.clone();
            applied.extend(perimeter_outcome.network_actions.iter().cloned());
            outcome.perimeters.push(perimeter_outcome);
        }
        Ok(outcome)
    }

    fn second_preventive_needed(&self, contingencies: &[ContingencyOutcome]) -> bool {
        match self.parameters.second_preventive_rao.execution_condition {
            SecondPreventiveExecutionCondition::Disabled => false,
            SecondPreventiveExecutionCondition::Always => true,
            SecondPreventiveExecutionCondition::IfCurativeUnsecure => {
                contingencies.iter().any(|c| c.unsecure)
            }
        }
    }

    /// Preventive optimization against every state, then the post-contingency
    /// perimeters again on top of its result.
    fn second_preventive(
        &self,
        initial: &InitialSituation,
        first: &PerimeterOutcome,
        overloaded: &BTreeSet<String>,
        pools: &ThreadPools,
        deadline: Option<Instant>,
    ) -> CoreResult<(PerimeterOutcome, Vec<ContingencyOutcome>)> {
        info!(target: BUSINESS_TARGET, "Second preventive perimeter optimization [start]");
        let perimeter = OptimizationPerimeter::global(self.crac, overloaded)?;
        let hints = if self.parameters.second_preventive_rao.hint_from_first_preventive_rao
            && !first.network_actions.is_empty()
        {
            vec![first.network_actions.clone()]
        } else {
            Vec::new()
        };
        let no_network_action = BTreeSet::new();
        let mut second = self.optimize_perimeter(
            &perimeter,
            initial,
            &initial.setpoints,
            &no_network_action,
            self.preventive_settings(pools),
            &hints,
            deadline,
        )?;
        // flows of the post-contingency perimeters come from their own optimization
        let preventive_states = OptimizationPerimeter::preventive(self.crac, overloaded)?;
        second.snapshot = restrict_to_states(&second.snapshot, self.crac, preventive_states.monitored_states());
        info!(target: BUSINESS_TARGET, "Second preventive perimeter optimization [end]");
        let contingencies =
            self.optimize_contingencies(initial, &second, overloaded, pools, deadline)?;
        Ok((second, contingencies))
    }

    fn merge(
        &self,
        initial: &InitialSituation,
        preventive: &PerimeterOutcome,
        contingencies: &[ContingencyOutcome],
    ) -> CoreResult<MergedSolution> {
        let mut states = BTreeMap::new();
        let mut snapshot = preventive.snapshot.clone();
        let mut ra_cost = preventive.remedial_action_cost;
        let mut timed_out = preventive.timed_out;
        for state in &preventive.states {
            states.insert(state.state.clone(), state.clone());
        }
        for perimeter in contingencies.iter().flat_map(|c| c.perimeters.iter()) {
            snapshot.merge(perimeter.snapshot.clone());
            ra_cost += perimeter.remedial_action_cost;
            timed_out |= perimeter.timed_out;
            for state in &perimeter.states {
                states.insert(state.state.clone(), state.clone());
            }
        }

        let objective =
            ObjectiveFunction::new(self.crac, &initial.perimeter, self.parameters, &initial.snapshot);
        let untouched = RangeActionActivationResult::new(initial.setpoints.clone());
        let mut cost = objective.evaluate(&snapshot, &untouched, &BTreeSet::new())?;
        if self.parameters.objective_function.objective_type == ObjectiveFunctionType::MinCost {
            cost.functional_cost += ra_cost;
        }
        Ok(MergedSolution {
            states,
            snapshot,
            cost,
            final_setpoints: preventive.setpoints.clone(),
            timed_out,
        })
    }

    /// Never return a solution worse than doing nothing.
    fn guard(&self, initial: InitialSituation, solution: MergedSolution) -> RaoResult {
        log_cost("Final situation", &solution.cost);
        log_most_limiting_elements(&solution.cost, 10);
        if solution.cost.cost() > initial.cost.cost() {
            warn!(
                "Optimized cost {} is worse than the initial cost {}, falling back to the initial situation",
                solution.cost.cost(),
                initial.cost.cost()
            );
            return RaoResult {
                status: RaoStatus::FellBackToInitial,
                initial_cost: initial.cost.clone(),
                final_cost: initial.cost,
                states: BTreeMap::new(),
                flows: self.flows(&initial.snapshot),
                final_setpoints: initial.setpoints,
            };
        }
        let status = if solution.timed_out {
            RaoStatus::TimedOut
        } else {
            RaoStatus::Optimized
        };
        RaoResult {
            status,
            initial_cost: initial.cost,
            final_cost: solution.cost,
            states: solution.states,
            flows: self.flows(&solution.snapshot),
            final_setpoints: solution.final_setpoints,
        }
    }

    fn flows(&self, snapshot: &SensitivitySnapshot) -> BTreeMap<String, f64> {
        self.crac
            .flow_cnecs()
            .filter_map(|cnec| snapshot.flow(&cnec.id).map(|flow| (cnec.id.clone(), flow)))
            .collect()
    }
}

/// Flows and statuses of `snapshot` limited to the CNECs of `states`.
fn restrict_to_states(
    snapshot: &SensitivitySnapshot,
    crac: &Crac,
    states: &BTreeSet<StateId>,
) -> SensitivitySnapshot {
    let mut restricted = SensitivitySnapshot::new(snapshot.setpoints().clone());
    for state in states {
        if let Some(status) = snapshot.status(state) {
            restricted.set_status(state.clone(), status);
        }
        for cnec in crac.flow_cnecs_of_state(state) {
            if let Some(flow) = snapshot.flow(&cnec.id) {
                restricted.set_flow(cnec.id.clone(), flow);
            }
            if let Some(ptdf) = snapshot.ptdf_sum(&cnec.id) {
                restricted.set_ptdf_sum(cnec.id.clone(), ptdf);
            }
        }
    }
    for cnec in crac.voltage_cnecs().filter(|c| states.contains(&c.state)) {
        if let Some(v) = snapshot.voltage(&cnec.id) {
            restricted.set_voltage(cnec.id.clone(), v);
        }
    }
    for cnec in crac.angle_cnecs().filter(|c| states.contains(&c.state)) {
        if let Some(a) = snapshot.angle(&cnec.id) {
            restricted.set_angle(cnec.id.clone(), a);
        }
    }
    restricted
}
