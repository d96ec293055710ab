//! Iterating linear optimization of the range actions of one leaf.
//!
//! ```text
//! fill ──► solve ──► round taps ──► same setpoints? ──yes──► Converged
//!            ▲                            │ no
//!            │                            ▼
//!   update fillers ◄──improved── sensitivity + evaluate ──not improved──► Converged
//! ```
//!
//! The loop runs at most `max_iterations` times. A solver or sensitivity
//! failure is an error for the leaf; an iteration that does not improve the
//! cost by `min_iteration_improvement` ends the loop with the previous
//! iterate, and so does a cost already at the objective's lower bound.

use std::collections::BTreeSet;
use std::time::Instant;

use rao_core::{Crac, RangeAction};
use tracing::{debug, warn};

use crate::error::OptimizationError;
use crate::fillers::{
    activation_relaxation, CoreFiller, DiscretePstTapFiller, FillerContext, MaxMinMarginFiller,
    MaxMinRelativeMarginFiller, MnecFiller, MultiTimestampFiller, ProblemFiller, RaCostFiller,
    UsageLimitsFiller,
};
use crate::linear_problem::{LinearProblem, LpStatus, VariableKey, EPSILON};
use crate::logging::{format_cost, log_cost};
use crate::objective::{ObjectiveFunction, ObjectiveFunctionResult};
use crate::parameters::{ObjectiveFunctionType, RaoParameters};
use crate::perimeter::OptimizationPerimeter;
use crate::result::{RangeActionActivationResult, RangeActionSetpointResult};
use crate::sensitivity::{SensitivityComputer, SensitivitySnapshot};

/// How the iterations ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearOptimizationStatus {
    /// The solution stopped moving or stopped improving
    Converged,
    /// `max_iterations` reached while still improving
    MaxIterationReached,
    /// The deadline interrupted the iterations
    TimedOut,
    /// Nothing to optimize in the perimeter
    Skipped,
}

/// Best iterate of one linear optimization.
#[derive(Debug, Clone)]
pub struct LinearOptimizationResult {
    pub status: LinearOptimizationStatus,
    pub activation: RangeActionActivationResult,
    /// Sensitivities at the returned setpoints
    pub sensitivity: SensitivitySnapshot,
    pub cost: ObjectiveFunctionResult,
    /// Solves performed (outer iterations)
    pub iterations: usize,
}

/// Everything one leaf's linear optimization reads.
#[derive(Clone, Copy)]
pub struct LinearOptimizerInput<'a> {
    pub crac: &'a Crac,
    pub perimeter: &'a OptimizationPerimeter,
    pub parameters: &'a RaoParameters,
    pub sensitivity_computer: &'a dyn SensitivityComputer,
    pub objective: &'a ObjectiveFunction<'a>,
    /// Snapshot of the initial network, reference of the MNEC constraints
    pub initial_snapshot: &'a SensitivitySnapshot,
    pub pre_perimeter: &'a RangeActionSetpointResult,
    /// Network actions applied in the leaf
    pub network_actions: &'a BTreeSet<String>,
    /// Network actions applied at earlier instants
    pub previous_network_actions: &'a BTreeSet<String>,
    pub deadline: Option<Instant>,
}

pub struct IteratingLinearOptimizer<'a> {
    input: LinearOptimizerInput<'a>,
}

impl<'a> IteratingLinearOptimizer<'a> {
    pub fn new(input: LinearOptimizerInput<'a>) -> Self {
        Self { input }
    }

    fn context(&self) -> FillerContext<'a> {
        FillerContext {
            crac: self.input.crac,
            perimeter: self.input.perimeter,
            parameters: self.input.parameters,
            pre_perimeter: self.input.pre_perimeter,
            network_actions: self.input.network_actions,
        }
    }

    /// Ordered fillers: modeling first, then limits, monitoring and the
    /// objective last.
    fn fillers(&self) -> Vec<Box<dyn ProblemFiller + 'a>> {
        let ctx = self.context();
        let params = self.input.parameters;
        let mut fillers: Vec<Box<dyn ProblemFiller + 'a>> = vec![Box::new(CoreFiller::new(ctx))];
        if ctx.pst_approximated() {
            fillers.push(Box::new(DiscretePstTapFiller::new(ctx)));
        }
        fillers.push(Box::new(UsageLimitsFiller::new(ctx)));
        if !params.inter_temporal.max_setpoint_gradient.is_empty() {
            fillers.push(Box::new(MultiTimestampFiller::new(ctx)));
        }
        if !self.input.perimeter.monitored_flow_cnecs().is_empty() {
            fillers.push(Box::new(MnecFiller::new(ctx, self.input.initial_snapshot)));
        }
        match ctx.objective_type() {
            ObjectiveFunctionType::MaxMinMargin => {
                fillers.push(Box::new(MaxMinMarginFiller::new(ctx)))
            }
            ObjectiveFunctionType::MaxMinRelativeMargin => {
                fillers.push(Box::new(MaxMinRelativeMarginFiller::new(ctx)))
            }
            ObjectiveFunctionType::MinCost => fillers.push(Box::new(RaCostFiller::new(ctx))),
        }
        fillers
    }

    fn at_lower_bound(&self, cost: &ObjectiveFunctionResult) -> Result<bool, OptimizationError> {
        let tolerance = self
            .input
            .parameters
            .range_actions_optimization
            .min_iteration_improvement
            .max(EPSILON);
        Ok(self
            .input
            .objective
            .lower_bound(self.input.network_actions)?
            .is_some_and(|bound| cost.cost() <= bound + tolerance))
    }

    fn deadline_passed(&self) -> bool {
        self.input.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Optimize starting from `start`, the sensitivities of the leaf with
    /// every range action at its pre-perimeter setpoint, of cost `start_cost`.
    pub fn optimize(
        &self,
        start: SensitivitySnapshot,
        start_cost: ObjectiveFunctionResult,
    ) -> Result<LinearOptimizationResult, OptimizationError> {
        let ctx = self.context();
        let mut initial_activation = RangeActionActivationResult::new(self.input.pre_perimeter.clone());
        for (key, ra) in ctx.range_actions()? {
            initial_activation.set_setpoint(key, ctx.pre_perimeter_setpoint(ra));
        }
        let mut best = LinearOptimizationResult {
            status: LinearOptimizationStatus::Skipped,
            activation: initial_activation,
            sensitivity: start,
            cost: start_cost,
            iterations: 0,
        };
        if !self.input.perimeter.has_range_actions() {
            return Ok(best);
        }
        if self.at_lower_bound(&best.cost)? {
            debug!(
                "Cost {} of {} is already at its lower bound",
                format_cost(best.cost.cost()),
                self.input.perimeter.main_state()
            );
            best.status = LinearOptimizationStatus::Converged;
            return Ok(best);
        }

        let params = &self.input.parameters.range_actions_optimization;
        let mut problem = LinearProblem::new(params.solver_kind()?);
        let mut fillers = self.fillers();
        for filler in &mut fillers {
            filler.fill(&mut problem, &best.sensitivity)?;
        }
        debug!(
            "Linear problem of {} built: {} variables, {} constraints",
            self.input.perimeter.main_state(),
            problem.num_variables(),
            problem.num_constraints()
        );

        best.status = LinearOptimizationStatus::MaxIterationReached;
        for iteration in 1..=params.max_iterations {
            if iteration > 1 && self.deadline_passed() {
                warn!("Deadline reached, stopping linear optimization after {} iterations", best.iterations);
                best.status = LinearOptimizationStatus::TimedOut;
                break;
            }
            best.iterations = iteration;
            let activation = self.solve(&mut problem, &mut fillers)?;
            if activation.same_setpoints(&best.activation) {
                debug!("Iteration {}: setpoints unchanged", iteration);
                best.status = LinearOptimizationStatus::Converged;
                break;
            }

            let applied: BTreeSet<String> = self
                .input
                .network_actions
                .union(self.input.previous_network_actions)
                .cloned()
                .collect();
            let request = self
                .input
                .perimeter
                .sensitivity_request(&activation.to_setpoint_result(), &applied);
            let snapshot = self.input.sensitivity_computer.compute(self.input.crac, &request)?;
            if snapshot.has_failures() {
                return Err(OptimizationError::SensitivityFailure(format!(
                    "load flow diverged for {} state(s) at iteration {}",
                    snapshot.failed_states().len(),
                    iteration
                )));
            }
            let cost = self
                .input
                .objective
                .evaluate(&snapshot, &activation, self.input.network_actions)?;
            log_cost(&format!("Iteration {}", iteration), &cost);

            if cost.cost() < best.cost.cost() - params.min_iteration_improvement {
                best.activation = activation;
                best.sensitivity = snapshot;
                best.cost = cost;
                if self.at_lower_bound(&best.cost)? {
                    debug!("Iteration {}: cost reached its lower bound", iteration);
                    best.status = LinearOptimizationStatus::Converged;
                    break;
                }
                for filler in &mut fillers {
                    filler.update_between_sensitivity_iteration(
                        &mut problem,
                        &best.sensitivity,
                        &best.activation,
                    )?;
                }
            } else {
                debug!(
                    "Iteration {}: cost {} does not improve {}, keeping previous solution",
                    iteration,
                    format_cost(cost.cost()),
                    format_cost(best.cost.cost())
                );
                best.status = LinearOptimizationStatus::Converged;
                break;
            }
        }
        Ok(best)
    }

    /// Solve, then re-linearize the taps and re-solve until they are stable.
    fn solve(
        &self,
        problem: &mut LinearProblem,
        fillers: &mut [Box<dyn ProblemFiller + 'a>],
    ) -> Result<RangeActionActivationResult, OptimizationError> {
        let mut activation = self.solve_once(problem)?;
        if !self.context().pst_approximated() {
            return Ok(activation);
        }
        let max_mip_iterations = self.input.parameters.range_actions_optimization.max_mip_iterations;
        for _ in 1..max_mip_iterations {
            for filler in fillers.iter_mut() {
                filler.update_between_search_iteration(problem, &activation)?;
            }
            let next = self.solve_once(problem)?;
            let stable = next.same_setpoints(&activation);
            activation = next;
            if stable {
                break;
            }
        }
        Ok(activation)
    }

    fn solve_once(
        &self,
        problem: &mut LinearProblem,
    ) -> Result<RangeActionActivationResult, OptimizationError> {
        match problem.solve() {
            status if status.is_ok() => {}
            LpStatus::Infeasible => return Err(OptimizationError::SolverInfeasible),
            status => {
                warn!("Linear problem ended with status {:?}", status);
                return Err(OptimizationError::SolverAbnormal(format!("{:?}", status)));
            }
        }
        let ctx = self.context();
        let mut activation = RangeActionActivationResult::new(self.input.pre_perimeter.clone());
        for (key, ra) in ctx.range_actions()? {
            let value = problem.value_of(&VariableKey::Setpoint(key.clone()))?;
            let (min, max) = ctx.admissible_range(ra)?;
            let mut setpoint = snap_setpoint(ra, value, min, max);
            // slack of the activation binaries is not a move
            let previous = activation.pre_perimeter_setpoint(&key.range_action);
            if (setpoint - previous).abs() <= activation_relaxation(&ctx, ra) + EPSILON {
                setpoint = previous;
            }
            activation.set_setpoint(key, setpoint);
        }
        Ok(activation)
    }
}

/// Clamp a solved setpoint into its admissible range; PSTs land on the angle
/// of their closest tap.
pub(crate) fn snap_setpoint(ra: &RangeAction, value: f64, min: f64, max: f64) -> f64 {
    let value = value.clamp(min, max);
    ra.closest_tap(value)
        .and_then(|tap| ra.tap_to_angle(tap))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_problem::RaKey;
    use crate::parameters::ObjectiveFunctionType;
    use crate::sensitivity::LinearSystemModel;
    use crate::test_utils::{preventive, single_pst_crac, single_pst_sensitivity, FillerFixture};

    fn run(
        fixture: &FillerFixture,
        computer: &LinearSystemModel,
    ) -> Result<LinearOptimizationResult, OptimizationError> {
        let request = fixture
            .perimeter
            .sensitivity_request(&fixture.pre_perimeter, &fixture.network_actions);
        let start = computer.compute(&fixture.crac, &request)?;
        let objective = ObjectiveFunction::new(
            &fixture.crac,
            &fixture.perimeter,
            &fixture.parameters,
            &start,
        );
        let initial = RangeActionActivationResult::new(fixture.pre_perimeter.clone());
        let start_cost = objective.evaluate(&start, &initial, &fixture.network_actions)?;
        let optimizer = IteratingLinearOptimizer::new(LinearOptimizerInput {
            crac: &fixture.crac,
            perimeter: &fixture.perimeter,
            parameters: &fixture.parameters,
            sensitivity_computer: computer,
            objective: &objective,
            initial_snapshot: &start,
            pre_perimeter: &fixture.pre_perimeter,
            network_actions: &fixture.network_actions,
            previous_network_actions: &fixture.network_actions,
            deadline: None,
        });
        optimizer.optimize(start.clone(), start_cost)
    }

    fn min_cost() -> RaoParameters {
        let mut params = RaoParameters::default();
        params.objective_function.objective_type = ObjectiveFunctionType::MinCost;
        params
    }

    #[test]
    fn test_overload_is_solved_on_a_tap() {
        let fixture = FillerFixture::new(single_pst_crac(), min_cost());
        let result = run(&fixture, &single_pst_sensitivity(1020.0, -5.0)).unwrap();
        let key = RaKey::new("pst", preventive());
        assert_eq!(result.status, LinearOptimizationStatus::Converged);
        assert_eq!(result.activation.setpoint(&key), 2.0);
        assert_eq!(
            result.activation.tap_variation(&fixture.crac, &key).unwrap(),
            Some(4)
        );
        assert!(result.cost.is_secure());
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn test_secure_min_cost_leaf_is_not_solved() {
        let fixture = FillerFixture::new(single_pst_crac(), min_cost());
        let result = run(&fixture, &single_pst_sensitivity(900.0, -5.0)).unwrap();
        assert_eq!(result.status, LinearOptimizationStatus::Converged);
        assert_eq!(result.iterations, 0);
        assert!(result.activation.activated().is_empty());
        assert_eq!(result.cost.cost(), 0.0);
    }

    #[test]
    fn test_iterations_are_capped() {
        let mut params = min_cost();
        params.range_actions_optimization.max_iterations = 1;
        let fixture = FillerFixture::new(single_pst_crac(), params);
        let result = run(&fixture, &single_pst_sensitivity(1020.0, -5.0)).unwrap();
        assert_eq!(result.status, LinearOptimizationStatus::MaxIterationReached);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_worse_iterate_is_discarded() {
        let fixture = FillerFixture::new(single_pst_crac(), RaoParameters::default());
        // the linearization promises relief, the real response overloads further
        let computer = single_pst_sensitivity(1100.0, -5.0).with_curvature("cnec", "pst", 3.0);
        let result = run(&fixture, &computer).unwrap();
        assert_eq!(result.status, LinearOptimizationStatus::Converged);
        assert!(result.activation.activated().is_empty());
        assert!((result.cost.functional_cost - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_sensitivity_failure_rejects_the_leaf() {
        let fixture = FillerFixture::new(single_pst_crac(), RaoParameters::default());
        let computer = single_pst_sensitivity(1100.0, -5.0);
        let request = fixture
            .perimeter
            .sensitivity_request(&fixture.pre_perimeter, &fixture.network_actions);
        let start = computer.compute(&fixture.crac, &request).unwrap();
        let objective = ObjectiveFunction::new(
            &fixture.crac,
            &fixture.perimeter,
            &fixture.parameters,
            &start,
        );
        let initial = RangeActionActivationResult::new(fixture.pre_perimeter.clone());
        let start_cost = objective
            .evaluate(&start, &initial, &fixture.network_actions)
            .unwrap();
        let broken = LinearSystemModel::new().unavailable();
        let optimizer = IteratingLinearOptimizer::new(LinearOptimizerInput {
            crac: &fixture.crac,
            perimeter: &fixture.perimeter,
            parameters: &fixture.parameters,
            sensitivity_computer: &broken,
            objective: &objective,
            initial_snapshot: &start,
            pre_perimeter: &fixture.pre_perimeter,
            network_actions: &fixture.network_actions,
            previous_network_actions: &fixture.network_actions,
            deadline: None,
        });
        assert!(matches!(
            optimizer.optimize(start.clone(), start_cost),
            Err(OptimizationError::SensitivityFailure(_))
        ));
    }

    #[test]
    fn test_snap_setpoint() {
        let crac = single_pst_crac();
        let pst = crac.range_action("pst").unwrap();
        assert_eq!(snap_setpoint(pst, 1.26, -5.0, 5.0), 1.5);
        assert_eq!(snap_setpoint(pst, 9.0, -5.0, 5.0), 5.0);
        // ties go to the lowest tap
        assert_eq!(snap_setpoint(pst, 0.25, -5.0, 5.0), 0.0);
    }
}
