//! Problem fillers: each one adds a single concern to the [`LinearProblem`].
//!
//! The optimizer owns an ordered list of fillers: core modeling first, then
//! discrete taps, usage limits, monitoring, and the objective last. Every hook
//! is idempotent; calling `fill` twice leaves the problem unchanged.

mod core_filler;
mod discrete_pst;
mod max_min_margin;
mod max_min_relative_margin;
mod mnec;
mod multi_timestamp;
mod ra_cost;
mod usage_limits;

pub use core_filler::CoreFiller;
pub use discrete_pst::DiscretePstTapFiller;
pub use max_min_margin::MaxMinMarginFiller;
pub use max_min_relative_margin::MaxMinRelativeMarginFiller;
pub use mnec::MnecFiller;
pub use multi_timestamp::MultiTimestampFiller;
pub use ra_cost::RaCostFiller;
pub use usage_limits::UsageLimitsFiller;

use std::collections::BTreeSet;

use rao_core::{Crac, RangeAction};

use crate::error::OptimizationError;
use crate::linear_problem::{
    ConstraintKey, LinearProblem, RaKey, VariableHandle, VariableKey, VariableKind, EPSILON,
};
use crate::parameters::{ObjectiveFunctionType, PstModel, RaoParameters};
use crate::perimeter::OptimizationPerimeter;
use crate::result::{RangeActionActivationResult, RangeActionSetpointResult};
use crate::sensitivity::SensitivitySnapshot;

/// Read-only inputs shared by the fillers of one leaf.
#[derive(Clone, Copy)]
pub struct FillerContext<'a> {
    pub crac: &'a Crac,
    pub perimeter: &'a OptimizationPerimeter,
    pub parameters: &'a RaoParameters,
    /// Setpoints before the perimeter's own actions
    pub pre_perimeter: &'a RangeActionSetpointResult,
    /// Network actions applied in the leaf, including the forced ones
    pub network_actions: &'a BTreeSet<String>,
}

impl<'a> FillerContext<'a> {
    /// Every optimized (range action, state) pair with its definition.
    pub fn range_actions(&self) -> Result<Vec<(RaKey, &'a RangeAction)>, OptimizationError> {
        self.perimeter
            .range_action_keys()
            .into_iter()
            .map(|key| {
                let ra = self.crac.range_action(&key.range_action)?;
                Ok((key, ra))
            })
            .collect()
    }

    pub fn pre_perimeter_setpoint(&self, ra: &RangeAction) -> f64 {
        self.pre_perimeter
            .setpoint(&ra.id)
            .unwrap_or(ra.initial_setpoint)
    }

    /// Admissible setpoint interval of a range action in this perimeter.
    pub fn admissible_range(&self, ra: &RangeAction) -> Result<(f64, f64), OptimizationError> {
        let (min, max) = ra.admissible_range(self.pre_perimeter_setpoint(ra));
        if !min.is_finite() || !max.is_finite() {
            return Err(OptimizationError::ModelBuild(format!(
                "range action {} has an unbounded admissible range",
                ra.id
            )));
        }
        Ok((min, max))
    }

    pub fn objective_type(&self) -> ObjectiveFunctionType {
        self.parameters.objective_function.objective_type
    }

    pub fn pst_approximated(&self) -> bool {
        self.parameters.range_actions_optimization.pst_model == PstModel::ApproximatedIntegers
    }
}

/// One concern of the linear problem.
pub trait ProblemFiller: Send {
    fn name(&self) -> &'static str;

    /// Create variables, constraints and objective terms.
    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError>;

    /// The sensitivities changed, the remedial action set did not.
    fn update_between_sensitivity_iteration(
        &mut self,
        _problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
        _activation: &RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        Ok(())
    }

    /// New solve within the same sensitivity snapshot (taps re-linearized).
    fn update_between_search_iteration(
        &mut self,
        _problem: &mut LinearProblem,
        _activation: &RangeActionActivationResult,
    ) -> Result<(), OptimizationError> {
        Ok(())
    }
}

/// Slack on the activation binary: a share of one tap when taps are
/// approximated, otherwise [`EPSILON`].
pub(crate) fn activation_relaxation(ctx: &FillerContext<'_>, ra: &RangeAction) -> f64 {
    if ra.is_pst() && ctx.pst_approximated() {
        ra.average_tap_step()
            .map(|step| ctx.parameters.range_actions_optimization.pst_relaxation_ratio * step)
            .unwrap_or(EPSILON)
    } else {
        EPSILON
    }
}

/// Binary set to 1 when the range action moves:
///
/// ```text
/// absolute_variation - (max - min + eps) * is_variation <= relaxation
/// ```
///
/// Requires the absolute variation variable of the core filler.
pub(crate) fn add_is_variation(
    problem: &mut LinearProblem,
    ctx: &FillerContext<'_>,
    key: &RaKey,
    ra: &RangeAction,
) -> Result<VariableHandle, OptimizationError> {
    let absolute = problem.variable(&VariableKey::AbsoluteVariation(key.clone()))?;
    let is_variation = problem.add_variable(
        VariableKey::IsVariation(key.clone()),
        VariableKind::Binary,
        0.0,
        1.0,
    )?;
    let (min, max) = ctx.admissible_range(ra)?;
    let constraint = problem.add_constraint(
        ConstraintKey::IsVariation(key.clone()),
        f64::NEG_INFINITY,
        activation_relaxation(ctx, ra),
    )?;
    problem.set_coefficient(constraint, absolute, 1.0)?;
    problem.set_coefficient(constraint, is_variation, -(max - min + EPSILON))?;
    Ok(is_variation)
}

/// Flow of a CNEC converted to the objective unit is `factor * flow`.
pub(crate) fn unit_factor(ctx: &FillerContext<'_>, cnec: &rao_core::FlowCnec) -> f64 {
    match ctx.parameters.objective_function.unit {
        rao_core::Unit::Ampere => 1000.0 / (3f64.sqrt() * cnec.nominal_voltage_kv),
        _ => 1.0,
    }
}
