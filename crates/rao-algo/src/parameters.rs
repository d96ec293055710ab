//! Optimization parameters.
//!
//! [`RaoParameters`] is a tree of serde sections, every one of them with
//! `#[serde(default)]`, so a partial TOML file only overrides what it names.
//!
//! ```toml
//! [objective_function]
//! objective_type = "min_cost"
//!
//! [range_actions_optimization]
//! pst_model = "approximated_integers"
//!
//! [range_actions_optimization.linear_optimization_solver]
//! solver = "microlp"
//!
//! [ra_usage_limits_per_instant.curative]
//! max_ra = 3
//! max_ra_per_tso = { FR = 1 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use rao_core::{RaoError, RaoResult, Unit};
use serde::{Deserialize, Serialize};

use crate::linear_problem::LpSolverKind;

/// Objective of every leaf optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveFunctionType {
    /// Maximize the smallest margin
    MaxMinMargin,
    /// Maximize the smallest margin divided by the zonal PTDF sum
    MaxMinRelativeMargin,
    /// Secure the network at the lowest remedial-action cost
    MinCost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCriterion {
    /// Explore the whole tree looking for the best cost
    MinObjective,
    /// Stop as soon as every margin is positive
    Secure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveFunctionParameters {
    pub objective_type: ObjectiveFunctionType,
    /// Unit in which margins are evaluated (MW or A)
    pub unit: Unit,
    pub preventive_stop_criterion: StopCriterion,
    pub curative_stop_criterion: StopCriterion,
    /// Curative optimization only keeps a result improving the preventive
    /// cost of the state by at least this much
    pub curative_min_obj_improvement: f64,
    /// Keep curative actions that secure their state even when they improve
    /// the cost by less than `curative_min_obj_improvement`
    pub enforce_curative_security: bool,
    /// Virtual cost added when the load flow of a state diverges
    pub sensitivity_failure_overcost: f64,
    /// Virtual cost per kV outside voltage thresholds
    pub voltage_violation_cost: f64,
    /// Virtual cost per degree outside angle thresholds
    pub angle_violation_cost: f64,
}

impl Default for ObjectiveFunctionParameters {
    fn default() -> Self {
        Self {
            objective_type: ObjectiveFunctionType::MaxMinMargin,
            unit: Unit::Megawatt,
            preventive_stop_criterion: StopCriterion::MinObjective,
            curative_stop_criterion: StopCriterion::MinObjective,
            curative_min_obj_improvement: 0.0,
            enforce_curative_security: false,
            sensitivity_failure_overcost: 10000.0,
            voltage_violation_cost: 1000.0,
            angle_violation_cost: 1000.0,
        }
    }
}

/// How PST taps enter the linear problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PstModel {
    /// Angle is continuous, rounded to the closest tap after each solve
    Continuous,
    /// Taps are integer variables linearized around the current tap
    ApproximatedIntegers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaRangeShrinking {
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearOptimizationSolverParameters {
    /// Backend name, parsed into [`LpSolverKind`]
    pub solver: String,
}

impl Default for LinearOptimizationSolverParameters {
    fn default() -> Self {
        Self {
            solver: "microlp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeActionsOptimizationParameters {
    /// Outer iterations (solve, then sensitivity refresh) per leaf
    pub max_iterations: usize,
    /// Inner re-solves while PST taps are re-linearized
    pub max_mip_iterations: usize,
    pub pst_penalty_cost: f64,
    pub pst_sensitivity_threshold: f64,
    pub hvdc_penalty_cost: f64,
    pub hvdc_sensitivity_threshold: f64,
    pub injection_penalty_cost: f64,
    pub injection_sensitivity_threshold: f64,
    pub pst_model: PstModel,
    /// Share of one tap's angle step allowed as slack on the activation
    /// binary when taps are approximated
    pub pst_relaxation_ratio: f64,
    pub ra_range_shrinking: RaRangeShrinking,
    pub range_shrink_ratio: f64,
    /// Cost decrease below which an iteration is not considered better
    pub min_iteration_improvement: f64,
    pub linear_optimization_solver: LinearOptimizationSolverParameters,
}

impl Default for RangeActionsOptimizationParameters {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_mip_iterations: 10,
            pst_penalty_cost: 0.01,
            pst_sensitivity_threshold: 1e-6,
            hvdc_penalty_cost: 0.001,
            hvdc_sensitivity_threshold: 1e-6,
            injection_penalty_cost: 0.001,
            injection_sensitivity_threshold: 1e-6,
            pst_model: PstModel::Continuous,
            pst_relaxation_ratio: 0.3,
            ra_range_shrinking: RaRangeShrinking::Disabled,
            range_shrink_ratio: 0.667,
            min_iteration_improvement: 1e-6,
            linear_optimization_solver: LinearOptimizationSolverParameters::default(),
        }
    }
}

impl RangeActionsOptimizationParameters {
    pub fn solver_kind(&self) -> RaoResult<LpSolverKind> {
        self.linear_optimization_solver
            .solver
            .parse::<LpSolverKind>()
            .map_err(|e| RaoError::Config(e.to_string()))
    }

    /// Penalty cost per unit of variation for a range action kind.
    pub fn penalty_cost(&self, kind_label: &str) -> f64 {
        match kind_label {
            "pst" => self.pst_penalty_cost,
            "hvdc" => self.hvdc_penalty_cost,
            _ => self.injection_penalty_cost,
        }
    }

    pub fn sensitivity_threshold(&self, kind_label: &str) -> f64 {
        match kind_label {
            "pst" => self.pst_sensitivity_threshold,
            "hvdc" => self.hvdc_sensitivity_threshold,
            _ => self.injection_sensitivity_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoOptimizationParameters {
    pub max_preventive_search_tree_depth: usize,
    pub max_curative_search_tree_depth: usize,
    /// Minimum relative cost improvement for a deeper leaf to be kept
    pub relative_min_impact_threshold: f64,
    /// Minimum absolute cost improvement for a deeper leaf to be kept
    pub absolute_min_impact_threshold: f64,
    /// Network actions whose estimated impact on the most limiting element is
    /// below this value never generate a leaf (0 disables pruning)
    pub network_action_min_impact_threshold: f64,
    /// Best leaves expanded at each depth
    pub leaves_kept_per_depth: usize,
    /// Combinations of network action ids tried as a single child
    pub predefined_combinations: Vec<Vec<String>>,
    /// Global wall-clock budget
    pub max_duration_seconds: Option<f64>,
}

impl Default for TopoOptimizationParameters {
    fn default() -> Self {
        Self {
            max_preventive_search_tree_depth: 2,
            max_curative_search_tree_depth: 2,
            relative_min_impact_threshold: 0.0,
            absolute_min_impact_threshold: 0.0,
            network_action_min_impact_threshold: 0.0,
            leaves_kept_per_depth: 1,
            predefined_combinations: Vec::new(),
            max_duration_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultithreadingParameters {
    pub contingency_scenarios_in_parallel: usize,
    pub preventive_leaves_in_parallel: usize,
    pub curative_leaves_in_parallel: usize,
}

impl Default for MultithreadingParameters {
    fn default() -> Self {
        Self {
            contingency_scenarios_in_parallel: 1,
            preventive_leaves_in_parallel: 1,
            curative_leaves_in_parallel: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondPreventiveExecutionCondition {
    Disabled,
    /// Run whenever at least one curative perimeter stays unsecure
    IfCurativeUnsecure,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondPreventiveRaoParameters {
    pub execution_condition: SecondPreventiveExecutionCondition,
    /// Start the second preventive tree from the first preventive network actions
    pub hint_from_first_preventive_rao: bool,
}

impl Default for SecondPreventiveRaoParameters {
    fn default() -> Self {
        Self {
            execution_condition: SecondPreventiveExecutionCondition::Disabled,
            hint_from_first_preventive_rao: true,
        }
    }
}

/// Remedial action usage limits at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaUsageLimits {
    pub max_ra: Option<usize>,
    pub max_tso: Option<usize>,
    pub max_topo_per_tso: BTreeMap<String, usize>,
    pub max_pst_per_tso: BTreeMap<String, usize>,
    pub max_ra_per_tso: BTreeMap<String, usize>,
}

impl RaUsageLimits {
    pub fn is_unlimited(&self) -> bool {
        self.max_ra.is_none()
            && self.max_tso.is_none()
            && self.max_topo_per_tso.is_empty()
            && self.max_pst_per_tso.is_empty()
            && self.max_ra_per_tso.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MnecParameters {
    /// Margin (MW) an MNEC may lose compared to its initial value
    pub acceptable_margin_decrease: f64,
    /// Virtual cost per MW of MNEC violation
    pub violation_cost: f64,
    pub constraint_adjustment_coefficient: f64,
}

impl Default for MnecParameters {
    fn default() -> Self {
        Self {
            acceptable_margin_decrease: 50.0,
            violation_cost: 10.0,
            constraint_adjustment_coefficient: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativeMarginsParameters {
    pub ptdf_boundaries: Vec<String>,
    pub ptdf_sum_lower_bound: f64,
}

impl Default for RelativeMarginsParameters {
    fn default() -> Self {
        Self {
            ptdf_boundaries: Vec::new(),
            ptdf_sum_lower_bound: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotOptimizedCnecsParameters {
    /// In curative perimeters, CNECs of operators without curative actions
    /// are only kept from degrading instead of being optimized
    pub do_not_optimize_curative_cnecs_for_tsos_without_cras: bool,
}

/// Coupling between consecutive timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterTemporalParameters {
    /// Largest setpoint change between two consecutive timestamps, keyed by
    /// the network element of the range actions
    pub max_setpoint_gradient: BTreeMap<String, f64>,
}

/// All parameters of an optimization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaoParameters {
    pub objective_function: ObjectiveFunctionParameters,
    pub range_actions_optimization: RangeActionsOptimizationParameters,
    pub topo_optimization: TopoOptimizationParameters,
    pub multithreading: MultithreadingParameters,
    pub second_preventive_rao: SecondPreventiveRaoParameters,
    /// Keyed by instant id
    pub ra_usage_limits_per_instant: BTreeMap<String, RaUsageLimits>,
    pub mnec: MnecParameters,
    pub relative_margins: RelativeMarginsParameters,
    pub not_optimized_cnecs: NotOptimizedCnecsParameters,
    pub inter_temporal: InterTemporalParameters,
}

impl RaoParameters {
    /// Parse and validate parameters from a TOML string.
    pub fn from_toml_str(content: &str) -> RaoResult<Self> {
        let params: RaoParameters = toml::from_str(content)?;
        params.validate()?;
        Ok(params)
    }

    /// Load parameters from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading parameters from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing parameters from {}", path.display()))
    }

    pub fn to_toml_string(&self) -> RaoResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn usage_limits(&self, instant: &str) -> Option<&RaUsageLimits> {
        self.ra_usage_limits_per_instant.get(instant)
    }

    pub fn validate(&self) -> RaoResult<()> {
        let ra = &self.range_actions_optimization;
        if ra.max_iterations == 0 {
            return Err(RaoError::Config("max_iterations must be at least 1".into()));
        }
        for (name, value) in [
            ("pst_penalty_cost", ra.pst_penalty_cost),
            ("hvdc_penalty_cost", ra.hvdc_penalty_cost),
            ("injection_penalty_cost", ra.injection_penalty_cost),
            ("pst_sensitivity_threshold", ra.pst_sensitivity_threshold),
            ("hvdc_sensitivity_threshold", ra.hvdc_sensitivity_threshold),
            (
                "injection_sensitivity_threshold",
                ra.injection_sensitivity_threshold,
            ),
            ("pst_relaxation_ratio", ra.pst_relaxation_ratio),
            ("min_iteration_improvement", ra.min_iteration_improvement),
            (
                "absolute_min_impact_threshold",
                self.topo_optimization.absolute_min_impact_threshold,
            ),
            (
                "relative_min_impact_threshold",
                self.topo_optimization.relative_min_impact_threshold,
            ),
            (
                "network_action_min_impact_threshold",
                self.topo_optimization.network_action_min_impact_threshold,
            ),
            (
                "acceptable_margin_decrease",
                self.mnec.acceptable_margin_decrease,
            ),
            ("violation_cost", self.mnec.violation_cost),
            (
                "curative_min_obj_improvement",
                self.objective_function.curative_min_obj_improvement,
            ),
            (
                "sensitivity_failure_overcost",
                self.objective_function.sensitivity_failure_overcost,
            ),
            (
                "voltage_violation_cost",
                self.objective_function.voltage_violation_cost,
            ),
            (
                "angle_violation_cost",
                self.objective_function.angle_violation_cost,
            ),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(RaoError::Config(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if !(ra.range_shrink_ratio > 0.0 && ra.range_shrink_ratio < 1.0) {
            return Err(RaoError::Config(format!(
                "range_shrink_ratio must be in ]0, 1[, got {}",
                ra.range_shrink_ratio
            )));
        }
        if let Some((element, gradient)) = self
            .inter_temporal
            .max_setpoint_gradient
            .iter()
            .find(|(_, g)| **g < 0.0 || !g.is_finite())
        {
            return Err(RaoError::Config(format!(
                "max_setpoint_gradient of {} must be a finite non-negative number, got {}",
                element, gradient
            )));
        }
        if self.relative_margins.ptdf_sum_lower_bound <= 0.0 {
            return Err(RaoError::Config(
                "ptdf_sum_lower_bound must be strictly positive".into(),
            ));
        }
        ra.solver_kind()?;

        let mt = &self.multithreading;
        for (name, value) in [
            (
                "contingency_scenarios_in_parallel",
                mt.contingency_scenarios_in_parallel,
            ),
            ("preventive_leaves_in_parallel", mt.preventive_leaves_in_parallel),
            ("curative_leaves_in_parallel", mt.curative_leaves_in_parallel),
            (
                "leaves_kept_per_depth",
                self.topo_optimization.leaves_kept_per_depth,
            ),
        ] {
            if value == 0 {
                return Err(RaoError::Config(format!("{} must be at least 1", name)));
            }
        }

        let topo = &self.topo_optimization;
        for depth in [
            topo.max_preventive_search_tree_depth,
            topo.max_curative_search_tree_depth,
        ] {
            if depth > MAX_SEARCH_TREE_DEPTH {
                return Err(RaoError::Config(format!(
                    "search tree depth {} exceeds the maximum of {}",
                    depth, MAX_SEARCH_TREE_DEPTH
                )));
            }
        }
        if let Some(limit) = topo.max_duration_seconds {
            if limit <= 0.0 || !limit.is_finite() {
                return Err(RaoError::Config(format!(
                    "max_duration_seconds must be positive, got {}",
                    limit
                )));
            }
        }
        if topo.predefined_combinations.iter().any(|c| c.len() < 2) {
            return Err(RaoError::Config(
                "predefined combinations must hold at least two network actions".into(),
            ));
        }
        if self.objective_function.unit != Unit::Megawatt
            && self.objective_function.unit != Unit::Ampere
        {
            return Err(RaoError::Config(format!(
                "objective unit must be MW or A, got {}",
                self.objective_function.unit
            )));
        }
        Ok(())
    }
}

/// Search trees deeper than this are refused by [`RaoParameters::validate`].
pub const MAX_SEARCH_TREE_DEPTH: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = RaoParameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(
            params.objective_function.objective_type,
            ObjectiveFunctionType::MaxMinMargin
        );
        assert_eq!(params.range_actions_optimization.pst_relaxation_ratio, 0.3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            [objective_function]
            objective_type = "min_cost"

            [range_actions_optimization]
            pst_model = "approximated_integers"

            [ra_usage_limits_per_instant.curative]
            max_ra = 3
            max_ra_per_tso = { FR = 1 }
        "#;
        let params = RaoParameters::from_toml_str(toml_str).unwrap();
        assert_eq!(
            params.objective_function.objective_type,
            ObjectiveFunctionType::MinCost
        );
        assert_eq!(
            params.range_actions_optimization.pst_model,
            PstModel::ApproximatedIntegers
        );
        assert_eq!(params.range_actions_optimization.max_iterations, 10);
        let limits = params.usage_limits("curative").unwrap();
        assert_eq!(limits.max_ra, Some(3));
        assert_eq!(limits.max_ra_per_tso.get("FR"), Some(&1));
        assert!(params.usage_limits("preventive").is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut params = RaoParameters::default();
        params.multithreading.curative_leaves_in_parallel = 0;
        assert!(matches!(params.validate(), Err(RaoError::Config(_))));

        let mut params = RaoParameters::default();
        params.range_actions_optimization.pst_penalty_cost = -1.0;
        assert!(params.validate().is_err());

        let mut params = RaoParameters::default();
        params.topo_optimization.max_curative_search_tree_depth = MAX_SEARCH_TREE_DEPTH + 1;
        assert!(params.validate().is_err());

        let mut params = RaoParameters::default();
        params.range_actions_optimization.linear_optimization_solver.solver = "gurobi".into();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut params = RaoParameters::default();
        params.topo_optimization.predefined_combinations =
            vec![vec!["open-a".into(), "open-b".into()]];
        params.ra_usage_limits_per_instant.insert(
            "preventive".into(),
            RaUsageLimits {
                max_tso: Some(2),
                ..Default::default()
            },
        );
        let text = params.to_toml_string().unwrap();
        let parsed = RaoParameters::from_toml_str(&text).unwrap();
        assert_eq!(
            parsed.topo_optimization.predefined_combinations,
            params.topo_optimization.predefined_combinations
        );
        assert_eq!(
            parsed.usage_limits("preventive").unwrap().max_tso,
            Some(2)
        );
    }
}
