//! # rao-algo: Remedial Action Optimization
//!
//! This crate decides which remedial actions to activate, and at which
//! states, to keep the monitored elements of a grid within their limits
//! while maximizing the worst margin or minimizing the cost of the actions.
//!
//! ## Architecture
//!
//! | Layer | Role |
//! |-------|------|
//! | [`rao::Rao`] | Preventive, auto and curative perimeters, second preventive pass, merge |
//! | [`search_tree::SearchTree`] | Combinations of network actions, leaves evaluated in parallel |
//! | [`linear_optimizer::IteratingLinearOptimizer`] | Range-action setpoints, re-linearized at every iteration |
//! | [`fillers`] | Variables and constraints contributed to the linear problem |
//! | [`linear_problem::LinearProblem`] | Keyed LP/MIP model over `good_lp` backends |
//!
//! Grid physics stay outside: a [`sensitivity::SensitivityComputer`] returns
//! reference flows and sensitivities around an operating point, and
//! [`sensitivity::LinearSystemModel`] implements it over explicit
//! coefficients.
//!
//! ## Objective
//!
//! - [`parameters::ObjectiveFunctionType::MaxMinMargin`]: maximize the smallest margin
//! - [`parameters::ObjectiveFunctionType::MaxMinRelativeMargin`]: same, divided by the zonal PTDF sum
//! - [`parameters::ObjectiveFunctionType::MinCost`]: secure the network at the lowest activation cost
//!
//! Virtual costs (MNEC degradation, voltage and angle violations, diverged
//! load flows) are added on top, see [`objective`].
//!
//! ## Example
//!
//! ```ignore
//! use rao_algo::{LinearSystemModel, Rao, RaoParameters};
//!
//! let parameters = RaoParameters::load("rao.toml")?;
//! let sensitivity = LinearSystemModel::new()
//!     .with_reference_flow("cnec", 1020.0)
//!     .with_sensitivity("cnec", "pst", -10.0);
//!
//! let result = Rao::new(&crac, &parameters, &sensitivity).run()?;
//! println!("Secure: {}", result.is_secure());
//! ```

pub mod error;
pub mod fillers;
pub mod linear_optimizer;
pub mod linear_problem;
pub mod logging;
pub mod objective;
pub mod parameters;
pub mod perimeter;
pub mod rao;
pub mod result;
pub mod search_tree;
pub mod sensitivity;
pub mod test_utils;

pub use error::{LinearProblemError, OptimizationError};
pub use linear_optimizer::{
    IteratingLinearOptimizer, LinearOptimizationResult, LinearOptimizationStatus,
    LinearOptimizerInput,
};
pub use linear_problem::{LinearProblem, LpSolverKind, LpStatus};
pub use logging::init_logging;
pub use objective::{ObjectiveFunction, ObjectiveFunctionResult};
pub use parameters::{ObjectiveFunctionType, PstModel, RaoParameters, StopCriterion};
pub use perimeter::OptimizationPerimeter;
pub use rao::Rao;
pub use result::{
    RangeActionActivationResult, RangeActionSetpointResult, RaoResult, RaoStatus, StateResult,
};
pub use search_tree::{Leaf, LeafStatus, SearchTree, SearchTreeInput, SearchTreeResult};
pub use sensitivity::{
    ComputationStatus, LinearSystemModel, MultiTimestampSensitivity, SensitivityComputer,
    SensitivityRequest, SensitivitySnapshot,
};
