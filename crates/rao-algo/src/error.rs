//! Error taxonomy of the optimization engine.
//!
//! Every failure that happens inside one leaf evaluation is an
//! [`OptimizationError`]; the search tree turns it into a rejected leaf and
//! keeps exploring. Only configuration and input errors reach the caller as
//! [`RaoError`].

use rao_core::RaoError;
use thiserror::Error;

/// Misuse of the linear problem model. These indicate a filler bug or an
/// ordering problem, never a property of the grid.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinearProblemError {
    #[error("Variable {0} requested before creation")]
    MissingVariable(String),

    #[error("Constraint {0} requested before creation")]
    MissingConstraint(String),

    #[error("Invalid bounds [{lb}, {ub}] for {key}")]
    InvalidBounds { key: String, lb: f64, ub: f64 },

    #[error("Invalid coefficient {value} for {key}")]
    InvalidCoefficient { key: String, value: f64 },

    #[error("Linear problem has not been solved successfully")]
    NotSolved,
}

/// Leaf-local failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizationError {
    /// A filler could not add a required variable or constraint
    #[error("Model build error: {0}")]
    ModelBuild(String),

    /// The LP/MIP has no feasible point
    #[error("Solver found the problem infeasible")]
    SolverInfeasible,

    /// Numerical failure or unbounded problem
    #[error("Solver failure: {0}")]
    SolverAbnormal(String),

    /// The external sensitivity computation failed
    #[error("Sensitivity analysis failed: {0}")]
    SensitivityFailure(String),
}

impl From<LinearProblemError> for OptimizationError {
    fn from(err: LinearProblemError) -> Self {
        OptimizationError::ModelBuild(err.to_string())
    }
}

impl From<RaoError> for OptimizationError {
    fn from(err: RaoError) -> Self {
        OptimizationError::ModelBuild(err.to_string())
    }
}

impl From<OptimizationError> for RaoError {
    fn from(err: OptimizationError) -> Self {
        RaoError::Optimization(err.to_string())
    }
}
