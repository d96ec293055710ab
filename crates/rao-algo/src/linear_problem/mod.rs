//! Solver-independent linear problem with domain-keyed variables and constraints.
//!
//! Variables and constraints are identified by [`VariableKey`] and
//! [`ConstraintKey`] and referred to through copyable handles. Adding an
//! element that already exists returns the existing handle (bounds are reset
//! and, for constraints, coefficients cleared), which makes fillers idempotent.
//! Looking up an element that was never added is an error: it always means a
//! filler ran out of order or forgot a variable.
//!
//! The model is rebuilt into a `good_lp` problem at every [`LinearProblem::solve`],
//! so coefficients can be updated freely between solves.

mod backend;
mod keys;

pub use backend::LpSolverKind;
pub use keys::{BoundSide, ConstraintKey, RaKey, VariableKey};

use indexmap::IndexMap;

use crate::error::LinearProblemError;

/// Values closer to zero than this are treated as zero (variations,
/// activations, solver round-off).
pub const EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Continuous,
    Integer,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintHandle(usize);

/// Outcome of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unbounded,
    Abnormal,
}

impl LpStatus {
    /// Whether variable values can be read.
    pub fn is_ok(&self) -> bool {
        matches!(self, LpStatus::Optimal | LpStatus::Feasible)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VariableData {
    pub(crate) kind: VariableKind,
    pub(crate) lb: f64,
    pub(crate) ub: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct ConstraintData {
    pub(crate) lb: f64,
    pub(crate) ub: f64,
    pub(crate) coefficients: IndexMap<usize, f64>,
}

/// An LP/MIP owned by one leaf evaluation.
#[derive(Debug, Clone)]
pub struct LinearProblem {
    variables: IndexMap<VariableKey, VariableData>,
    constraints: IndexMap<ConstraintKey, ConstraintData>,
    objective: IndexMap<usize, f64>,
    solver: LpSolverKind,
    status: Option<LpStatus>,
    values: Vec<f64>,
}

fn check_bounds(key: &dyn std::fmt::Display, lb: f64, ub: f64) -> Result<(), LinearProblemError> {
    if lb.is_nan() || ub.is_nan() || lb > ub {
        return Err(LinearProblemError::InvalidBounds {
            key: key.to_string(),
            lb,
            ub,
        });
    }
    Ok(())
}

impl LinearProblem {
    pub fn new(solver: LpSolverKind) -> Self {
        Self {
            variables: IndexMap::new(),
            constraints: IndexMap::new(),
            objective: IndexMap::new(),
            solver,
            status: None,
            values: Vec::new(),
        }
    }

    pub fn solver(&self) -> LpSolverKind {
        self.solver
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Create a variable, or reset the bounds and kind of an existing one.
    pub fn add_variable(
        &mut self,
        key: VariableKey,
        kind: VariableKind,
        lb: f64,
        ub: f64,
    ) -> Result<VariableHandle, LinearProblemError> {
        check_bounds(&key, lb, ub)?;
        let data = VariableData { kind, lb, ub };
        let (index, _) = self.variables.insert_full(key, data);
        Ok(VariableHandle(index))
    }

    pub fn variable(&self, key: &VariableKey) -> Result<VariableHandle, LinearProblemError> {
        self.variables
            .get_index_of(key)
            .map(VariableHandle)
            .ok_or_else(|| LinearProblemError::MissingVariable(key.to_string()))
    }

    pub fn has_variable(&self, key: &VariableKey) -> bool {
        self.variables.contains_key(key)
    }

    pub fn variable_key(&self, handle: VariableHandle) -> Option<&VariableKey> {
        self.variables.get_index(handle.0).map(|(k, _)| k)
    }

    pub fn variable_bounds(&self, handle: VariableHandle) -> Result<(f64, f64), LinearProblemError> {
        self.variables
            .get_index(handle.0)
            .map(|(_, v)| (v.lb, v.ub))
            .ok_or_else(|| LinearProblemError::MissingVariable(format!("#{}", handle.0)))
    }

    pub fn set_variable_bounds(
        &mut self,
        handle: VariableHandle,
        lb: f64,
        ub: f64,
    ) -> Result<(), LinearProblemError> {
        let (key, data) = self
            .variables
            .get_index_mut(handle.0)
            .ok_or_else(|| LinearProblemError::MissingVariable(format!("#{}", handle.0)))?;
        check_bounds(key, lb, ub)?;
        data.lb = lb;
        data.ub = ub;
        Ok(())
    }

    /// Create a constraint `lb <= sum(coef * var) <= ub`, or reset an existing
    /// one (bounds replaced, coefficients cleared).
    pub fn add_constraint(
        &mut self,
        key: ConstraintKey,
        lb: f64,
        ub: f64,
    ) -> Result<ConstraintHandle, LinearProblemError> {
        check_bounds(&key, lb, ub)?;
        let data = ConstraintData {
            lb,
            ub,
            coefficients: IndexMap::new(),
        };
        let (index, _) = self.constraints.insert_full(key, data);
        Ok(ConstraintHandle(index))
    }

    pub fn constraint(&self, key: &ConstraintKey) -> Result<ConstraintHandle, LinearProblemError> {
        self.constraints
            .get_index_of(key)
            .map(ConstraintHandle)
            .ok_or_else(|| LinearProblemError::MissingConstraint(key.to_string()))
    }

    pub fn has_constraint(&self, key: &ConstraintKey) -> bool {
        self.constraints.contains_key(key)
    }

    fn constraint_data_mut(
        &mut self,
        handle: ConstraintHandle,
    ) -> Result<(&ConstraintKey, &mut ConstraintData), LinearProblemError> {
        self.constraints
            .get_index_mut(handle.0)
            .ok_or_else(|| LinearProblemError::MissingConstraint(format!("#{}", handle.0)))
    }

    pub fn set_coefficient(
        &mut self,
        constraint: ConstraintHandle,
        variable: VariableHandle,
        value: f64,
    ) -> Result<(), LinearProblemError> {
        if variable.0 >= self.variables.len() {
            return Err(LinearProblemError::MissingVariable(format!("#{}", variable.0)));
        }
        let (key, data) = self.constraint_data_mut(constraint)?;
        if !value.is_finite() {
            return Err(LinearProblemError::InvalidCoefficient {
                key: key.to_string(),
                value,
            });
        }
        data.coefficients.insert(variable.0, value);
        Ok(())
    }

    pub fn coefficient(&self, constraint: ConstraintHandle, variable: VariableHandle) -> f64 {
        self.constraints
            .get_index(constraint.0)
            .and_then(|(_, c)| c.coefficients.get(&variable.0))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn constraint_bounds(
        &self,
        handle: ConstraintHandle,
    ) -> Result<(f64, f64), LinearProblemError> {
        self.constraints
            .get_index(handle.0)
            .map(|(_, c)| (c.lb, c.ub))
            .ok_or_else(|| LinearProblemError::MissingConstraint(format!("#{}", handle.0)))
    }

    pub fn set_constraint_bounds(
        &mut self,
        handle: ConstraintHandle,
        lb: f64,
        ub: f64,
    ) -> Result<(), LinearProblemError> {
        let (key, data) = self.constraint_data_mut(handle)?;
        check_bounds(key, lb, ub)?;
        data.lb = lb;
        data.ub = ub;
        Ok(())
    }

    /// Set the coefficient of a variable in the (minimized) objective.
    pub fn set_objective_coefficient(
        &mut self,
        variable: VariableHandle,
        value: f64,
    ) -> Result<(), LinearProblemError> {
        let Some((key, _)) = self.variables.get_index(variable.0) else {
            return Err(LinearProblemError::MissingVariable(format!("#{}", variable.0)));
        };
        if !value.is_finite() {
            return Err(LinearProblemError::InvalidCoefficient {
                key: key.to_string(),
                value,
            });
        }
        self.objective.insert(variable.0, value);
        Ok(())
    }

    pub fn objective_coefficient(&self, variable: VariableHandle) -> f64 {
        self.objective.get(&variable.0).copied().unwrap_or(0.0)
    }

    /// Solve the problem with the configured backend.
    pub fn solve(&mut self) -> LpStatus {
        let status = match backend::solve(self) {
            Ok(values) => {
                self.values = values;
                LpStatus::Optimal
            }
            Err(status) => {
                self.values.clear();
                status
            }
        };
        self.status = Some(status);
        status
    }

    /// Status of the last solve, `None` before the first one.
    pub fn status(&self) -> Option<LpStatus> {
        self.status
    }

    /// Value of a variable in the last successful solution.
    pub fn value(&self, variable: VariableHandle) -> Result<f64, LinearProblemError> {
        match self.status {
            Some(status) if status.is_ok() => self
                .values
                .get(variable.0)
                .copied()
                .ok_or_else(|| LinearProblemError::MissingVariable(format!("#{}", variable.0))),
            _ => Err(LinearProblemError::NotSolved),
        }
    }

    /// Value of the variable identified by `key` in the last solution.
    pub fn value_of(&self, key: &VariableKey) -> Result<f64, LinearProblemError> {
        self.value(self.variable(key)?)
    }

    pub fn objective_value(&self) -> Result<f64, LinearProblemError> {
        match self.status {
            Some(status) if status.is_ok() => Ok(self
                .objective
                .iter()
                .map(|(index, coef)| coef * self.values.get(*index).copied().unwrap_or(0.0))
                .sum()),
            _ => Err(LinearProblemError::NotSolved),
        }
    }

    pub(crate) fn variables_data(&self) -> impl Iterator<Item = (&VariableKey, &VariableData)> {
        self.variables.iter()
    }

    pub(crate) fn constraints_data(
        &self,
    ) -> impl Iterator<Item = (&ConstraintKey, &ConstraintData)> {
        self.constraints.iter()
    }

    pub(crate) fn objective_data(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.objective.iter().map(|(i, c)| (*i, *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::StateId;

    fn ra_key() -> RaKey {
        RaKey::new("pst", StateId::new("preventive"))
    }

    #[test]
    fn test_missing_handles_fail_loudly() {
        let problem = LinearProblem::new(LpSolverKind::Microlp);
        let err = problem
            .variable(&VariableKey::Setpoint(ra_key()))
            .unwrap_err();
        assert!(matches!(err, LinearProblemError::MissingVariable(_)));
        assert!(err.to_string().contains("setpoint(pst, preventive)"));
        assert!(problem
            .constraint(&ConstraintKey::Flow { cnec: "c".into() })
            .is_err());
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        let a = problem
            .add_variable(VariableKey::Setpoint(ra_key()), VariableKind::Continuous, -1.0, 1.0)
            .unwrap();
        let b = problem
            .add_variable(VariableKey::Setpoint(ra_key()), VariableKind::Continuous, -2.0, 2.0)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(problem.num_variables(), 1);
        assert_eq!(problem.variable_bounds(a).unwrap(), (-2.0, 2.0));

        let c = problem
            .add_constraint(ConstraintKey::Flow { cnec: "c".into() }, 0.0, 0.0)
            .unwrap();
        problem.set_coefficient(c, a, 3.0).unwrap();
        let c2 = problem
            .add_constraint(ConstraintKey::Flow { cnec: "c".into() }, 1.0, 1.0)
            .unwrap();
        assert_eq!(c, c2);
        assert_eq!(problem.coefficient(c, a), 0.0);
        assert_eq!(problem.num_constraints(), 1);
    }

    #[test]
    fn test_invalid_bounds_and_coefficients() {
        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        assert!(matches!(
            problem.add_variable(VariableKey::MinimumMargin, VariableKind::Continuous, 2.0, 1.0),
            Err(LinearProblemError::InvalidBounds { .. })
        ));
        let v = problem
            .add_variable(VariableKey::MinimumMargin, VariableKind::Continuous, 0.0, 1.0)
            .unwrap();
        assert!(problem.set_objective_coefficient(v, f64::NAN).is_err());
    }

    #[test]
    fn test_values_require_a_solve() {
        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        let v = problem
            .add_variable(VariableKey::MinimumMargin, VariableKind::Continuous, 0.0, 10.0)
            .unwrap();
        assert_eq!(problem.value(v), Err(LinearProblemError::NotSolved));
        problem.set_objective_coefficient(v, -1.0).unwrap();
        assert_eq!(problem.solve(), LpStatus::Optimal);
        assert!((problem.value(v).unwrap() - 10.0).abs() < 1e-6);
        assert!((problem.objective_value().unwrap() + 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_constraints_and_binaries() {
        // maximize x + y with x + y <= 1.5, y binary
        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        let x = problem
            .add_variable(VariableKey::MinimumMargin, VariableKind::Continuous, 0.0, 1.0)
            .unwrap();
        let y = problem
            .add_variable(VariableKey::MarginSignBinary, VariableKind::Binary, 0.0, 1.0)
            .unwrap();
        let c = problem
            .add_constraint(ConstraintKey::MarginSign, f64::NEG_INFINITY, 1.5)
            .unwrap();
        problem.set_coefficient(c, x, 1.0).unwrap();
        problem.set_coefficient(c, y, 1.0).unwrap();
        problem.set_objective_coefficient(x, -1.0).unwrap();
        problem.set_objective_coefficient(y, -2.0).unwrap();
        assert!(problem.solve().is_ok());
        assert!((problem.value(y).unwrap() - 1.0).abs() < 1e-6);
        assert!((problem.value(x).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_problem() {
        let mut problem = LinearProblem::new(LpSolverKind::Microlp);
        let x = problem
            .add_variable(VariableKey::MinimumMargin, VariableKind::Continuous, 0.0, 1.0)
            .unwrap();
        let c = problem
            .add_constraint(ConstraintKey::MarginSign, 2.0, f64::INFINITY)
            .unwrap();
        problem.set_coefficient(c, x, 1.0).unwrap();
        assert_eq!(problem.solve(), LpStatus::Infeasible);
        assert_eq!(problem.value(x), Err(LinearProblemError::NotSolved));
    }
}
