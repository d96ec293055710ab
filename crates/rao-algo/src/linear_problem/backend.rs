use std::str::FromStr;

use anyhow::anyhow;
#[cfg(feature = "solver-clarabel")]
use good_lp::solvers::clarabel::clarabel as clarabel_solver;
#[cfg(feature = "solver-highs")]
use good_lp::solvers::highs::highs as highs_solver;
use good_lp::solvers::microlp::microlp as microlp_solver;
use good_lp::{
    constraint, variable, Constraint, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{LinearProblem, LpStatus, VariableKind};

/// Backend used to solve linear problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LpSolverKind {
    #[default]
    Microlp,
    #[cfg(feature = "solver-clarabel")]
    Clarabel,
    #[cfg(feature = "solver-highs")]
    Highs,
}

impl LpSolverKind {
    pub fn available() -> &'static [&'static str] {
        AVAILABLE_LP_SOLVERS
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LpSolverKind::Microlp => "microlp",
            #[cfg(feature = "solver-clarabel")]
            LpSolverKind::Clarabel => "clarabel",
            #[cfg(feature = "solver-highs")]
            LpSolverKind::Highs => "highs",
        }
    }

    /// Whether integer and binary variables are honoured. Conic solvers
    /// only see the continuous relaxation.
    pub fn supports_integers(&self) -> bool {
        match self {
            LpSolverKind::Microlp => true,
            #[cfg(feature = "solver-clarabel")]
            LpSolverKind::Clarabel => false,
            #[cfg(feature = "solver-highs")]
            LpSolverKind::Highs => true,
        }
    }
}

const AVAILABLE_LP_SOLVERS: &[&str] = &[
    "microlp",
    #[cfg(feature = "solver-clarabel")]
    "clarabel",
    #[cfg(feature = "solver-highs")]
    "highs",
];

fn unknown_solver_error(label: &str) -> anyhow::Error {
    anyhow!(
        "unknown lp solver '{}'; supported values: {}",
        label,
        LpSolverKind::available().join(", ")
    )
}

impl FromStr for LpSolverKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.to_ascii_lowercase();
        match normalized.as_str() {
            "microlp" => Ok(LpSolverKind::Microlp),
            "clarabel" => {
                #[cfg(feature = "solver-clarabel")]
                {
                    Ok(LpSolverKind::Clarabel)
                }
                #[cfg(not(feature = "solver-clarabel"))]
                {
                    Err(unknown_solver_error(&normalized))
                }
            }
            "highs" => {
                #[cfg(feature = "solver-highs")]
                {
                    Ok(LpSolverKind::Highs)
                }
                #[cfg(not(feature = "solver-highs"))]
                {
                    Err(unknown_solver_error(&normalized))
                }
            }
            other => Err(unknown_solver_error(other)),
        }
    }
}

/// Translate the problem into `good_lp`, solve it and return one value per
/// variable, in handle order.
pub(super) fn solve(problem: &LinearProblem) -> Result<Vec<f64>, LpStatus> {
    let solver = problem.solver();
    let mut vars = ProblemVariables::new();
    let mut handles: Vec<Variable> = Vec::with_capacity(problem.num_variables());
    let mut relaxed = 0usize;
    for (_, data) in problem.variables_data() {
        let mut definition = variable();
        if data.lb.is_finite() {
            definition = definition.min(data.lb);
        }
        if data.ub.is_finite() {
            definition = definition.max(data.ub);
        }
        match data.kind {
            VariableKind::Continuous => {}
            _ if !solver.supports_integers() => relaxed += 1,
            VariableKind::Integer => definition = definition.integer(),
            VariableKind::Binary => definition = definition.binary(),
        }
        handles.push(vars.add(definition));
    }
    if relaxed > 0 {
        warn!(
            solver = solver.as_str(),
            relaxed, "solver does not support integer variables, solving the relaxation"
        );
    }

    let mut objective = Expression::from(0.0);
    for (index, coef) in problem.objective_data() {
        objective += coef * handles[index];
    }

    let mut constraints: Vec<Constraint> = Vec::with_capacity(problem.num_constraints());
    for (_, data) in problem.constraints_data() {
        let mut expr = Expression::from(0.0);
        for (index, coef) in &data.coefficients {
            expr += *coef * handles[*index];
        }
        let (lb, ub) = (data.lb, data.ub);
        if lb == ub {
            constraints.push(constraint!(expr == lb));
            continue;
        }
        if lb.is_finite() {
            constraints.push(constraint!(expr.clone() >= lb));
        }
        if ub.is_finite() {
            constraints.push(constraint!(expr <= ub));
        }
    }

    let unsolved = vars.minimise(objective);
    match solver {
        LpSolverKind::Microlp => run(unsolved.using(microlp_solver), constraints, &handles),
        #[cfg(feature = "solver-clarabel")]
        LpSolverKind::Clarabel => run(unsolved.using(clarabel_solver), constraints, &handles),
        #[cfg(feature = "solver-highs")]
        LpSolverKind::Highs => run(unsolved.using(highs_solver), constraints, &handles),
    }
}

fn run<M>(model: M, constraints: Vec<Constraint>, handles: &[Variable]) -> Result<Vec<f64>, LpStatus>
where
    M: SolverModel<Error = ResolutionError>,
{
    let model = constraints
        .into_iter()
        .fold(model, |model, c| model.with(c));
    match model.solve() {
        Ok(solution) => Ok(handles.iter().map(|v| solution.value(*v)).collect()),
        Err(ResolutionError::Infeasible) => Err(LpStatus::Infeasible),
        Err(ResolutionError::Unbounded) => Err(LpStatus::Unbounded),
        Err(err) => {
            warn!(error = %err, "linear solver failed");
            Err(LpStatus::Abnormal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_solver_names() {
        assert_eq!(
            "MicroLP".parse::<LpSolverKind>().unwrap(),
            LpSolverKind::Microlp
        );
        let err = "gurobi".parse::<LpSolverKind>().unwrap_err();
        assert!(err.to_string().contains("supported values: microlp"));
        assert_eq!(LpSolverKind::default().as_str(), "microlp");
        assert!(LpSolverKind::Microlp.supports_integers());
    }

    #[cfg(feature = "solver-clarabel")]
    #[test]
    fn test_clarabel_solves_relaxation() {
        use crate::linear_problem::{ConstraintKey, VariableKey};

        let mut problem = LinearProblem::new(LpSolverKind::Clarabel);
        let x = problem
            .add_variable(VariableKey::MarginSignBinary, VariableKind::Binary, 0.0, 1.0)
            .unwrap();
        let c = problem
            .add_constraint(ConstraintKey::MarginSign, f64::NEG_INFINITY, 0.5)
            .unwrap();
        problem.set_coefficient(c, x, 1.0).unwrap();
        problem.set_objective_coefficient(x, -1.0).unwrap();
        assert!(problem.solve().is_ok());
        assert!((problem.value(x).unwrap() - 0.5).abs() < 1e-4);
    }
}
