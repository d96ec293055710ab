//! When a remedial action may (or must) be used.

use crate::state::{State, StateId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMethod {
    /// The optimizer may choose to activate the action
    Available,
    /// The action is applied whenever its rule matches (automatons)
    Forced,
}

/// Applicability of a remedial action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UsageRule {
    /// Usable at every state of the instant
    OnInstant { instant: String, method: UsageMethod },
    /// Usable at one post-contingency state only
    OnContingencyState {
        contingency: String,
        instant: String,
        method: UsageMethod,
    },
    /// Usable at the instant only while the CNEC is overloaded
    OnFlowConstraint {
        instant: String,
        cnec: String,
        method: UsageMethod,
    },
    /// Usable at exactly one state
    OnState {
        state: StateId,
        instant: String,
        method: UsageMethod,
    },
}

impl UsageRule {
    pub fn on_instant(instant: impl Into<String>, method: UsageMethod) -> Self {
        UsageRule::OnInstant {
            instant: instant.into(),
            method,
        }
    }

    pub fn on_contingency_state(
        contingency: impl Into<String>,
        instant: impl Into<String>,
        method: UsageMethod,
    ) -> Self {
        UsageRule::OnContingencyState {
            contingency: contingency.into(),
            instant: instant.into(),
            method,
        }
    }

    pub fn on_flow_constraint(
        instant: impl Into<String>,
        cnec: impl Into<String>,
        method: UsageMethod,
    ) -> Self {
        UsageRule::OnFlowConstraint {
            instant: instant.into(),
            cnec: cnec.into(),
            method,
        }
    }

    pub fn method(&self) -> UsageMethod {
        match self {
            UsageRule::OnInstant { method, .. }
            | UsageRule::OnContingencyState { method, .. }
            | UsageRule::OnFlowConstraint { method, .. }
            | UsageRule::OnState { method, .. } => *method,
        }
    }

    pub fn instant(&self) -> &str {
        match self {
            UsageRule::OnInstant { instant, .. }
            | UsageRule::OnContingencyState { instant, .. }
            | UsageRule::OnFlowConstraint { instant, .. }
            | UsageRule::OnState { instant, .. } => instant,
        }
    }

    /// Usage method of the rule at `state`, if the rule matches.
    ///
    /// `overloaded_cnecs` holds the CNECs currently having a negative margin;
    /// flow-constraint rules only match when their CNEC is part of it.
    pub fn usage_method(
        &self,
        state: &State,
        overloaded_cnecs: &BTreeSet<String>,
    ) -> Option<UsageMethod> {
        if state.instant().id != self.instant() {
            return None;
        }
        let matches = match self {
            UsageRule::OnInstant { .. } => true,
            UsageRule::OnContingencyState { contingency, .. } => {
                state.contingency() == Some(contingency.as_str())
            }
            UsageRule::OnFlowConstraint { cnec, .. } => overloaded_cnecs.contains(cnec),
            UsageRule::OnState { state: id, .. } => state.id() == id,
        };
        matches.then(|| self.method())
    }
}

/// Strongest usage method among all matching rules (`Forced` wins).
pub fn resolve_usage_method(
    rules: &[UsageRule],
    state: &State,
    overloaded_cnecs: &BTreeSet<String>,
) -> Option<UsageMethod> {
    rules
        .iter()
        .filter_map(|rule| rule.usage_method(state, overloaded_cnecs))
        .max()
}
