//! Sensitivity results and the external sensitivity-analysis boundary.
//!
//! A [`SensitivitySnapshot`] is the linearization of the grid around one
//! operating point: reference flows of the requested CNECs and the
//! `d flow / d setpoint` coefficients of the requested range actions. It is
//! produced by a [`SensitivityComputer`] and treated as immutable for the
//! duration of one iteration.

mod linear_system;
mod multi_timestamp;

pub use linear_system::LinearSystemModel;
pub use multi_timestamp::MultiTimestampSensitivity;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rao_core::{Crac, StateId};
use serde::{Deserialize, Serialize};

use crate::error::OptimizationError;

/// Outcome of the computation for one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputationStatus {
    Success,
    /// The load flow did not converge for this state
    Failure,
}

/// What to compute: which states and elements, around which operating point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensitivityRequest {
    pub states: Vec<StateId>,
    pub flow_cnecs: Vec<String>,
    pub voltage_cnecs: Vec<String>,
    pub angle_cnecs: Vec<String>,
    /// Range actions whose sensitivities are needed
    pub range_actions: Vec<String>,
    /// Setpoints applied on the network; actions not listed stay at their
    /// initial setpoint
    pub setpoints: BTreeMap<String, f64>,
    /// Network actions applied on the network
    pub network_actions: BTreeSet<String>,
}

/// Reference values and sensitivities around one operating point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensitivitySnapshot {
    status: BTreeMap<StateId, ComputationStatus>,
    flows: HashMap<String, f64>,
    sensitivities: HashMap<String, HashMap<String, f64>>,
    ptdf_sums: HashMap<String, f64>,
    voltages: HashMap<String, f64>,
    angles: HashMap<String, f64>,
    setpoints: BTreeMap<String, f64>,
}

impl SensitivitySnapshot {
    /// Empty snapshot computed at the given range-action setpoints.
    pub fn new(setpoints: BTreeMap<String, f64>) -> Self {
        Self {
            setpoints,
            ..Default::default()
        }
    }

    pub fn set_status(&mut self, state: StateId, status: ComputationStatus) {
        self.status.insert(state, status);
    }

    pub fn set_flow(&mut self, cnec: impl Into<String>, flow_mw: f64) {
        self.flows.insert(cnec.into(), flow_mw);
    }

    pub fn set_sensitivity(
        &mut self,
        cnec: impl Into<String>,
        range_action: impl Into<String>,
        value: f64,
    ) {
        self.sensitivities
            .entry(cnec.into())
            .or_default()
            .insert(range_action.into(), value);
    }

    pub fn set_ptdf_sum(&mut self, cnec: impl Into<String>, value: f64) {
        self.ptdf_sums.insert(cnec.into(), value);
    }

    pub fn set_voltage(&mut self, cnec: impl Into<String>, value: f64) {
        self.voltages.insert(cnec.into(), value);
    }

    pub fn set_angle(&mut self, cnec: impl Into<String>, value: f64) {
        self.angles.insert(cnec.into(), value);
    }

    /// Status of `state`; states that were not computed are `None`.
    pub fn status(&self, state: &StateId) -> Option<ComputationStatus> {
        self.status.get(state).copied()
    }

    pub fn failed_states(&self) -> Vec<&StateId> {
        self.status
            .iter()
            .filter(|(_, status)| **status == ComputationStatus::Failure)
            .map(|(state, _)| state)
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.status.values().any(|s| *s == ComputationStatus::Failure)
    }

    pub fn flow(&self, cnec: &str) -> Option<f64> {
        self.flows.get(cnec).copied()
    }

    pub fn sensitivity(&self, cnec: &str, range_action: &str) -> Option<f64> {
        self.sensitivities
            .get(cnec)
            .and_then(|by_ra| by_ra.get(range_action))
            .copied()
    }

    pub fn ptdf_sum(&self, cnec: &str) -> Option<f64> {
        self.ptdf_sums.get(cnec).copied()
    }

    pub fn voltage(&self, cnec: &str) -> Option<f64> {
        self.voltages.get(cnec).copied()
    }

    pub fn angle(&self, cnec: &str) -> Option<f64> {
        self.angles.get(cnec).copied()
    }

    /// Setpoint of `range_action` at the linearization point.
    pub fn setpoint(&self, range_action: &str) -> Option<f64> {
        self.setpoints.get(range_action).copied()
    }

    pub fn setpoints(&self) -> &BTreeMap<String, f64> {
        &self.setpoints
    }

    /// Fold `other` into `self`; values of `other` win on conflicts.
    pub fn merge(&mut self, other: SensitivitySnapshot) {
        self.status.extend(other.status);
        self.flows.extend(other.flows);
        for (cnec, by_ra) in other.sensitivities {
            self.sensitivities.entry(cnec).or_default().extend(by_ra);
        }
        self.ptdf_sums.extend(other.ptdf_sums);
        self.voltages.extend(other.voltages);
        self.angles.extend(other.angles);
        self.setpoints.extend(other.setpoints);
    }

    /// Copy of the snapshot with every id passed through `rename`.
    pub(crate) fn renamed(&self, rename: impl Fn(&str) -> String) -> SensitivitySnapshot {
        let rename_map = |map: &HashMap<String, f64>| -> HashMap<String, f64> {
            map.iter().map(|(k, v)| (rename(k), *v)).collect()
        };
        SensitivitySnapshot {
            status: self
                .status
                .iter()
                .map(|(k, v)| (StateId::new(rename(k.as_str())), *v))
                .collect(),
            flows: rename_map(&self.flows),
            sensitivities: self
                .sensitivities
                .iter()
                .map(|(cnec, by_ra)| (rename(cnec), rename_map(by_ra)))
                .collect(),
            ptdf_sums: rename_map(&self.ptdf_sums),
            voltages: rename_map(&self.voltages),
            angles: rename_map(&self.angles),
            setpoints: self
                .setpoints
                .iter()
                .map(|(k, v)| (rename(k), *v))
                .collect(),
        }
    }
}

/// External sensitivity-analysis engine.
///
/// `Err` means the whole computation could not run. A state whose load flow
/// diverged is reported as [`ComputationStatus::Failure`] inside an `Ok`
/// snapshot so that other states remain usable.
pub trait SensitivityComputer: Send + Sync {
    fn compute(
        &self,
        crac: &Crac,
        request: &SensitivityRequest,
    ) -> Result<SensitivitySnapshot, OptimizationError>;

    /// Upper bound of the flow change a network action can bring on a CNEC,
    /// used to prune the search tree. `None` when unknown.
    fn estimate_network_action_impact(
        &self,
        _crac: &Crac,
        _network_action: &str,
        _cnec: &str,
    ) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values_are_distinguishable() {
        let mut snapshot = SensitivitySnapshot::default();
        snapshot.set_flow("cnec", 900.0);
        snapshot.set_sensitivity("cnec", "pst", 0.0);
        assert_eq!(snapshot.flow("cnec"), Some(900.0));
        assert_eq!(snapshot.sensitivity("cnec", "pst"), Some(0.0));
        assert_eq!(snapshot.sensitivity("cnec", "hvdc"), None);
        assert_eq!(snapshot.flow("other"), None);
    }

    #[test]
    fn test_merge_and_failures() {
        let mut a = SensitivitySnapshot::default();
        a.set_status(StateId::new("preventive"), ComputationStatus::Success);
        a.set_flow("c1", 1.0);
        let mut b = SensitivitySnapshot::default();
        b.set_status(StateId::new("co1 - curative"), ComputationStatus::Failure);
        b.set_flow("c2", 2.0);
        a.merge(b);
        assert_eq!(a.flow("c2"), Some(2.0));
        assert!(a.has_failures());
        assert_eq!(a.failed_states(), vec![&StateId::new("co1 - curative")]);
        assert_eq!(
            a.status(&StateId::new("preventive")),
            Some(ComputationStatus::Success)
        );
    }
}
