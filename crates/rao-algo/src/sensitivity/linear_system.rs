use std::collections::{BTreeSet, HashMap};

use rao_core::{Crac, StateId};

use super::{ComputationStatus, SensitivityComputer, SensitivityRequest, SensitivitySnapshot};
use crate::error::OptimizationError;

/// Explicit sensitivity model of a grid.
///
/// The flow of a CNEC is
///
/// ```text
/// flow = reference + sum_ra (s * d + c * d^2) + sum_na shift
/// ```
///
/// where `d` is the setpoint deviation of a range action from the initial
/// network. A non-zero curvature `c` makes the linearization depend on the
/// operating point, so successive sensitivity iterations see different
/// coefficients (`s + 2 * c * d`).
#[derive(Debug, Clone, Default)]
pub struct LinearSystemModel {
    reference_flows: HashMap<String, f64>,
    sensitivities: HashMap<String, HashMap<String, f64>>,
    curvatures: HashMap<String, HashMap<String, f64>>,
    /// network action -> monitored element -> shift
    network_action_shifts: HashMap<String, HashMap<String, f64>>,
    ptdf_sums: HashMap<String, f64>,
    voltages: HashMap<String, f64>,
    angles: HashMap<String, f64>,
    failing_states: BTreeSet<StateId>,
    diverging_network_actions: BTreeSet<String>,
    diverging_range_actions: BTreeSet<String>,
    unavailable: bool,
}

impl LinearSystemModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference_flow(mut self, cnec: impl Into<String>, flow_mw: f64) -> Self {
        self.reference_flows.insert(cnec.into(), flow_mw);
        self
    }

    pub fn with_sensitivity(
        mut self,
        cnec: impl Into<String>,
        range_action: impl Into<String>,
        mw_per_unit: f64,
    ) -> Self {
        self.sensitivities
            .entry(cnec.into())
            .or_default()
            .insert(range_action.into(), mw_per_unit);
        self
    }

    pub fn with_curvature(
        mut self,
        cnec: impl Into<String>,
        range_action: impl Into<String>,
        mw_per_unit_squared: f64,
    ) -> Self {
        self.curvatures
            .entry(cnec.into())
            .or_default()
            .insert(range_action.into(), mw_per_unit_squared);
        self
    }

    /// Flow (or voltage, or angle) change on `element` when `network_action` is applied.
    pub fn with_network_action_shift(
        mut self,
        network_action: impl Into<String>,
        element: impl Into<String>,
        shift: f64,
    ) -> Self {
        self.network_action_shifts
            .entry(network_action.into())
            .or_default()
            .insert(element.into(), shift);
        self
    }

    pub fn with_ptdf_sum(mut self, cnec: impl Into<String>, value: f64) -> Self {
        self.ptdf_sums.insert(cnec.into(), value);
        self
    }

    pub fn with_voltage(mut self, cnec: impl Into<String>, kv: f64) -> Self {
        self.voltages.insert(cnec.into(), kv);
        self
    }

    pub fn with_angle(mut self, cnec: impl Into<String>, degrees: f64) -> Self {
        self.angles.insert(cnec.into(), degrees);
        self
    }

    /// The load flow of `state` diverges.
    pub fn with_failing_state(mut self, state: StateId) -> Self {
        self.failing_states.insert(state);
        self
    }

    /// Every requested state diverges once `network_action` is applied.
    pub fn with_diverging_network_action(mut self, network_action: impl Into<String>) -> Self {
        self.diverging_network_actions.insert(network_action.into());
        self
    }

    /// Every requested state diverges once `range_action` leaves its
    /// initial setpoint.
    pub fn with_diverging_range_action(mut self, range_action: impl Into<String>) -> Self {
        self.diverging_range_actions.insert(range_action.into());
        self
    }

    /// Every computation fails with an error.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    fn shift(&self, network_actions: &BTreeSet<String>, element: &str) -> f64 {
        network_actions
            .iter()
            .filter_map(|na| self.network_action_shifts.get(na))
            .filter_map(|shifts| shifts.get(element))
            .sum()
    }
}

impl SensitivityComputer for LinearSystemModel {
    fn compute(
        &self,
        crac: &Crac,
        request: &SensitivityRequest,
    ) -> Result<SensitivitySnapshot, OptimizationError> {
        if self.unavailable {
            return Err(OptimizationError::SensitivityFailure(
                "sensitivity engine unavailable".into(),
            ));
        }
        let mut snapshot = SensitivitySnapshot::new(request.setpoints.clone());
        let deviation = |ra_id: &str| -> Result<f64, OptimizationError> {
            let ra = crac.range_action(ra_id)?;
            let setpoint = request
                .setpoints
                .get(ra_id)
                .copied()
                .unwrap_or(ra.initial_setpoint);
            Ok(setpoint - ra.initial_setpoint)
        };

        let mut diverged = request
            .network_actions
            .iter()
            .any(|na| self.diverging_network_actions.contains(na));
        for ra_id in &self.diverging_range_actions {
            if request.setpoints.contains_key(ra_id) && deviation(ra_id)?.abs() > 1e-9 {
                diverged = true;
            }
        }
        let mut failed = BTreeSet::new();
        for state in &request.states {
            let status = if diverged || self.failing_states.contains(state) {
                failed.insert(state.clone());
                ComputationStatus::Failure
            } else {
                ComputationStatus::Success
            };
            snapshot.set_status(state.clone(), status);
        }

        for cnec_id in &request.flow_cnecs {
            let cnec = crac.flow_cnec(cnec_id)?;
            if failed.contains(&cnec.state) {
                continue;
            }
            let Some(reference) = self.reference_flows.get(cnec_id) else {
                continue;
            };
            let linear = self.sensitivities.get(cnec_id);
            let curvature = self.curvatures.get(cnec_id);
            let mut flow = *reference + self.shift(&request.network_actions, cnec_id);
            let mut affecting: BTreeSet<&str> = BTreeSet::new();
            affecting.extend(linear.into_iter().flat_map(|m| m.keys().map(String::as_str)));
            affecting.extend(curvature.into_iter().flat_map(|m| m.keys().map(String::as_str)));
            for ra_id in affecting {
                let s = linear.and_then(|m| m.get(ra_id)).copied().unwrap_or(0.0);
                let c = curvature.and_then(|m| m.get(ra_id)).copied().unwrap_or(0.0);
                let d = deviation(ra_id)?;
                flow += s * d + c * d * d;
            }
            snapshot.set_flow(cnec_id.clone(), flow);
            for ra_id in &request.range_actions {
                let s = linear.and_then(|m| m.get(ra_id)).copied().unwrap_or(0.0);
                let c = curvature.and_then(|m| m.get(ra_id)).copied().unwrap_or(0.0);
                let d = deviation(ra_id)?;
                snapshot.set_sensitivity(cnec_id.clone(), ra_id.clone(), s + 2.0 * c * d);
            }
            if let Some(ptdf) = self.ptdf_sums.get(cnec_id) {
                snapshot.set_ptdf_sum(cnec_id.clone(), *ptdf);
            }
        }

        for cnec_id in &request.voltage_cnecs {
            let cnec = crac.voltage_cnec(cnec_id)?;
            if failed.contains(&cnec.state) {
                continue;
            }
            if let Some(v) = self.voltages.get(cnec_id) {
                snapshot.set_voltage(
                    cnec_id.clone(),
                    v + self.shift(&request.network_actions, cnec_id),
                );
            }
        }
        for cnec_id in &request.angle_cnecs {
            let cnec = crac.angle_cnec(cnec_id)?;
            if failed.contains(&cnec.state) {
                continue;
            }
            if let Some(a) = self.angles.get(cnec_id) {
                snapshot.set_angle(
                    cnec_id.clone(),
                    a + self.shift(&request.network_actions, cnec_id),
                );
            }
        }
        Ok(snapshot)
    }

    fn estimate_network_action_impact(
        &self,
        _crac: &Crac,
        network_action: &str,
        cnec: &str,
    ) -> Option<f64> {
        Some(
            self.network_action_shifts
                .get(network_action)
                .and_then(|shifts| shifts.get(cnec))
                .map(|shift| shift.abs())
                .unwrap_or(0.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_core::{CracBuilder, FlowCnec, RangeAction, Threshold, Unit};

    fn crac() -> Crac {
        CracBuilder::new("crac")
            .add_flow_cnec(
                FlowCnec::new("cnec", "line", StateId::new("preventive"))
                    .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0)),
            )
            .add_range_action(
                RangeAction::injection("inj", "gen", 0.0)
                    .with_range(rao_core::SetpointRange::absolute(-100.0, 100.0)),
            )
            .build()
            .unwrap()
    }

    fn request(setpoint: f64) -> SensitivityRequest {
        SensitivityRequest {
            states: vec![StateId::new("preventive")],
            flow_cnecs: vec!["cnec".into()],
            range_actions: vec!["inj".into()],
            setpoints: [("inj".to_string(), setpoint)].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_flow_and_sensitivity() {
        let model = LinearSystemModel::new()
            .with_reference_flow("cnec", 900.0)
            .with_sensitivity("cnec", "inj", 0.5);
        let snapshot = model.compute(&crac(), &request(20.0)).unwrap();
        assert_eq!(snapshot.flow("cnec"), Some(910.0));
        assert_eq!(snapshot.sensitivity("cnec", "inj"), Some(0.5));
        assert_eq!(snapshot.setpoint("inj"), Some(20.0));
    }

    #[test]
    fn test_curvature_moves_linearization() {
        let model = LinearSystemModel::new()
            .with_reference_flow("cnec", 900.0)
            .with_sensitivity("cnec", "inj", -1.0)
            .with_curvature("cnec", "inj", 0.01);
        let snapshot = model.compute(&crac(), &request(10.0)).unwrap();
        assert!((snapshot.flow("cnec").unwrap() - 891.0).abs() < 1e-9);
        assert!((snapshot.sensitivity("cnec", "inj").unwrap() + 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_failures() {
        let model = LinearSystemModel::new()
            .with_reference_flow("cnec", 900.0)
            .with_failing_state(StateId::new("preventive"));
        let snapshot = model.compute(&crac(), &request(0.0)).unwrap();
        assert!(snapshot.has_failures());
        assert_eq!(snapshot.flow("cnec"), None);

        let model = LinearSystemModel::new().unavailable();
        assert!(matches!(
            model.compute(&crac(), &request(0.0)),
            Err(OptimizationError::SensitivityFailure(_))
        ));
    }

    #[test]
    fn test_diverges_once_the_range_action_moves() {
        let model = LinearSystemModel::new()
            .with_reference_flow("cnec", 900.0)
            .with_diverging_range_action("inj");
        assert!(!model.compute(&crac(), &request(0.0)).unwrap().has_failures());
        let moved = model.compute(&crac(), &request(10.0)).unwrap();
        assert!(moved.has_failures());
        assert_eq!(moved.flow("cnec"), None);
    }

    #[test]
    fn test_network_action_shift_and_impact() {
        let model = LinearSystemModel::new()
            .with_reference_flow("cnec", 900.0)
            .with_network_action_shift("open-line", "cnec", -150.0);
        let mut req = request(0.0);
        req.network_actions.insert("open-line".into());
        let snapshot = model.compute(&crac(), &req).unwrap();
        assert_eq!(snapshot.flow("cnec"), Some(750.0));
        assert_eq!(
            model.estimate_network_action_impact(&crac(), "open-line", "cnec"),
            Some(150.0)
        );
    }
}
