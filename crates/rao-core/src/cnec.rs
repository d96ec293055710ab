//! Critical network elements and contingencies (CNECs).
//!
//! Every CNEC belongs to exactly one [`StateId`] and carries at least one
//! threshold. Flow CNECs are the only ones that enter the linear problem;
//! voltage and angle CNECs are monitored against reference values.

use crate::error::{RaoError, RaoResult};
use crate::state::StateId;
use crate::units::{Amperes, Kilovolts, Unit};
use serde::{Deserialize, Serialize};

/// A limit on a monitored quantity. Either bound may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub unit: Unit,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Threshold {
    pub fn new(unit: Unit, min: Option<f64>, max: Option<f64>) -> Self {
        Self { unit, min, max }
    }

    /// Symmetric threshold `[-limit, limit]`.
    pub fn symmetric(unit: Unit, limit: f64) -> Self {
        Self::new(unit, Some(-limit), Some(limit))
    }

    pub fn upper(unit: Unit, max: f64) -> Self {
        Self::new(unit, None, Some(max))
    }
}

/// A monitored branch at a given state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCnec {
    pub id: String,
    pub name: Option<String>,
    pub network_element: String,
    pub state: StateId,
    pub operator: Option<String>,
    pub thresholds: Vec<Threshold>,
    /// Part of the objective (most-limiting element search)
    pub optimized: bool,
    /// Must not degrade beyond an acceptable margin (MNEC)
    pub monitored: bool,
    pub nominal_voltage_kv: f64,
    /// Permanent admissible current, needed by `%Imax` thresholds
    pub imax_amperes: Option<f64>,
    /// Flow reliability margin subtracted from every threshold (MW)
    pub reliability_margin_mw: f64,
}

impl FlowCnec {
    /// Create an optimized CNEC with no threshold yet.
    pub fn new(
        id: impl Into<String>,
        network_element: impl Into<String>,
        state: StateId,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            network_element: network_element.into(),
            state,
            operator: None,
            thresholds: Vec::new(),
            optimized: true,
            monitored: false,
            nominal_voltage_kv: 400.0,
            imax_amperes: None,
            reliability_margin_mw: 0.0,
        }
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_nominal_voltage(mut self, kv: f64) -> Self {
        self.nominal_voltage_kv = kv;
        self
    }

    pub fn with_imax(mut self, imax_amperes: f64) -> Self {
        self.imax_amperes = Some(imax_amperes);
        self
    }

    pub fn with_reliability_margin(mut self, frm_mw: f64) -> Self {
        self.reliability_margin_mw = frm_mw;
        self
    }

    /// Turn the CNEC into a pure MNEC (monitored, not optimized).
    pub fn monitored_only(mut self) -> Self {
        self.optimized = false;
        self.monitored = true;
        self
    }

    pub fn also_monitored(mut self) -> Self {
        self.monitored = true;
        self
    }

    /// Check the CNEC invariants.
    pub fn validate(&self) -> RaoResult<()> {
        if self.thresholds.is_empty() {
            return Err(RaoError::Validation(format!(
                "FlowCnec '{}' has no threshold",
                self.id
            )));
        }
        for threshold in &self.thresholds {
            if !threshold.unit.is_flow() {
                return Err(RaoError::Validation(format!(
                    "FlowCnec '{}' has a threshold in {}, expected a flow unit",
                    self.id, threshold.unit
                )));
            }
            if threshold.min.is_none() && threshold.max.is_none() {
                return Err(RaoError::Validation(format!(
                    "FlowCnec '{}' has a threshold without min nor max",
                    self.id
                )));
            }
            if threshold.unit == Unit::PercentImax && self.imax_amperes.is_none() {
                return Err(RaoError::Validation(format!(
                    "FlowCnec '{}' uses a %Imax threshold but has no Imax",
                    self.id
                )));
            }
        }
        if self.nominal_voltage_kv <= 0.0 {
            return Err(RaoError::Validation(format!(
                "FlowCnec '{}' has a non-positive nominal voltage",
                self.id
            )));
        }
        Ok(())
    }

    fn to_megawatts(&self, value: f64, unit: Unit) -> f64 {
        let kv = Kilovolts(self.nominal_voltage_kv);
        match unit {
            Unit::Megawatt => value,
            Unit::Ampere => Amperes(value).to_megawatts(kv).value(),
            Unit::PercentImax => {
                let imax = self.imax_amperes.unwrap_or(0.0);
                Amperes(value / 100.0 * imax).to_megawatts(kv).value()
            }
            _ => value,
        }
    }

    /// Most restrictive upper bound in MW, reliability margin included.
    pub fn upper_bound_mw(&self) -> Option<f64> {
        self.thresholds
            .iter()
            .filter_map(|t| t.max.map(|max| self.to_megawatts(max, t.unit)))
            .reduce(f64::min)
            .map(|ub| ub - self.reliability_margin_mw)
    }

    /// Most restrictive lower bound in MW, reliability margin included.
    pub fn lower_bound_mw(&self) -> Option<f64> {
        self.thresholds
            .iter()
            .filter_map(|t| t.min.map(|min| self.to_megawatts(min, t.unit)))
            .reduce(f64::max)
            .map(|lb| lb + self.reliability_margin_mw)
    }

    /// Margin of a flow value against the thresholds, in MW.
    ///
    /// Returns `f64::INFINITY` for an unconstrained direction.
    pub fn margin_mw(&self, flow_mw: f64) -> f64 {
        let upper = self
            .upper_bound_mw()
            .map(|ub| ub - flow_mw)
            .unwrap_or(f64::INFINITY);
        let lower = self
            .lower_bound_mw()
            .map(|lb| flow_mw - lb)
            .unwrap_or(f64::INFINITY);
        upper.min(lower)
    }

    /// Margin expressed in `unit` (MW or A).
    pub fn margin(&self, flow_mw: f64, unit: Unit) -> f64 {
        let margin = self.margin_mw(flow_mw);
        match unit {
            Unit::Ampere if margin.is_finite() => crate::units::Megawatts(margin)
                .to_amperes(Kilovolts(self.nominal_voltage_kv))
                .value(),
            _ => margin,
        }
    }
}

/// A monitored bus voltage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageCnec {
    pub id: String,
    pub network_element: String,
    pub state: StateId,
    pub thresholds: Vec<Threshold>,
}

impl VoltageCnec {
    pub fn new(id: impl Into<String>, network_element: impl Into<String>, state: StateId) -> Self {
        Self {
            id: id.into(),
            network_element: network_element.into(),
            state,
            thresholds: Vec::new(),
        }
    }

    pub fn with_threshold(mut self, min_kv: Option<f64>, max_kv: Option<f64>) -> Self {
        self.thresholds
            .push(Threshold::new(Unit::Kilovolt, min_kv, max_kv));
        self
    }

    pub fn validate(&self) -> RaoResult<()> {
        validate_scalar_thresholds(&self.id, &self.thresholds, Unit::Kilovolt)
    }

    pub fn margin(&self, voltage_kv: f64) -> f64 {
        scalar_margin(&self.thresholds, voltage_kv)
    }
}

/// A monitored phase-angle difference between two buses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleCnec {
    pub id: String,
    pub exporting_element: String,
    pub importing_element: String,
    pub state: StateId,
    pub thresholds: Vec<Threshold>,
}

impl AngleCnec {
    pub fn new(
        id: impl Into<String>,
        exporting_element: impl Into<String>,
        importing_element: impl Into<String>,
        state: StateId,
    ) -> Self {
        Self {
            id: id.into(),
            exporting_element: exporting_element.into(),
            importing_element: importing_element.into(),
            state,
            thresholds: Vec::new(),
        }
    }

    pub fn with_threshold(mut self, min_deg: Option<f64>, max_deg: Option<f64>) -> Self {
        self.thresholds
            .push(Threshold::new(Unit::Degree, min_deg, max_deg));
        self
    }

    pub fn validate(&self) -> RaoResult<()> {
        validate_scalar_thresholds(&self.id, &self.thresholds, Unit::Degree)
    }

    pub fn margin(&self, angle_deg: f64) -> f64 {
        scalar_margin(&self.thresholds, angle_deg)
    }
}

fn validate_scalar_thresholds(id: &str, thresholds: &[Threshold], unit: Unit) -> RaoResult<()> {
    if thresholds.is_empty() {
        return Err(RaoError::Validation(format!("Cnec '{}' has no threshold", id)));
    }
    if let Some(bad) = thresholds.iter().find(|t| t.unit != unit) {
        return Err(RaoError::Validation(format!(
            "Cnec '{}' has a threshold in {}, expected {}",
            id, bad.unit, unit
        )));
    }
    Ok(())
}

fn scalar_margin(thresholds: &[Threshold], value: f64) -> f64 {
    thresholds
        .iter()
        .map(|t| {
            let upper = t.max.map(|max| max - value).unwrap_or(f64::INFINITY);
            let lower = t.min.map(|min| value - min).unwrap_or(f64::INFINITY);
            upper.min(lower)
        })
        .fold(f64::INFINITY, f64::min)
}
