use chrono::{DateTime, Utc};
use rao_core::{strip_timestamp, timestamped_id, Crac, StateId};

use super::{SensitivityComputer, SensitivityRequest, SensitivitySnapshot};
use crate::error::OptimizationError;

struct TimestampEntry {
    timestamp: DateTime<Utc>,
    crac: Crac,
    computer: Box<dyn SensitivityComputer>,
}

/// Sensitivity computer of a merged multi-timestamp CRAC.
///
/// Each timestamp keeps its own CRAC and computer working on unscoped ids;
/// requests on the merged CRAC (see [`Crac::merge_timestamps`]) are split per
/// timestamp and the answers are re-scoped and merged.
#[derive(Default)]
pub struct MultiTimestampSensitivity {
    entries: Vec<TimestampEntry>,
}

impl MultiTimestampSensitivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp(
        mut self,
        timestamp: DateTime<Utc>,
        crac: Crac,
        computer: Box<dyn SensitivityComputer>,
    ) -> Self {
        self.entries.push(TimestampEntry {
            timestamp,
            crac,
            computer,
        });
        self
    }

    pub fn timestamps(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.entries.iter().map(|e| &e.timestamp)
    }

    fn sub_request(request: &SensitivityRequest, ts: &DateTime<Utc>) -> SensitivityRequest {
        let strip = |ids: &[String]| -> Vec<String> {
            ids.iter()
                .filter_map(|id| strip_timestamp(id, ts).map(str::to_string))
                .collect()
        };
        SensitivityRequest {
            states: request
                .states
                .iter()
                .filter_map(|s| strip_timestamp(s.as_str(), ts).map(StateId::new))
                .collect(),
            flow_cnecs: strip(&request.flow_cnecs),
            voltage_cnecs: strip(&request.voltage_cnecs),
            angle_cnecs: strip(&request.angle_cnecs),
            range_actions: strip(&request.range_actions),
            setpoints: request
                .setpoints
                .iter()
                .filter_map(|(id, v)| strip_timestamp(id, ts).map(|id| (id.to_string(), *v)))
                .collect(),
            network_actions: request
                .network_actions
                .iter()
                .filter_map(|id| strip_timestamp(id, ts).map(str::to_string))
                .collect(),
        }
    }
}

impl SensitivityComputer for MultiTimestampSensitivity {
    fn compute(
        &self,
        _crac: &Crac,
        request: &SensitivityRequest,
    ) -> Result<SensitivitySnapshot, OptimizationError> {
        let mut merged = SensitivitySnapshot::default();
        for entry in &self.entries {
            let sub = Self::sub_request(request, &entry.timestamp);
            if sub.states.is_empty() {
                continue;
            }
            let snapshot = entry.computer.compute(&entry.crac, &sub)?;
            merged.merge(snapshot.renamed(|id| timestamped_id(id, &entry.timestamp)));
        }
        Ok(merged)
    }

    fn estimate_network_action_impact(
        &self,
        _crac: &Crac,
        network_action: &str,
        cnec: &str,
    ) -> Option<f64> {
        self.entries.iter().find_map(|entry| {
            let na = strip_timestamp(network_action, &entry.timestamp)?;
            let cnec = strip_timestamp(cnec, &entry.timestamp)?;
            entry
                .computer
                .estimate_network_action_impact(&entry.crac, na, cnec)
        })
    }
}
