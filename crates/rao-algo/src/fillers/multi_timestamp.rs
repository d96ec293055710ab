use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{FillerContext, ProblemFiller};
use crate::error::OptimizationError;
use crate::linear_problem::{ConstraintKey, LinearProblem, RaKey, VariableKey};
use crate::sensitivity::SensitivitySnapshot;

/// Setpoint gradients between consecutive timestamps.
///
/// Range actions of different timestamps acting on the same network element
/// are the same physical device; its setpoint may change by at most the
/// configured gradient from one timestamp to the next:
///
/// ```text
/// -gradient <= setpoint(t + 1) - setpoint(t) <= gradient
/// ```
pub struct MultiTimestampFiller<'a> {
    ctx: FillerContext<'a>,
}

impl<'a> MultiTimestampFiller<'a> {
    pub fn new(ctx: FillerContext<'a>) -> Self {
        Self { ctx }
    }

    /// Keys of every gradient-limited device, ordered by timestamp.
    fn devices(&self) -> Result<BTreeMap<&'a str, Vec<(DateTime<Utc>, RaKey)>>, OptimizationError> {
        let gradients = &self.ctx.parameters.inter_temporal.max_setpoint_gradient;
        let mut devices: BTreeMap<&'a str, Vec<(DateTime<Utc>, RaKey)>> = BTreeMap::new();
        for (key, ra) in self.ctx.range_actions()? {
            if !gradients.contains_key(&ra.network_element) {
                continue;
            }
            let Some(timestamp) = self.ctx.crac.state(&key.state)?.timestamp().copied() else {
                continue;
            };
            devices
                .entry(ra.network_element.as_str())
                .or_default()
                .push((timestamp, key));
        }
        for keys in devices.values_mut() {
            keys.sort();
        }
        Ok(devices)
    }
}

impl ProblemFiller for MultiTimestampFiller<'_> {
    fn name(&self) -> &'static str {
        "multi_timestamp"
    }

    fn fill(
        &mut self,
        problem: &mut LinearProblem,
        _sensitivity: &SensitivitySnapshot,
    ) -> Result<(), OptimizationError> {
        let gradients = &self.ctx.parameters.inter_temporal.max_setpoint_gradient;
        for (element, keys) in self.devices()? {
            let Some(gradient) = gradients.get(element).copied() else {
                continue;
            };
            for pair in keys.windows(2) {
                let (first, second) = (&pair[0].1, &pair[1].1);
                let before = problem.variable(&VariableKey::Setpoint(first.clone()))?;
                let after = problem.variable(&VariableKey::Setpoint(second.clone()))?;
                let c = problem.add_constraint(
                    ConstraintKey::InterTemporal {
                        first: first.clone(),
                        second: second.clone(),
                    },
                    -gradient,
                    gradient,
                )?;
                problem.set_coefficient(c, after, 1.0)?;
                problem.set_coefficient(c, before, -1.0)?;
            }
        }
        Ok(())
    }
}
