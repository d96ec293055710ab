//! Small CRACs and sensitivity models shared by unit and integration tests.

use std::collections::BTreeSet;

use rao_core::{
    ActionType, Crac, CracBuilder, FlowCnec, NetworkAction, RangeAction, SetpointRange, StateId,
    Threshold, Unit, UsageMethod, UsageRule,
};

use crate::fillers::FillerContext;
use crate::parameters::RaoParameters;
use crate::perimeter::OptimizationPerimeter;
use crate::result::RangeActionSetpointResult;
use crate::sensitivity::LinearSystemModel;

/// Angle step of the test PSTs, in degrees per tap.
pub const PST_STEP_DEG: f64 = 0.5;

pub fn preventive() -> StateId {
    StateId::new("preventive")
}

fn preventive_rule() -> UsageRule {
    UsageRule::on_instant("preventive", UsageMethod::Available)
}

/// One CNEC limited to +/-1000 MW and one PST with taps -10..=10
/// (0.5 degree per tap, initial tap 0), both operated by `FR`.
pub fn single_pst_crac() -> Crac {
    CracBuilder::new("single-pst")
        .add_flow_cnec(
            FlowCnec::new("cnec", "line-1", preventive())
                .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0))
                .with_operator("FR"),
        )
        .add_range_action(
            RangeAction::linear_pst("pst", "pst-element", -10, 10, PST_STEP_DEG, 0)
                .with_operator("FR")
                .with_range(SetpointRange::absolute(-10.0, 10.0))
                .with_usage_rule(preventive_rule()),
        )
        .build()
        .expect("valid test crac")
}

/// Sensitivity of the `single_pst_crac` CNEC to the PST, given per tap.
pub fn single_pst_sensitivity(reference_flow: f64, mw_per_tap: f64) -> LinearSystemModel {
    LinearSystemModel::new()
        .with_reference_flow("cnec", reference_flow)
        .with_sensitivity("cnec", "pst", mw_per_tap / PST_STEP_DEG)
}

/// One CNEC and two injection range actions of the same operator, each able
/// to shift the CNEC flow by 1 MW per MW over -100..=100 MW.
pub fn two_injections_crac() -> Crac {
    let mut builder = CracBuilder::new("two-injections").add_flow_cnec(
        FlowCnec::new("cnec", "line-1", preventive())
            .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0))
            .with_operator("FR"),
    );
    for id in ["inj-1", "inj-2"] {
        builder = builder.add_range_action(
            RangeAction::injection(id, format!("{}-generator", id), 0.0)
                .with_operator("FR")
                .with_range(SetpointRange::absolute(-100.0, 100.0))
                .with_usage_rule(preventive_rule()),
        );
    }
    builder.build().expect("valid test crac")
}

pub fn two_injections_sensitivity(reference_flow: f64) -> LinearSystemModel {
    LinearSystemModel::new()
        .with_reference_flow("cnec", reference_flow)
        .with_sensitivity("cnec", "inj-1", -1.0)
        .with_sensitivity("cnec", "inj-2", -1.0)
}

/// `single_pst_crac` plus two preventive topological actions.
pub fn topology_crac() -> Crac {
    CracBuilder::new("topology")
        .add_flow_cnec(
            FlowCnec::new("cnec", "line-1", preventive())
                .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0))
                .with_operator("FR"),
        )
        .add_range_action(
            RangeAction::linear_pst("pst", "pst-element", -10, 10, PST_STEP_DEG, 0)
                .with_operator("FR")
                .with_range(SetpointRange::absolute(-10.0, 10.0))
                .with_usage_rule(preventive_rule()),
        )
        .add_network_action(
            NetworkAction::topology("open-line-2", "line-2", ActionType::Open)
                .with_operator("FR")
                .with_usage_rule(preventive_rule()),
        )
        .add_network_action(
            NetworkAction::topology("close-line-3", "line-3", ActionType::Close)
                .with_operator("FR")
                .with_usage_rule(preventive_rule()),
        )
        .build()
        .expect("valid test crac")
}

/// Owned inputs of a [`FillerContext`] on the preventive perimeter.
pub struct FillerFixture {
    pub crac: Crac,
    pub perimeter: OptimizationPerimeter,
    pub parameters: RaoParameters,
    pub pre_perimeter: RangeActionSetpointResult,
    pub network_actions: BTreeSet<String>,
}

impl FillerFixture {
    pub fn new(crac: Crac, parameters: RaoParameters) -> Self {
        let perimeter = OptimizationPerimeter::preventive(&crac, &BTreeSet::new())
            .expect("preventive perimeter");
        let pre_perimeter = RangeActionSetpointResult::initial(&crac);
        Self {
            crac,
            perimeter,
            parameters,
            pre_perimeter,
            network_actions: BTreeSet::new(),
        }
    }

    pub fn context(&self) -> FillerContext<'_> {
        FillerContext {
            crac: &self.crac,
            perimeter: &self.perimeter,
            parameters: &self.parameters,
            pre_perimeter: &self.pre_perimeter,
            network_actions: &self.network_actions,
        }
    }
}
