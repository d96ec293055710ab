//! End-to-end optimization tests

use chrono::{TimeZone, Utc};
use rao_algo::objective::SENSITIVITY_FAILURE_COST;
use rao_algo::parameters::SecondPreventiveExecutionCondition;
use rao_algo::test_utils::{
    preventive, single_pst_crac, single_pst_sensitivity, topology_crac, two_injections_crac,
    two_injections_sensitivity, PST_STEP_DEG,
};
use rao_algo::{
    LinearSystemModel, MultiTimestampSensitivity, ObjectiveFunctionType, Rao, RaoParameters,
    RaoStatus,
};
use rao_core::{
    timestamped_id, Contingency, Crac, CracBuilder, FlowCnec, RangeAction, RaoError,
    SetpointRange, StateId, Threshold, Unit, UsageMethod, UsageRule,
};

fn min_cost() -> RaoParameters {
    let mut params = RaoParameters::default();
    params.objective_function.objective_type = ObjectiveFunctionType::MinCost;
    params
}

fn curative() -> StateId {
    StateId::new("co1 - curative")
}

/// A preventive CNEC, a curative CNEC after contingency `co1`, a preventive
/// PST and a curative injection.
fn curative_crac() -> Crac {
    CracBuilder::new("curative")
        .add_contingency(Contingency::new("co1", vec!["line-2".into()]))
        .add_flow_cnec(
            FlowCnec::new("prev", "line-1", preventive())
                .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0))
                .with_operator("FR"),
        )
        .add_flow_cnec(
            FlowCnec::new("cur", "line-1", curative())
                .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0))
                .with_operator("FR"),
        )
        .add_range_action(
            RangeAction::linear_pst("pst", "pst-element", -10, 10, PST_STEP_DEG, 0)
                .with_operator("FR")
                .with_range(SetpointRange::absolute(-10.0, 10.0))
                .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available)),
        )
        .add_range_action(
            RangeAction::injection("cur-inj", "generator", 0.0)
                .with_operator("FR")
                .with_range(SetpointRange::absolute(-200.0, 200.0))
                .with_usage_rule(UsageRule::on_contingency_state(
                    "co1",
                    "curative",
                    UsageMethod::Available,
                )),
        )
        .build()
        .expect("valid crac")
}

/// The PST relieves the preventive CNEC and loads the curative one, which
/// the curative injection cannot help.
fn conflicting_sensitivity() -> LinearSystemModel {
    LinearSystemModel::new()
        .with_reference_flow("prev", 1100.0)
        .with_reference_flow("cur", 950.0)
        .with_sensitivity("prev", "pst", -40.0)
        .with_sensitivity("cur", "pst", 40.0)
}

#[test]
fn test_secure_network_activates_nothing() {
    let crac = single_pst_crac();
    let params = min_cost();
    let sensitivity = single_pst_sensitivity(900.0, -5.0);

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    assert!(result.is_secure());
    assert!(result.final_cost.cost().abs() < 1e-6);
    let state = result.state(&preventive()).expect("preventive state result");
    assert!(state.range_action_setpoints.is_empty());
    assert_eq!(result.final_setpoints.setpoint("pst"), Some(0.0));
}

#[test]
fn test_overload_is_solved_with_the_smallest_tap_change() {
    let crac = single_pst_crac();
    let params = min_cost();
    let sensitivity = single_pst_sensitivity(1020.0, -5.0);

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    assert!(result.is_secure(), "flow should be back within its limit");
    let state = result.state(&preventive()).unwrap();
    assert_eq!(state.pst_taps.get("pst"), Some(&4));
    assert_eq!(state.range_action_setpoints.get("pst"), Some(&2.0));
    assert!((result.flows["cnec"] - 1000.0).abs() < 1e-6);
    assert!(result.final_cost.cost() < result.initial_cost.cost());
}

#[test]
fn test_runs_are_reproducible() {
    let crac = single_pst_crac();
    let params = min_cost();
    let sensitivity = single_pst_sensitivity(1020.0, -5.0);

    let first = Rao::new(&crac, &params, &sensitivity).run().unwrap();
    let second = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_usage_limit_per_operator() {
    let crac = two_injections_crac();
    let mut params = RaoParameters::default();
    params
        .ra_usage_limits_per_instant
        .entry("preventive".into())
        .or_default()
        .max_ra_per_tso
        .insert("FR".into(), 1);
    let sensitivity = two_injections_sensitivity(1100.0);

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    let state = result.state(&preventive()).unwrap();
    assert_eq!(
        state.range_action_setpoints.len(),
        1,
        "FR may only activate one range action"
    );
    let setpoint = state.range_action_setpoints.values().next().copied().unwrap();
    assert!((setpoint + 100.0).abs() < 1e-4);
    assert!(result.final_cost.min_margin().abs() < 1e-4);
}

#[test]
fn test_search_tree_combines_topological_actions() {
    let crac = topology_crac();
    let params = RaoParameters::default();
    let sensitivity = LinearSystemModel::new()
        .with_reference_flow("cnec", 1100.0)
        .with_network_action_shift("open-line-2", "cnec", -200.0)
        .with_network_action_shift("close-line-3", "cnec", -150.0);

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    let applied: Vec<&str> = result.activated_network_actions().into_iter().collect();
    assert_eq!(applied, vec!["close-line-3", "open-line-2"]);
    assert!((result.flows["cnec"] - 750.0).abs() < 1e-6);
    assert!((result.final_cost.functional_cost + 250.0).abs() < 1e-6);
}

#[test]
fn test_expired_deadline_times_out() {
    let crac = topology_crac();
    let mut params = RaoParameters::default();
    params.topo_optimization.max_duration_seconds = Some(1e-9);
    let sensitivity = LinearSystemModel::new()
        .with_reference_flow("cnec", 1100.0)
        .with_network_action_shift("open-line-2", "cnec", -200.0);

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(result.status, RaoStatus::TimedOut);
    assert!(result.activated_network_actions().is_empty());
}

#[test]
fn test_curative_action_secures_its_state() {
    let crac = curative_crac();
    let params = RaoParameters::default();
    let sensitivity = LinearSystemModel::new()
        .with_reference_flow("prev", 900.0)
        .with_reference_flow("cur", 1150.0)
        .with_sensitivity("cur", "cur-inj", -1.0);

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    let state = result.state(&curative()).expect("curative state result");
    let setpoint = state.range_action_setpoints["cur-inj"];
    assert!((setpoint - 200.0).abs() < 1e-4);
    assert!((result.flows["cur"] - 950.0).abs() < 1e-4);
    assert!((result.final_cost.functional_cost + 50.0).abs() < 1e-4);
    assert!(result.is_secure());
}

#[test]
fn test_failed_curative_perimeter_does_not_abort_the_run() {
    let crac = curative_crac();
    let params = RaoParameters::default();
    let sensitivity = LinearSystemModel::new()
        .with_reference_flow("prev", 900.0)
        .with_reference_flow("cur", 1150.0)
        .with_sensitivity("cur", "cur-inj", -1.0)
        .with_failing_state(curative());

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    let state = result.state(&curative()).expect("curative state result");
    assert!(state.range_action_setpoints.is_empty());
    assert_eq!(
        result.final_cost.virtual_costs.get(SENSITIVITY_FAILURE_COST),
        Some(&params.objective_function.sensitivity_failure_overcost)
    );
    assert!(!result.flows.contains_key("cur"));
}

#[test]
fn test_worse_solution_falls_back_to_initial() {
    let crac = curative_crac();
    let params = RaoParameters::default();

    let result = Rao::new(&crac, &params, &conflicting_sensitivity())
        .run()
        .unwrap();

    // the preventive tap overloads the curative CNEC by 150 MW
    assert_eq!(result.status, RaoStatus::FellBackToInitial);
    assert!(result.states.is_empty());
    assert_eq!(result.final_cost, result.initial_cost);
    assert_eq!(result.final_setpoints.setpoint("pst"), Some(0.0));
    assert_eq!(result.flows["cur"], 950.0);
}

#[test]
fn test_second_preventive_balances_both_instants() {
    let crac = curative_crac();
    let mut params = RaoParameters::default();
    params.second_preventive_rao.execution_condition =
        SecondPreventiveExecutionCondition::IfCurativeUnsecure;

    let result = Rao::new(&crac, &params, &conflicting_sensitivity())
        .run()
        .unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    let state = result.state(&preventive()).unwrap();
    assert_eq!(state.pst_taps.get("pst"), Some(&4));
    assert_eq!(result.final_setpoints.setpoint("pst"), Some(2.0));
    assert!((result.flows["prev"] - 1020.0).abs() < 1e-6);
    assert!((result.flows["cur"] - 1030.0).abs() < 1e-6);
    assert!((result.final_cost.functional_cost - 30.0).abs() < 1e-6);
}

#[test]
fn test_invalid_parameters_are_rejected() {
    let crac = single_pst_crac();
    let mut params = RaoParameters::default();
    params.range_actions_optimization.max_iterations = 0;
    let sensitivity = single_pst_sensitivity(1020.0, -5.0);

    let err = Rao::new(&crac, &params, &sensitivity).run().unwrap_err();
    assert!(matches!(err, RaoError::Config(_)));
}

#[test]
fn test_unavailable_sensitivity_fails_the_run() {
    let crac = single_pst_crac();
    let params = RaoParameters::default();
    let sensitivity = LinearSystemModel::new().unavailable();

    let err = Rao::new(&crac, &params, &sensitivity).run().unwrap_err();
    assert!(matches!(err, RaoError::Optimization(_)));
}

#[test]
fn test_diverging_optimization_keeps_the_initial_solution() {
    let crac = single_pst_crac();
    let params = RaoParameters::default();
    // the load flow diverges as soon as the PST leaves tap 0
    let sensitivity = single_pst_sensitivity(1020.0, -5.0).with_diverging_range_action("pst");

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    let state = result.state(&preventive()).expect("preventive state result");
    assert!(state.range_action_setpoints.is_empty());
    assert!(state.pst_taps.is_empty());
    assert_eq!(result.final_setpoints.setpoint("pst"), Some(0.0));
    assert!((result.flows["cnec"] - 1020.0).abs() < 1e-6);
    assert_eq!(result.final_cost, result.initial_cost);
}

/// Same hourly CRAC for every timestamp: one CNEC and one injection.
fn hourly_crac() -> Crac {
    CracBuilder::new("hourly")
        .add_flow_cnec(
            FlowCnec::new("cnec", "line", StateId::new("preventive"))
                .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0)),
        )
        .add_range_action(
            RangeAction::injection("inj", "gen", 0.0)
                .with_range(SetpointRange::absolute(-100.0, 100.0))
                .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available)),
        )
        .build()
        .expect("valid crac")
}

#[test]
fn test_multi_timestamp_gradient() {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
    let merged =
        Crac::merge_timestamps("day", vec![(t0, hourly_crac()), (t1, hourly_crac())]).unwrap();
    let mut params = RaoParameters::default();
    params
        .inter_temporal
        .max_setpoint_gradient
        .insert("gen".into(), 20.0);
    let sensitivity = MultiTimestampSensitivity::new()
        .with_timestamp(
            t0,
            hourly_crac(),
            Box::new(
                LinearSystemModel::new()
                    .with_reference_flow("cnec", 500.0)
                    .with_sensitivity("cnec", "inj", 1.0),
            ),
        )
        .with_timestamp(
            t1,
            hourly_crac(),
            Box::new(
                LinearSystemModel::new()
                    .with_reference_flow("cnec", 1100.0)
                    .with_sensitivity("cnec", "inj", 1.0),
            ),
        );

    let result = Rao::new(&merged, &params, &sensitivity)
        .optimize_multi_timestamp()
        .unwrap();

    assert_eq!(result.status, RaoStatus::Optimized);
    let first = result
        .state(&StateId::new(timestamped_id("preventive", &t0)))
        .expect("first hour");
    let second = result
        .state(&StateId::new(timestamped_id("preventive", &t1)))
        .expect("second hour");
    let x0 = first.range_action_setpoints[&timestamped_id("inj", &t0)];
    let x1 = second.range_action_setpoints[&timestamped_id("inj", &t1)];
    assert!((x1 + 100.0).abs() < 1e-4, "second hour needs -100 MW, got {}", x1);
    assert!((x0 + 80.0).abs() < 1e-4, "first hour follows the gradient, got {}", x0);
    assert!(result.final_cost.min_margin().abs() < 1e-4);
}

#[test]
fn test_result_exports_to_json() {
    let crac = topology_crac();
    let params = RaoParameters::default();
    let sensitivity = LinearSystemModel::new()
        .with_reference_flow("cnec", 1100.0)
        .with_network_action_shift("open-line-2", "cnec", -200.0);
    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.json");
    result.to_json(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed["flows"], result.to_json_value().unwrap()["flows"]);
    assert_eq!(parsed["status"], "optimized");
    assert_eq!(
        parsed["states"]["preventive"]["network_actions"][0],
        "open-line-2"
    );
}

#[test]
fn test_usage_limit_never_improves_the_cost() {
    let crac = two_injections_crac();
    let sensitivity = two_injections_sensitivity(1200.0);
    let unlimited = RaoParameters::default();
    let mut limited = RaoParameters::default();
    limited
        .ra_usage_limits_per_instant
        .entry("preventive".into())
        .or_default()
        .max_ra = Some(1);

    let free = Rao::new(&crac, &unlimited, &sensitivity).run().unwrap();
    let constrained = Rao::new(&crac, &limited, &sensitivity).run().unwrap();

    // both injections are needed to bring 1200 MW back to the limit
    assert!(free.final_cost.functional_cost.abs() < 1e-4);
    assert!((constrained.final_cost.functional_cost - 100.0).abs() < 1e-4);
    assert!(constrained.final_cost.cost() >= free.final_cost.cost());
}

#[test]
fn test_setpoints_stay_within_their_range() {
    let crac = single_pst_crac();
    let params = RaoParameters::default();
    // even the full range cannot secure this flow
    let sensitivity = single_pst_sensitivity(1300.0, -5.0);

    let result = Rao::new(&crac, &params, &sensitivity).run().unwrap();

    let state = result.state(&preventive()).unwrap();
    let setpoint = state.range_action_setpoints["pst"];
    assert!(setpoint <= 5.0 + 1e-5, "setpoint {} above the tap range", setpoint);
    assert_eq!(state.pst_taps.get("pst"), Some(&10));
    assert!(!result.is_secure());
}
