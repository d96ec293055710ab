//! Logging setup and business-log helpers
//!
//! Technical logs use the default module targets. Business logs (iteration
//! costs, limiting elements, leaf outcomes) go to [`BUSINESS_TARGET`] so they
//! can be filtered separately, e.g. `RUST_LOG=rao::business=info,warn`.

use tracing_subscriber::{fmt, prelude::*, registry::Registry, util::SubscriberInitExt, EnvFilter};

use crate::objective::ObjectiveFunctionResult;

/// Target of business log events.
pub const BUSINESS_TARGET: &str = "rao::business";

/// Install a console subscriber honouring `RUST_LOG` (default `info`).
///
/// Library code never calls this; binaries and tests embedding the optimizer do.
pub fn init_logging() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {}", e))
}

/// Format a cost with two decimals, spelling out infinities.
pub fn format_cost(value: f64) -> String {
    if value == f64::INFINITY {
        "+infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-infinity".to_string()
    } else {
        format!("{:.2}", value)
    }
}

/// `cost = X (functional: Y, virtual: Z)`
pub fn format_cost_breakdown(result: &ObjectiveFunctionResult) -> String {
    format!(
        "cost = {} (functional: {}, virtual: {})",
        format_cost(result.cost()),
        format_cost(result.functional_cost),
        format_cost(result.virtual_cost())
    )
}

/// Business log of one evaluated solution.
pub fn log_cost(prefix: &str, result: &ObjectiveFunctionResult) {
    tracing::info!(target: BUSINESS_TARGET, "{}: {}", prefix, format_cost_breakdown(result));
    for (name, cost) in &result.virtual_costs {
        if *cost > 0.0 {
            tracing::info!(
                target: BUSINESS_TARGET,
                "{}: {} virtual cost = {}",
                prefix,
                name,
                format_cost(*cost)
            );
        }
    }
}

/// Business log of the `count` most limiting elements.
pub fn log_most_limiting_elements(result: &ObjectiveFunctionResult, count: usize) {
    for (rank, (cnec, margin)) in result.limiting_elements.iter().take(count).enumerate() {
        tracing::info!(
            target: BUSINESS_TARGET,
            "Limiting element #{:02}: margin = {} MW, element {}",
            rank + 1,
            format_cost(*margin),
            cnec
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(f64::INFINITY), "+infinity");
        assert_eq!(format_cost(f64::NEG_INFINITY), "-infinity");
        assert_eq!(format_cost(11738.8), "11738.80");
        assert_eq!(format_cost(-0.004), "-0.00");
    }

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        let _ = init_logging();
        let _ = init_logging();
    }
}
