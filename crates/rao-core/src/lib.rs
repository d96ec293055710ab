//! # rao-core: Remedial Action Optimization data model
//!
//! The read-only view of a study that the optimizer works on: instants,
//! contingencies and the states they combine into, monitored elements (CNECs)
//! with their thresholds, and the catalogue of remedial actions.
//!
//! ## Quick Start
//!
//! ```rust
//! use rao_core::*;
//!
//! let crac = CracBuilder::new("study")
//!     .add_contingency(Contingency::new("co1", vec!["line-2".into()]))
//!     .add_flow_cnec(
//!         FlowCnec::new("line-1 - preventive", "line-1", StateId::new("preventive"))
//!             .with_threshold(Threshold::symmetric(Unit::Megawatt, 1000.0)),
//!     )
//!     .add_range_action(
//!         RangeAction::linear_pst("pst", "pst-element", -10, 10, 0.5, 0)
//!             .with_usage_rule(UsageRule::on_instant("preventive", UsageMethod::Available)),
//!     )
//!     .build()?;
//!
//! assert_eq!(crac.states().len(), 4);
//! # Ok::<(), RaoError>(())
//! ```
//!
//! ## Modules
//!
//! - [`state`]: instants, contingencies, states
//! - [`cnec`]: flow, voltage and angle CNECs with thresholds
//! - [`remedial_action`]: network and range actions
//! - [`usage_rule`]: availability of remedial actions per state
//! - [`crac`]: the container and its validating builder
//! - [`units`]: physical unit newtypes and conversions
//! - [`error`]: [`RaoError`] and [`RaoResult`]

pub mod cnec;
pub mod crac;
pub mod error;
pub mod remedial_action;
pub mod state;
pub mod units;
pub mod usage_rule;

pub use cnec::{AngleCnec, FlowCnec, Threshold, VoltageCnec};
pub use crac::{Crac, CracBuilder};
pub use error::{RaoError, RaoResult};
pub use remedial_action::{
    ActionType, ElementaryAction, NetworkAction, RangeAction, RangeActionKind, RangeType,
    RemedialAction, RemedialActionInfo, SetpointRange, VariationDirection,
};
pub use state::{strip_timestamp, timestamped_id, Contingency, Instant, InstantKind, State, StateId};
pub use units::{Amperes, Degrees, Kilovolts, Megawatts, Unit};
pub use usage_rule::{UsageMethod, UsageRule};
