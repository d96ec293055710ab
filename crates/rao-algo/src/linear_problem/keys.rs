use std::fmt;

use rao_core::StateId;

/// A range action optimized at one state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RaKey {
    pub range_action: String,
    pub state: StateId,
}

impl RaKey {
    pub fn new(range_action: impl Into<String>, state: StateId) -> Self {
        Self {
            range_action: range_action.into(),
            state,
        }
    }
}

impl fmt::Display for RaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.range_action, self.state)
    }
}

/// Which side of a two-sided relation a constraint encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoundSide {
    Lower,
    Upper,
}

impl fmt::Display for BoundSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundSide::Lower => write!(f, "lower"),
            BoundSide::Upper => write!(f, "upper"),
        }
    }
}

/// Domain identity of an LP variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableKey {
    /// Flow of a CNEC (MW)
    Flow { cnec: String },
    /// Setpoint of a range action (angle for PSTs)
    Setpoint(RaKey),
    /// |setpoint - pre-perimeter setpoint|
    AbsoluteVariation(RaKey),
    UpwardVariation(RaKey),
    DownwardVariation(RaKey),
    /// Binary: the range action moved
    IsVariation(RaKey),
    /// Integer tap moves around the current tap
    TapUpwardVariation(RaKey),
    TapDownwardVariation(RaKey),
    TapUpwardBinary(RaKey),
    TapDownwardBinary(RaKey),
    /// Binary: the operator activated at least one range action at the state
    TsoRaUsed { operator: String, state: StateId },
    MinimumMargin,
    MinimumRelativeMargin,
    /// Binary: every optimized margin is positive
    MarginSignBinary,
    MnecViolation { cnec: String },
    /// Overload of the most limiting element (MW), min-cost objective
    MarginViolation,
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKey::Flow { cnec } => write!(f, "flow({})", cnec),
            VariableKey::Setpoint(k) => write!(f, "setpoint({})", k),
            VariableKey::AbsoluteVariation(k) => write!(f, "absolute_variation({})", k),
            VariableKey::UpwardVariation(k) => write!(f, "upward_variation({})", k),
            VariableKey::DownwardVariation(k) => write!(f, "downward_variation({})", k),
            VariableKey::IsVariation(k) => write!(f, "is_variation({})", k),
            VariableKey::TapUpwardVariation(k) => write!(f, "tap_upward_variation({})", k),
            VariableKey::TapDownwardVariation(k) => write!(f, "tap_downward_variation({})", k),
            VariableKey::TapUpwardBinary(k) => write!(f, "tap_upward_binary({})", k),
            VariableKey::TapDownwardBinary(k) => write!(f, "tap_downward_binary({})", k),
            VariableKey::TsoRaUsed { operator, state } => {
                write!(f, "tso_ra_used({}, {})", operator, state)
            }
            VariableKey::MinimumMargin => write!(f, "minimum_margin"),
            VariableKey::MinimumRelativeMargin => write!(f, "minimum_relative_margin"),
            VariableKey::MarginSignBinary => write!(f, "margin_sign_binary"),
            VariableKey::MnecViolation { cnec } => write!(f, "mnec_violation({})", cnec),
            VariableKey::MarginViolation => write!(f, "margin_violation"),
        }
    }
}

/// Domain identity of an LP constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstraintKey {
    /// flow - sum(sensi * setpoint) = reference - sum(sensi * reference setpoint)
    Flow { cnec: String },
    AbsoluteVariation { ra: RaKey, side: BoundSide },
    /// setpoint - upward + downward = pre-perimeter setpoint
    VariationDecomposition(RaKey),
    /// absolute variation - range * is_variation <= relaxation
    IsVariation(RaKey),
    /// setpoint of a group member equals the group's first member
    Group { group: String, ra: RaKey },
    MaxRa { state: StateId },
    MaxTso { state: StateId },
    TsoRaUsed { operator: String, ra: RaKey },
    MaxRaPerTso { operator: String, state: StateId },
    MaxPstPerTso { operator: String, state: StateId },
    MinimumMargin { cnec: String, side: BoundSide },
    MinimumRelativeMargin { cnec: String, side: BoundSide },
    MarginSign,
    RelativeMarginSign,
    Mnec { cnec: String, side: BoundSide },
    MarginViolation { cnec: String, side: BoundSide },
    /// angle setpoint linked to integer tap moves
    TapToAngle(RaKey),
    TapUpwardRelaxation(RaKey),
    TapDownwardRelaxation(RaKey),
    TapDirection(RaKey),
    /// setpoint difference between consecutive timestamps
    InterTemporal { first: RaKey, second: RaKey },
}

impl fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKey::Flow { cnec } => write!(f, "flow_constraint({})", cnec),
            ConstraintKey::AbsoluteVariation { ra, side } => {
                write!(f, "absolute_variation_constraint({}, {})", ra, side)
            }
            ConstraintKey::VariationDecomposition(k) => write!(f, "variation_decomposition({})", k),
            ConstraintKey::IsVariation(k) => write!(f, "is_variation_constraint({})", k),
            ConstraintKey::Group { group, ra } => write!(f, "group_constraint({}, {})", group, ra),
            ConstraintKey::MaxRa { state } => write!(f, "max_ra({})", state),
            ConstraintKey::MaxTso { state } => write!(f, "max_tso({})", state),
            ConstraintKey::TsoRaUsed { operator, ra } => {
                write!(f, "tso_ra_used_constraint({}, {})", operator, ra)
            }
            ConstraintKey::MaxRaPerTso { operator, state } => {
                write!(f, "max_ra_per_tso({}, {})", operator, state)
            }
            ConstraintKey::MaxPstPerTso { operator, state } => {
                write!(f, "max_pst_per_tso({}, {})", operator, state)
            }
            ConstraintKey::MinimumMargin { cnec, side } => {
                write!(f, "minimum_margin_constraint({}, {})", cnec, side)
            }
            ConstraintKey::MinimumRelativeMargin { cnec, side } => {
                write!(f, "minimum_relative_margin_constraint({}, {})", cnec, side)
            }
            ConstraintKey::MarginSign => write!(f, "margin_sign"),
            ConstraintKey::RelativeMarginSign => write!(f, "relative_margin_sign"),
            ConstraintKey::Mnec { cnec, side } => write!(f, "mnec_constraint({}, {})", cnec, side),
            ConstraintKey::MarginViolation { cnec, side } => {
                write!(f, "margin_violation_constraint({}, {})", cnec, side)
            }
            ConstraintKey::TapToAngle(k) => write!(f, "tap_to_angle({})", k),
            ConstraintKey::TapUpwardRelaxation(k) => write!(f, "tap_upward_relaxation({})", k),
            ConstraintKey::TapDownwardRelaxation(k) => write!(f, "tap_downward_relaxation({})", k),
            ConstraintKey::TapDirection(k) => write!(f, "tap_direction({})", k),
            ConstraintKey::InterTemporal { first, second } => {
                write!(f, "inter_temporal({} -> {})", first, second)
            }
        }
    }
}
