//! Instants, contingencies and the states they combine into.
//!
//! A [`State`] is a `(contingency | none, instant)` pair. States are ordered by
//! instant first (preventive < outage < auto < curative-1 < curative-2 ...),
//! then by contingency id so that iteration over a `BTreeMap<StateId, _>` is
//! deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Kind of instant a state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstantKind {
    Preventive,
    Outage,
    Auto,
    Curative,
}

/// A point in time after (or before) a contingency.
///
/// `order` gives the total order between instants; two curative instants of
/// the same CRAC share [`InstantKind::Curative`] but differ by order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instant {
    pub id: String,
    pub kind: InstantKind,
    pub order: u32,
}

impl Instant {
    pub fn new(id: impl Into<String>, kind: InstantKind, order: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            order,
        }
    }

    pub fn preventive() -> Self {
        Self::new("preventive", InstantKind::Preventive, 0)
    }

    pub fn outage() -> Self {
        Self::new("outage", InstantKind::Outage, 1)
    }

    pub fn auto() -> Self {
        Self::new("auto", InstantKind::Auto, 2)
    }

    /// Curative instant number `n` (1-based).
    pub fn curative(n: u32) -> Self {
        let id = if n == 1 {
            "curative".to_string()
        } else {
            format!("curative{}", n)
        };
        Self::new(id, InstantKind::Curative, 2 + n)
    }

    pub fn is_preventive(&self) -> bool {
        self.kind == InstantKind::Preventive
    }

    pub fn is_outage(&self) -> bool {
        self.kind == InstantKind::Outage
    }

    pub fn is_auto(&self) -> bool {
        self.kind == InstantKind::Auto
    }

    pub fn is_curative(&self) -> bool {
        self.kind == InstantKind::Curative
    }

    /// Whether this instant comes strictly before `other`.
    pub fn comes_before(&self, other: &Instant) -> bool {
        self.order < other.order
    }
}

impl PartialOrd for Instant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Instant {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A set of network elements tripped together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contingency {
    pub id: String,
    pub name: Option<String>,
    pub elements: Vec<String>,
}

impl Contingency {
    pub fn new(id: impl Into<String>, elements: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            elements,
        }
    }
}

/// Stable identifier of a state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        StateId(value.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(value: &str) -> Self {
        StateId::new(value)
    }
}

/// Suffix appended to ids scoped to one timestamp.
pub fn timestamp_suffix(timestamp: &DateTime<Utc>) -> String {
    format!(" @ {}", timestamp.format("%Y-%m-%dT%H:%MZ"))
}

/// `"<id> @ <timestamp>"`
pub fn timestamped_id(id: &str, timestamp: &DateTime<Utc>) -> String {
    format!("{}{}", id, timestamp_suffix(timestamp))
}

/// Inverse of [`timestamped_id`]; `None` if `id` belongs to another timestamp.
pub fn strip_timestamp<'a>(id: &'a str, timestamp: &DateTime<Utc>) -> Option<&'a str> {
    id.strip_suffix(timestamp_suffix(timestamp).as_str())
}

/// A (contingency, instant) pair, optionally pinned to a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    id: StateId,
    contingency: Option<String>,
    instant: Instant,
    timestamp: Option<DateTime<Utc>>,
}

impl State {
    /// The preventive state, which has no contingency.
    pub fn preventive(instant: Instant) -> Self {
        Self {
            id: StateId::new(instant.id.clone()),
            contingency: None,
            instant,
            timestamp: None,
        }
    }

    /// A post-contingency state.
    pub fn post_contingency(contingency_id: impl Into<String>, instant: Instant) -> Self {
        let contingency_id = contingency_id.into();
        Self {
            id: StateId::new(format!("{} - {}", contingency_id, instant.id)),
            contingency: Some(contingency_id),
            instant,
            timestamp: None,
        }
    }

    /// Pin the state to a timestamp. The timestamp becomes part of the id so
    /// that states of different timestamps never collide.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.id = StateId::new(timestamped_id(self.id.as_str(), &timestamp));
        self.timestamp = Some(timestamp);
        self
    }

    pub fn id(&self) -> &StateId {
        &self.id
    }

    pub fn contingency(&self) -> Option<&str> {
        self.contingency.as_deref()
    }

    pub fn instant(&self) -> &Instant {
        &self.instant
    }

    pub fn timestamp(&self) -> Option<&DateTime<Utc>> {
        self.timestamp.as_ref()
    }

    pub fn is_preventive(&self) -> bool {
        self.contingency.is_none()
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant
            .cmp(&other.instant)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.contingency.cmp(&other.contingency))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_ids() {
        let prev = State::preventive(Instant::preventive());
        assert_eq!(prev.id().as_str(), "preventive");
        assert!(prev.is_preventive());

        let cur = State::post_contingency("co1", Instant::curative(1));
        assert_eq!(cur.id().as_str(), "co1 - curative");
        assert_eq!(cur.contingency(), Some("co1"));
    }

    #[test]
    fn test_state_ordering_follows_instants() {
        let prev = State::preventive(Instant::preventive());
        let outage = State::post_contingency("co1", Instant::outage());
        let auto = State::post_contingency("co1", Instant::auto());
        let cur1 = State::post_contingency("co1", Instant::curative(1));
        let cur2 = State::post_contingency("co0", Instant::curative(2));

        let mut states = vec![cur2.clone(), auto.clone(), prev.clone(), cur1.clone(), outage.clone()];
        states.sort();
        assert_eq!(states, vec![prev, outage, auto, cur1, cur2]);
    }

    #[test]
    fn test_timestamped_state_ids_are_distinct() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let s0 = State::preventive(Instant::preventive()).with_timestamp(t0);
        let s1 = State::preventive(Instant::preventive()).with_timestamp(t1);
        assert_ne!(s0.id(), s1.id());
        assert!(s0 < s1);
        assert_eq!(s0.id().as_str(), "preventive @ 2024-01-01T00:00Z");
        assert_eq!(strip_timestamp(s0.id().as_str(), &t0), Some("preventive"));
        assert_eq!(strip_timestamp(s0.id().as_str(), &t1), None);
    }

    #[test]
    fn test_instant_helpers() {
        assert!(Instant::preventive().comes_before(&Instant::outage()));
        assert!(Instant::auto().comes_before(&Instant::curative(1)));
        assert_eq!(Instant::curative(2).id, "curative2");
        assert!(Instant::curative(3).is_curative());
    }
}
