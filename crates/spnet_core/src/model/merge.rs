//! Merge proposal edges and the consensus threshold.
//!
//! # Invariants
//! - At most one edge per `(proposer, from_topic, to_topic)`.
//! - `from_topic != to_topic`; longer cycles are allowed in storage and are
//!   resolved by `MergeResolver`.
//! - `MergeThreshold` is always inside `(0, 1]`.

use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::model::Version;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable merge edge identifier.
pub type MergeEdgeId = Uuid;

/// Default consensus threshold: a strict majority of engaged members.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.5;

// Absorbs float error in `threshold * members` (e.g. 0.29 * 100).
const THRESHOLD_EPSILON: f64 = 1e-9;

/// One user's proposal to fold `from_topic` into `to_topic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEdge {
    pub id: MergeEdgeId,
    pub proposer: UserId,
    pub from_topic: TopicId,
    pub to_topic: TopicId,
    /// Proposer opts out of majority-driven merges for this pair.
    pub block_merger: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: Version,
}

impl MergeEdge {
    /// Whether this edge counts as support for merging its pair.
    pub fn supports_merge(&self) -> bool {
        !self.block_merger
    }
}

/// Rejected threshold value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidThreshold(pub f64);

impl Display for InvalidThreshold {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "merge threshold must be a fraction in (0, 1], got {}",
            self.0
        )
    }
}

impl std::error::Error for InvalidThreshold {}

/// Fraction of a topic's engaged members that must propose a merge before
/// it applies to everyone who has not blocked it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct MergeThreshold(f64);

impl MergeThreshold {
    pub fn new(value: f64) -> Result<Self, InvalidThreshold> {
        if value.is_finite() && value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(InvalidThreshold(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Number of supporters needed among `members` engaged members.
    ///
    /// Formula: `min(members, floor(threshold * members) + 1)`, i.e. the
    /// supporters must strictly exceed the threshold share, except that
    /// unanimity always suffices. A support count exactly equal to the
    /// threshold share does not carry: at 0.6, 3 of 5 falls short, and so
    /// does 1 of 4 at 0.25. Returns `None` when there are no members, since
    /// no consensus can exist.
    pub fn required_supporters(self, members: usize) -> Option<usize> {
        if members == 0 {
            return None;
        }
        let share = (self.0 * members as f64 + THRESHOLD_EPSILON).floor() as usize;
        Some((share + 1).min(members))
    }

    /// Whether `supporters` out of `members` carries the merge.
    pub fn is_met(self, supporters: usize, members: usize) -> bool {
        self.required_supporters(members)
            .is_some_and(|required| supporters >= required)
    }
}

impl Default for MergeThreshold {
    fn default() -> Self {
        Self(DEFAULT_MERGE_THRESHOLD)
    }
}

impl TryFrom<f64> for MergeThreshold {
    type Error = InvalidThreshold;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MergeThreshold> for f64 {
    fn from(value: MergeThreshold) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::MergeThreshold;

    #[test]
    fn rejects_values_outside_unit_interval() {
        for value in [0.0, -0.1, 1.01, f64::NAN, f64::INFINITY] {
            assert!(MergeThreshold::new(value).is_err(), "{value} accepted");
        }
        assert!(MergeThreshold::new(1.0).is_ok());
    }

    #[test]
    fn majority_requires_strictly_more_than_half() {
        let majority = MergeThreshold::default();
        let cases = [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3), (10, 6)];
        for (members, required) in cases {
            assert_eq!(
                majority.required_supporters(members),
                Some(required),
                "members={members}"
            );
        }
        assert!(!majority.is_met(1, 2));
        assert!(majority.is_met(2, 3));
    }

    #[test]
    fn unanimity_threshold_is_reachable() {
        let unanimous = MergeThreshold::new(1.0).unwrap();
        assert_eq!(unanimous.required_supporters(4), Some(4));
        assert!(unanimous.is_met(4, 4));
        assert!(!unanimous.is_met(3, 4));
    }

    #[test]
    fn no_members_means_no_consensus() {
        assert_eq!(MergeThreshold::default().required_supporters(0), None);
        assert!(!MergeThreshold::default().is_met(5, 0));
    }

    #[test]
    fn exact_threshold_share_does_not_carry() {
        let cases = [(0.6, 3, 5), (0.25, 1, 4), (1.0 / 3.0, 1, 3)];
        for (value, supporters, members) in cases {
            let threshold = MergeThreshold::new(value).unwrap();
            assert!(
                !threshold.is_met(supporters, members),
                "threshold={value} supporters={supporters} members={members}"
            );
            assert!(threshold.is_met(supporters + 1, members));
        }
    }

    #[test]
    fn float_products_do_not_undercount() {
        let threshold = MergeThreshold::new(0.29).unwrap();
        assert_eq!(threshold.required_supporters(100), Some(30));
    }
}
