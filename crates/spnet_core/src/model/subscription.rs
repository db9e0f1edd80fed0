//! Subscriber -> recommender edges.
//!
//! # Invariants
//! - At most one subscription per `(subscriber, recommender)`; upserts
//!   overwrite `priority` / `request_all` and bump `version`.
//! - `subscriber != recommender`.

use crate::model::user::UserId;
use crate::model::Version;
use serde::{Deserialize, Serialize};

/// Delivery priority a subscriber assigns to one recommender.
///
/// Declaration order is the delivery order: `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Persisted subscription edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber: UserId,
    pub recommender: UserId,
    pub priority: Priority,
    /// Receive every non-private recommendation regardless of topic.
    pub request_all: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: Version,
}
