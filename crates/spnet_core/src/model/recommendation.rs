//! Paper recommendations.
//!
//! # Invariants
//! - `private` recommendations never fan out.
//! - Empty `topics` means only `request_all` subscribers are recipients.
//! - `has_review` flips to `true` exactly when a comment is linked as review.

use crate::model::reference::PaperId;
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::model::{now_epoch_ms, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Stable recommendation identifier.
pub type RecommendationId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: RecommendationId,
    pub recommender: UserId,
    pub paper: PaperId,
    pub topics: BTreeSet<TopicId>,
    /// Highest level of recommendation; display emphasis only.
    pub must_read: bool,
    pub private: bool,
    pub has_review: bool,
    pub created_at: i64,
    pub version: Version,
}

/// Input for `RecommendationService::create_recommendation`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewRecommendation {
    pub recommender: UserId,
    pub paper: PaperId,
    pub topics: BTreeSet<TopicId>,
    pub must_read: bool,
    pub private: bool,
}

impl NewRecommendation {
    pub fn new(recommender: UserId, paper: PaperId) -> Self {
        Self {
            recommender,
            paper,
            ..Self::default()
        }
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = TopicId>) -> Self {
        self.topics = topics.into_iter().collect();
        self
    }

    pub fn must_read(mut self, must_read: bool) -> Self {
        self.must_read = must_read;
        self
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Materializes a persistable record with a generated id.
    pub fn into_recommendation(self) -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            recommender: self.recommender,
            paper: self.paper,
            topics: self.topics,
            must_read: self.must_read,
            private: self.private,
            has_review: false,
            created_at: now_epoch_ms(),
            version: 1,
        }
    }
}
