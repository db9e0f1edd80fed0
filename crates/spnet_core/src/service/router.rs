//! Recommendation fan-out router.
//!
//! # Responsibility
//! - Compute the subscribers entitled to receive one recommendation.
//!
//! # Invariants
//! - Private recommendations route to nobody; this is checked before any
//!   other rule.
//! - `request_all` subscribers receive every non-private recommendation.
//! - Topic matching compares canonical topics computed from each
//!   subscriber's own perspective, for both sides.
//! - `must_read` never changes membership.

use crate::model::recommendation::Recommendation;
use crate::model::subscription::{Priority, Subscription};
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::repo::merge_repo::MergeRepository;
use crate::repo::subscription_repo::SubscriptionRepository;
use crate::repo::RepoError;
use crate::service::merge_resolver::{MergeResolver, ResolveError};
use log::info;
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from routing.
#[derive(Debug)]
pub enum RouteError {
    /// The recommender has no subscribers at all.
    UnknownRecommender(UserId),
    /// Canonicalization failed for one of the topics.
    Resolve(ResolveError),
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for RouteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRecommender(id) => {
                write!(f, "recommender {id} has no subscription entries")
            }
            Self::Resolve(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RouteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resolve(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::UnknownRecommender(_) => None,
        }
    }
}

impl From<ResolveError> for RouteError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

impl From<RepoError> for RouteError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Why a subscriber was selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "topics")]
pub enum MatchReason {
    RequestAll,
    /// Canonical topics shared by the recommendation and the subscriber.
    Topics(BTreeSet<TopicId>),
}

/// One routed delivery, handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub subscriber: UserId,
    pub priority: Priority,
    /// Display emphasis only.
    pub must_read: bool,
    pub matched_by: MatchReason,
}

/// Fan-out router over the merge graph and the subscription registry.
pub struct RecommendationRouter<M: MergeRepository, S: SubscriptionRepository> {
    resolver: MergeResolver<M>,
    subscriptions: S,
}

impl<M: MergeRepository, S: SubscriptionRepository> RecommendationRouter<M, S> {
    pub fn new(resolver: MergeResolver<M>, subscriptions: S) -> Self {
        Self {
            resolver,
            subscriptions,
        }
    }

    pub fn resolver(&self) -> &MergeResolver<M> {
        &self.resolver
    }

    /// Subscribers that receive `recommendation`.
    pub fn route(&self, recommendation: &Recommendation) -> Result<BTreeSet<UserId>, RouteError> {
        Ok(self
            .route_detailed(recommendation)?
            .into_iter()
            .map(|recipient| recipient.subscriber)
            .collect())
    }

    /// Recipients ordered by priority (`High` first), then subscriber id.
    pub fn route_detailed(
        &self,
        recommendation: &Recommendation,
    ) -> Result<Vec<Recipient>, RouteError> {
        if recommendation.private {
            info!(
                "event=route module=router status=skipped reason=private recommendation_id={}",
                recommendation.id
            );
            return Ok(Vec::new());
        }

        let subscriptions = self
            .subscriptions
            .list_for_recommender(recommendation.recommender)?;
        if subscriptions.is_empty() {
            return Err(RouteError::UnknownRecommender(recommendation.recommender));
        }

        let mut recipients = Vec::new();
        for subscription in &subscriptions {
            if let Some(matched_by) = self.match_subscriber(recommendation, subscription)? {
                recipients.push(Recipient {
                    subscriber: subscription.subscriber,
                    priority: subscription.priority,
                    must_read: recommendation.must_read,
                    matched_by,
                });
            }
        }
        recipients.sort_by_key(|recipient| (recipient.priority, recipient.subscriber));

        info!(
            "event=route module=router status=ok recommendation_id={} subscribers={} recipients={}",
            recommendation.id,
            subscriptions.len(),
            recipients.len()
        );
        Ok(recipients)
    }

    fn match_subscriber(
        &self,
        recommendation: &Recommendation,
        subscription: &Subscription,
    ) -> Result<Option<MatchReason>, RouteError> {
        if subscription.request_all {
            return Ok(Some(MatchReason::RequestAll));
        }
        if recommendation.topics.is_empty() {
            return Ok(None);
        }

        let viewer = subscription.subscriber;
        let interests = self.subscriptions.interest_topics(viewer)?;
        if interests.is_empty() {
            return Ok(None);
        }
        let wanted = self.resolver.canonicalize_all(&interests, viewer)?;
        let offered = self
            .resolver
            .canonicalize_all(&recommendation.topics, viewer)?;

        let shared: BTreeSet<TopicId> = offered.intersection(&wanted).copied().collect();
        if shared.is_empty() {
            Ok(None)
        } else {
            Ok(Some(MatchReason::Topics(shared)))
        }
    }
}
