//! Recommendation use-case service and notifier hand-off.
//!
//! # Responsibility
//! - Create recommendations against existing papers and topics.
//! - Route stored recommendations and hand recipients to a `Notifier`.
//!
//! # Invariants
//! - Private recommendations never reach the notifier.

use crate::model::recommendation::{NewRecommendation, Recommendation, RecommendationId};
use crate::model::reference::PaperId;
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::repo::merge_repo::MergeRepository;
use crate::repo::recommendation_repo::RecommendationRepository;
use crate::repo::subscription_repo::SubscriptionRepository;
use crate::repo::{EntityRef, RepoError, RepoResult};
use crate::service::router::{RecommendationRouter, Recipient, RouteError};
use log::{error, info};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Outbound delivery collaborator. Receives the routed recipient list; the
/// core makes no delivery guarantee.
pub trait Notifier {
    fn notify(
        &self,
        recommendation: &Recommendation,
        recipients: &[Recipient],
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Errors from recommendation operations.
#[derive(Debug)]
pub enum RecommendationServiceError {
    RecommendationNotFound(RecommendationId),
    PaperNotFound(PaperId),
    TopicNotFound(TopicId),
    /// The recommender has no subscribers at all.
    UnknownRecommender(UserId),
    /// Routing failed below the service.
    Route(RouteError),
    /// The notifier rejected the hand-off.
    Notify(Box<dyn Error + Send + Sync>),
    Repo(RepoError),
}

impl RecommendationServiceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Repo(err) if err.is_conflict())
    }
}

impl Display for RecommendationServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecommendationNotFound(id) => write!(f, "recommendation not found: {id}"),
            Self::PaperNotFound(id) => write!(f, "paper not found: {id}"),
            Self::TopicNotFound(id) => write!(f, "topic not found: {id}"),
            Self::UnknownRecommender(id) => {
                write!(f, "recommender {id} has no subscription entries")
            }
            Self::Route(err) => write!(f, "{err}"),
            Self::Notify(err) => write!(f, "notifier failed: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RecommendationServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Route(err) => Some(err),
            Self::Notify(err) => Some(err.as_ref()),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for RecommendationServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(EntityRef::Recommendation(id)) => Self::RecommendationNotFound(id),
            RepoError::NotFound(EntityRef::Paper(id)) => Self::PaperNotFound(id),
            RepoError::NotFound(EntityRef::Topic(id)) => Self::TopicNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<RouteError> for RecommendationServiceError {
    fn from(value: RouteError) -> Self {
        match value {
            RouteError::UnknownRecommender(id) => Self::UnknownRecommender(id),
            other => Self::Route(other),
        }
    }
}

/// Recommendation service facade.
pub struct RecommendationService<R, M, S>
where
    R: RecommendationRepository,
    M: MergeRepository,
    S: SubscriptionRepository,
{
    repo: R,
    router: RecommendationRouter<M, S>,
}

impl<R, M, S> RecommendationService<R, M, S>
where
    R: RecommendationRepository,
    M: MergeRepository,
    S: SubscriptionRepository,
{
    pub fn new(repo: R, router: RecommendationRouter<M, S>) -> Self {
        Self { repo, router }
    }

    /// Stores a recommendation after checking the paper and its topics.
    pub fn create_recommendation(
        &self,
        new: NewRecommendation,
    ) -> Result<RecommendationId, RecommendationServiceError> {
        if !self.repo.paper_exists(new.paper)? {
            return Err(RecommendationServiceError::PaperNotFound(new.paper));
        }
        for topic in &new.topics {
            if !self.repo.topic_exists(*topic)? {
                return Err(RecommendationServiceError::TopicNotFound(*topic));
            }
        }

        let recommendation = new.into_recommendation();
        let id = self.repo.create_recommendation(&recommendation)?;
        info!(
            "event=recommendation_create module=recommendation status=ok recommendation_id={id} topics={} private={}",
            recommendation.topics.len(),
            recommendation.private
        );
        Ok(id)
    }

    pub fn get_recommendation(&self, id: RecommendationId) -> RepoResult<Option<Recommendation>> {
        self.repo.get_recommendation(id)
    }

    pub fn list_by_recommender(&self, recommender: UserId) -> RepoResult<Vec<Recommendation>> {
        self.repo.list_by_recommender(recommender)
    }

    /// Subscribers entitled to the stored recommendation `id`.
    pub fn route(
        &self,
        id: RecommendationId,
    ) -> Result<BTreeSet<UserId>, RecommendationServiceError> {
        let recommendation = self.require_recommendation(id)?;
        Ok(self.router.route(&recommendation)?)
    }

    /// Routed recipients with priority, ordered for delivery.
    pub fn route_detailed(
        &self,
        id: RecommendationId,
    ) -> Result<Vec<Recipient>, RecommendationServiceError> {
        let recommendation = self.require_recommendation(id)?;
        Ok(self.router.route_detailed(&recommendation)?)
    }

    /// Routes `id` and hands the recipients to `notifier`.
    ///
    /// Returns the number of recipients handed off. Nothing is handed off
    /// when the recipient list is empty.
    pub fn publish(
        &self,
        id: RecommendationId,
        notifier: &dyn Notifier,
    ) -> Result<usize, RecommendationServiceError> {
        let recommendation = self.require_recommendation(id)?;
        let recipients = self.router.route_detailed(&recommendation)?;
        if recipients.is_empty() {
            return Ok(0);
        }
        if let Err(err) = notifier.notify(&recommendation, &recipients) {
            error!(
                "event=recommendation_publish module=recommendation status=error recommendation_id={id}"
            );
            return Err(RecommendationServiceError::Notify(err));
        }
        info!(
            "event=recommendation_publish module=recommendation status=ok recommendation_id={id} recipients={}",
            recipients.len()
        );
        Ok(recipients.len())
    }

    pub fn router(&self) -> &RecommendationRouter<M, S> {
        &self.router
    }

    fn require_recommendation(
        &self,
        id: RecommendationId,
    ) -> Result<Recommendation, RecommendationServiceError> {
        self.repo
            .get_recommendation(id)?
            .ok_or(RecommendationServiceError::RecommendationNotFound(id))
    }
}
