//! Subscription registry use-case service.

use crate::model::subscription::{Priority, Subscription};
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use crate::model::Version;
use crate::repo::subscription_repo::SubscriptionRepository;
use crate::repo::{EntityRef, RepoError, RepoResult};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from subscription registry operations.
#[derive(Debug)]
pub enum SubscriptionServiceError {
    Validation(ValidationError),
    SubscriptionNotFound {
        subscriber: UserId,
        recommender: UserId,
    },
    Conflict {
        subscriber: UserId,
        recommender: UserId,
        expected: Version,
        actual: Version,
    },
    Repo(RepoError),
}

impl SubscriptionServiceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl Display for SubscriptionServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::SubscriptionNotFound {
                subscriber,
                recommender,
            } => write!(f, "subscription not found: {subscriber}->{recommender}"),
            Self::Conflict {
                subscriber,
                recommender,
                expected,
                actual,
            } => write!(
                f,
                "stale write to subscription {subscriber}->{recommender}: expected version {expected}, found {actual}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SubscriptionServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SubscriptionServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(EntityRef::Subscription {
                subscriber,
                recommender,
            }) => Self::SubscriptionNotFound {
                subscriber,
                recommender,
            },
            RepoError::Conflict {
                entity:
                    EntityRef::Subscription {
                        subscriber,
                        recommender,
                    },
                expected,
                actual,
            } => Self::Conflict {
                subscriber,
                recommender,
                expected,
                actual,
            },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

/// Subscription service facade.
pub struct SubscriptionService<R: SubscriptionRepository> {
    repo: R,
}

impl<R: SubscriptionRepository> SubscriptionService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates the subscription or overwrites priority and `request_all`
    /// of the existing one.
    pub fn upsert_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
        priority: Priority,
        request_all: bool,
    ) -> Result<Subscription, SubscriptionServiceError> {
        if subscriber == recommender {
            return Err(SubscriptionServiceError::Validation(
                ValidationError::SelfSubscription,
            ));
        }
        let subscription =
            self.repo
                .upsert_subscription(subscriber, recommender, priority, request_all)?;
        info!(
            "event=subscription_upsert module=subscription status=ok priority={} request_all={} version={}",
            subscription.priority.as_str(),
            subscription.request_all,
            subscription.version
        );
        Ok(subscription)
    }

    pub fn get_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
    ) -> RepoResult<Option<Subscription>> {
        self.repo.get_subscription(subscriber, recommender)
    }

    /// Subscribers of `recommender`, ordered by subscriber id.
    pub fn list_subscriptions_for_recommender(
        &self,
        recommender: UserId,
    ) -> RepoResult<Vec<Subscription>> {
        self.repo.list_for_recommender(recommender)
    }

    /// Recommenders followed by `subscriber`, ordered by recommender id.
    pub fn list_subscriptions_for_subscriber(
        &self,
        subscriber: UserId,
    ) -> RepoResult<Vec<Subscription>> {
        self.repo.list_for_subscriber(subscriber)
    }

    pub fn remove_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
        expected_version: Version,
    ) -> Result<(), SubscriptionServiceError> {
        self.repo
            .remove_subscription(subscriber, recommender, expected_version)?;
        info!("event=subscription_remove module=subscription status=ok");
        Ok(())
    }
}
