//! Retry wrapper for optimistic-concurrency conflicts.
//!
//! `Conflict` is the only retried error kind. The wrapped operation must
//! re-read the row it writes so every attempt carries a fresh version.

use crate::repo::RepoError;
use crate::service::comment_service::CommentServiceError;
use crate::service::merge_service::MergeServiceError;
use crate::service::recommendation_service::RecommendationServiceError;
use crate::service::subscription_service::SubscriptionServiceError;
use crate::service::topic_service::TopicServiceError;
use log::warn;

/// Attempts per write, including the first.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Errors that can tell whether they are a stale-version conflict.
pub trait Retryable {
    fn is_conflict(&self) -> bool;
}

macro_rules! impl_retryable {
    ($($error:ty),* $(,)?) => {
        $(
            impl Retryable for $error {
                fn is_conflict(&self) -> bool {
                    <$error>::is_conflict(self)
                }
            }
        )*
    };
}

impl_retryable!(
    RepoError,
    TopicServiceError,
    MergeServiceError,
    SubscriptionServiceError,
    RecommendationServiceError,
    CommentServiceError,
);

/// Runs `op` until it succeeds, fails with a non-conflict error, or
/// `max_attempts` is used up. `op` receives the 1-based attempt number.
pub fn retry_on_conflict<T, E, F>(max_attempts: usize, mut op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut(usize) -> Result<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Err(err) if err.is_conflict() && attempt < max_attempts => {
                warn!(
                    "event=write_retry module=retry status=conflict attempt={attempt} max_attempts={max_attempts}"
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{retry_on_conflict, Retryable};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Stale,
        Broken,
    }

    impl Retryable for FakeError {
        fn is_conflict(&self) -> bool {
            matches!(self, Self::Stale)
        }
    }

    #[test]
    fn retries_conflicts_until_success() {
        let result = retry_on_conflict(3, |attempt| {
            if attempt < 3 {
                Err(FakeError::Stale)
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), FakeError> = retry_on_conflict(2, |_| {
            calls += 1;
            Err(FakeError::Stale)
        });
        assert_eq!(result, Err(FakeError::Stale));
        assert_eq!(calls, 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), FakeError> = retry_on_conflict(5, |_| {
            calls += 1;
            Err(FakeError::Broken)
        });
        assert_eq!(result, Err(FakeError::Broken));
        assert_eq!(calls, 1);
    }
}
