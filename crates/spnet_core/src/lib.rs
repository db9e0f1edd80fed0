//! Core domain logic for SPNet: crowd-curated topics, merge consensus,
//! recommendation fan-out and threaded paper discussions.
//! This crate is the single source of truth for business invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod retry;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::comment::{Comment, CommentBody, CommentId, CommentSortKey, NewComment};
pub use model::merge::{MergeEdge, MergeEdgeId, MergeThreshold};
pub use model::recommendation::{NewRecommendation, Recommendation, RecommendationId};
pub use model::subscription::{Priority, Subscription};
pub use model::topic::{Topic, TopicId};
pub use model::user::UserId;
pub use repo::{EntityRef, RepoError, RepoResult};
pub use retry::{retry_on_conflict, Retryable, DEFAULT_MAX_ATTEMPTS};
pub use service::comment_service::{ChildCursor, CommentService, CommentServiceError, ThreadEntry};
pub use service::merge_resolver::{CanonicalCache, MergeResolver, Resolution, ResolveError};
pub use service::merge_service::{MergeService, MergeServiceError};
pub use service::recommendation_service::{
    Notifier, RecommendationService, RecommendationServiceError,
};
pub use service::router::{MatchReason, Recipient, RecommendationRouter, RouteError};
pub use service::subscription_service::{SubscriptionService, SubscriptionServiceError};
pub use service::topic_service::{TopicService, TopicServiceError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
