//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Host the merge consensus resolver, the recommendation router and the
//!   comment forest on top of the repository traits.

pub mod comment_service;
pub mod merge_resolver;
pub mod merge_service;
pub mod recommendation_service;
pub mod router;
pub mod subscription_service;
pub mod topic_service;
