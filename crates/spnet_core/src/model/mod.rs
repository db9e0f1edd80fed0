//! Domain model for topics, merges, subscriptions, recommendations and
//! threaded comments.
//!
//! # Responsibility
//! - Define canonical records used by repositories and services.
//! - Own write-side validation rules (`validate()` / normalizers).
//!
//! # Invariants
//! - Every entity is identified by a stable UUID v4.
//! - Mutable entities carry a `version` used for optimistic concurrency.

pub mod comment;
pub mod merge;
pub mod recommendation;
pub mod reference;
pub mod subscription;
pub mod topic;
pub mod user;
pub mod validation;

/// Optimistic-concurrency row version. Starts at 1, bumped on every write.
pub type Version = i64;

/// Returns the current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
