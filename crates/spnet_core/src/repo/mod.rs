//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service/business orchestration.
//! - Enforce optimistic concurrency on versioned rows.
//!
//! # Invariants
//! - Versioned writes match `WHERE ... AND version = expected` and report
//!   `RepoError::Conflict` (not `NotFound`) when the row exists with
//!   another version.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Every merge-edge or topic-membership write bumps the merge graph
//!   generation inside the same transaction.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::comment::CommentId;
use crate::model::merge::MergeEdgeId;
use crate::model::recommendation::RecommendationId;
use crate::model::reference::{AuthorId, PaperId, PaperSourceId};
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use crate::model::Version;
use rusqlite::{Connection, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod comment_repo;
pub mod merge_repo;
pub mod recommendation_repo;
pub mod reference_repo;
pub mod subscription_repo;
pub mod topic_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Identifies the row a repository error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Topic(TopicId),
    MergeEdge(MergeEdgeId),
    Subscription {
        subscriber: UserId,
        recommender: UserId,
    },
    Recommendation(RecommendationId),
    Comment(CommentId),
    Paper(PaperId),
    PaperSource(PaperSourceId),
    Author(AuthorId),
    UserProfile(UserId),
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(id) => write!(f, "topic {id}"),
            Self::MergeEdge(id) => write!(f, "merge edge {id}"),
            Self::Subscription {
                subscriber,
                recommender,
            } => write!(f, "subscription {subscriber}->{recommender}"),
            Self::Recommendation(id) => write!(f, "recommendation {id}"),
            Self::Comment(id) => write!(f, "comment {id}"),
            Self::Paper(id) => write!(f, "paper {id}"),
            Self::PaperSource(id) => write!(f, "paper source {id}"),
            Self::Author(id) => write!(f, "author {id}"),
            Self::UserProfile(id) => write!(f, "user profile {id}"),
        }
    }
}

/// Repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Write input rejected by model validation.
    Validation(ValidationError),
    /// Referenced row does not exist.
    NotFound(EntityRef),
    /// Optimistic concurrency mismatch; re-read and retry.
    Conflict {
        entity: EntityRef,
        expected: Version,
        actual: Version,
    },
    /// A uniqueness constraint rejected the write.
    Duplicate(EntityRef),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl RepoError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::Conflict {
                entity,
                expected,
                actual,
            } => write!(
                f,
                "stale write to {entity}: expected version {expected}, found {actual}"
            ),
            Self::Duplicate(entity) => write!(f, "{entity} already exists"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "repository requires table `{table}`"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Verifies migration version and required tables before a repository is
/// handed out.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    required_tables: &[&'static str],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in required_tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [*table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

/// Turns the outcome of `UPDATE/DELETE ... WHERE id = ? AND version = ?`
/// into `NotFound` or `Conflict` when no row matched.
pub(crate) fn check_versioned_write(
    changed: usize,
    current_version: Option<Version>,
    entity: EntityRef,
    expected: Version,
) -> RepoResult<()> {
    if changed > 0 {
        return Ok(());
    }
    match current_version {
        None => Err(RepoError::NotFound(entity)),
        Some(actual) => Err(RepoError::Conflict {
            entity,
            expected,
            actual,
        }),
    }
}

/// Maps UNIQUE / PRIMARY KEY violations to `Duplicate(entity)`.
pub(crate) fn map_unique_violation(err: rusqlite::Error, entity: EntityRef) -> RepoError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) =>
        {
            RepoError::Duplicate(entity)
        }
        _ => err.into(),
    }
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
