//! Topic store use-case service.
//!
//! # Responsibility
//! - Create, read, list and delete topics.
//! - Enforce creator-only definition edits.
//! - Manage topic membership (the engaged-member population).
//!
//! # Invariants
//! - A topic is never deleted while a merge edge, member, paper or
//!   recommendation references it.
//! - Definition edits carry the version the caller read.

use crate::model::topic::{Topic, TopicId};
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use crate::model::Version;
use crate::repo::topic_repo::{TopicReferences, TopicRepository};
use crate::repo::{EntityRef, RepoError, RepoResult};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from topic store operations.
#[derive(Debug)]
pub enum TopicServiceError {
    /// Name or definition rejected by model validation.
    Validation(ValidationError),
    /// Target topic does not exist.
    TopicNotFound(TopicId),
    /// Only the creator may edit a topic definition.
    NotCreator { topic: TopicId, editor: UserId },
    /// Topic is still referenced and cannot be deleted.
    TopicInUse {
        topic: TopicId,
        references: TopicReferences,
    },
    /// Stale version supplied for a write.
    Conflict {
        topic: TopicId,
        expected: Version,
        actual: Version,
    },
    /// Repository-level failure.
    Repo(RepoError),
}

impl TopicServiceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl Display for TopicServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::TopicNotFound(id) => write!(f, "topic not found: {id}"),
            Self::NotCreator { topic, editor } => {
                write!(f, "user {editor} is not the creator of topic {topic}")
            }
            Self::TopicInUse { topic, references } => write!(
                f,
                "topic {topic} is still referenced (merge_edges={}, members={}, papers={}, recommendations={})",
                references.merge_edges,
                references.members,
                references.papers,
                references.recommendations
            ),
            Self::Conflict {
                topic,
                expected,
                actual,
            } => write!(
                f,
                "stale write to topic {topic}: expected version {expected}, found {actual}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TopicServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for TopicServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for TopicServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(EntityRef::Topic(id)) => Self::TopicNotFound(id),
            RepoError::Conflict {
                entity: EntityRef::Topic(topic),
                expected,
                actual,
            } => Self::Conflict {
                topic,
                expected,
                actual,
            },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

/// Topic service facade over repository implementations.
pub struct TopicService<R: TopicRepository> {
    repo: R,
}

impl<R: TopicRepository> TopicService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates one topic and returns its id.
    pub fn create_topic(
        &self,
        name: &str,
        definition: &str,
        creator: UserId,
    ) -> Result<TopicId, TopicServiceError> {
        let topic = Topic::new(name, definition, creator)?;
        let id = self.repo.create_topic(&topic)?;
        info!("event=topic_create module=topic status=ok topic_id={id}");
        Ok(id)
    }

    pub fn get_topic(&self, id: TopicId) -> RepoResult<Option<Topic>> {
        self.repo.get_topic(id)
    }

    /// Lists all topics ordered by `created_at ASC, id ASC`.
    pub fn list_topics(&self) -> RepoResult<Vec<Topic>> {
        self.repo.list_topics()
    }

    /// Replaces the definition; only the creator may do this.
    pub fn update_topic_definition(
        &self,
        id: TopicId,
        editor: UserId,
        definition: &str,
        expected_version: Version,
    ) -> Result<Topic, TopicServiceError> {
        let topic = self.require_topic(id)?;
        if topic.creator != editor {
            return Err(TopicServiceError::NotCreator { topic: id, editor });
        }
        let version = self
            .repo
            .update_definition(id, definition, expected_version)?;
        info!("event=topic_update module=topic status=ok topic_id={id} version={version}");
        self.require_topic(id)
    }

    /// Deletes an unreferenced topic.
    pub fn delete_topic(
        &self,
        id: TopicId,
        expected_version: Version,
    ) -> Result<(), TopicServiceError> {
        self.require_topic(id)?;
        let references = self.repo.topic_references(id)?;
        if references.is_referenced() {
            return Err(TopicServiceError::TopicInUse {
                topic: id,
                references,
            });
        }
        self.repo.delete_topic(id, expected_version)?;
        info!("event=topic_delete module=topic status=ok topic_id={id}");
        Ok(())
    }

    /// Adds `user` to the engaged members of `topic`.
    ///
    /// Returns `false` when the user already was a member.
    pub fn join_topic(&self, topic: TopicId, user: UserId) -> Result<bool, TopicServiceError> {
        self.require_topic(topic)?;
        let joined = self.repo.add_member(topic, user)?;
        info!("event=topic_join module=topic status=ok topic_id={topic} changed={joined}");
        Ok(joined)
    }

    /// Returns `false` when the user was not a member.
    pub fn leave_topic(&self, topic: TopicId, user: UserId) -> Result<bool, TopicServiceError> {
        self.require_topic(topic)?;
        let left = self.repo.remove_member(topic, user)?;
        info!("event=topic_leave module=topic status=ok topic_id={topic} changed={left}");
        Ok(left)
    }

    pub fn list_members(&self, topic: TopicId) -> Result<Vec<UserId>, TopicServiceError> {
        self.require_topic(topic)?;
        Ok(self.repo.list_members(topic)?)
    }

    pub fn list_member_topics(&self, user: UserId) -> RepoResult<Vec<TopicId>> {
        self.repo.list_member_topics(user)
    }

    fn require_topic(&self, id: TopicId) -> Result<Topic, TopicServiceError> {
        self.repo
            .get_topic(id)?
            .ok_or(TopicServiceError::TopicNotFound(id))
    }
}
