//! Merge proposal use-case service.
//!
//! # Responsibility
//! - Record, re-flag and withdraw merge proposals.
//! - List proposals for one ordered topic pair.
//!
//! # Invariants
//! - A proposal never points a topic at itself.
//! - Both topics exist when a proposal is recorded.
//! - Repeat proposals for the same `(proposer, from, to)` keep the edge id.

use crate::model::merge::{MergeEdge, MergeEdgeId};
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use crate::model::Version;
use crate::repo::merge_repo::MergeRepository;
use crate::repo::{EntityRef, RepoError, RepoResult};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from merge proposal operations.
#[derive(Debug)]
pub enum MergeServiceError {
    /// Proposal rejected by validation (e.g. self merge).
    Validation(ValidationError),
    /// One side of the proposal does not exist.
    TopicNotFound(TopicId),
    /// Target proposal does not exist.
    EdgeNotFound(MergeEdgeId),
    /// Stale version supplied for a write.
    Conflict {
        edge: MergeEdgeId,
        expected: Version,
        actual: Version,
    },
    /// Repository-level failure.
    Repo(RepoError),
}

impl MergeServiceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl Display for MergeServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::TopicNotFound(id) => write!(f, "topic not found: {id}"),
            Self::EdgeNotFound(id) => write!(f, "merge proposal not found: {id}"),
            Self::Conflict {
                edge,
                expected,
                actual,
            } => write!(
                f,
                "stale write to merge proposal {edge}: expected version {expected}, found {actual}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MergeServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for MergeServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(EntityRef::MergeEdge(id)) => Self::EdgeNotFound(id),
            RepoError::NotFound(EntityRef::Topic(id)) => Self::TopicNotFound(id),
            RepoError::Conflict {
                entity: EntityRef::MergeEdge(edge),
                expected,
                actual,
            } => Self::Conflict {
                edge,
                expected,
                actual,
            },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

/// Merge proposal service facade.
pub struct MergeService<R: MergeRepository> {
    repo: R,
}

impl<R: MergeRepository> MergeService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Records `proposer`'s wish to fold `from_topic` into `to_topic`.
    ///
    /// `block_merger = true` records an opt-out from majority merges of
    /// this pair instead of support.
    pub fn propose_merge(
        &self,
        proposer: UserId,
        from_topic: TopicId,
        to_topic: TopicId,
        block_merger: bool,
    ) -> Result<MergeEdgeId, MergeServiceError> {
        if from_topic == to_topic {
            return Err(MergeServiceError::Validation(ValidationError::SelfMerge));
        }
        for topic in [from_topic, to_topic] {
            if !self.repo.topic_exists(topic)? {
                return Err(MergeServiceError::TopicNotFound(topic));
            }
        }

        let edge = self
            .repo
            .upsert_edge(proposer, from_topic, to_topic, block_merger)?;
        info!(
            "event=merge_propose module=merge status=ok edge_id={} block_merger={} version={}",
            edge.id, edge.block_merger, edge.version
        );
        Ok(edge.id)
    }

    pub fn get_proposal(&self, id: MergeEdgeId) -> RepoResult<Option<MergeEdge>> {
        self.repo.get_edge(id)
    }

    /// Flips the opt-out flag of an existing proposal.
    pub fn set_merge_block(
        &self,
        id: MergeEdgeId,
        block_merger: bool,
        expected_version: Version,
    ) -> Result<MergeEdge, MergeServiceError> {
        let edge = self.repo.set_block(id, block_merger, expected_version)?;
        info!(
            "event=merge_block module=merge status=ok edge_id={id} block_merger={block_merger} version={}",
            edge.version
        );
        Ok(edge)
    }

    /// Removes a proposal.
    pub fn withdraw_merge(
        &self,
        id: MergeEdgeId,
        expected_version: Version,
    ) -> Result<(), MergeServiceError> {
        self.repo.delete_edge(id, expected_version)?;
        info!("event=merge_withdraw module=merge status=ok edge_id={id}");
        Ok(())
    }

    /// All proposals for `from_topic -> to_topic`, ordered by proposer.
    pub fn list_proposals(
        &self,
        from_topic: TopicId,
        to_topic: TopicId,
    ) -> RepoResult<Vec<MergeEdge>> {
        self.repo.list_edges_between(from_topic, to_topic)
    }
}
