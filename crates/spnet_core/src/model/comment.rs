//! Threaded comment domain model.
//!
//! # Invariants
//! - A comment carries exactly one body: free text or a source URL.
//! - A comment references at least one paper.
//! - Siblings are ordered by `CommentSortKey` (`created_at`, then `id`).
//! - At most one comment links to a given recommendation as its review.

use crate::model::recommendation::RecommendationId;
use crate::model::reference::PaperId;
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use crate::model::Version;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

static SOURCE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid source url regex"));

/// Stable comment identifier.
pub type CommentId = Uuid;

/// Comment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum CommentBody {
    /// Inline comment text.
    Text(String),
    /// Link to an externally hosted comment or review.
    SourceUrl(String),
}

impl CommentBody {
    /// Rejects blank text and non-http(s) URLs.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Text(text) if text.trim().is_empty() => Err(ValidationError::EmptyComment),
            Self::Text(_) => Ok(()),
            Self::SourceUrl(url) if SOURCE_URL_RE.is_match(url.trim()) => Ok(()),
            Self::SourceUrl(url) => Err(ValidationError::InvalidSourceUrl(url.clone())),
        }
    }
}

/// Position of a comment among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommentSortKey {
    pub created_at: i64,
    pub id: CommentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author: UserId,
    pub papers: BTreeSet<PaperId>,
    /// `None` for thread roots.
    pub parent: Option<CommentId>,
    /// Recommendation this comment is the review for.
    pub recommendation: Option<RecommendationId>,
    pub body: CommentBody,
    /// Epoch ms; strictly increasing among siblings.
    pub created_at: i64,
    pub updated_at: i64,
    pub version: Version,
}

impl Comment {
    pub fn sort_key(&self) -> CommentSortKey {
        CommentSortKey {
            created_at: self.created_at,
            id: self.id,
        }
    }

    /// Whether this comment references at least one paper in `papers`.
    pub fn shares_paper_with(&self, papers: &BTreeSet<PaperId>) -> bool {
        !self.papers.is_disjoint(papers)
    }
}

/// Input for `CommentService::insert_comment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub author: UserId,
    pub papers: BTreeSet<PaperId>,
    pub body: CommentBody,
}

impl NewComment {
    pub fn text(
        author: UserId,
        papers: impl IntoIterator<Item = PaperId>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            author,
            papers: papers.into_iter().collect(),
            body: CommentBody::Text(text.into()),
        }
    }

    pub fn source_url(
        author: UserId,
        papers: impl IntoIterator<Item = PaperId>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            author,
            papers: papers.into_iter().collect(),
            body: CommentBody::SourceUrl(url.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.papers.is_empty() {
            return Err(ValidationError::CommentWithoutPapers);
        }
        self.body.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::{CommentBody, NewComment};
    use crate::model::validation::ValidationError;
    use uuid::Uuid;

    #[test]
    fn validate_requires_papers_and_non_blank_body() {
        let author = Uuid::new_v4();
        let no_papers = NewComment::text(author, [], "hello");
        assert_eq!(
            no_papers.validate().unwrap_err(),
            ValidationError::CommentWithoutPapers
        );

        let blank = NewComment::text(author, [Uuid::new_v4()], "   ");
        assert_eq!(blank.validate().unwrap_err(), ValidationError::EmptyComment);
    }

    #[test]
    fn source_url_must_be_http() {
        assert!(CommentBody::SourceUrl("https://example.org/review/1".into())
            .validate()
            .is_ok());
        assert!(matches!(
            CommentBody::SourceUrl("ftp://example.org".into()).validate(),
            Err(ValidationError::InvalidSourceUrl(_))
        ));
    }
}
