//! Comment forest use-case service.
//!
//! # Responsibility
//! - Validate and insert comments under a parent or as thread roots.
//! - Serve ordered, lazily fetched sibling sequences and bounded
//!   depth-first traversal.
//! - Maintain the exclusive comment <-> recommendation review link.
//!
//! # Invariants
//! - A child shares at least one paper with its parent.
//! - Siblings are yielded in `(created_at, id)` order; a cursor never
//!   yields a sibling inserted after it was opened.
//! - At most one comment reviews a recommendation, and a comment reviews
//!   at most one recommendation.

use crate::model::comment::{Comment, CommentBody, CommentId, CommentSortKey, NewComment};
use crate::model::recommendation::RecommendationId;
use crate::model::reference::PaperId;
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use crate::model::Version;
use crate::repo::comment_repo::CommentRepository;
use crate::repo::{EntityRef, RepoError, RepoResult};
use log::info;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Children fetched per storage round-trip by `ChildCursor`.
pub const DEFAULT_CHILD_PAGE_SIZE: usize = 50;

/// Errors from comment forest operations.
#[derive(Debug)]
pub enum CommentServiceError {
    Validation(ValidationError),
    CommentNotFound(CommentId),
    ParentNotFound(CommentId),
    PaperNotFound(PaperId),
    RecommendationNotFound(RecommendationId),
    /// Child shares no paper with its parent.
    InvalidAttachment { parent: CommentId },
    /// The comment already is the review of this recommendation.
    AlreadyLinked {
        comment: CommentId,
        recommendation: RecommendationId,
    },
    /// Either side is already linked to something else.
    ConflictingReview {
        comment: CommentId,
        recommendation: RecommendationId,
    },
    NotAuthor {
        comment: CommentId,
        editor: UserId,
    },
    /// Only text comments can be edited in place.
    NotTextComment(CommentId),
    Conflict {
        comment: CommentId,
        expected: Version,
        actual: Version,
    },
    Repo(RepoError),
}

impl CommentServiceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl Display for CommentServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::CommentNotFound(id) => write!(f, "comment not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent comment not found: {id}"),
            Self::PaperNotFound(id) => write!(f, "paper not found: {id}"),
            Self::RecommendationNotFound(id) => write!(f, "recommendation not found: {id}"),
            Self::InvalidAttachment { parent } => {
                write!(f, "comment shares no paper with parent {parent}")
            }
            Self::AlreadyLinked {
                comment,
                recommendation,
            } => write!(
                f,
                "comment {comment} already reviews recommendation {recommendation}"
            ),
            Self::ConflictingReview {
                comment,
                recommendation,
            } => write!(
                f,
                "cannot link comment {comment} to recommendation {recommendation}: another review link exists"
            ),
            Self::NotAuthor { comment, editor } => {
                write!(f, "user {editor} is not the author of comment {comment}")
            }
            Self::NotTextComment(id) => write!(f, "comment {id} links to an external source"),
            Self::Conflict {
                comment,
                expected,
                actual,
            } => write!(
                f,
                "stale write to comment {comment}: expected version {expected}, found {actual}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CommentServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for CommentServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for CommentServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(EntityRef::Comment(id)) => Self::CommentNotFound(id),
            RepoError::NotFound(EntityRef::Paper(id)) => Self::PaperNotFound(id),
            RepoError::NotFound(EntityRef::Recommendation(id)) => {
                Self::RecommendationNotFound(id)
            }
            RepoError::Conflict {
                entity: EntityRef::Comment(comment),
                expected,
                actual,
            } => Self::Conflict {
                comment,
                expected,
                actual,
            },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

/// One line of a depth-first thread rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    /// 0 for the root.
    pub depth: usize,
    pub comment: Comment,
}

/// Comment forest service facade.
pub struct CommentService<R: CommentRepository> {
    repo: R,
}

impl<R: CommentRepository> CommentService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Inserts `new` under `parent`, or as a thread root when `parent` is
    /// `None`.
    pub fn insert_comment(
        &self,
        new: NewComment,
        parent: Option<CommentId>,
    ) -> Result<CommentId, CommentServiceError> {
        new.validate()?;
        if let Some(missing) = self.repo.missing_papers(&new.papers)?.first() {
            return Err(CommentServiceError::PaperNotFound(*missing));
        }
        if let Some(parent_id) = parent {
            let parent_comment = self
                .repo
                .get_comment(parent_id)?
                .ok_or(CommentServiceError::ParentNotFound(parent_id))?;
            if !parent_comment.shares_paper_with(&new.papers) {
                return Err(CommentServiceError::InvalidAttachment { parent: parent_id });
            }
        }

        let comment = self.repo.insert_comment(&new, parent)?;
        info!(
            "event=comment_insert module=comment status=ok comment_id={} root={} papers={}",
            comment.id,
            parent.is_none(),
            comment.papers.len()
        );
        Ok(comment.id)
    }

    pub fn get_comment(&self, id: CommentId) -> RepoResult<Option<Comment>> {
        self.repo.get_comment(id)
    }

    /// All children of `parent`, ordered.
    pub fn children_of(&self, parent: CommentId) -> Result<Vec<Comment>, CommentServiceError> {
        self.child_cursor(parent, DEFAULT_CHILD_PAGE_SIZE)?
            .collect()
    }

    /// Lazy, restartable sequence over the children of `parent` as they
    /// exist now.
    pub fn child_cursor(
        &self,
        parent: CommentId,
        page_size: usize,
    ) -> Result<ChildCursor<'_, R>, CommentServiceError> {
        self.require_comment(parent)?;
        let until = self.repo.newest_child_key(parent)?;
        Ok(ChildCursor {
            repo: &self.repo,
            parent,
            until,
            after: None,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            exhausted: until.is_none(),
        })
    }

    /// One keyset page of children strictly after `after`.
    pub fn children_page(
        &self,
        parent: CommentId,
        after: Option<CommentSortKey>,
        limit: usize,
    ) -> RepoResult<Vec<Comment>> {
        self.repo.children_page(parent, after, None, limit)
    }

    /// Thread roots attached to `paper`, ordered.
    pub fn roots_for_paper(
        &self,
        paper: PaperId,
        after: Option<CommentSortKey>,
        limit: usize,
    ) -> RepoResult<Vec<Comment>> {
        self.repo.roots_for_paper(paper, after, limit)
    }

    /// Depth-first pre-order traversal of the thread below `root`.
    ///
    /// Children are fetched only for comments with `depth < max_depth`, so
    /// `max_depth = 0` yields the root alone.
    pub fn walk(
        &self,
        root: CommentId,
        max_depth: usize,
    ) -> Result<Vec<ThreadEntry>, CommentServiceError> {
        let root_comment = self.require_comment(root)?;
        let mut entries = Vec::new();
        let mut stack = vec![ThreadEntry {
            depth: 0,
            comment: root_comment,
        }];
        while let Some(entry) = stack.pop() {
            if entry.depth < max_depth {
                let children = self.children_of(entry.comment.id)?;
                let depth = entry.depth + 1;
                stack.extend(
                    children
                        .into_iter()
                        .rev()
                        .map(|comment| ThreadEntry { depth, comment }),
                );
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Links `comment` as the review of `recommendation`.
    pub fn link_review(
        &self,
        comment: CommentId,
        recommendation: RecommendationId,
    ) -> Result<(), CommentServiceError> {
        let existing = self.require_comment(comment)?;
        if !self.repo.recommendation_exists(recommendation)? {
            return Err(CommentServiceError::RecommendationNotFound(recommendation));
        }
        match existing.recommendation {
            Some(linked) if linked == recommendation => {
                return Err(CommentServiceError::AlreadyLinked {
                    comment,
                    recommendation,
                })
            }
            Some(_) => {
                return Err(CommentServiceError::ConflictingReview {
                    comment,
                    recommendation,
                })
            }
            None => {}
        }
        if self.repo.review_comment_for(recommendation)?.is_some() {
            return Err(CommentServiceError::ConflictingReview {
                comment,
                recommendation,
            });
        }

        match self.repo.set_review_link(comment, recommendation) {
            Ok(_) => {}
            Err(RepoError::Duplicate(_)) => {
                return Err(self.classify_lost_link_race(comment, recommendation)?);
            }
            Err(err) => return Err(err.into()),
        }
        info!(
            "event=review_link module=comment status=ok comment_id={comment} recommendation_id={recommendation}"
        );
        Ok(())
    }

    /// Replaces the text of a text comment; only the author may do this.
    pub fn edit_comment_text(
        &self,
        id: CommentId,
        editor: UserId,
        text: &str,
        expected_version: Version,
    ) -> Result<Comment, CommentServiceError> {
        let comment = self.require_comment(id)?;
        if comment.author != editor {
            return Err(CommentServiceError::NotAuthor {
                comment: id,
                editor,
            });
        }
        if !matches!(comment.body, CommentBody::Text(_)) {
            return Err(CommentServiceError::NotTextComment(id));
        }
        CommentBody::Text(text.to_string()).validate()?;

        let version = self.repo.update_text(id, text, expected_version)?;
        info!("event=comment_edit module=comment status=ok comment_id={id} version={version}");
        self.require_comment(id)
    }

    fn classify_lost_link_race(
        &self,
        comment: CommentId,
        recommendation: RecommendationId,
    ) -> Result<CommentServiceError, CommentServiceError> {
        let current = self.require_comment(comment)?;
        if current.recommendation == Some(recommendation) {
            return Ok(CommentServiceError::AlreadyLinked {
                comment,
                recommendation,
            });
        }
        Ok(CommentServiceError::ConflictingReview {
            comment,
            recommendation,
        })
    }

    fn require_comment(&self, id: CommentId) -> Result<Comment, CommentServiceError> {
        self.repo
            .get_comment(id)?
            .ok_or(CommentServiceError::CommentNotFound(id))
    }
}

/// Lazy ordered sequence over one parent's children.
///
/// The upper bound is the newest child at the time the cursor was opened;
/// siblings inserted later are never yielded. `restart` rewinds to the
/// first child without moving that bound.
pub struct ChildCursor<'a, R: CommentRepository> {
    repo: &'a R,
    parent: CommentId,
    until: Option<CommentSortKey>,
    after: Option<CommentSortKey>,
    page_size: usize,
    buffer: VecDeque<Comment>,
    exhausted: bool,
}

impl<R: CommentRepository> ChildCursor<'_, R> {
    /// Sort key of the last yielded child.
    pub fn position(&self) -> Option<CommentSortKey> {
        self.after
    }

    /// Continues after `key` on the next call to `next`.
    pub fn resume_after(&mut self, key: Option<CommentSortKey>) {
        self.after = key;
        self.buffer.clear();
        self.exhausted = self.until.is_none();
    }

    pub fn restart(&mut self) {
        self.resume_after(None);
    }

    fn fill(&mut self) -> RepoResult<()> {
        let page = self
            .repo
            .children_page(self.parent, self.after, self.until, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<R: CommentRepository> Iterator for ChildCursor<'_, R> {
    type Item = Result<Comment, CommentServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err.into()));
            }
        }
        let comment = self.buffer.pop_front()?;
        self.after = Some(comment.sort_key());
        Some(Ok(comment))
    }
}
