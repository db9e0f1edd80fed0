//! Threaded comment persistence.
//!
//! # Responsibility
//! - Insert comments with a sibling-unique, strictly increasing
//!   `created_at`.
//! - Serve keyset-paginated sibling and root listings.
//! - Own the comment <-> recommendation review link.
//!
//! # Invariants
//! - Sibling inserts run inside an IMMEDIATE transaction, so the
//!   "newest sibling" read and the insert are serialized per database.
//!   SQLite has a single writer lock, so appends under different parents
//!   also wait on each other. Callers should not expect concurrent
//!   appends under different parents to proceed in parallel.
//! - Listing order is `created_at ASC, comment_id ASC`; hyphenated lower
//!   case UUID text sorts the same way as `Uuid`.
//! - Linking a review sets `recommendations.has_review` in the same
//!   transaction.

use crate::model::comment::{Comment, CommentBody, CommentId, CommentSortKey, NewComment};
use crate::model::recommendation::RecommendationId;
use crate::model::reference::PaperId;
use crate::model::{now_epoch_ms, Version};
use crate::repo::recommendation_repo::recommendation_exists;
use crate::repo::reference_repo::paper_exists;
use crate::repo::{
    check_versioned_write, ensure_connection_ready, map_unique_violation, parse_uuid, EntityRef,
    RepoError, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::BTreeSet;
use uuid::Uuid;

const COMMENT_SELECT_SQL: &str = "SELECT
    comment_id,
    author_id,
    parent_id,
    recommendation_id,
    body_text,
    source_url,
    created_at,
    updated_at,
    version
FROM comments";

/// Repository interface for the comment forest.
pub trait CommentRepository {
    /// Inserts `new` under `parent` (or as a root) and returns the stored row.
    fn insert_comment(&self, new: &NewComment, parent: Option<CommentId>) -> RepoResult<Comment>;
    fn get_comment(&self, id: CommentId) -> RepoResult<Option<Comment>>;
    /// Children of `parent` strictly after `after` and at or before `until`.
    fn children_page(
        &self,
        parent: CommentId,
        after: Option<CommentSortKey>,
        until: Option<CommentSortKey>,
        limit: usize,
    ) -> RepoResult<Vec<Comment>>;
    fn newest_child_key(&self, parent: CommentId) -> RepoResult<Option<CommentSortKey>>;
    /// Thread roots that reference `paper`.
    fn roots_for_paper(
        &self,
        paper: PaperId,
        after: Option<CommentSortKey>,
        limit: usize,
    ) -> RepoResult<Vec<Comment>>;
    fn review_comment_for(&self, recommendation: RecommendationId)
        -> RepoResult<Option<CommentId>>;
    /// Links `comment` as the review of `recommendation`.
    ///
    /// Fails with `Duplicate(Comment)` when the comment already has a link
    /// and `Duplicate(Recommendation)` when the recommendation already has
    /// a review.
    fn set_review_link(
        &self,
        comment: CommentId,
        recommendation: RecommendationId,
    ) -> RepoResult<Comment>;
    /// Replaces the body text of a text comment; returns the new version.
    fn update_text(
        &self,
        id: CommentId,
        text: &str,
        expected_version: Version,
    ) -> RepoResult<Version>;
    /// Papers from `papers` that do not exist.
    fn missing_papers(&self, papers: &BTreeSet<PaperId>) -> RepoResult<Vec<PaperId>>;
    fn recommendation_exists(&self, recommendation: RecommendationId) -> RepoResult<bool>;
}

/// SQLite-backed comment repository.
pub struct SqliteCommentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCommentRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &["comments", "comment_papers", "papers", "recommendations"],
        )?;
        Ok(Self { conn })
    }
}

impl CommentRepository for SqliteCommentRepository<'_> {
    fn insert_comment(&self, new: &NewComment, parent: Option<CommentId>) -> RepoResult<Comment> {
        new.validate()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let parent_text = parent.map(|id| id.to_string());
        let newest_sibling: Option<i64> = tx.query_row(
            "SELECT MAX(created_at) FROM comments WHERE parent_id IS ?1;",
            [parent_text.as_deref()],
            |row| row.get(0),
        )?;
        let now = now_epoch_ms();
        let created_at = match newest_sibling {
            Some(newest) if newest >= now => newest + 1,
            _ => now,
        };

        let id = Uuid::new_v4();
        let (body_text, source_url) = match &new.body {
            CommentBody::Text(text) => (Some(text.as_str()), None),
            CommentBody::SourceUrl(url) => (None, Some(url.trim())),
        };
        tx.execute(
            "INSERT INTO comments (
                comment_id,
                author_id,
                parent_id,
                recommendation_id,
                body_text,
                source_url,
                created_at,
                updated_at,
                version
            ) VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?6, 1);",
            params![
                id.to_string(),
                new.author.to_string(),
                parent_text,
                body_text,
                source_url,
                created_at,
            ],
        )?;
        for paper in &new.papers {
            tx.execute(
                "INSERT INTO comment_papers (comment_id, paper_id) VALUES (?1, ?2);",
                [id.to_string(), paper.to_string()],
            )?;
        }
        tx.commit()?;

        Ok(Comment {
            id,
            author: new.author,
            papers: new.papers.clone(),
            parent,
            recommendation: None,
            body: match &new.body {
                CommentBody::Text(text) => CommentBody::Text(text.clone()),
                CommentBody::SourceUrl(url) => CommentBody::SourceUrl(url.trim().to_string()),
            },
            created_at,
            updated_at: created_at,
            version: 1,
        })
    }

    fn get_comment(&self, id: CommentId) -> RepoResult<Option<Comment>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{COMMENT_SELECT_SQL} WHERE comment_id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_comment_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn children_page(
        &self,
        parent: CommentId,
        after: Option<CommentSortKey>,
        until: Option<CommentSortKey>,
        limit: usize,
    ) -> RepoResult<Vec<Comment>> {
        let mut sql = format!("{COMMENT_SELECT_SQL} WHERE parent_id = ?");
        let mut values: Vec<Value> = vec![Value::Text(parent.to_string())];
        push_keyset_bounds(&mut sql, &mut values, after, until);
        sql.push_str(" ORDER BY created_at ASC, comment_id ASC LIMIT ?;");
        values.push(Value::Integer(limit_to_sql(limit)));
        self.query_comments(&sql, values)
    }

    fn newest_child_key(&self, parent: CommentId) -> RepoResult<Option<CommentSortKey>> {
        let newest = self
            .conn
            .query_row(
                "SELECT created_at, comment_id
                 FROM comments
                 WHERE parent_id = ?1
                 ORDER BY created_at DESC, comment_id DESC
                 LIMIT 1;",
                [parent.to_string()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        newest
            .map(|(created_at, id_text)| {
                Ok(CommentSortKey {
                    created_at,
                    id: parse_uuid(&id_text, "comments.comment_id")?,
                })
            })
            .transpose()
    }

    fn roots_for_paper(
        &self,
        paper: PaperId,
        after: Option<CommentSortKey>,
        limit: usize,
    ) -> RepoResult<Vec<Comment>> {
        let mut sql = format!(
            "{COMMENT_SELECT_SQL}
             WHERE parent_id IS NULL
               AND comment_id IN (SELECT comment_id FROM comment_papers WHERE paper_id = ?)"
        );
        let mut values: Vec<Value> = vec![Value::Text(paper.to_string())];
        push_keyset_bounds(&mut sql, &mut values, after, None);
        sql.push_str(" ORDER BY created_at ASC, comment_id ASC LIMIT ?;");
        values.push(Value::Integer(limit_to_sql(limit)));
        self.query_comments(&sql, values)
    }

    fn review_comment_for(
        &self,
        recommendation: RecommendationId,
    ) -> RepoResult<Option<CommentId>> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT comment_id FROM comments WHERE recommendation_id = ?1;",
                [recommendation.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        found
            .map(|value| parse_uuid(&value, "comments.comment_id"))
            .transpose()
    }

    fn set_review_link(
        &self,
        comment: CommentId,
        recommendation: RecommendationId,
    ) -> RepoResult<Comment> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx
            .execute(
                "UPDATE comments
                 SET recommendation_id = ?2,
                     version = version + 1,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE comment_id = ?1
                   AND recommendation_id IS NULL;",
                [comment.to_string(), recommendation.to_string()],
            )
            .map_err(|err| map_unique_violation(err, EntityRef::Recommendation(recommendation)))?;
        if changed == 0 {
            let exists: i64 = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM comments WHERE comment_id = ?1);",
                [comment.to_string()],
                |row| row.get(0),
            )?;
            return Err(if exists == 1 {
                RepoError::Duplicate(EntityRef::Comment(comment))
            } else {
                RepoError::NotFound(EntityRef::Comment(comment))
            });
        }

        let flagged = tx.execute(
            "UPDATE recommendations
             SET has_review = 1,
                 version = version + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE recommendation_id = ?1;",
            [recommendation.to_string()],
        )?;
        if flagged == 0 {
            return Err(RepoError::NotFound(EntityRef::Recommendation(recommendation)));
        }
        tx.commit()?;

        self.get_comment(comment)?
            .ok_or(RepoError::NotFound(EntityRef::Comment(comment)))
    }

    fn update_text(
        &self,
        id: CommentId,
        text: &str,
        expected_version: Version,
    ) -> RepoResult<Version> {
        let changed = self.conn.execute(
            "UPDATE comments
             SET body_text = ?2,
                 version = version + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE comment_id = ?1
               AND body_text IS NOT NULL
               AND version = ?3;",
            params![id.to_string(), text, expected_version],
        )?;
        if changed == 0 {
            let current = self
                .conn
                .query_row(
                    "SELECT version FROM comments WHERE comment_id = ?1;",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            check_versioned_write(changed, current, EntityRef::Comment(id), expected_version)?;
        }
        Ok(expected_version + 1)
    }

    fn missing_papers(&self, papers: &BTreeSet<PaperId>) -> RepoResult<Vec<PaperId>> {
        let mut missing = Vec::new();
        for paper in papers {
            if !paper_exists(self.conn, *paper)? {
                missing.push(*paper);
            }
        }
        Ok(missing)
    }

    fn recommendation_exists(&self, recommendation: RecommendationId) -> RepoResult<bool> {
        recommendation_exists(self.conn, recommendation)
    }
}

impl SqliteCommentRepository<'_> {
    fn query_comments(&self, sql: &str, values: Vec<Value>) -> RepoResult<Vec<Comment>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next()? {
            comments.push(parse_comment_row(self.conn, row)?);
        }
        Ok(comments)
    }
}

fn push_keyset_bounds(
    sql: &mut String,
    values: &mut Vec<Value>,
    after: Option<CommentSortKey>,
    until: Option<CommentSortKey>,
) {
    if let Some(after) = after {
        sql.push_str(" AND (created_at > ? OR (created_at = ? AND comment_id > ?))");
        values.push(Value::Integer(after.created_at));
        values.push(Value::Integer(after.created_at));
        values.push(Value::Text(after.id.to_string()));
    }
    if let Some(until) = until {
        sql.push_str(" AND (created_at < ? OR (created_at = ? AND comment_id <= ?))");
        values.push(Value::Integer(until.created_at));
        values.push(Value::Integer(until.created_at));
        values.push(Value::Text(until.id.to_string()));
    }
}

fn limit_to_sql(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn load_comment_papers(conn: &Connection, id: CommentId) -> RepoResult<BTreeSet<PaperId>> {
    let mut stmt = conn.prepare("SELECT paper_id FROM comment_papers WHERE comment_id = ?1;")?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut papers = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        papers.insert(parse_uuid(&value, "comment_papers.paper_id")?);
    }
    Ok(papers)
}

fn parse_comment_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Comment> {
    let id_text: String = row.get("comment_id")?;
    let author_text: String = row.get("author_id")?;
    let parent_text: Option<String> = row.get("parent_id")?;
    let recommendation_text: Option<String> = row.get("recommendation_id")?;
    let body_text: Option<String> = row.get("body_text")?;
    let source_url: Option<String> = row.get("source_url")?;

    let body = match (body_text, source_url) {
        (Some(text), None) => CommentBody::Text(text),
        (None, Some(url)) => CommentBody::SourceUrl(url),
        _ => {
            return Err(RepoError::InvalidData(format!(
                "comment `{id_text}` must carry exactly one of body_text/source_url"
            )))
        }
    };

    let id = parse_uuid(&id_text, "comments.comment_id")?;
    Ok(Comment {
        id,
        author: parse_uuid(&author_text, "comments.author_id")?,
        papers: load_comment_papers(conn, id)?,
        parent: parent_text
            .map(|value| parse_uuid(&value, "comments.parent_id"))
            .transpose()?,
        recommendation: recommendation_text
            .map(|value| parse_uuid(&value, "comments.recommendation_id"))
            .transpose()?,
        body,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
    })
}
