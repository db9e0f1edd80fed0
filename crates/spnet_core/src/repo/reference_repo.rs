//! Reference data persistence: paper sources, papers, authors, user
//! profiles and want-to-read lists.
//!
//! # Invariants
//! - A paper is unique per `(source, external_id)`.
//! - Paper topic links are written with the paper in one transaction.
//! - Listings are deterministic.

use crate::model::reference::{Author, AuthorId, Paper, PaperId, PaperSource, PaperSourceId};
use crate::model::topic::TopicId;
use crate::model::user::{UserId, UserProfile};
use crate::model::validation::ValidationError;
use crate::repo::{
    ensure_connection_ready, map_unique_violation, parse_uuid, EntityRef, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;

const PAPER_SELECT_SQL: &str = "SELECT
    paper_id,
    source_id,
    external_id,
    url_data,
    title,
    submitter_id
FROM papers";

const AUTHOR_SELECT_SQL: &str = "SELECT
    author_id,
    name,
    email,
    user_id
FROM authors";

/// Repository interface for reference data.
pub trait ReferenceRepository {
    fn create_paper_source(&self, source: &PaperSource) -> RepoResult<PaperSourceId>;
    fn get_paper_source(&self, id: PaperSourceId) -> RepoResult<Option<PaperSource>>;
    fn list_paper_sources(&self) -> RepoResult<Vec<PaperSource>>;

    fn create_paper(&self, paper: &Paper) -> RepoResult<PaperId>;
    fn get_paper(&self, id: PaperId) -> RepoResult<Option<Paper>>;
    fn list_papers_for_topic(&self, topic: TopicId) -> RepoResult<Vec<Paper>>;

    fn create_author(&self, author: &Author) -> RepoResult<AuthorId>;
    fn get_author(&self, id: AuthorId) -> RepoResult<Option<Author>>;
    /// Returns `false` when the link already existed.
    fn add_author_paper(&self, author: AuthorId, paper: PaperId) -> RepoResult<bool>;
    fn list_authors_for_paper(&self, paper: PaperId) -> RepoResult<Vec<Author>>;

    /// Creates the profile on first sight and returns the stored row.
    fn ensure_user_profile(&self, user: UserId, now_ms: i64) -> RepoResult<UserProfile>;
    fn get_user_profile(&self, user: UserId) -> RepoResult<Option<UserProfile>>;
    fn record_seen(&self, user: UserId, seen_at_ms: i64) -> RepoResult<()>;

    /// Returns `false` when the paper was already on the list.
    fn add_want_to_read(&self, user: UserId, paper: PaperId) -> RepoResult<bool>;
    /// Returns `false` when the paper was not on the list.
    fn remove_want_to_read(&self, user: UserId, paper: PaperId) -> RepoResult<bool>;
    fn list_want_to_read(&self, user: UserId) -> RepoResult<Vec<PaperId>>;
}

/// SQLite-backed reference data repository.
pub struct SqliteReferenceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReferenceRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &[
                "paper_sources",
                "papers",
                "paper_topics",
                "authors",
                "author_papers",
                "user_profiles",
                "want_to_read",
            ],
        )?;
        Ok(Self { conn })
    }
}

impl ReferenceRepository for SqliteReferenceRepository<'_> {
    fn create_paper_source(&self, source: &PaperSource) -> RepoResult<PaperSourceId> {
        if source.name.trim().is_empty() {
            return Err(ValidationError::BlankField("paper_source.name").into());
        }
        self.conn
            .execute(
                "INSERT INTO paper_sources (source_id, name, url_template, description)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    source.id.to_string(),
                    source.name.trim(),
                    source.url_template.as_str(),
                    source.description.as_str(),
                ],
            )
            .map_err(|err| map_unique_violation(err, EntityRef::PaperSource(source.id)))?;
        Ok(source.id)
    }

    fn get_paper_source(&self, id: PaperSourceId) -> RepoResult<Option<PaperSource>> {
        let source = self
            .conn
            .query_row(
                "SELECT source_id, name, url_template, description
                 FROM paper_sources
                 WHERE source_id = ?1;",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        source
            .map(|(id_text, name, url_template, description)| {
                Ok(PaperSource {
                    id: parse_uuid(&id_text, "paper_sources.source_id")?,
                    name,
                    url_template,
                    description,
                })
            })
            .transpose()
    }

    fn list_paper_sources(&self) -> RepoResult<Vec<PaperSource>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, name, url_template, description
             FROM paper_sources
             ORDER BY name ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut sources = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            sources.push(PaperSource {
                id: parse_uuid(&id_text, "paper_sources.source_id")?,
                name: row.get(1)?,
                url_template: row.get(2)?,
                description: row.get(3)?,
            });
        }
        Ok(sources)
    }

    fn create_paper(&self, paper: &Paper) -> RepoResult<PaperId> {
        if paper.title.trim().is_empty() {
            return Err(ValidationError::BlankField("paper.title").into());
        }
        if paper.external_id.trim().is_empty() {
            return Err(ValidationError::BlankField("paper.external_id").into());
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO papers (
                paper_id,
                source_id,
                external_id,
                url_data,
                title,
                submitter_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                paper.id.to_string(),
                paper.source.to_string(),
                paper.external_id.trim(),
                paper.url_data.as_str(),
                paper.title.trim(),
                paper.submitter.to_string(),
            ],
        )
        .map_err(|err| map_unique_violation(err, EntityRef::Paper(paper.id)))?;
        for topic in &paper.topics {
            tx.execute(
                "INSERT INTO paper_topics (paper_id, topic_id) VALUES (?1, ?2);",
                [paper.id.to_string(), topic.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(paper.id)
    }

    fn get_paper(&self, id: PaperId) -> RepoResult<Option<Paper>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PAPER_SELECT_SQL} WHERE paper_id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_paper_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn list_papers_for_topic(&self, topic: TopicId) -> RepoResult<Vec<Paper>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PAPER_SELECT_SQL}
             WHERE paper_id IN (SELECT paper_id FROM paper_topics WHERE topic_id = ?1)
             ORDER BY title ASC, paper_id ASC;"
        ))?;
        let mut rows = stmt.query([topic.to_string()])?;
        let mut papers = Vec::new();
        while let Some(row) = rows.next()? {
            papers.push(parse_paper_row(self.conn, row)?);
        }
        Ok(papers)
    }

    fn create_author(&self, author: &Author) -> RepoResult<AuthorId> {
        if author.name.trim().is_empty() {
            return Err(ValidationError::BlankField("author.name").into());
        }
        self.conn
            .execute(
                "INSERT INTO authors (author_id, name, email, user_id)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    author.id.to_string(),
                    author.name.trim(),
                    author.email.trim(),
                    author.user.map(|user| user.to_string()),
                ],
            )
            .map_err(|err| map_unique_violation(err, EntityRef::Author(author.id)))?;
        Ok(author.id)
    }

    fn get_author(&self, id: AuthorId) -> RepoResult<Option<Author>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{AUTHOR_SELECT_SQL} WHERE author_id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_author_row(row)?));
        }
        Ok(None)
    }

    fn add_author_paper(&self, author: AuthorId, paper: PaperId) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO author_papers (author_id, paper_id) VALUES (?1, ?2);",
            [author.to_string(), paper.to_string()],
        )?;
        Ok(inserted > 0)
    }

    fn list_authors_for_paper(&self, paper: PaperId) -> RepoResult<Vec<Author>> {
        let mut stmt = self.conn.prepare(&format!(
            "{AUTHOR_SELECT_SQL}
             WHERE author_id IN (SELECT author_id FROM author_papers WHERE paper_id = ?1)
             ORDER BY name ASC, author_id ASC;"
        ))?;
        let mut rows = stmt.query([paper.to_string()])?;
        let mut authors = Vec::new();
        while let Some(row) = rows.next()? {
            authors.push(parse_author_row(row)?);
        }
        Ok(authors)
    }

    fn ensure_user_profile(&self, user: UserId, now_ms: i64) -> RepoResult<UserProfile> {
        self.conn.execute(
            "INSERT OR IGNORE INTO user_profiles (user_id, joined_at) VALUES (?1, ?2);",
            params![user.to_string(), now_ms],
        )?;
        self.get_user_profile(user)?
            .ok_or(RepoError::NotFound(EntityRef::UserProfile(user)))
    }

    fn get_user_profile(&self, user: UserId) -> RepoResult<Option<UserProfile>> {
        let profile = self
            .conn
            .query_row(
                "SELECT joined_at, last_seen_at FROM user_profiles WHERE user_id = ?1;",
                [user.to_string()],
                |row| {
                    Ok(UserProfile {
                        user_id: user,
                        joined_at: row.get(0)?,
                        last_seen_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    fn record_seen(&self, user: UserId, seen_at_ms: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE user_profiles
             SET last_seen_at = MAX(COALESCE(last_seen_at, 0), ?2)
             WHERE user_id = ?1;",
            params![user.to_string(), seen_at_ms],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::UserProfile(user)));
        }
        Ok(())
    }

    fn add_want_to_read(&self, user: UserId, paper: PaperId) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO want_to_read (user_id, paper_id) VALUES (?1, ?2);",
            [user.to_string(), paper.to_string()],
        )?;
        Ok(inserted > 0)
    }

    fn remove_want_to_read(&self, user: UserId, paper: PaperId) -> RepoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM want_to_read WHERE user_id = ?1 AND paper_id = ?2;",
            [user.to_string(), paper.to_string()],
        )?;
        Ok(removed > 0)
    }

    fn list_want_to_read(&self, user: UserId) -> RepoResult<Vec<PaperId>> {
        let mut stmt = self.conn.prepare(
            "SELECT paper_id
             FROM want_to_read
             WHERE user_id = ?1
             ORDER BY added_at ASC, paper_id ASC;",
        )?;
        let mut rows = stmt.query([user.to_string()])?;
        let mut papers = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            papers.push(parse_uuid(&value, "want_to_read.paper_id")?);
        }
        Ok(papers)
    }
}

pub(crate) fn paper_exists(conn: &Connection, id: PaperId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM papers WHERE paper_id = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn load_paper_topics(conn: &Connection, id: PaperId) -> RepoResult<BTreeSet<TopicId>> {
    let mut stmt = conn.prepare("SELECT topic_id FROM paper_topics WHERE paper_id = ?1;")?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut topics = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        topics.insert(parse_uuid(&value, "paper_topics.topic_id")?);
    }
    Ok(topics)
}

fn parse_paper_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Paper> {
    let id_text: String = row.get("paper_id")?;
    let source_text: String = row.get("source_id")?;
    let submitter_text: String = row.get("submitter_id")?;
    let id = parse_uuid(&id_text, "papers.paper_id")?;
    Ok(Paper {
        id,
        source: parse_uuid(&source_text, "papers.source_id")?,
        external_id: row.get("external_id")?,
        url_data: row.get("url_data")?,
        title: row.get("title")?,
        topics: load_paper_topics(conn, id)?,
        submitter: parse_uuid(&submitter_text, "papers.submitter_id")?,
    })
}

fn parse_author_row(row: &Row<'_>) -> RepoResult<Author> {
    let id_text: String = row.get("author_id")?;
    let user_text: Option<String> = row.get("user_id")?;
    Ok(Author {
        id: parse_uuid(&id_text, "authors.author_id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        user: user_text
            .map(|value| parse_uuid(&value, "authors.user_id"))
            .transpose()?,
    })
}
