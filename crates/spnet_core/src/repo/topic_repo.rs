//! Topic store and topic membership persistence.
//!
//! # Responsibility
//! - CRUD over `topics` with optimistic concurrency on definition edits.
//! - Own `topic_members`, the engaged-member population for consensus.
//!
//! # Invariants
//! - Topic listing is deterministic: `created_at ASC, topic_id ASC`.
//! - Membership writes bump the merge graph generation atomically.

use crate::model::topic::{Topic, TopicId};
use crate::model::user::UserId;
use crate::model::Version;
use crate::repo::merge_repo::bump_merge_generation;
use crate::repo::{
    check_versioned_write, ensure_connection_ready, parse_uuid, EntityRef, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

const TOPIC_SELECT_SQL: &str = "SELECT
    topic_id,
    name,
    definition,
    creator_id,
    created_at,
    updated_at,
    version
FROM topics";

/// Counts of rows that keep a topic alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicReferences {
    pub merge_edges: i64,
    pub members: i64,
    pub papers: i64,
    pub recommendations: i64,
}

impl TopicReferences {
    pub fn is_referenced(&self) -> bool {
        self.merge_edges + self.members + self.papers + self.recommendations > 0
    }
}

/// Repository interface for the topic store.
pub trait TopicRepository {
    fn create_topic(&self, topic: &Topic) -> RepoResult<TopicId>;
    fn get_topic(&self, id: TopicId) -> RepoResult<Option<Topic>>;
    fn list_topics(&self) -> RepoResult<Vec<Topic>>;
    /// Replaces the definition and returns the new version.
    fn update_definition(
        &self,
        id: TopicId,
        definition: &str,
        expected_version: Version,
    ) -> RepoResult<Version>;
    fn delete_topic(&self, id: TopicId, expected_version: Version) -> RepoResult<()>;
    fn topic_references(&self, id: TopicId) -> RepoResult<TopicReferences>;
    /// Returns `false` when the user already was a member.
    fn add_member(&self, topic: TopicId, user: UserId) -> RepoResult<bool>;
    /// Returns `false` when the user was not a member.
    fn remove_member(&self, topic: TopicId, user: UserId) -> RepoResult<bool>;
    fn list_members(&self, topic: TopicId) -> RepoResult<Vec<UserId>>;
    fn list_member_topics(&self, user: UserId) -> RepoResult<Vec<TopicId>>;
}

/// SQLite-backed topic repository.
pub struct SqliteTopicRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTopicRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["topics", "topic_members", "merge_graph_state"])?;
        Ok(Self { conn })
    }
}

impl TopicRepository for SqliteTopicRepository<'_> {
    fn create_topic(&self, topic: &Topic) -> RepoResult<TopicId> {
        self.conn.execute(
            "INSERT INTO topics (
                topic_id,
                name,
                definition,
                creator_id,
                created_at,
                updated_at,
                version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                topic.id.to_string(),
                topic.name.as_str(),
                topic.definition.as_str(),
                topic.creator.to_string(),
                topic.created_at,
                topic.updated_at,
                topic.version,
            ],
        )?;
        Ok(topic.id)
    }

    fn get_topic(&self, id: TopicId) -> RepoResult<Option<Topic>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TOPIC_SELECT_SQL} WHERE topic_id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_topic_row(row)?));
        }
        Ok(None)
    }

    fn list_topics(&self) -> RepoResult<Vec<Topic>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TOPIC_SELECT_SQL} ORDER BY created_at ASC, topic_id ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut topics = Vec::new();
        while let Some(row) = rows.next()? {
            topics.push(parse_topic_row(row)?);
        }
        Ok(topics)
    }

    fn update_definition(
        &self,
        id: TopicId,
        definition: &str,
        expected_version: Version,
    ) -> RepoResult<Version> {
        let changed = self.conn.execute(
            "UPDATE topics
             SET definition = ?2,
                 version = version + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE topic_id = ?1
               AND version = ?3;",
            params![id.to_string(), definition, expected_version],
        )?;
        if changed == 0 {
            let current = current_topic_version(self.conn, id)?;
            check_versioned_write(changed, current, EntityRef::Topic(id), expected_version)?;
        }
        Ok(expected_version + 1)
    }

    fn delete_topic(&self, id: TopicId, expected_version: Version) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM topics WHERE topic_id = ?1 AND version = ?2;",
            params![id.to_string(), expected_version],
        )?;
        if changed == 0 {
            let current = current_topic_version(self.conn, id)?;
            check_versioned_write(changed, current, EntityRef::Topic(id), expected_version)?;
        }
        Ok(())
    }

    fn topic_references(&self, id: TopicId) -> RepoResult<TopicReferences> {
        let references = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM merge_edges WHERE from_topic = ?1 OR to_topic = ?1),
                (SELECT COUNT(*) FROM topic_members WHERE topic_id = ?1),
                (SELECT COUNT(*) FROM paper_topics WHERE topic_id = ?1),
                (SELECT COUNT(*) FROM recommendation_topics WHERE topic_id = ?1);",
            [id.to_string()],
            |row| {
                Ok(TopicReferences {
                    merge_edges: row.get(0)?,
                    members: row.get(1)?,
                    papers: row.get(2)?,
                    recommendations: row.get(3)?,
                })
            },
        )?;
        Ok(references)
    }

    fn add_member(&self, topic: TopicId, user: UserId) -> RepoResult<bool> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO topic_members (topic_id, user_id) VALUES (?1, ?2);",
            params![topic.to_string(), user.to_string()],
        )?;
        if inserted > 0 {
            bump_merge_generation(&tx)?;
        }
        tx.commit()?;
        Ok(inserted > 0)
    }

    fn remove_member(&self, topic: TopicId, user: UserId) -> RepoResult<bool> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM topic_members WHERE topic_id = ?1 AND user_id = ?2;",
            params![topic.to_string(), user.to_string()],
        )?;
        if removed > 0 {
            bump_merge_generation(&tx)?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    fn list_members(&self, topic: TopicId) -> RepoResult<Vec<UserId>> {
        list_topic_members(self.conn, topic)
    }

    fn list_member_topics(&self, user: UserId) -> RepoResult<Vec<TopicId>> {
        list_member_topics(self.conn, user)
    }
}

pub(crate) fn list_topic_members(conn: &Connection, topic: TopicId) -> RepoResult<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_id
         FROM topic_members
         WHERE topic_id = ?1
         ORDER BY user_id ASC;",
    )?;
    let mut rows = stmt.query([topic.to_string()])?;
    let mut members = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        members.push(parse_uuid(&value, "topic_members.user_id")?);
    }
    Ok(members)
}

pub(crate) fn list_member_topics(conn: &Connection, user: UserId) -> RepoResult<Vec<TopicId>> {
    let mut stmt = conn.prepare(
        "SELECT topic_id
         FROM topic_members
         WHERE user_id = ?1
         ORDER BY topic_id ASC;",
    )?;
    let mut rows = stmt.query([user.to_string()])?;
    let mut topics = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        topics.push(parse_uuid(&value, "topic_members.topic_id")?);
    }
    Ok(topics)
}

pub(crate) fn topic_exists(conn: &Connection, id: TopicId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM topics WHERE topic_id = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn current_topic_version(conn: &Connection, id: TopicId) -> RepoResult<Option<Version>> {
    let version = conn
        .query_row(
            "SELECT version FROM topics WHERE topic_id = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

fn parse_topic_row(row: &Row<'_>) -> RepoResult<Topic> {
    let id_text: String = row.get("topic_id")?;
    let creator_text: String = row.get("creator_id")?;
    Ok(Topic {
        id: parse_uuid(&id_text, "topics.topic_id")?,
        name: row.get("name")?,
        definition: row.get("definition")?,
        creator: parse_uuid(&creator_text, "topics.creator_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
    })
}
