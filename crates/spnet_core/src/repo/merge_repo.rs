//! Merge graph persistence.
//!
//! # Responsibility
//! - Store merge proposals `(proposer, from, to, block_merger)`.
//! - Expose the read paths the consensus resolver walks: outgoing edges of
//!   one topic and that topic's engaged members.
//! - Maintain the merge graph generation used for cache invalidation.
//!
//! # Invariants
//! - One edge per `(proposer, from_topic, to_topic)`; repeat proposals
//!   update the existing edge.
//! - Every write that can change any viewer's canonicalization bumps
//!   `merge_graph_state.generation` inside its own transaction.

use crate::model::merge::{MergeEdge, MergeEdgeId};
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::model::Version;
use crate::repo::topic_repo::{list_topic_members, topic_exists};
use crate::repo::{
    bool_to_int, check_versioned_write, ensure_connection_ready, parse_bool, parse_uuid,
    EntityRef, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

const EDGE_SELECT_SQL: &str = "SELECT
    edge_id,
    proposer_id,
    from_topic,
    to_topic,
    block_merger,
    created_at,
    updated_at,
    version
FROM merge_edges";

/// Repository interface for the merge graph.
pub trait MergeRepository {
    /// Creates the proposer's edge for the pair, or updates its
    /// `block_merger` flag when it already exists.
    fn upsert_edge(
        &self,
        proposer: UserId,
        from_topic: TopicId,
        to_topic: TopicId,
        block_merger: bool,
    ) -> RepoResult<MergeEdge>;
    fn get_edge(&self, id: MergeEdgeId) -> RepoResult<Option<MergeEdge>>;
    fn set_block(
        &self,
        id: MergeEdgeId,
        block_merger: bool,
        expected_version: Version,
    ) -> RepoResult<MergeEdge>;
    fn delete_edge(&self, id: MergeEdgeId, expected_version: Version) -> RepoResult<()>;
    /// All proposals for one ordered pair, ordered by proposer.
    fn list_edges_between(
        &self,
        from_topic: TopicId,
        to_topic: TopicId,
    ) -> RepoResult<Vec<MergeEdge>>;
    /// All proposals leaving one topic, ordered by target then proposer.
    fn list_outgoing_edges(&self, from_topic: TopicId) -> RepoResult<Vec<MergeEdge>>;
    fn topic_exists(&self, id: TopicId) -> RepoResult<bool>;
    /// Engaged members of a topic (the consensus population).
    fn list_engaged_members(&self, topic: TopicId) -> RepoResult<Vec<UserId>>;
    /// Monotonic counter bumped by every merge-relevant write.
    fn graph_generation(&self) -> RepoResult<i64>;
}

/// SQLite-backed merge graph repository.
pub struct SqliteMergeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMergeRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &["topics", "topic_members", "merge_edges", "merge_graph_state"],
        )?;
        Ok(Self { conn })
    }
}

impl MergeRepository for SqliteMergeRepository<'_> {
    fn upsert_edge(
        &self,
        proposer: UserId,
        from_topic: TopicId,
        to_topic: TopicId,
        block_merger: bool,
    ) -> RepoResult<MergeEdge> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let existing = load_edge_for_triple(&tx, proposer, from_topic, to_topic)?;

        let edge_id = match existing {
            Some(edge) if edge.block_merger == block_merger => {
                tx.commit()?;
                return Ok(edge);
            }
            Some(edge) => {
                tx.execute(
                    "UPDATE merge_edges
                     SET block_merger = ?2,
                         version = version + 1,
                         updated_at = (strftime('%s', 'now') * 1000)
                     WHERE edge_id = ?1;",
                    params![edge.id.to_string(), bool_to_int(block_merger)],
                )?;
                edge.id
            }
            None => {
                let edge_id = Uuid::new_v4();
                tx.execute(
                    "INSERT INTO merge_edges (
                        edge_id,
                        proposer_id,
                        from_topic,
                        to_topic,
                        block_merger
                    ) VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![
                        edge_id.to_string(),
                        proposer.to_string(),
                        from_topic.to_string(),
                        to_topic.to_string(),
                        bool_to_int(block_merger),
                    ],
                )?;
                edge_id
            }
        };

        bump_merge_generation(&tx)?;
        let edge = load_required_edge(&tx, edge_id)?;
        tx.commit()?;
        Ok(edge)
    }

    fn get_edge(&self, id: MergeEdgeId) -> RepoResult<Option<MergeEdge>> {
        load_edge(self.conn, id)
    }

    fn set_block(
        &self,
        id: MergeEdgeId,
        block_merger: bool,
        expected_version: Version,
    ) -> RepoResult<MergeEdge> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE merge_edges
             SET block_merger = ?2,
                 version = version + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE edge_id = ?1
               AND version = ?3;",
            params![id.to_string(), bool_to_int(block_merger), expected_version],
        )?;
        if changed == 0 {
            let current = current_edge_version(&tx, id)?;
            check_versioned_write(changed, current, EntityRef::MergeEdge(id), expected_version)?;
        }
        bump_merge_generation(&tx)?;
        let edge = load_required_edge(&tx, id)?;
        tx.commit()?;
        Ok(edge)
    }

    fn delete_edge(&self, id: MergeEdgeId, expected_version: Version) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "DELETE FROM merge_edges WHERE edge_id = ?1 AND version = ?2;",
            params![id.to_string(), expected_version],
        )?;
        if changed == 0 {
            let current = current_edge_version(&tx, id)?;
            check_versioned_write(changed, current, EntityRef::MergeEdge(id), expected_version)?;
        }
        bump_merge_generation(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn list_edges_between(
        &self,
        from_topic: TopicId,
        to_topic: TopicId,
    ) -> RepoResult<Vec<MergeEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EDGE_SELECT_SQL}
             WHERE from_topic = ?1
               AND to_topic = ?2
             ORDER BY proposer_id ASC;"
        ))?;
        let mut rows = stmt.query([from_topic.to_string(), to_topic.to_string()])?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push(parse_edge_row(row)?);
        }
        Ok(edges)
    }

    fn list_outgoing_edges(&self, from_topic: TopicId) -> RepoResult<Vec<MergeEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EDGE_SELECT_SQL}
             WHERE from_topic = ?1
             ORDER BY to_topic ASC, proposer_id ASC;"
        ))?;
        let mut rows = stmt.query([from_topic.to_string()])?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push(parse_edge_row(row)?);
        }
        Ok(edges)
    }

    fn topic_exists(&self, id: TopicId) -> RepoResult<bool> {
        topic_exists(self.conn, id)
    }

    fn list_engaged_members(&self, topic: TopicId) -> RepoResult<Vec<UserId>> {
        list_topic_members(self.conn, topic)
    }

    fn graph_generation(&self) -> RepoResult<i64> {
        let generation = self.conn.query_row(
            "SELECT generation FROM merge_graph_state WHERE singleton = 1;",
            [],
            |row| row.get(0),
        )?;
        Ok(generation)
    }
}

/// Increments the merge graph generation; call inside the write transaction.
pub(crate) fn bump_merge_generation(conn: &Connection) -> RepoResult<()> {
    conn.execute(
        "UPDATE merge_graph_state SET generation = generation + 1 WHERE singleton = 1;",
        [],
    )?;
    Ok(())
}

fn load_edge(conn: &Connection, id: MergeEdgeId) -> RepoResult<Option<MergeEdge>> {
    let mut stmt = conn.prepare(&format!("{EDGE_SELECT_SQL} WHERE edge_id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_edge_row(row)?));
    }
    Ok(None)
}

fn load_required_edge(conn: &Connection, id: MergeEdgeId) -> RepoResult<MergeEdge> {
    load_edge(conn, id)?.ok_or(RepoError::NotFound(EntityRef::MergeEdge(id)))
}

fn load_edge_for_triple(
    conn: &Connection,
    proposer: UserId,
    from_topic: TopicId,
    to_topic: TopicId,
) -> RepoResult<Option<MergeEdge>> {
    let mut stmt = conn.prepare(&format!(
        "{EDGE_SELECT_SQL}
         WHERE proposer_id = ?1
           AND from_topic = ?2
           AND to_topic = ?3;"
    ))?;
    let mut rows = stmt.query([
        proposer.to_string(),
        from_topic.to_string(),
        to_topic.to_string(),
    ])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_edge_row(row)?));
    }
    Ok(None)
}

fn current_edge_version(conn: &Connection, id: MergeEdgeId) -> RepoResult<Option<Version>> {
    let version = conn
        .query_row(
            "SELECT version FROM merge_edges WHERE edge_id = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

fn parse_edge_row(row: &Row<'_>) -> RepoResult<MergeEdge> {
    let id_text: String = row.get("edge_id")?;
    let proposer_text: String = row.get("proposer_id")?;
    let from_text: String = row.get("from_topic")?;
    let to_text: String = row.get("to_topic")?;
    Ok(MergeEdge {
        id: parse_uuid(&id_text, "merge_edges.edge_id")?,
        proposer: parse_uuid(&proposer_text, "merge_edges.proposer_id")?,
        from_topic: parse_uuid(&from_text, "merge_edges.from_topic")?,
        to_topic: parse_uuid(&to_text, "merge_edges.to_topic")?,
        block_merger: parse_bool(row.get("block_merger")?, "merge_edges.block_merger")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
    })
}
