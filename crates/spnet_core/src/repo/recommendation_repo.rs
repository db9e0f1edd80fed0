//! Recommendation persistence.
//!
//! # Invariants
//! - A recommendation and its topic links are written in one transaction.
//! - Listing is ordered by `created_at ASC, recommendation_id ASC`.

use crate::model::recommendation::{Recommendation, RecommendationId};
use crate::model::reference::PaperId;
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::repo::reference_repo::paper_exists;
use crate::repo::topic_repo::topic_exists;
use crate::repo::{bool_to_int, ensure_connection_ready, parse_bool, parse_uuid, RepoResult};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;

const RECOMMENDATION_SELECT_SQL: &str = "SELECT
    recommendation_id,
    recommender_id,
    paper_id,
    must_read,
    private,
    has_review,
    created_at,
    version
FROM recommendations";

/// Repository interface for recommendations.
pub trait RecommendationRepository {
    fn create_recommendation(&self, recommendation: &Recommendation)
        -> RepoResult<RecommendationId>;
    fn get_recommendation(&self, id: RecommendationId) -> RepoResult<Option<Recommendation>>;
    fn list_by_recommender(&self, recommender: UserId) -> RepoResult<Vec<Recommendation>>;
    fn paper_exists(&self, paper: PaperId) -> RepoResult<bool>;
    fn topic_exists(&self, topic: TopicId) -> RepoResult<bool>;
}

/// SQLite-backed recommendation repository.
pub struct SqliteRecommendationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecommendationRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &["recommendations", "recommendation_topics", "papers", "topics"],
        )?;
        Ok(Self { conn })
    }
}

impl RecommendationRepository for SqliteRecommendationRepository<'_> {
    fn create_recommendation(
        &self,
        recommendation: &Recommendation,
    ) -> RepoResult<RecommendationId> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO recommendations (
                recommendation_id,
                recommender_id,
                paper_id,
                must_read,
                private,
                has_review,
                created_at,
                version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                recommendation.id.to_string(),
                recommendation.recommender.to_string(),
                recommendation.paper.to_string(),
                bool_to_int(recommendation.must_read),
                bool_to_int(recommendation.private),
                bool_to_int(recommendation.has_review),
                recommendation.created_at,
                recommendation.version,
            ],
        )?;
        for topic in &recommendation.topics {
            tx.execute(
                "INSERT INTO recommendation_topics (recommendation_id, topic_id)
                 VALUES (?1, ?2);",
                [recommendation.id.to_string(), topic.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(recommendation.id)
    }

    fn get_recommendation(&self, id: RecommendationId) -> RepoResult<Option<Recommendation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECOMMENDATION_SELECT_SQL} WHERE recommendation_id = ?1;"
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_recommendation_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn list_by_recommender(&self, recommender: UserId) -> RepoResult<Vec<Recommendation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECOMMENDATION_SELECT_SQL}
             WHERE recommender_id = ?1
             ORDER BY created_at ASC, recommendation_id ASC;"
        ))?;
        let mut rows = stmt.query([recommender.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_recommendation_row(self.conn, row)?);
        }
        Ok(items)
    }

    fn paper_exists(&self, paper: PaperId) -> RepoResult<bool> {
        paper_exists(self.conn, paper)
    }

    fn topic_exists(&self, topic: TopicId) -> RepoResult<bool> {
        topic_exists(self.conn, topic)
    }
}

pub(crate) fn recommendation_exists(conn: &Connection, id: RecommendationId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM recommendations WHERE recommendation_id = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn load_recommendation_topics(
    conn: &Connection,
    id: RecommendationId,
) -> RepoResult<BTreeSet<TopicId>> {
    let mut stmt = conn.prepare(
        "SELECT topic_id
         FROM recommendation_topics
         WHERE recommendation_id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    let mut topics = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        topics.insert(parse_uuid(&value, "recommendation_topics.topic_id")?);
    }
    Ok(topics)
}

fn parse_recommendation_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Recommendation> {
    let id_text: String = row.get("recommendation_id")?;
    let recommender_text: String = row.get("recommender_id")?;
    let paper_text: String = row.get("paper_id")?;
    let id = parse_uuid(&id_text, "recommendations.recommendation_id")?;
    Ok(Recommendation {
        id,
        recommender: parse_uuid(&recommender_text, "recommendations.recommender_id")?,
        paper: parse_uuid(&paper_text, "recommendations.paper_id")?,
        topics: load_recommendation_topics(conn, id)?,
        must_read: parse_bool(row.get("must_read")?, "recommendations.must_read")?,
        private: parse_bool(row.get("private")?, "recommendations.private")?,
        has_review: parse_bool(row.get("has_review")?, "recommendations.has_review")?,
        created_at: row.get("created_at")?,
        version: row.get("version")?,
    })
}
