//! Subscription registry persistence.
//!
//! # Responsibility
//! - Upsert/read/remove `(subscriber, recommender)` edges.
//! - Provide the subscriber interest topics the router matches against.
//!
//! # Invariants
//! - One row per `(subscriber, recommender)`; upsert bumps `version` only
//!   when priority or request_all actually change.
//! - Listings are ordered by the counterpart user id.

use crate::model::subscription::{Priority, Subscription};
use crate::model::topic::TopicId;
use crate::model::user::UserId;
use crate::model::Version;
use crate::repo::topic_repo::list_member_topics;
use crate::repo::{
    bool_to_int, check_versioned_write, ensure_connection_ready, parse_bool, parse_uuid,
    EntityRef, RepoError, RepoResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SUBSCRIPTION_SELECT_SQL: &str = "SELECT
    subscriber_id,
    recommender_id,
    priority,
    request_all,
    created_at,
    updated_at,
    version
FROM subscriptions";

/// Repository interface for the subscription registry.
pub trait SubscriptionRepository {
    fn upsert_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
        priority: Priority,
        request_all: bool,
    ) -> RepoResult<Subscription>;
    fn get_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
    ) -> RepoResult<Option<Subscription>>;
    fn list_for_recommender(&self, recommender: UserId) -> RepoResult<Vec<Subscription>>;
    fn list_for_subscriber(&self, subscriber: UserId) -> RepoResult<Vec<Subscription>>;
    fn remove_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
        expected_version: Version,
    ) -> RepoResult<()>;
    /// Topics the subscriber is an engaged member of.
    fn interest_topics(&self, subscriber: UserId) -> RepoResult<Vec<TopicId>>;
}

/// SQLite-backed subscription repository.
pub struct SqliteSubscriptionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSubscriptionRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["subscriptions", "topic_members"])?;
        Ok(Self { conn })
    }
}

impl SubscriptionRepository for SqliteSubscriptionRepository<'_> {
    fn upsert_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
        priority: Priority,
        request_all: bool,
    ) -> RepoResult<Subscription> {
        self.conn.execute(
            "INSERT INTO subscriptions (
                subscriber_id,
                recommender_id,
                priority,
                request_all
            ) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (subscriber_id, recommender_id) DO UPDATE
            SET priority = excluded.priority,
                request_all = excluded.request_all,
                version = subscriptions.version + 1,
                updated_at = (strftime('%s', 'now') * 1000)
            WHERE subscriptions.priority <> excluded.priority
               OR subscriptions.request_all <> excluded.request_all;",
            params![
                subscriber.to_string(),
                recommender.to_string(),
                priority.as_str(),
                bool_to_int(request_all),
            ],
        )?;
        self.get_subscription(subscriber, recommender)?
            .ok_or(RepoError::NotFound(EntityRef::Subscription {
                subscriber,
                recommender,
            }))
    }

    fn get_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
    ) -> RepoResult<Option<Subscription>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SUBSCRIPTION_SELECT_SQL}
             WHERE subscriber_id = ?1
               AND recommender_id = ?2;"
        ))?;
        let mut rows = stmt.query([subscriber.to_string(), recommender.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_subscription_row(row)?));
        }
        Ok(None)
    }

    fn list_for_recommender(&self, recommender: UserId) -> RepoResult<Vec<Subscription>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SUBSCRIPTION_SELECT_SQL}
             WHERE recommender_id = ?1
             ORDER BY subscriber_id ASC;"
        ))?;
        let mut rows = stmt.query([recommender.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_subscription_row(row)?);
        }
        Ok(items)
    }

    fn list_for_subscriber(&self, subscriber: UserId) -> RepoResult<Vec<Subscription>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SUBSCRIPTION_SELECT_SQL}
             WHERE subscriber_id = ?1
             ORDER BY recommender_id ASC;"
        ))?;
        let mut rows = stmt.query([subscriber.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_subscription_row(row)?);
        }
        Ok(items)
    }

    fn remove_subscription(
        &self,
        subscriber: UserId,
        recommender: UserId,
        expected_version: Version,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM subscriptions
             WHERE subscriber_id = ?1
               AND recommender_id = ?2
               AND version = ?3;",
            params![
                subscriber.to_string(),
                recommender.to_string(),
                expected_version
            ],
        )?;
        if changed == 0 {
            let current: Option<Version> = self
                .conn
                .query_row(
                    "SELECT version
                     FROM subscriptions
                     WHERE subscriber_id = ?1
                       AND recommender_id = ?2;",
                    [subscriber.to_string(), recommender.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            check_versioned_write(
                changed,
                current,
                EntityRef::Subscription {
                    subscriber,
                    recommender,
                },
                expected_version,
            )?;
        }
        Ok(())
    }

    fn interest_topics(&self, subscriber: UserId) -> RepoResult<Vec<TopicId>> {
        list_member_topics(self.conn, subscriber)
    }
}

fn parse_subscription_row(row: &Row<'_>) -> RepoResult<Subscription> {
    let subscriber_text: String = row.get("subscriber_id")?;
    let recommender_text: String = row.get("recommender_id")?;
    let priority_text: String = row.get("priority")?;
    let priority = Priority::parse(&priority_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid priority `{priority_text}` in subscriptions.priority"
        ))
    })?;
    Ok(Subscription {
        subscriber: parse_uuid(&subscriber_text, "subscriptions.subscriber_id")?,
        recommender: parse_uuid(&recommender_text, "subscriptions.recommender_id")?,
        priority,
        request_all: parse_bool(row.get("request_all")?, "subscriptions.request_all")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
    })
}
