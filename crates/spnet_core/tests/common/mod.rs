#![allow(dead_code)]

use rusqlite::Connection;
use spnet_core::model::reference::{Paper, PaperId, PaperSource};
use spnet_core::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use spnet_core::repo::topic_repo::SqliteTopicRepository;
use spnet_core::{TopicId, TopicService, UserId};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Users sorted ascending so tests can reason about id order.
pub fn users(count: usize) -> Vec<UserId> {
    let mut ids: Vec<UserId> = (0..count).map(|_| Uuid::new_v4()).collect();
    ids.sort();
    ids
}

pub fn topic_service(conn: &Connection) -> TopicService<SqliteTopicRepository<'_>> {
    TopicService::new(SqliteTopicRepository::try_new(conn).unwrap())
}

pub fn create_topic(conn: &Connection, name: &str, creator: UserId) -> TopicId {
    topic_service(conn)
        .create_topic(name, &format!("{name} definition"), creator)
        .unwrap()
}

pub fn join(conn: &Connection, topic: TopicId, members: &[UserId]) {
    let service = topic_service(conn);
    for member in members {
        service.join_topic(topic, *member).unwrap();
    }
}

pub fn create_paper(conn: &Connection, title: &str, topics: &[TopicId]) -> PaperId {
    let repo = SqliteReferenceRepository::try_new(conn).unwrap();
    let source = match repo.list_paper_sources().unwrap().into_iter().next() {
        Some(source) => source.id,
        None => repo
            .create_paper_source(&PaperSource {
                id: Uuid::new_v4(),
                name: "arXiv".to_string(),
                url_template: "https://arxiv.org/abs/{id}".to_string(),
                description: String::new(),
            })
            .unwrap(),
    };
    repo.create_paper(&Paper {
        id: Uuid::new_v4(),
        source,
        external_id: Uuid::new_v4().to_string(),
        url_data: String::new(),
        title: title.to_string(),
        topics: topics.iter().copied().collect::<BTreeSet<_>>(),
        submitter: Uuid::new_v4(),
    })
    .unwrap()
}
