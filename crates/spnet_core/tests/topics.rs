mod common;

use common::{create_paper, create_topic, topic_service, users};
use spnet_core::model::validation::ValidationError;
use spnet_core::repo::merge_repo::SqliteMergeRepository;
use spnet_core::{open_db_in_memory, MergeService, TopicServiceError};

#[test]
fn create_and_get_topic_normalizes_name() {
    let conn = open_db_in_memory().unwrap();
    let service = topic_service(&conn);
    let creator = users(1)[0];

    let id = service
        .create_topic("  Machine \n Learning ", "Learning from data", creator)
        .unwrap();
    let topic = service.get_topic(id).unwrap().unwrap();
    assert_eq!(topic.name, "Machine Learning");
    assert_eq!(topic.creator, creator);
    assert_eq!(topic.version, 1);

    assert!(matches!(
        service.create_topic("   ", "blank", creator),
        Err(TopicServiceError::Validation(ValidationError::BlankTopicName))
    ));
}

#[test]
fn list_topics_is_ordered_by_creation() {
    let conn = open_db_in_memory().unwrap();
    let creator = users(1)[0];
    let first = create_topic(&conn, "ML", creator);
    let second = create_topic(&conn, "NLP", creator);

    let listed: Vec<_> = topic_service(&conn)
        .list_topics()
        .unwrap()
        .into_iter()
        .map(|topic| topic.id)
        .collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first) && listed.contains(&second));
}

#[test]
fn only_creator_edits_definition_with_current_version() {
    let conn = open_db_in_memory().unwrap();
    let people = users(2);
    let id = create_topic(&conn, "ML", people[0]);
    let service = topic_service(&conn);

    assert!(matches!(
        service.update_topic_definition(id, people[1], "hijack", 1),
        Err(TopicServiceError::NotCreator { .. })
    ));

    let updated = service
        .update_topic_definition(id, people[0], "Statistical learning", 1)
        .unwrap();
    assert_eq!(updated.definition, "Statistical learning");
    assert_eq!(updated.version, 2);

    let stale = service
        .update_topic_definition(id, people[0], "late edit", 1)
        .unwrap_err();
    assert!(stale.is_conflict());
    assert!(matches!(
        stale,
        TopicServiceError::Conflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));
}

#[test]
fn membership_is_idempotent_and_listed() {
    let conn = open_db_in_memory().unwrap();
    let people = users(2);
    let id = create_topic(&conn, "ML", people[0]);
    let service = topic_service(&conn);

    assert!(service.join_topic(id, people[1]).unwrap());
    assert!(!service.join_topic(id, people[1]).unwrap());
    assert_eq!(service.list_members(id).unwrap(), vec![people[1]]);
    assert_eq!(service.list_member_topics(people[1]).unwrap(), vec![id]);

    assert!(service.leave_topic(id, people[1]).unwrap());
    assert!(!service.leave_topic(id, people[1]).unwrap());
    assert!(service.list_members(id).unwrap().is_empty());
}

#[test]
fn referenced_topic_cannot_be_deleted() {
    let conn = open_db_in_memory().unwrap();
    let people = users(1);
    let ml = create_topic(&conn, "ML", people[0]);
    let dl = create_topic(&conn, "Deep Learning", people[0]);
    let unused = create_topic(&conn, "Unused", people[0]);
    create_paper(&conn, "Attention", &[ml]);
    MergeService::new(SqliteMergeRepository::try_new(&conn).unwrap())
        .propose_merge(people[0], dl, ml, false)
        .unwrap();

    let service = topic_service(&conn);
    match service.delete_topic(ml, 1).unwrap_err() {
        TopicServiceError::TopicInUse { references, .. } => {
            assert_eq!(references.papers, 1);
            assert_eq!(references.merge_edges, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        service.delete_topic(dl, 1),
        Err(TopicServiceError::TopicInUse { .. })
    ));

    service.delete_topic(unused, 1).unwrap();
    assert!(service.get_topic(unused).unwrap().is_none());
    assert!(matches!(
        service.delete_topic(unused, 1),
        Err(TopicServiceError::TopicNotFound(_))
    ));
}
