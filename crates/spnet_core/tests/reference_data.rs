mod common;

use common::{create_paper, create_topic, users};
use spnet_core::model::reference::{Author, PaperSource};
use spnet_core::model::validation::ValidationError;
use spnet_core::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use spnet_core::repo::subscription_repo::SqliteSubscriptionRepository;
use spnet_core::{
    open_db_in_memory, EntityRef, Priority, RepoError, SubscriptionService,
    SubscriptionServiceError,
};
use uuid::Uuid;

#[test]
fn paper_source_names_are_unique() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteReferenceRepository::try_new(&conn).unwrap();
    let source = PaperSource {
        id: Uuid::new_v4(),
        name: "PubMed".to_string(),
        url_template: "https://pubmed.ncbi.nlm.nih.gov/{id}".to_string(),
        description: "Biomedical literature".to_string(),
    };
    repo.create_paper_source(&source).unwrap();
    assert_eq!(repo.get_paper_source(source.id).unwrap(), Some(source.clone()));

    let duplicate = PaperSource {
        id: Uuid::new_v4(),
        ..source
    };
    assert!(matches!(
        repo.create_paper_source(&duplicate),
        Err(RepoError::Duplicate(EntityRef::PaperSource(_)))
    ));
    assert_eq!(repo.list_paper_sources().unwrap().len(), 1);
}

#[test]
fn papers_carry_topics_and_authors() {
    let conn = open_db_in_memory().unwrap();
    let people = users(1);
    let topic = create_topic(&conn, "ML", people[0]);
    let paper = create_paper(&conn, "Attention", &[topic]);
    let repo = SqliteReferenceRepository::try_new(&conn).unwrap();

    let stored = repo.get_paper(paper).unwrap().unwrap();
    assert!(stored.topics.contains(&topic));
    assert_eq!(repo.list_papers_for_topic(topic).unwrap().len(), 1);

    let author = Author {
        id: Uuid::new_v4(),
        name: "A. Vaswani".to_string(),
        email: String::new(),
        user: Some(people[0]),
    };
    repo.create_author(&author).unwrap();
    assert!(repo.add_author_paper(author.id, paper).unwrap());
    assert!(!repo.add_author_paper(author.id, paper).unwrap());
    assert_eq!(repo.list_authors_for_paper(paper).unwrap(), vec![author]);
}

#[test]
fn user_profiles_and_want_to_read() {
    let conn = open_db_in_memory().unwrap();
    let user = users(1)[0];
    let paper = create_paper(&conn, "Paper", &[]);
    let repo = SqliteReferenceRepository::try_new(&conn).unwrap();

    let profile = repo.ensure_user_profile(user, 1_000).unwrap();
    assert_eq!(profile.joined_at, 1_000);
    assert_eq!(repo.ensure_user_profile(user, 5_000).unwrap().joined_at, 1_000);
    repo.record_seen(user, 2_000).unwrap();
    repo.record_seen(user, 1_500).unwrap();
    assert_eq!(
        repo.get_user_profile(user).unwrap().unwrap().last_seen_at,
        Some(2_000)
    );
    assert!(matches!(
        repo.record_seen(Uuid::new_v4(), 1),
        Err(RepoError::NotFound(EntityRef::UserProfile(_)))
    ));

    assert!(repo.add_want_to_read(user, paper).unwrap());
    assert!(!repo.add_want_to_read(user, paper).unwrap());
    assert_eq!(repo.list_want_to_read(user).unwrap(), vec![paper]);
    assert!(repo.remove_want_to_read(user, paper).unwrap());
    assert!(repo.list_want_to_read(user).unwrap().is_empty());
}

#[test]
fn subscriptions_upsert_instead_of_duplicating() {
    let conn = open_db_in_memory().unwrap();
    let people = users(2);
    let service = SubscriptionService::new(SqliteSubscriptionRepository::try_new(&conn).unwrap());

    let first = service
        .upsert_subscription(people[0], people[1], Priority::Low, false)
        .unwrap();
    assert_eq!(first.version, 1);
    let same = service
        .upsert_subscription(people[0], people[1], Priority::Low, false)
        .unwrap();
    assert_eq!(same.version, 1);
    let changed = service
        .upsert_subscription(people[0], people[1], Priority::High, true)
        .unwrap();
    assert_eq!(changed.version, 2);
    assert_eq!(changed.priority, Priority::High);
    assert!(changed.request_all);
    assert_eq!(
        service
            .list_subscriptions_for_recommender(people[1])
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        service
            .list_subscriptions_for_subscriber(people[0])
            .unwrap()
            .len(),
        1
    );

    assert!(matches!(
        service.upsert_subscription(people[0], people[0], Priority::Low, false),
        Err(SubscriptionServiceError::Validation(ValidationError::SelfSubscription))
    ));

    assert!(service
        .remove_subscription(people[0], people[1], 1)
        .unwrap_err()
        .is_conflict());
    service.remove_subscription(people[0], people[1], 2).unwrap();
    assert!(service.get_subscription(people[0], people[1]).unwrap().is_none());
    assert!(matches!(
        service.remove_subscription(people[0], people[1], 2),
        Err(SubscriptionServiceError::SubscriptionNotFound { .. })
    ));
}
