mod common;

use common::{create_paper, create_topic, users};
use rusqlite::Connection;
use spnet_core::model::validation::ValidationError;
use spnet_core::repo::comment_repo::SqliteCommentRepository;
use spnet_core::repo::recommendation_repo::{
    RecommendationRepository, SqliteRecommendationRepository,
};
use spnet_core::{
    open_db_in_memory, CommentBody, CommentService, CommentServiceError, NewComment,
    NewRecommendation, RecommendationId, UserId,
};
use uuid::Uuid;

fn comment_service(conn: &Connection) -> CommentService<SqliteCommentRepository<'_>> {
    CommentService::new(SqliteCommentRepository::try_new(conn).unwrap())
}

fn create_recommendation(conn: &Connection, recommender: UserId, paper: Uuid) -> RecommendationId {
    let repo = SqliteRecommendationRepository::try_new(conn).unwrap();
    let recommendation = NewRecommendation::new(recommender, paper).into_recommendation();
    repo.create_recommendation(&recommendation).unwrap()
}

#[test]
fn siblings_keep_insertion_order_with_strictly_increasing_timestamps() {
    let conn = open_db_in_memory().unwrap();
    let author = users(1)[0];
    let paper = create_paper(&conn, "Paper", &[]);
    let service = comment_service(&conn);
    let root = service
        .insert_comment(NewComment::text(author, [paper], "root"), None)
        .unwrap();

    let children: Vec<_> = (0..10)
        .map(|index| {
            service
                .insert_comment(
                    NewComment::text(author, [paper], format!("reply {index}")),
                    Some(root),
                )
                .unwrap()
        })
        .collect();

    let listed = service.children_of(root).unwrap();
    assert_eq!(
        listed.iter().map(|comment| comment.id).collect::<Vec<_>>(),
        children
    );
    assert!(listed
        .windows(2)
        .all(|pair| pair[0].created_at < pair[1].created_at));
    assert!(listed.iter().all(|comment| comment.parent == Some(root)));
}

#[test]
fn cursor_is_lazy_restartable_and_bounded_by_its_snapshot() {
    let conn = open_db_in_memory().unwrap();
    let author = users(1)[0];
    let paper = create_paper(&conn, "Paper", &[]);
    let service = comment_service(&conn);
    let root = service
        .insert_comment(NewComment::text(author, [paper], "root"), None)
        .unwrap();
    let before: Vec<_> = (0..5)
        .map(|index| {
            service
                .insert_comment(
                    NewComment::text(author, [paper], format!("early {index}")),
                    Some(root),
                )
                .unwrap()
        })
        .collect();

    let mut cursor = service.child_cursor(root, 2).unwrap();
    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.id, before[0]);

    let late = service
        .insert_comment(NewComment::text(author, [paper], "late"), Some(root))
        .unwrap();

    let rest: Vec<_> = cursor.by_ref().map(|item| item.unwrap().id).collect();
    assert_eq!(rest, before[1..].to_vec());

    cursor.restart();
    let replay: Vec<_> = cursor.map(|item| item.unwrap().id).collect();
    assert_eq!(replay, before);

    let fresh = service.children_of(root).unwrap();
    assert_eq!(fresh.last().unwrap().id, late);
    assert_eq!(
        fresh[..5].iter().map(|comment| comment.id).collect::<Vec<_>>(),
        before
    );
}

#[test]
fn children_page_uses_keyset_pagination() {
    let conn = open_db_in_memory().unwrap();
    let author = users(1)[0];
    let paper = create_paper(&conn, "Paper", &[]);
    let service = comment_service(&conn);
    let root = service
        .insert_comment(NewComment::text(author, [paper], "root"), None)
        .unwrap();
    for index in 0..5 {
        service
            .insert_comment(
                NewComment::text(author, [paper], format!("reply {index}")),
                Some(root),
            )
            .unwrap();
    }

    let first = service.children_page(root, None, 3).unwrap();
    assert_eq!(first.len(), 3);
    let second = service
        .children_page(root, Some(first[2].sort_key()), 3)
        .unwrap();
    assert_eq!(second.len(), 2);
    assert!(first[2].sort_key() < second[0].sort_key());
}

#[test]
fn child_must_share_a_paper_with_parent() {
    let conn = open_db_in_memory().unwrap();
    let author = users(1)[0];
    let first_paper = create_paper(&conn, "First", &[]);
    let second_paper = create_paper(&conn, "Second", &[]);
    let service = comment_service(&conn);
    let root = service
        .insert_comment(NewComment::text(author, [first_paper], "root"), None)
        .unwrap();

    assert!(matches!(
        service.insert_comment(NewComment::text(author, [second_paper], "off"), Some(root)),
        Err(CommentServiceError::InvalidAttachment { parent }) if parent == root
    ));
    service
        .insert_comment(
            NewComment::text(author, [second_paper, first_paper], "both"),
            Some(root),
        )
        .unwrap();

    assert!(matches!(
        service.insert_comment(NewComment::text(author, [first_paper], "x"), Some(Uuid::new_v4())),
        Err(CommentServiceError::ParentNotFound(_))
    ));
    assert!(matches!(
        service.insert_comment(NewComment::text(author, [Uuid::new_v4()], "x"), None),
        Err(CommentServiceError::PaperNotFound(_))
    ));
    assert!(matches!(
        service.insert_comment(NewComment::source_url(author, [first_paper], "mailto:x"), None),
        Err(CommentServiceError::Validation(ValidationError::InvalidSourceUrl(_)))
    ));
}

#[test]
fn roots_for_paper_lists_only_roots_of_that_paper() {
    let conn = open_db_in_memory().unwrap();
    let author = users(1)[0];
    let paper = create_paper(&conn, "Paper", &[]);
    let other = create_paper(&conn, "Other", &[]);
    let service = comment_service(&conn);

    let first = service
        .insert_comment(NewComment::text(author, [paper], "first"), None)
        .unwrap();
    service
        .insert_comment(NewComment::text(author, [paper], "reply"), Some(first))
        .unwrap();
    service
        .insert_comment(NewComment::text(author, [other], "elsewhere"), None)
        .unwrap();
    let second = service
        .insert_comment(
            NewComment::source_url(author, [paper], "https://example.org/review"),
            None,
        )
        .unwrap();

    let roots: Vec<_> = service
        .roots_for_paper(paper, None, 10)
        .unwrap()
        .into_iter()
        .map(|comment| comment.id)
        .collect();
    assert_eq!(roots, vec![first, second]);
}

#[test]
fn walk_is_pre_order_and_depth_bounded() {
    let conn = open_db_in_memory().unwrap();
    let author = users(1)[0];
    let paper = create_paper(&conn, "Paper", &[]);
    let service = comment_service(&conn);
    let text = |body: &str| NewComment::text(author, [paper], body);

    let root = service.insert_comment(text("root"), None).unwrap();
    let a = service.insert_comment(text("a"), Some(root)).unwrap();
    let a1 = service.insert_comment(text("a1"), Some(a)).unwrap();
    let a1x = service.insert_comment(text("a1x"), Some(a1)).unwrap();
    let b = service.insert_comment(text("b"), Some(root)).unwrap();

    let full: Vec<_> = service
        .walk(root, 10)
        .unwrap()
        .into_iter()
        .map(|entry| (entry.depth, entry.comment.id))
        .collect();
    assert_eq!(full, vec![(0, root), (1, a), (2, a1), (3, a1x), (1, b)]);

    let shallow: Vec<_> = service
        .walk(root, 1)
        .unwrap()
        .into_iter()
        .map(|entry| entry.comment.id)
        .collect();
    assert_eq!(shallow, vec![root, a, b]);
    assert_eq!(service.walk(root, 0).unwrap().len(), 1);
}

#[test]
fn review_link_is_exclusive_both_ways() {
    let conn = open_db_in_memory().unwrap();
    let author = users(1)[0];
    let topic = create_topic(&conn, "ML", author);
    let paper = create_paper(&conn, "Paper", &[topic]);
    let rec = create_recommendation(&conn, author, paper);
    let other_rec = create_recommendation(&conn, author, paper);
    let service = comment_service(&conn);
    let c1 = service
        .insert_comment(NewComment::text(author, [paper], "review"), None)
        .unwrap();
    let c2 = service
        .insert_comment(NewComment::text(author, [paper], "second opinion"), None)
        .unwrap();

    service.link_review(c1, rec).unwrap();
    let linked = service.get_comment(c1).unwrap().unwrap();
    assert_eq!(linked.recommendation, Some(rec));
    let stored = SqliteRecommendationRepository::try_new(&conn)
        .unwrap()
        .get_recommendation(rec)
        .unwrap()
        .unwrap();
    assert!(stored.has_review);

    assert!(matches!(
        service.link_review(c1, rec),
        Err(CommentServiceError::AlreadyLinked { .. })
    ));
    assert!(matches!(
        service.link_review(c2, rec),
        Err(CommentServiceError::ConflictingReview { comment, .. }) if comment == c2
    ));
    assert!(matches!(
        service.link_review(c1, other_rec),
        Err(CommentServiceError::ConflictingReview { .. })
    ));
    assert!(matches!(
        service.link_review(c2, Uuid::new_v4()),
        Err(CommentServiceError::RecommendationNotFound(_))
    ));
    service.link_review(c2, other_rec).unwrap();
}

#[test]
fn only_author_edits_text_with_current_version() {
    let conn = open_db_in_memory().unwrap();
    let people = users(2);
    let paper = create_paper(&conn, "Paper", &[]);
    let service = comment_service(&conn);
    let text = service
        .insert_comment(NewComment::text(people[0], [paper], "draft"), None)
        .unwrap();
    let link = service
        .insert_comment(
            NewComment::source_url(people[0], [paper], "https://example.org/r/1"),
            None,
        )
        .unwrap();

    assert!(matches!(
        service.edit_comment_text(text, people[1], "mine now", 1),
        Err(CommentServiceError::NotAuthor { .. })
    ));
    let edited = service
        .edit_comment_text(text, people[0], "final", 1)
        .unwrap();
    assert_eq!(edited.body, CommentBody::Text("final".to_string()));
    assert_eq!(edited.version, 2);
    assert!(service
        .edit_comment_text(text, people[0], "again", 1)
        .unwrap_err()
        .is_conflict());
    assert!(matches!(
        service.edit_comment_text(link, people[0], "text", 1),
        Err(CommentServiceError::NotTextComment(_))
    ));
    assert!(matches!(
        service.edit_comment_text(text, people[0], "  ", 2),
        Err(CommentServiceError::Validation(ValidationError::EmptyComment))
    ));
}
