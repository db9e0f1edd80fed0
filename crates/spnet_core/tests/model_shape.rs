use serde_json::json;
use spnet_core::model::subscription::Priority;
use spnet_core::{CommentBody, CoreConfig, MatchReason, MergeThreshold};
use std::collections::BTreeSet;
use uuid::Uuid;

#[test]
fn comment_body_is_tagged() {
    let text = serde_json::to_value(CommentBody::Text("nice".to_string())).unwrap();
    assert_eq!(text, json!({"kind": "text", "value": "nice"}));

    let url: CommentBody =
        serde_json::from_value(json!({"kind": "source_url", "value": "https://x.org"})).unwrap();
    assert_eq!(url, CommentBody::SourceUrl("https://x.org".to_string()));
}

#[test]
fn priority_serializes_snake_case_and_sorts_high_first() {
    assert_eq!(serde_json::to_value(Priority::High).unwrap(), json!("high"));
    let mut priorities = vec![Priority::Low, Priority::High, Priority::Medium];
    priorities.sort();
    assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
}

#[test]
fn threshold_round_trips_as_plain_number_and_rejects_out_of_range() {
    let threshold = MergeThreshold::new(0.25).unwrap();
    assert_eq!(serde_json::to_value(threshold).unwrap(), json!(0.25));
    assert!(serde_json::from_value::<MergeThreshold>(json!(2.0)).is_err());

    let config = CoreConfig {
        merge_threshold: threshold,
    };
    assert_eq!(
        serde_json::to_value(config).unwrap(),
        json!({"merge_threshold": 0.25})
    );
}

#[test]
fn match_reason_lists_shared_topics() {
    let topic = Uuid::nil();
    let reason = MatchReason::Topics(BTreeSet::from([topic]));
    assert_eq!(
        serde_json::to_value(reason).unwrap(),
        json!({"kind": "topics", "topics": [topic.to_string()]})
    );
    assert_eq!(
        serde_json::to_value(MatchReason::RequestAll).unwrap(),
        json!({"kind": "request_all"})
    );
}
