//! Topic (user-coined taxonomy label) domain model.
//!
//! # Invariants
//! - `name` is trimmed, whitespace-collapsed and non-blank.
//! - Only the creator may edit `definition`; enforced by `TopicService`.
//! - A topic is never deleted while anything references it.

use crate::model::user::UserId;
use crate::model::validation::{ValidationError, TOPIC_NAME_MAX_CHARS};
use crate::model::{now_epoch_ms, Version};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Stable topic identifier.
pub type TopicId = Uuid;

/// User-defined taxonomy label for papers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub definition: String,
    pub creator: UserId,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms of the last definition edit.
    pub updated_at: i64,
    pub version: Version,
}

impl Topic {
    /// Builds a new, not yet persisted topic with a generated id.
    ///
    /// The name is normalized; the definition is stored as given.
    pub fn new(
        name: &str,
        definition: impl Into<String>,
        creator: UserId,
    ) -> Result<Self, ValidationError> {
        let now = now_epoch_ms();
        Ok(Self {
            id: Uuid::new_v4(),
            name: normalize_topic_name(name)?,
            definition: definition.into(),
            creator,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }
}

/// Trims and collapses internal whitespace of a topic name.
pub fn normalize_topic_name(raw: &str) -> Result<String, ValidationError> {
    let collapsed = WHITESPACE_RE.replace_all(raw.trim(), " ").into_owned();
    if collapsed.is_empty() {
        return Err(ValidationError::BlankTopicName);
    }
    let actual = collapsed.chars().count();
    if actual > TOPIC_NAME_MAX_CHARS {
        return Err(ValidationError::TopicNameTooLong {
            max: TOPIC_NAME_MAX_CHARS,
            actual,
        });
    }
    Ok(collapsed)
}

#[cfg(test)]
mod tests {
    use super::normalize_topic_name;
    use crate::model::validation::ValidationError;

    #[test]
    fn normalize_collapses_inner_whitespace() {
        assert_eq!(
            normalize_topic_name("  Deep \t  Learning\n").unwrap(),
            "Deep Learning"
        );
    }

    #[test]
    fn normalize_rejects_blank_and_oversized_names() {
        assert_eq!(
            normalize_topic_name(" \n ").unwrap_err(),
            ValidationError::BlankTopicName
        );
        let long = "x".repeat(201);
        assert!(matches!(
            normalize_topic_name(&long).unwrap_err(),
            ValidationError::TopicNameTooLong { actual: 201, .. }
        ));
    }
}
