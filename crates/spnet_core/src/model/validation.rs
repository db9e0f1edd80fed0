//! Write-side validation errors shared by all model types.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Maximum topic name length after normalization, in characters.
pub const TOPIC_NAME_MAX_CHARS: usize = 200;

/// Rejected input for a model write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Topic name is blank after whitespace normalization.
    BlankTopicName,
    /// Topic name exceeds `TOPIC_NAME_MAX_CHARS`.
    TopicNameTooLong { max: usize, actual: usize },
    /// Merge proposal points a topic at itself.
    SelfMerge,
    /// A user tried to subscribe to their own recommendations.
    SelfSubscription,
    /// Comment has neither text nor a source URL, or the text is blank.
    EmptyComment,
    /// Comment source URL is not an absolute http(s) URL.
    InvalidSourceUrl(String),
    /// Comment is not attached to any paper.
    CommentWithoutPapers,
    /// Required free-text field is blank.
    BlankField(&'static str),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTopicName => write!(f, "topic name must not be blank"),
            Self::TopicNameTooLong { max, actual } => {
                write!(f, "topic name has {actual} characters; maximum is {max}")
            }
            Self::SelfMerge => write!(f, "a topic cannot be merged into itself"),
            Self::SelfSubscription => write!(f, "a user cannot subscribe to themselves"),
            Self::EmptyComment => write!(f, "comment must carry text or a source url"),
            Self::InvalidSourceUrl(value) => write!(f, "invalid comment source url `{value}`"),
            Self::CommentWithoutPapers => write!(f, "comment must reference at least one paper"),
            Self::BlankField(field) => write!(f, "`{field}` must not be blank"),
        }
    }
}

impl Error for ValidationError {}
