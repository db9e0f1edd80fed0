//! Read-mostly reference data: paper sources, papers and authors.

use crate::model::topic::TopicId;
use crate::model::user::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub type PaperSourceId = Uuid;
pub type PaperId = Uuid;
pub type AuthorId = Uuid;

/// External paper repository (arXiv, PubMed, ...).
///
/// `url_template` is interpreted by the external paper source registry,
/// not by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSource {
    pub id: PaperSourceId,
    pub name: String,
    pub url_template: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,
    pub source: PaperSourceId,
    /// Identifier inside the external source.
    pub external_id: String,
    /// Extra data for URL construction.
    pub url_data: String,
    pub title: String,
    pub topics: BTreeSet<TopicId>,
    pub submitter: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
    pub email: String,
    /// Set when the author is also a registered user.
    pub user: Option<UserId>,
}
