//! User identity and profile reference data.
//!
//! Identities come from the external identity provider; the core only
//! stores the stable identifier and a small activity profile.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable user identifier supplied by the identity provider.
pub type UserId = Uuid;

/// Activity profile for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    /// Epoch ms when the profile was first seen.
    pub joined_at: i64,
    /// Epoch ms of the most recent recorded activity.
    pub last_seen_at: Option<i64>,
}
