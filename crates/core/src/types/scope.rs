//! The key that partitions cart and wishlist rows.

use serde::{Deserialize, Serialize};

use super::id::{SessionId, UserId};

/// Exactly one of an authenticated user or a guest session.
///
/// Cart and wishlist rows carry either a `user_id` or a `session_id`, never
/// both. A manager only ever reads and writes one scope at a time; switching
/// from guest to user does not merge rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    User(UserId),
    Guest(SessionId),
}

impl Scope {
    /// Column holding this scope's key.
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::User(_) => "user_id",
            Self::Guest(_) => "session_id",
        }
    }

    /// Upsert conflict target: the uniqueness key for one product per scope.
    #[must_use]
    pub const fn conflict_key(&self) -> &'static [&'static str] {
        match self {
            Self::User(_) => &["user_id", "product_id"],
            Self::Guest(_) => &["session_id", "product_id"],
        }
    }

    /// The key value as a UUID.
    #[must_use]
    pub const fn key(&self) -> uuid::Uuid {
        match self {
            Self::User(id) => id.as_uuid(),
            Self::Guest(id) => id.as_uuid(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}
