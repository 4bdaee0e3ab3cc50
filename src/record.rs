use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking a locally synthesized id the backend has not confirmed yet.
pub const OPTIMISTIC_PREFIX: &str = "optimistic-";

/// One bookmark row. The serde shape matches the backend columns
/// (`user_id`, `created_at`, `client_mutation_id`) so records pass through
/// the REST layer and the push feed without any mapping step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_mutation_id: Option<String>,
}

impl BookmarkRecord {
    /// Build the provisional record for a fresh optimistic insert.
    pub fn provisional(user_id: &str, title: &str, url: &str, mutation_id: &str) -> Self {
        BookmarkRecord {
            id: format!("{}{}", OPTIMISTIC_PREFIX, mutation_id),
            user_id: user_id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
            client_mutation_id: Some(mutation_id.to_string()),
        }
    }

    /// True while the record is awaiting backend confirmation.
    pub fn is_provisional(&self) -> bool {
        self.client_mutation_id.is_some() || self.id.starts_with(OPTIMISTIC_PREFIX)
    }
}

/// Fresh correlation id for one mutation attempt.
pub fn new_mutation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Stable identity for one engine instance ("tab") lifetime.
pub fn new_tab_id() -> String {
    Uuid::new_v4().to_string()
}
