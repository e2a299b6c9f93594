//! User document schema
//!
//! Stores the authenticated principal, its role, and the set of keys it holds.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// Full name given to users provisioned on first login
pub const PROVISIONAL_FULL_NAME: &str = "NA";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserDoc {
    #[serde(rename = "_id")]
    pub id: String,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Principal identifier from the identity provider; immutable
    pub pid: String,

    pub full_name: String,

    #[serde(default)]
    pub role: Role,

    /// Identifiers of held keys (`KeyDoc::id`)
    #[serde(default)]
    pub owned_keys: Vec<String>,
}

impl UserDoc {
    /// Create a new user document
    pub fn new(pid: String, full_name: String, role: Role) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            pid,
            full_name,
            role,
            owned_keys: Vec::new(),
        }
    }

    /// Lowest-privilege record created the first time a principal signs in
    pub fn provisional(pid: String) -> Self {
        Self::new(pid, PROVISIONAL_FULL_NAME.to_string(), Role::Requestor)
    }

    pub fn holds(&self, key_id: &str) -> bool {
        self.owned_keys.iter().any(|k| k == key_id)
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on pid
            (
                doc! { "pid": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("pid_unique".to_string())
                        .build(),
                ),
            ),
            // Name lookups are not unique
            (
                doc! { "full_name": 1 },
                Some(
                    IndexOptions::builder()
                        .name("full_name_index".to_string())
                        .build(),
                ),
            ),
            // Owner lookups by key id
            (
                doc! { "owned_keys": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owned_keys_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
