//! Key document schema
//!
//! One document per physical key. `is_available` is the custody flag; the
//! owning side of the relation lives in `UserDoc::owned_keys`.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::KeeperError;

/// Collection name for keys
pub const KEY_COLLECTION: &str = "keys";

/// Kind of lock a key opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KeyType {
    #[default]
    #[serde(rename = "door", alias = "Door")]
    Door,
    #[serde(
        rename = "display-case",
        alias = "Display case",
        alias = "display",
        alias = "display_case"
    )]
    DisplayCase,
    #[serde(
        rename = "file-cabinet",
        alias = "File cabinet",
        alias = "file_cabinet"
    )]
    FileCabinet,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Door => "door",
            KeyType::DisplayCase => "display-case",
            KeyType::FileCabinet => "file-cabinet",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "door" => Ok(KeyType::Door),
            "display-case" | "display case" | "display_case" | "display" => {
                Ok(KeyType::DisplayCase)
            }
            "file-cabinet" | "file cabinet" | "file_cabinet" => Ok(KeyType::FileCabinet),
            other => Err(KeeperError::InvalidInput(format!(
                "key type must be door, display-case or file-cabinet (got '{other}')"
            ))),
        }
    }
}

/// Key document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct KeyDoc {
    /// Stable opaque identifier; user custody sets reference this, not the tag
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Human-facing unique tag (digits and dots)
    pub tag_number: String,

    pub series_id: String,

    pub sequence_id: i32,

    pub building: String,

    pub key_type: KeyType,

    /// Ordered location tags, e.g. ["1F", "Room 110"]
    #[serde(default)]
    pub location: Vec<String>,

    /// True iff no user currently holds this key
    pub is_available: bool,

    #[serde(default)]
    pub comment: String,
}

impl KeyDoc {
    /// Create a new key document with a fresh identifier
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tag_number: String,
        series_id: String,
        sequence_id: i32,
        building: String,
        key_type: KeyType,
        location: Vec<String>,
        is_available: bool,
        comment: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            tag_number,
            series_id,
            sequence_id,
            building,
            key_type,
            location,
            is_available,
            comment,
        }
    }
}

/// Descriptive fields of a key, already validated and normalized.
///
/// Field updates never carry `is_available`; only custody transitions flip it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFields {
    pub tag_number: String,
    pub series_id: String,
    pub sequence_id: i32,
    pub building: String,
    pub key_type: KeyType,
    pub location: Vec<String>,
    pub comment: String,
}

impl KeyFields {
    /// Build a fresh document from these fields
    pub fn into_doc(self, is_available: bool) -> KeyDoc {
        KeyDoc::new(
            self.tag_number,
            self.series_id,
            self.sequence_id,
            self.building,
            self.key_type,
            self.location,
            is_available,
            self.comment,
        )
    }

    /// Overwrite the descriptive fields of an existing document
    pub fn apply_to(&self, doc: &mut KeyDoc) {
        doc.tag_number = self.tag_number.clone();
        doc.series_id = self.series_id.clone();
        doc.sequence_id = self.sequence_id;
        doc.building = self.building.clone();
        doc.key_type = self.key_type;
        doc.location = self.location.clone();
        doc.comment = self.comment.clone();
    }
}

impl IntoIndexes for KeyDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "tag_number": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("tag_number_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "series_id": 1, "sequence_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("series_sequence_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "building": 1 },
                Some(
                    IndexOptions::builder()
                        .name("building_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for KeyDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
