//! Ledger record schema
//!
//! Records copy `tag_number` and `pid` by value so history survives the
//! deletion of the key or user it talks about.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for ledger records
pub const LEDGER_COLLECTION: &str = "ledger";

/// Custody event narrated by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    #[default]
    Acquired,
    Returned,
    Reported,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Acquired => write!(f, "acquired"),
            Exchange::Returned => write!(f, "returned"),
            Exchange::Reported => write!(f, "reported"),
        }
    }
}

/// Ledger record stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RecordDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub tag_number: String,

    pub pid: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,

    pub exchange: Exchange,

    #[serde(default)]
    pub comment: String,
}

impl RecordDoc {
    /// Create a record dated now
    pub fn new(tag_number: String, pid: String, exchange: Exchange, comment: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Metadata::new(),
            tag_number,
            pid,
            date: Utc::now(),
            exchange,
            comment,
        }
    }
}

impl IntoIndexes for RecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "tag_number": 1 },
                Some(
                    IndexOptions::builder()
                        .name("tag_number_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "pid": 1 },
                Some(IndexOptions::builder().name("pid_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for RecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
