//! Storage seams for keys, users, and ledger records
//!
//! Every method is a single-document operation. Anything that spans two
//! documents is sequenced by the custody coordinator, never here.
//!
//! Two implementations exist:
//! - `mongo`: MongoDB collections with schema-declared unique indexes
//! - `memory`: DashMap-backed, used for `--storage memory` and in tests

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::Role;
use crate::db::schemas::{Exchange, KeyDoc, KeyFields, KeyType, RecordDoc, UserDoc};
use crate::db::MongoClient;
use crate::types::Result;

pub use memory::{MemoryKeyStore, MemoryLedgerStore, MemoryUserStore};
pub use mongo::{MongoKeyStore, MongoLedgerStore, MongoUserStore};

/// Optional predicates for listing keys; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyFilter {
    pub building: Option<String>,
    pub key_type: Option<KeyType>,
    pub is_available: Option<bool>,
    pub series_id: Option<String>,
}

impl KeyFilter {
    pub fn matches(&self, key: &KeyDoc) -> bool {
        self.building.as_ref().is_none_or(|b| &key.building == b)
            && self.key_type.is_none_or(|t| key.key_type == t)
            && self.is_available.is_none_or(|a| key.is_available == a)
            && self.series_id.as_ref().is_none_or(|s| &key.series_id == s)
    }
}

/// Partial user update; `pid` is deliberately absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub full_name: Option<String>,
    pub role: Option<Role>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.role.is_none()
    }
}

/// Partial record update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub tag_number: Option<String>,
    pub pid: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub exchange: Option<Exchange>,
    pub comment: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.tag_number.is_none()
            && self.pid.is_none()
            && self.date.is_none()
            && self.exchange.is_none()
            && self.comment.is_none()
    }

    pub fn apply_to(&self, record: &mut RecordDoc) {
        if let Some(tag) = &self.tag_number {
            record.tag_number = tag.clone();
        }
        if let Some(pid) = &self.pid {
            record.pid = pid.clone();
        }
        if let Some(date) = self.date {
            record.date = date;
        }
        if let Some(exchange) = self.exchange {
            record.exchange = exchange;
        }
        if let Some(comment) = &self.comment {
            record.comment = comment.clone();
        }
    }
}

/// Key persistence
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert a new key. Duplicate tag or (series, sequence) pair is `Conflict`.
    async fn insert(&self, key: KeyDoc) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<KeyDoc>>;

    async fn find_by_tag(&self, tag_number: &str) -> Result<Option<KeyDoc>>;

    async fn find_by_series(&self, series_id: &str, sequence_id: i32) -> Result<Option<KeyDoc>>;

    async fn list(&self, filter: &KeyFilter) -> Result<Vec<KeyDoc>>;

    /// Overwrite descriptive fields, leaving `is_available` alone.
    /// Returns false when no key has this id.
    async fn update_fields(&self, id: &str, fields: &KeyFields) -> Result<bool>;

    /// Compare-and-set on the availability flag.
    /// Returns true only if the flag was `expected` and is now `available`.
    async fn set_availability_if(&self, id: &str, expected: bool, available: bool)
        -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

/// User persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Duplicate pid is `Conflict`.
    async fn insert(&self, user: UserDoc) -> Result<()>;

    async fn find_by_pid(&self, pid: &str) -> Result<Option<UserDoc>>;

    async fn find_by_name(&self, full_name: &str) -> Result<Vec<UserDoc>>;

    async fn list(&self) -> Result<Vec<UserDoc>>;

    async fn update_profile(&self, pid: &str, patch: &UserPatch) -> Result<bool>;

    /// Add a key id to the user's set if absent. Returns false when the user is missing.
    async fn push_key(&self, pid: &str, key_id: &str) -> Result<bool>;

    /// Remove a key id from the user's set. Returns false when the user is missing.
    async fn pull_key(&self, pid: &str, key_id: &str) -> Result<bool>;

    /// Every user whose set contains `key_id`
    async fn owners_of(&self, key_id: &str) -> Result<Vec<UserDoc>>;

    async fn delete(&self, pid: &str) -> Result<bool>;
}

/// Ledger persistence
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, record: RecordDoc) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<RecordDoc>>;

    async fn list(&self) -> Result<Vec<RecordDoc>>;

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn has_records_for(&self, tag_number: &str) -> Result<bool>;
}

/// The three stores, shared by every service
#[derive(Clone)]
pub struct Stores {
    pub keys: Arc<dyn KeyStore>,
    pub users: Arc<dyn UserStore>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            keys: Arc::new(MemoryKeyStore::new()),
            users: Arc::new(MemoryUserStore::new()),
            ledger: Arc::new(MemoryLedgerStore::new()),
        }
    }

    /// Open the MongoDB collections, creating indexes as needed
    pub async fn mongo(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            keys: Arc::new(MongoKeyStore::new(client).await?),
            users: Arc::new(MongoUserStore::new(client).await?),
            ledger: Arc::new(MongoLedgerStore::new(client).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> KeyDoc {
        KeyDoc::new(
            "101".into(),
            "A1".into(),
            1,
            "McB".into(),
            KeyType::Door,
            vec!["1F".into()],
            true,
            String::new(),
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(KeyFilter::default().matches(&sample_key()));
    }

    #[test]
    fn test_filter_fields_combine() {
        let key = sample_key();
        let filter = KeyFilter {
            building: Some("McB".into()),
            is_available: Some(true),
            ..Default::default()
        };
        assert!(filter.matches(&key));

        let filter = KeyFilter {
            building: Some("McB".into()),
            key_type: Some(KeyType::FileCabinet),
            ..Default::default()
        };
        assert!(!filter.matches(&key));
    }

    #[test]
    fn test_record_patch_applies_only_set_fields() {
        let mut record = RecordDoc::new("101".into(), "jdoe123".into(), Exchange::Acquired, "".into());
        let patch = RecordPatch {
            exchange: Some(Exchange::Returned),
            ..Default::default()
        };
        patch.apply_to(&mut record);
        assert_eq!(record.exchange, Exchange::Returned);
        assert_eq!(record.tag_number, "101");
        assert!(!patch.is_empty());
        assert!(RecordPatch::default().is_empty());
    }
}
