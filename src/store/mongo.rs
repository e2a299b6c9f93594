//! MongoDB-backed stores
//!
//! Uniqueness is enforced by the schema indexes; a duplicate-key write comes
//! back from `MongoCollection` as `Conflict`. Availability flips are a single
//! filtered `update_one`, which is the compare-and-set the custody sagas need.

use async_trait::async_trait;
use bson::{doc, DateTime, Document};

use super::{KeyFilter, KeyStore, LedgerStore, RecordPatch, UserPatch, UserStore};
use crate::db::schemas::{
    KeyDoc, KeyFields, RecordDoc, UserDoc, KEY_COLLECTION, LEDGER_COLLECTION, USER_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::Result;

fn key_filter_doc(filter: &KeyFilter) -> Document {
    let mut query = Document::new();
    if let Some(building) = &filter.building {
        query.insert("building", building.clone());
    }
    if let Some(key_type) = filter.key_type {
        query.insert("key_type", key_type.as_str());
    }
    if let Some(available) = filter.is_available {
        query.insert("is_available", available);
    }
    if let Some(series) = &filter.series_id {
        query.insert("series_id", series.clone());
    }
    query
}

pub struct MongoKeyStore {
    collection: MongoCollection<KeyDoc>,
}

impl MongoKeyStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection::<KeyDoc>(KEY_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl KeyStore for MongoKeyStore {
    async fn insert(&self, key: KeyDoc) -> Result<()> {
        let detail = format!(
            "A key with tag number '{}' or series '{}' and sequence {} already exists",
            key.tag_number, key.series_id, key.sequence_id
        );
        self.collection.insert_one(key, &detail).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<KeyDoc>> {
        self.collection.find_one(doc! { "_id": id }).await
    }

    async fn find_by_tag(&self, tag_number: &str) -> Result<Option<KeyDoc>> {
        self.collection
            .find_one(doc! { "tag_number": tag_number })
            .await
    }

    async fn find_by_series(&self, series_id: &str, sequence_id: i32) -> Result<Option<KeyDoc>> {
        self.collection
            .find_one(doc! { "series_id": series_id, "sequence_id": sequence_id })
            .await
    }

    async fn list(&self, filter: &KeyFilter) -> Result<Vec<KeyDoc>> {
        let mut keys = self.collection.find_many(key_filter_doc(filter)).await?;
        keys.sort_by(|a, b| a.tag_number.cmp(&b.tag_number));
        Ok(keys)
    }

    async fn update_fields(&self, id: &str, fields: &KeyFields) -> Result<bool> {
        let detail = format!(
            "A key with tag number '{}' or series '{}' and sequence {} already exists",
            fields.tag_number, fields.series_id, fields.sequence_id
        );
        let result = self
            .collection
            .update_one(
                doc! { "_id": id },
                doc! {
                    "$set": {
                        "tag_number": fields.tag_number.clone(),
                        "series_id": fields.series_id.clone(),
                        "sequence_id": fields.sequence_id,
                        "building": fields.building.clone(),
                        "key_type": fields.key_type.as_str(),
                        "location": fields.location.clone(),
                        "comment": fields.comment.clone(),
                        "metadata.updated_at": DateTime::now(),
                    }
                },
                &detail,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn set_availability_if(
        &self,
        id: &str,
        expected: bool,
        available: bool,
    ) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": id, "is_available": expected },
                doc! {
                    "$set": {
                        "is_available": available,
                        "metadata.updated_at": DateTime::now(),
                    }
                },
                "availability update",
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.collection.delete_one(doc! { "_id": id }).await
    }
}

pub struct MongoUserStore {
    collection: MongoCollection<UserDoc>,
}

impl MongoUserStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection::<UserDoc>(USER_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn insert(&self, user: UserDoc) -> Result<()> {
        let detail = format!("A user with pid '{}' already exists", user.pid);
        self.collection.insert_one(user, &detail).await
    }

    async fn find_by_pid(&self, pid: &str) -> Result<Option<UserDoc>> {
        self.collection.find_one(doc! { "pid": pid }).await
    }

    async fn find_by_name(&self, full_name: &str) -> Result<Vec<UserDoc>> {
        let mut users = self
            .collection
            .find_many(doc! { "full_name": full_name })
            .await?;
        users.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(users)
    }

    async fn list(&self) -> Result<Vec<UserDoc>> {
        let mut users = self.collection.find_many(doc! {}).await?;
        users.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(users)
    }

    async fn update_profile(&self, pid: &str, patch: &UserPatch) -> Result<bool> {
        let mut set = doc! { "metadata.updated_at": DateTime::now() };
        if let Some(name) = &patch.full_name {
            set.insert("full_name", name.clone());
        }
        if let Some(role) = patch.role {
            set.insert("role", role.as_str());
        }
        let result = self
            .collection
            .update_one(doc! { "pid": pid }, doc! { "$set": set }, "user update")
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn push_key(&self, pid: &str, key_id: &str) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "pid": pid },
                doc! {
                    "$addToSet": { "owned_keys": key_id },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
                "key assignment",
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn pull_key(&self, pid: &str, key_id: &str) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "pid": pid },
                doc! {
                    "$pull": { "owned_keys": key_id },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
                "key unassignment",
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn owners_of(&self, key_id: &str) -> Result<Vec<UserDoc>> {
        self.collection
            .find_many(doc! { "owned_keys": key_id })
            .await
    }

    async fn delete(&self, pid: &str) -> Result<bool> {
        self.collection.delete_one(doc! { "pid": pid }).await
    }
}

pub struct MongoLedgerStore {
    collection: MongoCollection<RecordDoc>,
}

impl MongoLedgerStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection::<RecordDoc>(LEDGER_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn insert(&self, record: RecordDoc) -> Result<()> {
        let detail = format!("A record with id '{}' already exists", record.id);
        self.collection.insert_one(record, &detail).await
    }

    async fn find(&self, id: &str) -> Result<Option<RecordDoc>> {
        self.collection.find_one(doc! { "_id": id }).await
    }

    async fn list(&self) -> Result<Vec<RecordDoc>> {
        let mut records = self.collection.find_many(doc! {}).await?;
        records.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(records)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<bool> {
        let mut set = doc! { "metadata.updated_at": DateTime::now() };
        if let Some(tag) = &patch.tag_number {
            set.insert("tag_number", tag.clone());
        }
        if let Some(pid) = &patch.pid {
            set.insert("pid", pid.clone());
        }
        if let Some(date) = patch.date {
            set.insert("date", DateTime::from_chrono(date));
        }
        if let Some(exchange) = patch.exchange {
            set.insert("exchange", exchange.to_string());
        }
        if let Some(comment) = &patch.comment {
            set.insert("comment", comment.clone());
        }
        let result = self
            .collection
            .update_one(doc! { "_id": id }, doc! { "$set": set }, "record update")
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.collection.delete_one(doc! { "_id": id }).await
    }

    async fn has_records_for(&self, tag_number: &str) -> Result<bool> {
        let count = self
            .collection
            .count(doc! { "tag_number": tag_number })
            .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::KeyType;

    #[test]
    fn test_key_filter_doc_uses_stored_names() {
        let filter = KeyFilter {
            key_type: Some(KeyType::DisplayCase),
            is_available: Some(false),
            ..Default::default()
        };
        let query = key_filter_doc(&filter);
        assert_eq!(query.get_str("key_type").unwrap(), "display-case");
        assert!(!query.get_bool("is_available").unwrap());
        assert!(!query.contains_key("building"));
    }

    #[test]
    fn test_empty_filter_is_empty_query() {
        assert!(key_filter_doc(&KeyFilter::default()).is_empty());
    }
}
