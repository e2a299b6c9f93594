//! In-memory stores
//!
//! DashMap-backed implementations of the storage traits. Single-entry
//! mutations go through `get_mut`, which holds the shard lock for the
//! duration of the closure and so gives the same per-document atomicity
//! MongoDB does. Key writes that touch the two unique indexes are
//! serialized through `index_lock`.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;

use super::{KeyFilter, KeyStore, LedgerStore, RecordPatch, UserPatch, UserStore};
use crate::db::schemas::{KeyDoc, KeyFields, RecordDoc, UserDoc};
use crate::types::{KeeperError, Result};

/// Keys indexed by id
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: DashMap<String, KeyDoc>,
    index_lock: Mutex<()>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// First key other than `except_id` that already uses this tag or pair
    fn clash(
        &self,
        tag: &str,
        series: &str,
        sequence: i32,
        except_id: Option<&str>,
    ) -> Option<String> {
        self.keys.iter().find_map(|entry| {
            let key = entry.value();
            if Some(key.id.as_str()) == except_id {
                return None;
            }
            if key.tag_number == tag {
                Some(format!("A key with tag number '{tag}' already exists"))
            } else if key.series_id == series && key.sequence_id == sequence {
                Some(format!(
                    "A key with series '{series}' and sequence {sequence} already exists"
                ))
            } else {
                None
            }
        })
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn insert(&self, key: KeyDoc) -> Result<()> {
        let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(detail) = self.clash(&key.tag_number, &key.series_id, key.sequence_id, None) {
            return Err(KeeperError::Conflict(detail));
        }
        self.keys.insert(key.id.clone(), key);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<KeyDoc>> {
        Ok(self.keys.get(id).map(|k| k.value().clone()))
    }

    async fn find_by_tag(&self, tag_number: &str) -> Result<Option<KeyDoc>> {
        Ok(self
            .keys
            .iter()
            .find(|k| k.tag_number == tag_number)
            .map(|k| k.value().clone()))
    }

    async fn find_by_series(&self, series_id: &str, sequence_id: i32) -> Result<Option<KeyDoc>> {
        Ok(self
            .keys
            .iter()
            .find(|k| k.series_id == series_id && k.sequence_id == sequence_id)
            .map(|k| k.value().clone()))
    }

    async fn list(&self, filter: &KeyFilter) -> Result<Vec<KeyDoc>> {
        let mut keys: Vec<KeyDoc> = self
            .keys
            .iter()
            .filter(|k| filter.matches(k.value()))
            .map(|k| k.value().clone())
            .collect();
        keys.sort_by(|a, b| a.tag_number.cmp(&b.tag_number));
        Ok(keys)
    }

    async fn update_fields(&self, id: &str, fields: &KeyFields) -> Result<bool> {
        let _guard = self.index_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(detail) = self.clash(
            &fields.tag_number,
            &fields.series_id,
            fields.sequence_id,
            Some(id),
        ) {
            return Err(KeeperError::Conflict(detail));
        }
        match self.keys.get_mut(id) {
            Some(mut key) => {
                fields.apply_to(&mut key);
                key.metadata.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_availability_if(
        &self,
        id: &str,
        expected: bool,
        available: bool,
    ) -> Result<bool> {
        match self.keys.get_mut(id) {
            Some(mut key) if key.is_available == expected => {
                key.is_available = available;
                key.metadata.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.keys.remove(id).is_some())
    }
}

/// Users indexed by pid
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserDoc>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: UserDoc) -> Result<()> {
        match self.users.entry(user.pid.clone()) {
            Entry::Occupied(_) => Err(KeeperError::Conflict(format!(
                "A user with pid '{}' already exists",
                user.pid
            ))),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    async fn find_by_pid(&self, pid: &str) -> Result<Option<UserDoc>> {
        Ok(self.users.get(pid).map(|u| u.value().clone()))
    }

    async fn find_by_name(&self, full_name: &str) -> Result<Vec<UserDoc>> {
        let mut users: Vec<UserDoc> = self
            .users
            .iter()
            .filter(|u| u.full_name == full_name)
            .map(|u| u.value().clone())
            .collect();
        users.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(users)
    }

    async fn list(&self) -> Result<Vec<UserDoc>> {
        let mut users: Vec<UserDoc> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(users)
    }

    async fn update_profile(&self, pid: &str, patch: &UserPatch) -> Result<bool> {
        match self.users.get_mut(pid) {
            Some(mut user) => {
                if let Some(name) = &patch.full_name {
                    user.full_name = name.clone();
                }
                if let Some(role) = patch.role {
                    user.role = role;
                }
                user.metadata.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn push_key(&self, pid: &str, key_id: &str) -> Result<bool> {
        match self.users.get_mut(pid) {
            Some(mut user) => {
                if !user.holds(key_id) {
                    user.owned_keys.push(key_id.to_string());
                    user.metadata.touch();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pull_key(&self, pid: &str, key_id: &str) -> Result<bool> {
        match self.users.get_mut(pid) {
            Some(mut user) => {
                user.owned_keys.retain(|k| k != key_id);
                user.metadata.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn owners_of(&self, key_id: &str) -> Result<Vec<UserDoc>> {
        let mut owners: Vec<UserDoc> = self
            .users
            .iter()
            .filter(|u| u.holds(key_id))
            .map(|u| u.value().clone())
            .collect();
        owners.sort_by(|a, b| a.pid.cmp(&b.pid));
        Ok(owners)
    }

    async fn delete(&self, pid: &str) -> Result<bool> {
        Ok(self.users.remove(pid).is_some())
    }
}

/// Ledger records indexed by id
#[derive(Default)]
pub struct MemoryLedgerStore {
    records: DashMap<String, RecordDoc>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert(&self, record: RecordDoc) -> Result<()> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(KeeperError::Conflict(format!(
                "A record with id '{}' already exists",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn find(&self, id: &str) -> Result<Option<RecordDoc>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<RecordDoc>> {
        let mut records: Vec<RecordDoc> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(records)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<bool> {
        match self.records.get_mut(id) {
            Some(mut record) => {
                patch.apply_to(&mut record);
                record.metadata.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn has_records_for(&self, tag_number: &str) -> Result<bool> {
        Ok(self.records.iter().any(|r| r.tag_number == tag_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::schemas::{Exchange, KeyType};

    fn key(tag: &str, series: &str, sequence: i32) -> KeyDoc {
        KeyDoc::new(
            tag.into(),
            series.into(),
            sequence,
            "McB".into(),
            KeyType::Door,
            vec!["1F".into()],
            true,
            String::new(),
        )
    }

    #[tokio::test]
    async fn test_key_uniqueness() {
        let store = MemoryKeyStore::new();
        store.insert(key("101", "A1", 1)).await.unwrap();

        let err = store.insert(key("101", "B1", 1)).await.unwrap_err();
        assert!(matches!(err, KeeperError::Conflict(_)));

        let err = store.insert(key("102", "A1", 1)).await.unwrap_err();
        assert!(matches!(err, KeeperError::Conflict(_)));

        store.insert(key("102", "A1", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_exempts_own_identity() {
        let store = MemoryKeyStore::new();
        let original = key("101", "A1", 1);
        let id = original.id.clone();
        store.insert(original).await.unwrap();
        store.insert(key("102", "A1", 2)).await.unwrap();

        let mut fields = KeyFields {
            tag_number: "101".into(),
            series_id: "A1".into(),
            sequence_id: 1,
            building: "Torg".into(),
            key_type: KeyType::Door,
            location: vec!["2F".into()],
            comment: "moved".into(),
        };
        assert!(store.update_fields(&id, &fields).await.unwrap());

        fields.tag_number = "102".into();
        assert!(matches!(
            store.update_fields(&id, &fields).await.unwrap_err(),
            KeeperError::Conflict(_)
        ));

        fields.tag_number = "103".into();
        fields.sequence_id = 3;
        assert!(!store.update_fields("missing", &fields).await.unwrap());
    }

    #[tokio::test]
    async fn test_availability_compare_and_set() {
        let store = MemoryKeyStore::new();
        let k = key("101", "A1", 1);
        let id = k.id.clone();
        store.insert(k).await.unwrap();

        assert!(store.set_availability_if(&id, true, false).await.unwrap());
        // Second flip loses: the flag is no longer `true`
        assert!(!store.set_availability_if(&id, true, false).await.unwrap());
        assert!(!store.find_by_id(&id).await.unwrap().unwrap().is_available);
    }

    #[tokio::test]
    async fn test_push_key_is_a_set_insert() {
        let store = MemoryUserStore::new();
        store
            .insert(UserDoc::new("jdoe123".into(), "Jane Doe".into(), Role::Requestor))
            .await
            .unwrap();

        assert!(store.push_key("jdoe123", "k1").await.unwrap());
        assert!(store.push_key("jdoe123", "k1").await.unwrap());
        let user = store.find_by_pid("jdoe123").await.unwrap().unwrap();
        assert_eq!(user.owned_keys, vec!["k1".to_string()]);

        assert_eq!(store.owners_of("k1").await.unwrap().len(), 1);
        assert!(store.pull_key("jdoe123", "k1").await.unwrap());
        assert!(store.owners_of("k1").await.unwrap().is_empty());
        assert!(!store.push_key("nobody", "k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_pid() {
        let store = MemoryUserStore::new();
        let user = UserDoc::new("jdoe123".into(), "Jane Doe".into(), Role::Requestor);
        store.insert(user.clone()).await.unwrap();
        assert!(matches!(
            store.insert(user).await.unwrap_err(),
            KeeperError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_ledger_references() {
        let store = MemoryLedgerStore::new();
        store
            .insert(RecordDoc::new(
                "101".into(),
                "jdoe123".into(),
                Exchange::Acquired,
                String::new(),
            ))
            .await
            .unwrap();
        assert!(store.has_records_for("101").await.unwrap());
        assert!(!store.has_records_for("102").await.unwrap());
    }
}
