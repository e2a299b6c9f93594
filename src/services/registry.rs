//! Key registry
//!
//! Owns key documents: format rules, the two uniqueness constraints, and the
//! availability primitive. The registry never looks at users; anything that
//! crosses into custody goes through `CustodyCoordinator`.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{AccessGate, PermissionLevel};
use crate::db::schemas::{KeyDoc, KeyFields, KeyType};
use crate::store::{KeyFilter, KeyStore, LedgerStore};
use crate::types::validation::{
    split_location, validate_building, validate_location, validate_sequence_id,
    validate_series_id, validate_tag_number,
};
use crate::types::{KeeperError, Result};

/// Location as either a list or a single comma-delimited string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LocationInput {
    List(Vec<String>),
    Text(String),
}

impl LocationInput {
    fn into_entries(self) -> Vec<String> {
        match self {
            LocationInput::List(entries) => entries
                .iter()
                .flat_map(|entry| split_location(entry))
                .collect(),
            LocationInput::Text(raw) => split_location(&raw),
        }
    }
}

/// Sequence number as a JSON number or a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SequenceInput {
    Number(i64),
    Text(String),
}

impl SequenceInput {
    fn parse(self) -> Result<i32> {
        let value = match self {
            SequenceInput::Number(n) => n,
            SequenceInput::Text(raw) => raw.trim().parse::<i64>().map_err(|_| {
                KeeperError::InvalidInput(format!("sequence id '{raw}' is not an integer"))
            })?,
        };
        validate_sequence_id(value)
    }
}

/// Body for creating a key
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewKey {
    pub tag_number: String,
    pub series_id: String,
    pub sequence_id: SequenceInput,
    pub building: String,
    pub key_type: KeyType,
    pub location: LocationInput,
    /// Defaults to true; a key created unavailable shows up in the audit
    #[serde(default)]
    pub is_available: Option<bool>,
    #[serde(default)]
    pub comment: String,
}

/// Body for updating a key; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyUpdate {
    pub tag_number: Option<String>,
    pub series_id: Option<String>,
    pub sequence_id: Option<SequenceInput>,
    pub building: Option<String>,
    pub key_type: Option<KeyType>,
    pub location: Option<LocationInput>,
    pub comment: Option<String>,
}

/// Trim and validate a complete set of descriptive fields
fn normalize(
    tag_number: &str,
    series_id: &str,
    sequence_id: i32,
    building: &str,
    key_type: KeyType,
    location: Vec<String>,
    comment: &str,
) -> Result<KeyFields> {
    let fields = KeyFields {
        tag_number: tag_number.trim().to_string(),
        series_id: series_id.trim().to_string(),
        sequence_id,
        building: building.trim().to_string(),
        key_type,
        location,
        comment: comment.trim().to_string(),
    };
    validate_tag_number(&fields.tag_number)?;
    validate_series_id(&fields.series_id)?;
    validate_building(&fields.building)?;
    validate_location(&fields.location)?;
    Ok(fields)
}

#[derive(Clone)]
pub struct KeyRegistry {
    keys: Arc<dyn KeyStore>,
    ledger: Arc<dyn LedgerStore>,
    gate: AccessGate,
}

impl KeyRegistry {
    pub fn new(keys: Arc<dyn KeyStore>, ledger: Arc<dyn LedgerStore>, gate: AccessGate) -> Self {
        Self { keys, ledger, gate }
    }

    pub async fn create(&self, principal: Option<&str>, input: NewKey) -> Result<KeyDoc> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;

        let sequence_id = input.sequence_id.parse()?;
        let fields = normalize(
            &input.tag_number,
            &input.series_id,
            sequence_id,
            &input.building,
            input.key_type,
            input.location.into_entries(),
            &input.comment,
        )?;

        self.ensure_unique(&fields, None).await?;

        let key = fields.into_doc(input.is_available.unwrap_or(true));
        self.keys.insert(key.clone()).await?;
        info!("Created key {} ({})", key.tag_number, key.id);
        Ok(key)
    }

    pub async fn get(&self, principal: Option<&str>, tag_number: &str) -> Result<KeyDoc> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        self.resolve(tag_number).await
    }

    pub async fn list(&self, principal: Option<&str>, filter: &KeyFilter) -> Result<Vec<KeyDoc>> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        self.keys.list(filter).await
    }

    /// Update descriptive fields. The key's own tag and pair never conflict
    /// with themselves; a tag already cited by the ledger cannot be renamed.
    pub async fn update(
        &self,
        principal: Option<&str>,
        tag_number: &str,
        update: KeyUpdate,
    ) -> Result<KeyDoc> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        let current = self.resolve(tag_number).await?;

        let sequence_id = match update.sequence_id {
            Some(seq) => seq.parse()?,
            None => current.sequence_id,
        };
        let location = match update.location {
            Some(loc) => loc.into_entries(),
            None => current.location.clone(),
        };
        let fields = normalize(
            update.tag_number.as_deref().unwrap_or(&current.tag_number),
            update.series_id.as_deref().unwrap_or(&current.series_id),
            sequence_id,
            update.building.as_deref().unwrap_or(&current.building),
            update.key_type.unwrap_or(current.key_type),
            location,
            update.comment.as_deref().unwrap_or(&current.comment),
        )?;

        if fields.tag_number != current.tag_number
            && self.ledger.has_records_for(&current.tag_number).await?
        {
            return Err(KeeperError::Conflict(format!(
                "Key {} has ledger records and cannot be renamed",
                current.tag_number
            )));
        }

        self.ensure_unique(&fields, Some(&current.id)).await?;

        if !self.keys.update_fields(&current.id, &fields).await? {
            return Err(KeeperError::NotFound(format!(
                "Key with tag {tag_number} does not exist"
            )));
        }

        let mut updated = current;
        fields.apply_to(&mut updated);
        info!("Updated key {} ({})", updated.tag_number, updated.id);
        Ok(updated)
    }

    /// Look a key up by tag, `NotFound` when absent
    pub(crate) async fn resolve(&self, tag_number: &str) -> Result<KeyDoc> {
        self.keys
            .find_by_tag(tag_number)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("Key with tag {tag_number} does not exist")))
    }

    pub(crate) async fn resolve_id(&self, id: &str) -> Result<Option<KeyDoc>> {
        self.keys.find_by_id(id).await
    }

    /// Compare-and-set on the availability flag; custody use only
    pub(crate) async fn set_availability(
        &self,
        id: &str,
        expected: bool,
        available: bool,
    ) -> Result<bool> {
        debug!("Availability of {}: {} -> {}", id, expected, available);
        self.keys.set_availability_if(id, expected, available).await
    }

    /// Remove the key document; custody cascade use only
    pub(crate) async fn remove(&self, id: &str) -> Result<bool> {
        self.keys.delete(id).await
    }

    /// Unfiltered listing for the auditor
    pub(crate) async fn all(&self) -> Result<Vec<KeyDoc>> {
        self.keys.list(&KeyFilter::default()).await
    }

    /// Conflict checks ahead of the write, for a readable message. The
    /// store's unique indexes still catch a racing insert.
    async fn ensure_unique(&self, fields: &KeyFields, own_id: Option<&str>) -> Result<()> {
        if let Some(existing) = self.keys.find_by_tag(&fields.tag_number).await? {
            if Some(existing.id.as_str()) != own_id {
                return Err(KeeperError::Conflict(format!(
                    "A key with tag number {} already exists",
                    fields.tag_number
                )));
            }
        }

        if let Some(existing) = self
            .keys
            .find_by_series(&fields.series_id, fields.sequence_id)
            .await?
        {
            if Some(existing.id.as_str()) != own_id {
                return Err(KeeperError::Conflict(format!(
                    "A key with series id {} and sequence id {} already exists",
                    fields.series_id, fields.sequence_id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::schemas::{Exchange, RecordDoc, UserDoc};
    use crate::store::Stores;

    async fn registry() -> (KeyRegistry, Stores) {
        let stores = Stores::memory();
        for (pid, role) in [("adm001", Role::Administrator), ("req001", Role::Requestor)] {
            stores
                .users
                .insert(UserDoc::new(pid.into(), "Test User".into(), role))
                .await
                .unwrap();
        }
        let gate = AccessGate::new(stores.users.clone());
        (
            KeyRegistry::new(stores.keys.clone(), stores.ledger.clone(), gate),
            stores,
        )
    }

    fn new_key(json: serde_json::Value) -> NewKey {
        serde_json::from_value(json).unwrap()
    }

    fn key_101() -> NewKey {
        new_key(serde_json::json!({
            "tag_number": "101",
            "series_id": "A1",
            "sequence_id": 1,
            "building": "McB",
            "key_type": "door",
            "location": ["1F"],
        }))
    }

    #[tokio::test]
    async fn test_create_trims_and_splits_location() {
        let (registry, _) = registry().await;
        let key = registry
            .create(
                Some("adm001"),
                new_key(serde_json::json!({
                    "tag_number": " 12.4 ",
                    "series_id": "B-2",
                    "sequence_id": "44",
                    "building": " Torgersen ",
                    "key_type": "File cabinet",
                    "location": "2F,  Room 210 ",
                    "comment": "  spare ",
                })),
            )
            .await
            .unwrap();

        assert_eq!(key.tag_number, "12.4");
        assert_eq!(key.sequence_id, 44);
        assert_eq!(key.building, "Torgersen");
        assert_eq!(key.location, vec!["2F", "Room 210"]);
        assert_eq!(key.comment, "spare");
        assert!(key.is_available);
    }

    #[tokio::test]
    async fn test_duplicate_tag_and_pair_conflict() {
        let (registry, _) = registry().await;
        registry.create(Some("adm001"), key_101()).await.unwrap();

        let mut dup_tag = key_101();
        dup_tag.series_id = "Z9".into();
        assert!(matches!(
            registry.create(Some("adm001"), dup_tag).await.unwrap_err(),
            KeeperError::Conflict(_)
        ));

        let mut dup_pair = key_101();
        dup_pair.tag_number = "102".into();
        assert!(matches!(
            registry.create(Some("adm001"), dup_pair).await.unwrap_err(),
            KeeperError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_format_errors() {
        let (registry, _) = registry().await;
        let mut bad = key_101();
        bad.tag_number = "A101".into();
        assert!(matches!(
            registry.create(Some("adm001"), bad).await.unwrap_err(),
            KeeperError::InvalidInput(_)
        ));

        let mut bad = key_101();
        bad.sequence_id = SequenceInput::Number(0);
        assert!(matches!(
            registry.create(Some("adm001"), bad).await.unwrap_err(),
            KeeperError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let parsed: std::result::Result<NewKey, _> = serde_json::from_value(serde_json::json!({
            "tag_number": "101",
            "series_id": "A1",
            "sequence_id": 1,
            "building": "McB",
            "key_type": "door",
            "location": ["1F"],
            "owner": "jdoe123",
        }));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_requestor_cannot_create() {
        let (registry, _) = registry().await;
        assert!(matches!(
            registry.create(Some("req001"), key_101()).await.unwrap_err(),
            KeeperError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_own_identity_and_renames() {
        let (registry, _) = registry().await;
        registry.create(Some("adm001"), key_101()).await.unwrap();

        // Same tag and pair: no self-conflict
        let updated = registry
            .update(
                Some("adm001"),
                "101",
                KeyUpdate {
                    tag_number: Some("101".into()),
                    series_id: Some("A1".into()),
                    building: Some("Torg".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.building, "Torg");

        let renamed = registry
            .update(
                Some("adm001"),
                "101",
                KeyUpdate {
                    tag_number: Some("101.1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.tag_number, "101.1");
        assert!(registry.get(Some("adm001"), "101").await.is_err());
        assert_eq!(registry.get(Some("adm001"), "101.1").await.unwrap().id, renamed.id);
    }

    #[tokio::test]
    async fn test_update_missing_key() {
        let (registry, _) = registry().await;
        assert!(matches!(
            registry
                .update(Some("adm001"), "999", KeyUpdate::default())
                .await
                .unwrap_err(),
            KeeperError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_rename_blocked_by_ledger_history() {
        let (registry, stores) = registry().await;
        registry.create(Some("adm001"), key_101()).await.unwrap();
        stores
            .ledger
            .insert(RecordDoc::new(
                "101".into(),
                "jdoe123".into(),
                Exchange::Acquired,
                String::new(),
            ))
            .await
            .unwrap();

        let err = registry
            .update(
                Some("adm001"),
                "101",
                KeyUpdate {
                    tag_number: Some("201".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KeeperError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (registry, _) = registry().await;
        registry.create(Some("adm001"), key_101()).await.unwrap();
        let mut other = key_101();
        other.tag_number = "102".into();
        other.sequence_id = SequenceInput::Number(2);
        other.building = "Torg".into();
        registry.create(Some("adm001"), other).await.unwrap();

        let filter = KeyFilter {
            building: Some("Torg".into()),
            ..Default::default()
        };
        let keys = registry.list(Some("adm001"), &filter).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].tag_number, "102");
    }
}
