//! Custody coordinator
//!
//! Moves keys between "available" and "held by exactly one user". Each
//! transition spans a key document and a user document, and storage only
//! guarantees atomicity per document, so every transition is a short saga:
//!
//! - assign: flip the flag true -> false (compare-and-set), then add the key
//!   to the user's set. If the second write fails the flag is flipped back.
//! - unassign: remove the key from the user's set. The flag stays false until
//!   an explicit return.
//! - return: refuse while anyone holds the key, then flip false -> true.
//! - delete: mark unavailable, pull the key from every holder, delete it.
//!
//! Every partial failure leaves the key unavailable, never available while
//! held. The auditor reports whatever disagreement remains.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{AccessGate, PermissionLevel};
use crate::db::schemas::{KeyDoc, UserDoc};
use crate::services::directory::UserDirectory;
use crate::services::registry::KeyRegistry;
use crate::store::UserStore;
use crate::types::{KeeperError, Result};

// =============================================================================
// Consistency Report
// =============================================================================

/// A key whose holders disagree with its flag
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OwnershipIssue {
    pub tag_number: String,
    pub owners: Vec<String>,
}

/// A user pointing at a key that no longer exists
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DanglingReference {
    pub pid: String,
    pub key_id: String,
}

/// Result of one sweep over all keys and users
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ConsistencyReport {
    pub checked_keys: usize,
    pub checked_users: usize,
    /// Marked available while at least one user holds it
    pub available_but_owned: Vec<OwnershipIssue>,
    /// Held by more than one user
    pub multiple_owners: Vec<OwnershipIssue>,
    /// Held by nobody but still unavailable: awaiting return, or reported lost
    pub unowned_but_unavailable: Vec<String>,
    pub dangling_references: Vec<DanglingReference>,
}

impl ConsistencyReport {
    /// Number of invariant violations. Keys awaiting return are not counted.
    pub fn violation_count(&self) -> usize {
        self.available_but_owned.len() + self.multiple_owners.len() + self.dangling_references.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.violation_count() == 0
    }
}

// =============================================================================
// Coordinator
// =============================================================================

#[derive(Clone)]
pub struct CustodyCoordinator {
    registry: KeyRegistry,
    directory: UserDirectory,
    users: Arc<dyn UserStore>,
    gate: AccessGate,
}

impl CustodyCoordinator {
    pub fn new(
        registry: KeyRegistry,
        directory: UserDirectory,
        users: Arc<dyn UserStore>,
        gate: AccessGate,
    ) -> Self {
        Self {
            registry,
            directory,
            users,
            gate,
        }
    }

    /// Hand an available key to a user
    pub async fn assign(&self, principal: Option<&str>, pid: &str, tag_number: &str) -> Result<()> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;

        let user = self.directory.resolve(pid).await?;
        let key = self.registry.resolve(tag_number).await?;

        if user.holds(&key.id) {
            return Err(KeeperError::Conflict(format!(
                "{pid} already owns key {tag_number}"
            )));
        }
        if !key.is_available {
            return Err(KeeperError::Conflict(format!(
                "Key {tag_number} is not available"
            )));
        }

        debug!("assign {} -> {}: claiming flag", tag_number, pid);
        if !self.registry.set_availability(&key.id, true, false).await? {
            return Err(KeeperError::Conflict(format!(
                "Key {tag_number} was taken by another request"
            )));
        }

        debug!("assign {} -> {}: adding to user set", tag_number, pid);
        let failure = match self.users.push_key(pid, &key.id).await {
            Ok(true) => {
                info!("Assigned key {} to {}", tag_number, pid);
                return Ok(());
            }
            Ok(false) => KeeperError::NotFound(format!("User with pid {pid} no longer exists")),
            Err(e) => e,
        };

        warn!(
            "assign {} -> {} failed after claiming the key ({}); releasing it",
            tag_number, pid, failure
        );
        match self.registry.set_availability(&key.id, false, true).await {
            Ok(true) => Err(failure),
            Ok(false) => {
                error!("Torn assignment: key {} could not be released", tag_number);
                Err(KeeperError::Internal(format!(
                    "Assigning key {tag_number} failed ({failure}) and the key was changed concurrently; it needs an audit"
                )))
            }
            Err(compensation) => {
                error!(
                    "Torn assignment: key {} left unavailable ({})",
                    tag_number, compensation
                );
                Err(KeeperError::Internal(format!(
                    "Assigning key {tag_number} failed ({failure}) and the key is left unavailable"
                )))
            }
        }
    }

    /// Take a key out of a user's set. Non-admins may only unassign from themselves.
    pub async fn unassign(
        &self,
        principal: Option<&str>,
        pid: &str,
        tag_number: &str,
    ) -> Result<()> {
        self.gate.authorize_self_or_admin(principal, pid).await?;

        let user = self.directory.resolve(pid).await?;
        let key = self.registry.resolve(tag_number).await?;

        if !user.holds(&key.id) {
            return Err(KeeperError::InvalidInput(format!(
                "{pid} does not own key {tag_number}"
            )));
        }

        if !self.users.pull_key(pid, &key.id).await? {
            return Err(KeeperError::NotFound(format!(
                "User with pid {pid} no longer exists"
            )));
        }
        info!("Unassigned key {} from {}", tag_number, pid);
        Ok(())
    }

    /// Mark a key available again. Fails while any user still holds it.
    pub async fn return_key(&self, principal: Option<&str>, tag_number: &str) -> Result<()> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;

        let key = self.registry.resolve(tag_number).await?;
        let owners = self.users.owners_of(&key.id).await?;
        if let Some(owner) = owners.first() {
            return Err(KeeperError::Conflict(format!(
                "Cannot return key {tag_number} because {} still owns it",
                owner.pid
            )));
        }

        if key.is_available {
            debug!("return {}: already available", tag_number);
            return Ok(());
        }

        // A false -> true miss means someone returned it first
        if self.registry.set_availability(&key.id, false, true).await? {
            info!("Returned key {}", tag_number);
        }
        Ok(())
    }

    /// Strip the key from every holder, then delete it
    pub async fn delete_cascade(&self, principal: Option<&str>, tag_number: &str) -> Result<()> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;

        let key = self.registry.resolve(tag_number).await?;

        // Block new assignments while holders are being stripped
        self.registry.set_availability(&key.id, true, false).await?;

        let owners = self.users.owners_of(&key.id).await?;
        for owner in &owners {
            debug!("delete {}: pulling from {}", tag_number, owner.pid);
            if let Err(e) = self.users.pull_key(&owner.pid, &key.id).await {
                error!(
                    "Deleting key {} stopped while pulling it from {}: {}",
                    tag_number, owner.pid, e
                );
                return Err(KeeperError::Internal(format!(
                    "Deleting key {tag_number} stopped partway: {e}"
                )));
            }
        }

        if !self.registry.remove(&key.id).await? {
            return Err(KeeperError::NotFound(format!(
                "Key with tag {tag_number} does not exist"
            )));
        }
        info!(
            "Deleted key {} (released from {} holder(s))",
            tag_number,
            owners.len()
        );
        Ok(())
    }

    /// Confirm that `pid` holds the key being reported lost or damaged.
    ///
    /// The key stays unavailable; an administrator returns it once found or
    /// remade. Returns the reporter and the key for the notification.
    pub async fn report(
        &self,
        principal: Option<&str>,
        pid: &str,
        tag_number: &str,
    ) -> Result<(UserDoc, KeyDoc)> {
        self.gate.authorize_self_or_admin(principal, pid).await?;

        let user = self.directory.resolve(pid).await?;
        let key = self.registry.resolve(tag_number).await?;

        if !user.holds(&key.id) {
            return Err(KeeperError::InvalidInput(format!(
                "{pid} does not own key {tag_number}"
            )));
        }
        if key.is_available {
            warn!("Reported key {} is marked available while held by {}", tag_number, pid);
        }

        info!("Key {} reported by {}", tag_number, pid);
        Ok((user, key))
    }

    /// Current holder of a key
    pub async fn owner(&self, principal: Option<&str>, tag_number: &str) -> Result<UserDoc> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;

        let key = self.registry.resolve(tag_number).await?;
        let mut owners = self.users.owners_of(&key.id).await?;
        if owners.len() > 1 {
            warn!("Key {} has {} owners", tag_number, owners.len());
        }
        if owners.is_empty() {
            return Err(KeeperError::NotFound(format!(
                "Key {tag_number} does not have an owner"
            )));
        }
        Ok(owners.remove(0))
    }

    /// Keys held by `pid`; non-admins may only look at their own
    pub async fn keys_of(&self, principal: Option<&str>, pid: &str) -> Result<Vec<KeyDoc>> {
        self.gate.authorize_self_or_admin(principal, pid).await?;
        let user = self.directory.resolve(pid).await?;
        self.held_keys(&user).await
    }

    /// Keys held by the user with this full name
    pub async fn keys_of_name(
        &self,
        principal: Option<&str>,
        full_name: &str,
    ) -> Result<Vec<KeyDoc>> {
        let caller = self
            .gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        let user = self.directory.resolve_name(full_name).await?;
        if user.pid != caller.pid && !caller.role.is_admin() && !self.gate.bypasses_roles() {
            return Err(KeeperError::Forbidden(
                "Only an administrator may list another user's keys".into(),
            ));
        }
        self.held_keys(&user).await
    }

    async fn held_keys(&self, user: &UserDoc) -> Result<Vec<KeyDoc>> {
        let mut keys = Vec::with_capacity(user.owned_keys.len());
        for key_id in &user.owned_keys {
            match self.registry.resolve_id(key_id).await? {
                Some(key) => keys.push(key),
                None => warn!("User {} references missing key {}", user.pid, key_id),
            }
        }
        Ok(keys)
    }

    /// Administrator-facing consistency sweep
    pub async fn audit(&self, principal: Option<&str>) -> Result<ConsistencyReport> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        self.sweep().await
    }

    /// Scan every key and user and report disagreements. Never writes.
    pub async fn sweep(&self) -> Result<ConsistencyReport> {
        let keys = self.registry.all().await?;
        let users = self.users.list().await?;

        let mut holders: HashMap<&str, Vec<String>> = HashMap::new();
        let mut report = ConsistencyReport {
            checked_keys: keys.len(),
            checked_users: users.len(),
            ..Default::default()
        };

        let known: HashMap<&str, &KeyDoc> = keys.iter().map(|k| (k.id.as_str(), k)).collect();
        for user in &users {
            for key_id in &user.owned_keys {
                if known.contains_key(key_id.as_str()) {
                    holders
                        .entry(key_id.as_str())
                        .or_default()
                        .push(user.pid.clone());
                } else {
                    warn!("Audit: {} references missing key {}", user.pid, key_id);
                    report.dangling_references.push(DanglingReference {
                        pid: user.pid.clone(),
                        key_id: key_id.clone(),
                    });
                }
            }
        }

        for key in &keys {
            let owners = holders.remove(key.id.as_str()).unwrap_or_default();
            if owners.len() > 1 {
                warn!("Audit: key {} held by {:?}", key.tag_number, owners);
                report.multiple_owners.push(OwnershipIssue {
                    tag_number: key.tag_number.clone(),
                    owners: owners.clone(),
                });
            }
            if key.is_available && !owners.is_empty() {
                warn!(
                    "Audit: key {} is available but held by {:?}",
                    key.tag_number, owners
                );
                report.available_but_owned.push(OwnershipIssue {
                    tag_number: key.tag_number.clone(),
                    owners,
                });
            } else if !key.is_available && owners.is_empty() {
                debug!("Audit: key {} awaits return", key.tag_number);
                report.unowned_but_unavailable.push(key.tag_number.clone());
            }
        }

        Ok(report)
    }
}

/// Run the consistency sweep on an interval. Findings are only logged.
pub fn spawn_audit_task(custody: Arc<CustodyCoordinator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Custody audit task started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match custody.sweep().await {
                Ok(report) if report.is_consistent() => debug!(
                    keys = report.checked_keys,
                    users = report.checked_users,
                    pending_returns = report.unowned_but_unavailable.len(),
                    "Custody audit clean"
                ),
                Ok(report) => warn!(
                    violations = report.violation_count(),
                    "Custody audit found inconsistencies"
                ),
                Err(e) => error!("Custody audit failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::schemas::KeyType;
    use crate::store::{KeyStore, MemoryUserStore, Stores, UserPatch};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// User store whose `push_key` can be made to fail
    struct FlakyUsers {
        inner: MemoryUserStore,
        fail_push: AtomicBool,
    }

    #[async_trait]
    impl UserStore for FlakyUsers {
        async fn insert(&self, user: UserDoc) -> Result<()> {
            self.inner.insert(user).await
        }
        async fn find_by_pid(&self, pid: &str) -> Result<Option<UserDoc>> {
            self.inner.find_by_pid(pid).await
        }
        async fn find_by_name(&self, full_name: &str) -> Result<Vec<UserDoc>> {
            self.inner.find_by_name(full_name).await
        }
        async fn list(&self) -> Result<Vec<UserDoc>> {
            self.inner.list().await
        }
        async fn update_profile(&self, pid: &str, patch: &UserPatch) -> Result<bool> {
            self.inner.update_profile(pid, patch).await
        }
        async fn push_key(&self, pid: &str, key_id: &str) -> Result<bool> {
            if self.fail_push.load(Ordering::SeqCst) {
                return Err(KeeperError::Database("write timed out".into()));
            }
            self.inner.push_key(pid, key_id).await
        }
        async fn pull_key(&self, pid: &str, key_id: &str) -> Result<bool> {
            self.inner.pull_key(pid, key_id).await
        }
        async fn owners_of(&self, key_id: &str) -> Result<Vec<UserDoc>> {
            self.inner.owners_of(key_id).await
        }
        async fn delete(&self, pid: &str) -> Result<bool> {
            self.inner.delete(pid).await
        }
    }

    struct Fixture {
        custody: CustodyCoordinator,
        keys: Arc<dyn KeyStore>,
        users: Arc<dyn UserStore>,
    }

    async fn fixture_with(users: Arc<dyn UserStore>) -> Fixture {
        let stores = Stores {
            users: users.clone(),
            ..Stores::memory()
        };
        for (pid, name, role) in [
            ("adm001", "Key Admin", Role::Administrator),
            ("jdoe123", "Jane Doe", Role::Requestor),
            ("bsmith1", "Bob Smith", Role::Requestor),
        ] {
            users
                .insert(UserDoc::new(pid.into(), name.into(), role))
                .await
                .unwrap();
        }
        stores
            .keys
            .insert(KeyDoc::new(
                "101".into(),
                "A1".into(),
                1,
                "McB".into(),
                KeyType::Door,
                vec!["1F".into()],
                true,
                String::new(),
            ))
            .await
            .unwrap();

        let gate = AccessGate::new(stores.users.clone());
        let registry = KeyRegistry::new(stores.keys.clone(), stores.ledger.clone(), gate.clone());
        let directory = UserDirectory::new(stores.users.clone(), gate.clone());
        Fixture {
            custody: CustodyCoordinator::new(registry, directory, stores.users.clone(), gate),
            keys: stores.keys.clone(),
            users: stores.users.clone(),
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryUserStore::new())).await
    }

    impl Fixture {
        async fn key(&self) -> KeyDoc {
            self.keys.find_by_tag("101").await.unwrap().unwrap()
        }
    }

    const ADMIN: Option<&str> = Some("adm001");

    #[tokio::test]
    async fn test_assign_then_double_assign_conflicts() {
        let f = fixture().await;
        f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap();
        assert!(!f.key().await.is_available);

        let err = f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap_err();
        assert!(matches!(err, KeeperError::Conflict(ref m) if m.contains("already owns")));

        let err = f.custody.assign(ADMIN, "bsmith1", "101").await.unwrap_err();
        assert!(matches!(err, KeeperError::Conflict(_)));
        assert_eq!(f.users.owners_of(&f.key().await.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_missing_entities() {
        let f = fixture().await;
        assert!(matches!(
            f.custody.assign(ADMIN, "ghost99", "101").await.unwrap_err(),
            KeeperError::NotFound(_)
        ));
        assert!(matches!(
            f.custody.assign(ADMIN, "jdoe123", "999").await.unwrap_err(),
            KeeperError::NotFound(_)
        ));
        assert!(f.key().await.is_available);
    }

    #[tokio::test]
    async fn test_assign_requires_admin() {
        let f = fixture().await;
        assert!(matches!(
            f.custody
                .assign(Some("jdoe123"), "jdoe123", "101")
                .await
                .unwrap_err(),
            KeeperError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_push_is_compensated() {
        let flaky = Arc::new(FlakyUsers {
            inner: MemoryUserStore::new(),
            fail_push: AtomicBool::new(false),
        });
        let f = fixture_with(flaky.clone()).await;
        flaky.fail_push.store(true, Ordering::SeqCst);

        let err = f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap_err();
        assert!(matches!(err, KeeperError::Database(_)));
        assert!(f.key().await.is_available);
        assert!(f.custody.sweep().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_return_refuses_while_owned() {
        let f = fixture().await;
        f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap();

        let err = f.custody.return_key(ADMIN, "101").await.unwrap_err();
        assert!(matches!(err, KeeperError::Conflict(ref m) if m.contains("still owns")));
        assert!(!f.key().await.is_available);

        f.custody.unassign(ADMIN, "jdoe123", "101").await.unwrap();
        f.custody.return_key(ADMIN, "101").await.unwrap();
        assert!(f.key().await.is_available);

        // Returning an available key is a no-op
        f.custody.return_key(ADMIN, "101").await.unwrap();
    }

    #[tokio::test]
    async fn test_unassign_rules() {
        let f = fixture().await;
        f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap();

        assert!(matches!(
            f.custody.unassign(ADMIN, "bsmith1", "101").await.unwrap_err(),
            KeeperError::InvalidInput(_)
        ));
        assert!(matches!(
            f.custody
                .unassign(Some("bsmith1"), "jdoe123", "101")
                .await
                .unwrap_err(),
            KeeperError::Forbidden(_)
        ));

        // Holders may hand their own key back
        f.custody
            .unassign(Some("jdoe123"), "jdoe123", "101")
            .await
            .unwrap();
        let report = f.custody.sweep().await.unwrap();
        assert_eq!(report.unowned_but_unavailable, vec!["101".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_cascade_strips_every_holder() {
        let f = fixture().await;
        let key_id = f.key().await.id;
        // Simulate a torn double assignment
        f.users.push_key("jdoe123", &key_id).await.unwrap();
        f.users.push_key("bsmith1", &key_id).await.unwrap();

        let report = f.custody.sweep().await.unwrap();
        assert_eq!(report.multiple_owners.len(), 1);
        assert_eq!(report.available_but_owned.len(), 1);

        f.custody.delete_cascade(ADMIN, "101").await.unwrap();
        assert!(f.keys.find_by_tag("101").await.unwrap().is_none());
        for pid in ["jdoe123", "bsmith1"] {
            let user = f.users.find_by_pid(pid).await.unwrap().unwrap();
            assert!(user.owned_keys.is_empty());
        }
        assert!(matches!(
            f.custody.delete_cascade(ADMIN, "101").await.unwrap_err(),
            KeeperError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_report_requires_holder() {
        let f = fixture().await;
        assert!(matches!(
            f.custody
                .report(Some("jdoe123"), "jdoe123", "101")
                .await
                .unwrap_err(),
            KeeperError::InvalidInput(_)
        ));

        f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap();
        let (user, key) = f
            .custody
            .report(Some("jdoe123"), "jdoe123", "101")
            .await
            .unwrap();
        assert_eq!(user.pid, "jdoe123");
        assert!(!key.is_available);
    }

    #[tokio::test]
    async fn test_owner_and_keys_of() {
        let f = fixture().await;
        assert!(matches!(
            f.custody.owner(ADMIN, "101").await.unwrap_err(),
            KeeperError::NotFound(_)
        ));

        f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap();
        assert_eq!(f.custody.owner(ADMIN, "101").await.unwrap().pid, "jdoe123");

        let keys = f.custody.keys_of(Some("jdoe123"), "jdoe123").await.unwrap();
        assert_eq!(keys[0].tag_number, "101");
        let keys = f
            .custody
            .keys_of_name(Some("jdoe123"), "Jane Doe")
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert!(f.custody.keys_of(Some("bsmith1"), "jdoe123").await.is_err());
    }

    #[tokio::test]
    async fn test_audit_reports_dangling_reference() {
        let f = fixture().await;
        f.users.push_key("jdoe123", "no-such-key").await.unwrap();
        let report = f.custody.audit(ADMIN).await.unwrap();
        assert_eq!(report.dangling_references.len(), 1);
        assert_eq!(report.violation_count(), 1);
        assert_eq!(report.checked_keys, 1);
        assert_eq!(report.checked_users, 3);

        assert!(matches!(
            f.custody.audit(Some("jdoe123")).await.unwrap_err(),
            KeeperError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_keys_survive_user_patch() {
        let f = fixture().await;
        f.custody.assign(ADMIN, "jdoe123", "101").await.unwrap();
        f.users
            .update_profile(
                "jdoe123",
                &UserPatch {
                    full_name: Some("Jane Q Doe".into()),
                    role: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(f.custody.keys_of(ADMIN, "jdoe123").await.unwrap().len(), 1);
    }
}
