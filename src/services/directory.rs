//! User directory
//!
//! Owns user documents and their profile fields. The `owned_keys` set is
//! only ever written by the custody coordinator.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{AccessGate, PermissionLevel, Role};
use crate::db::schemas::UserDoc;
use crate::store::{UserPatch, UserStore};
use crate::types::validation::{validate_full_name, validate_pid};
use crate::types::{KeeperError, Result};

/// Body for creating a user
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewUser {
    pub pid: String,
    pub full_name: String,
    #[serde(default)]
    pub role: Role,
}

/// Body for updating a user; `pid` is not accepted
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Clone)]
pub struct UserDirectory {
    users: Arc<dyn UserStore>,
    gate: AccessGate,
}

impl UserDirectory {
    pub fn new(users: Arc<dyn UserStore>, gate: AccessGate) -> Self {
        Self { users, gate }
    }

    pub async fn create(&self, principal: Option<&str>, input: NewUser) -> Result<UserDoc> {
        let caller = self.gate.authorize(principal, PermissionLevel::Admin).await?;

        let pid = input.pid.trim().to_string();
        let full_name = input.full_name.trim().to_string();
        validate_pid(&pid)?;
        validate_full_name(&full_name)?;
        ensure_may_assign_role(&caller, None, input.role)?;

        let user = UserDoc::new(pid, full_name, input.role);
        self.users.insert(user.clone()).await?;
        info!("Created user {} as {}", user.pid, user.role);
        Ok(user)
    }

    pub async fn get(&self, principal: Option<&str>, pid: &str) -> Result<UserDoc> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        self.resolve(pid).await
    }

    /// Look a user up by full name. Names are not unique, so more than one
    /// match is reported as `MultipleMatches` listing the candidates.
    pub async fn get_by_name(&self, principal: Option<&str>, full_name: &str) -> Result<UserDoc> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        self.resolve_name(full_name).await
    }

    pub async fn list(&self, principal: Option<&str>) -> Result<Vec<UserDoc>> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        self.users.list().await
    }

    /// The signed-in user's own record
    pub async fn current(&self, principal: Option<&str>) -> Result<UserDoc> {
        self.gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await
    }

    /// Partial profile update.
    ///
    /// Anyone may rename themselves. Editing another user or any role needs
    /// an administrator, and only sudo may grant or revoke sudo.
    pub async fn update(
        &self,
        principal: Option<&str>,
        pid: &str,
        update: UserUpdate,
    ) -> Result<UserDoc> {
        let caller = self
            .gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        let target = self.resolve(pid).await?;

        let is_admin = self.gate.bypasses_roles() || caller.role.is_admin();
        if caller.pid != target.pid && !is_admin {
            return Err(KeeperError::Forbidden(format!(
                "Only an administrator may edit user {pid}"
            )));
        }

        let mut patch = UserPatch::default();
        if let Some(name) = update.full_name {
            let name = name.trim().to_string();
            validate_full_name(&name)?;
            patch.full_name = Some(name);
        }
        if let Some(role) = update.role {
            if !is_admin {
                return Err(KeeperError::Forbidden(
                    "Only an administrator may change roles".into(),
                ));
            }
            ensure_may_assign_role(&caller, Some(target.role), role)?;
            patch.role = Some(role);
        }

        if patch.is_empty() {
            return Err(KeeperError::InvalidInput(
                "Nothing to update: supply full_name and/or role".into(),
            ));
        }

        if !self.users.update_profile(&target.pid, &patch).await? {
            return Err(not_found(pid));
        }

        let mut updated = target;
        if let Some(name) = patch.full_name {
            updated.full_name = name;
        }
        if let Some(role) = patch.role {
            updated.role = role;
        }
        info!("Updated user {}", updated.pid);
        Ok(updated)
    }

    /// Remove the user record. Keys it held stay unavailable until an
    /// administrator returns them; the audit reports them meanwhile.
    pub async fn delete(&self, principal: Option<&str>, pid: &str) -> Result<()> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        let target = self.resolve(pid).await?;

        if !target.owned_keys.is_empty() {
            warn!(
                "Deleting user {} while holding {} key(s)",
                pid,
                target.owned_keys.len()
            );
        }

        if !self.users.delete(pid).await? {
            return Err(not_found(pid));
        }
        info!("Deleted user {}", pid);
        Ok(())
    }

    pub(crate) async fn resolve(&self, pid: &str) -> Result<UserDoc> {
        self.users
            .find_by_pid(pid)
            .await?
            .ok_or_else(|| not_found(pid))
    }

    pub(crate) async fn resolve_name(&self, full_name: &str) -> Result<UserDoc> {
        let mut matches = self.users.find_by_name(full_name.trim()).await?;
        match matches.len() {
            0 => Err(KeeperError::NotFound(format!(
                "No user named '{full_name}'"
            ))),
            1 => Ok(matches.remove(0)),
            _ => {
                let pids: Vec<&str> = matches.iter().map(|u| u.pid.as_str()).collect();
                Err(KeeperError::MultipleMatches(format!(
                    "Several users are named '{full_name}': {}",
                    pids.join(", ")
                )))
            }
        }
    }
}

fn not_found(pid: &str) -> KeeperError {
    KeeperError::NotFound(format!(
        "User with pid {pid} does not exist; they can create an account by signing in"
    ))
}

/// Sudo is the only role that may hand out or take away sudo
fn ensure_may_assign_role(caller: &UserDoc, current: Option<Role>, new: Role) -> Result<()> {
    let touches_sudo = new == Role::Sudo || current == Some(Role::Sudo);
    if touches_sudo && caller.role != Role::Sudo {
        return Err(KeeperError::Forbidden(
            "Only a sudo user may grant or revoke sudo".into(),
        ));
    }
    Ok(())
}
