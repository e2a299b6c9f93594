//! Access control gate
//!
//! `authorize` is a pure check: it reads the stored user for a principal and
//! compares its role against the required level. It never writes.

use std::sync::Arc;
use tracing::debug;

use crate::auth::PermissionLevel;
use crate::db::schemas::UserDoc;
use crate::store::UserStore;
use crate::types::{KeeperError, Result};

/// Decides whether a principal may perform an operation
#[derive(Clone)]
pub struct AccessGate {
    users: Arc<dyn UserStore>,
    /// Development-only: skip the role comparison (authentication is still required)
    bypass_roles: bool,
}

impl AccessGate {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            bypass_roles: false,
        }
    }

    /// Gate that lets any authenticated user through admin checks.
    ///
    /// Only constructed when dev mode is set explicitly in configuration.
    pub fn with_role_bypass(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            bypass_roles: true,
        }
    }

    pub fn bypasses_roles(&self) -> bool {
        self.bypass_roles
    }

    /// Resolve the principal to its stored user and check its privilege
    pub async fn authorize(
        &self,
        principal: Option<&str>,
        required: PermissionLevel,
    ) -> Result<UserDoc> {
        let pid = principal.ok_or_else(|| KeeperError::Unauthenticated("Not signed in".into()))?;

        let user = self.users.find_by_pid(pid).await?.ok_or_else(|| {
            KeeperError::Unauthenticated(format!("No user record for principal '{pid}'"))
        })?;

        if self.bypass_roles || user.role.satisfies(required) {
            return Ok(user);
        }

        debug!(
            "Denied {} (role {}) an operation requiring {}",
            pid, user.role, required
        );
        Err(KeeperError::Forbidden(format!(
            "{required} permission required"
        )))
    }

    /// Like `authorize`, but a non-admin caller may only act on itself
    pub async fn authorize_self_or_admin(
        &self,
        principal: Option<&str>,
        target_pid: &str,
    ) -> Result<UserDoc> {
        let caller = self
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        if caller.pid == target_pid || self.bypass_roles || caller.role.is_admin() {
            return Ok(caller);
        }
        Err(KeeperError::Forbidden(format!(
            "Only an administrator may act on behalf of '{target_pid}'"
        )))
    }
}
