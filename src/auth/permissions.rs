//! Roles and permission levels
//!
//! Roles are what we store on a user; permission levels are what operations
//! require. Every gate decision goes through `Role::satisfies`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::KeeperError;

/// Permission levels required by operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
#[derive(Default)]
pub enum PermissionLevel {
    /// No authentication - banner and health endpoints
    #[default]
    Public = 0,
    /// Any signed-in user - ledger, own keys, notifications
    Authenticated = 1,
    /// Administrator - inventory, directory, and custody writes
    Admin = 2,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Public => write!(f, "PUBLIC"),
            PermissionLevel::Authenticated => write!(f, "AUTHENTICATED"),
            PermissionLevel::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Stored user role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Requestor,
    Administrator,
    /// Superset of administrator; the only role that may grant or revoke sudo
    Sudo,
}

impl Role {
    /// Highest permission level this role carries
    pub fn permission_level(&self) -> PermissionLevel {
        match self {
            Role::Requestor => PermissionLevel::Authenticated,
            Role::Administrator | Role::Sudo => PermissionLevel::Admin,
        }
    }

    /// The single privilege comparison used by the access gate
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        self.permission_level() >= required
    }

    pub fn is_admin(&self) -> bool {
        self.satisfies(PermissionLevel::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requestor => "requestor",
            Role::Administrator => "administrator",
            Role::Sudo => "sudo",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "requestor" => Ok(Role::Requestor),
            "administrator" => Ok(Role::Administrator),
            "sudo" => Ok(Role::Sudo),
            other => Err(KeeperError::InvalidInput(format!(
                "role must be requestor, administrator or sudo (got '{other}')"
            ))),
        }
    }
}
