//! Authentication and authorization for keykeeper
//!
//! Provides:
//! - Session tokens carried as a cookie or bearer header
//! - CAS ticket validation and first-login provisioning
//! - Role and permission levels for operation authorization
//! - The access gate every service consults before touching storage

pub mod gate;
pub mod identity;
pub mod permissions;
pub mod session;

pub use gate::AccessGate;
pub use identity::{CasIdentityProvider, IdentityProvider, IdentityResolver};
pub use permissions::{PermissionLevel, Role};
pub use session::{extract_session_token, Claims, SessionIssuer, TokenValidationResult};
