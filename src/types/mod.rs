//! Shared types for keykeeper

pub mod error;
pub mod validation;

pub use error::{KeeperError, Result};
