//! Keykeeper - physical key inventory and custody tracker
//!
//! Tracks which keys exist, who currently holds each one, and a ledger of
//! past handouts and returns.
//!
//! ## Components
//!
//! - **Key Registry**: key inventory, uniqueness, availability flag
//! - **User Directory**: users, roles, custody sets
//! - **Custody Coordinator**: assign / unassign / return / cascade delete as
//!   compensated single-document steps, plus a consistency auditor
//! - **Ledger**: free-standing history of checkouts and returns
//! - **Access Gate**: principal → user → role checks in front of everything

pub mod auth;
pub mod config;
pub mod db;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{KeeperError, Result};
