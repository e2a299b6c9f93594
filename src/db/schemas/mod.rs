//! Database schemas for keykeeper
//!
//! Defines MongoDB document structures for keys, users, and ledger records.

mod key;
mod metadata;
mod record;
mod user;

pub use key::{KeyDoc, KeyFields, KeyType, KEY_COLLECTION};
pub use metadata::Metadata;
pub use record::{Exchange, RecordDoc, LEDGER_COLLECTION};
pub use user::{UserDoc, PROVISIONAL_FULL_NAME, USER_COLLECTION};
