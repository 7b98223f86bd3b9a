//! Use cases (orchestration)
//!
//! Flows that combine the provider, its catalog and a record's key operator.

mod find_entry;
mod key_operations;

pub use find_entry::find_entry;
pub use key_operations::{decrypt_with_entry, sign_with_entry};
