//! Key store over PKCS#11 hardware tokens
//!
//! Tokens become key stores, their certificates become entries, and the
//! RSA keys behind leaf certificates are driven through the token. Entries
//! serialize to durable references that can be restored without the token.

pub mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod keystore;
pub mod logic;
pub mod model;
pub mod ports;
pub mod provider;
pub mod use_cases;

// Re-export commonly used types
pub use error::{StoreError, StoreResult};

pub use api::open_provider;
pub use config::ProviderConfig;
pub use events::{EventStream, StoreEvent};
pub use keystore::{KeyStoreRecord, PrivateKeyOperator};
pub use provider::TokenProvider;
