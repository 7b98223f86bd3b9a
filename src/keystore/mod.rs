//! Key store over PKCS#11 tokens
//!
//! The registry numbers tokens, the catalog turns their certificates into
//! records, and the codec makes records durable.

mod catalog;
mod codec;
mod operator;
mod prompt_bridge;
mod record;
mod registry;

pub use catalog::{EntryType, KeyCatalog, StoreType};
pub use codec::{DecodedReference, IdCodec, SERIALIZATION_VERSION, STORE_PREFIX};
pub use operator::PrivateKeyOperator;
pub use prompt_bridge::PromptBridge;
pub use record::{KeyStoreRecord, RecordKind};
pub use registry::{CatalogEntry, TokenRegistry};
