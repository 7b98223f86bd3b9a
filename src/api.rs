//! Entry points for applications embedding the key store

use std::sync::Arc;

use tracing::info;

use crate::adapters::Pkcs11Driver;
use crate::config::ProviderConfig;
use crate::error::StoreResult;
use crate::events::EventStream;
use crate::ports::PromptResponder;
use crate::provider::TokenProvider;

pub use crate::config::{LogLevel, ModuleConfig, PinCache, PrivateMask};
pub use crate::keystore::{CatalogEntry, KeyStoreRecord, RecordKind};
pub use crate::model::*;

/// Opens a provider over the PKCS#11 modules named in `config`
///
/// Slot events are started, so the returned stream sees `Ready` and then
/// `Updated` whenever tokens come and go (once updates are enabled).
///
/// # Errors
///
/// Returns an error if the driver rejects a global setting or cannot start
/// its slot watcher. Modules that fail to load are reported on the stream.
pub fn open_provider(
    config: &ProviderConfig,
    responder: Arc<dyn PromptResponder>,
) -> StoreResult<(TokenProvider, EventStream)> {
    let driver = Arc::new(Pkcs11Driver::new());
    let (provider, stream) = TokenProvider::new(driver, responder);
    provider.configure(config)?;
    provider.start()?;
    info!(providers = ?provider.loaded_providers(), "provider open");
    Ok((provider, stream))
}
