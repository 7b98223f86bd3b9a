//! Provider: wires a driver to the catalog, prompts and event queue
//!
//! A `TokenProvider` is the init/teardown boundary. Creating one installs the
//! driver hooks; dropping it clears the registry and terminates the driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::{LogLevel, ProviderConfig};
use crate::error::{StoreError, StoreResult};
use crate::events::{self, EventSink, EventStream, StoreEvent};
use crate::keystore::{CatalogEntry, KeyCatalog, KeyStoreRecord, PromptBridge, TokenRegistry};
use crate::model::TokenIdentity;
use crate::ports::{DriverHooks, PromptResponder, TokenDriver};

pub const NAME: &str = "qca-pkcs11";
pub const FEATURES: &[&str] = &["smartcard", "pkey", "keystorelist"];

pub struct TokenProvider {
    driver: Arc<dyn TokenDriver>,
    registry: Arc<TokenRegistry>,
    catalog: Arc<KeyCatalog>,
    bridge: Arc<PromptBridge>,
    sink: EventSink,
    updates_enabled: Arc<AtomicBool>,
    loaded: Mutex<Vec<String>>,
}

impl TokenProvider {
    /// Builds the provider around `driver` and installs its hooks.
    ///
    /// The returned stream carries `Ready`, `Updated` and diagnostics.
    pub fn new(
        driver: Arc<dyn TokenDriver>,
        responder: Arc<dyn PromptResponder>,
    ) -> (Self, EventStream) {
        let (sink, stream) = events::channel();
        let registry = Arc::new(TokenRegistry::new(driver.clone(), sink.clone()));
        let catalog = Arc::new(KeyCatalog::new(
            driver.clone(),
            registry.clone(),
            sink.clone(),
        ));
        let bridge = Arc::new(PromptBridge::new(catalog.clone(), responder));
        let updates_enabled = Arc::new(AtomicBool::new(false));

        driver.install_hooks(hooks(&bridge, &sink, &updates_enabled));

        let provider = Self {
            driver,
            registry,
            catalog,
            bridge,
            sink,
            updates_enabled,
            loaded: Mutex::new(Vec::new()),
        };
        (provider, stream)
    }

    /// Applies `config`: driver settings, then the module list.
    ///
    /// Modules loaded by an earlier call are removed first. A module that
    /// fails to load is reported and skipped.
    pub fn configure(&self, config: &ProviderConfig) -> StoreResult<()> {
        self.driver.set_log_level(config.log_level)?;
        self.driver
            .set_protected_authentication(config.allow_protected_authentication)?;
        self.driver.set_pin_cache_period(config.pin_cache)?;

        let mut loaded = self.loaded.lock();
        for name in loaded.drain(..) {
            if let Err(e) = self.driver.remove_provider(&name) {
                warn!(provider = %name, "cannot unload provider: {e}");
            }
        }

        for module in config.enabled_modules() {
            let name = module.display_name();
            info!(provider = %name, library = %module.library.display(), "loading provider");
            match self.driver.add_provider(module) {
                Ok(()) => loaded.push(name),
                Err(e) => {
                    error!(provider = %name, "cannot load provider: {e}");
                    self.sink.report(
                        &format!("Cannot load provider '{name}'"),
                        &StoreError::Driver(e),
                    );
                }
            }
        }
        Ok(())
    }

    /// Starts slot monitoring and announces readiness.
    pub fn start(&self) -> StoreResult<()> {
        self.driver.start_slot_events()?;
        self.sink.emit(StoreEvent::Ready);
        Ok(())
    }

    /// Whether slot events turn into `StoreEvent::Updated`.
    pub fn set_updates_enabled(&self, enabled: bool) {
        self.updates_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn loaded_providers(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }

    /// Currently present tokens with their store numbers
    pub fn key_stores(&self) -> Vec<CatalogEntry> {
        self.registry.discover()
    }

    pub fn entries(&self, store: u32) -> Vec<KeyStoreRecord> {
        self.catalog.list_entries(store)
    }

    pub fn entry_passive(&self, serialized: &str) -> Option<KeyStoreRecord> {
        self.catalog.entry_passive(serialized)
    }

    pub fn store_id(&self, store: u32) -> Option<String> {
        self.catalog.store_id(store)
    }

    pub fn store_name(&self, store: u32) -> Option<String> {
        self.catalog.store_name(store)
    }

    pub fn catalog(&self) -> &Arc<KeyCatalog> {
        &self.catalog
    }

    pub fn prompt_bridge(&self) -> &Arc<PromptBridge> {
        &self.bridge
    }
}

impl Drop for TokenProvider {
    fn drop(&mut self) {
        debug!("provider teardown");
        self.registry.clear();
        self.driver.install_hooks(DriverHooks::default());
        self.driver.terminate();
    }
}

fn hooks(
    bridge: &Arc<PromptBridge>,
    sink: &EventSink,
    updates_enabled: &Arc<AtomicBool>,
) -> DriverHooks {
    let sink = sink.clone();
    let updates_enabled = updates_enabled.clone();
    let token_bridge = Arc::downgrade(bridge);
    let pin_bridge: Weak<PromptBridge> = Arc::downgrade(bridge);

    DriverHooks::default()
        .with_log(forward_driver_log)
        .with_slot_event(move || {
            if updates_enabled.load(Ordering::SeqCst) {
                sink.emit(StoreEvent::Updated);
            }
        })
        .with_token_prompt(move |user_data: Option<&str>, token: &TokenIdentity, retry: u32| {
            token_bridge
                .upgrade()
                .is_some_and(|bridge| bridge.token_prompt(user_data, token, retry))
        })
        .with_pin_prompt(
            move |user_data: Option<&str>, token: &TokenIdentity, retry: u32, buffer: &mut [u8]| {
                pin_bridge
                    .upgrade()
                    .is_some_and(|bridge| bridge.pin_prompt(user_data, token, retry, buffer))
            },
        )
}

fn forward_driver_log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Quiet => {}
        LogLevel::Error => error!(target: "tokenstore::driver", "{message}"),
        LogLevel::Warn => warn!(target: "tokenstore::driver", "{message}"),
        LogLevel::Info => info!(target: "tokenstore::driver", "{message}"),
        LogLevel::Debug1 => debug!(target: "tokenstore::driver", "{message}"),
        LogLevel::Debug2 => trace!(target: "tokenstore::driver", "{message}"),
    }
}
