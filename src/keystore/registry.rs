//! Token registry: small, stable integer ids for discovered tokens

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::events::EventSink;
use crate::model::TokenIdentity;
use crate::ports::{EnumMethod, TokenDriver};

/// One discovered token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: u32,
    pub token: TokenIdentity,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: Vec<CatalogEntry>,
    last_id: u32,
}

impl RegistryState {
    /// Finds the entry equal to `token`, or registers it under a fresh id.
    fn find_or_insert(&mut self, token: &TokenIdentity) -> CatalogEntry {
        if let Some(entry) = self.entries.iter().find(|e| &e.token == token) {
            return entry.clone();
        }

        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if !self.entries.iter().any(|e| e.id == self.last_id) {
                break;
            }
        }

        let entry = CatalogEntry {
            id: self.last_id,
            token: token.clone(),
        };
        debug!(id = entry.id, token = %entry.token, "registered token");
        self.entries.push(entry.clone());
        entry
    }
}

pub struct TokenRegistry {
    driver: Arc<dyn TokenDriver>,
    sink: EventSink,
    state: Mutex<RegistryState>,
}

impl TokenRegistry {
    pub fn new(driver: Arc<dyn TokenDriver>, sink: EventSink) -> Self {
        Self {
            driver,
            sink,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Enumerates tokens and reconciles the registry with them.
    ///
    /// Tokens no longer present are dropped. A driver failure is reported
    /// as a diagnostic and yields an empty list.
    pub fn discover(&self) -> Vec<CatalogEntry> {
        debug!("discover - entry");

        let tokens = match self.driver.enum_tokens(EnumMethod::Cached) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.sink
                    .report("Cannot get key stores", &StoreError::Driver(e));
                return Vec::new();
            }
        };

        let mut state = self.state.lock();
        let found: Vec<CatalogEntry> = tokens
            .iter()
            .map(|token| state.find_or_insert(token))
            .collect();

        let seen: HashSet<u32> = found.iter().map(|e| e.id).collect();
        state.entries.retain(|entry| {
            let keep = seen.contains(&entry.id);
            if !keep {
                debug!(id = entry.id, "token removed");
            }
            keep
        });

        debug!(count = found.len(), "discover - return");
        found
    }

    /// Find-or-create for a token seen outside a full scan.
    pub fn register(&self, token: &TokenIdentity) -> CatalogEntry {
        self.state.lock().find_or_insert(token)
    }

    pub fn token(&self, id: u32) -> Option<TokenIdentity> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.token.clone())
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.state.lock().entries.clone()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    #[cfg(test)]
    fn set_last_id(&self, last_id: u32) {
        self.state.lock().last_id = last_id;
    }
}
