//! Find entry use case

use tracing::debug;

use crate::error::{DomainError, StoreResult};
use crate::keystore::{KeyStoreRecord, STORE_PREFIX};
use crate::provider::TokenProvider;

/// Resolves `reference` to a key store entry
///
/// A serialized reference is restored without touching the token. Anything
/// else is matched against the entry id, then the display name, across all
/// present tokens.
///
/// # Arguments
///
/// * `provider` - Provider owning the catalog
/// * `reference` - Serialized entry, entry id or display name
///
/// # Errors
///
/// Returns `DomainError::EntryNotFound` when nothing matches.
pub fn find_entry(provider: &TokenProvider, reference: &str) -> StoreResult<KeyStoreRecord> {
    if reference.starts_with(STORE_PREFIX) {
        if let Some(record) = provider.entry_passive(reference) {
            return Ok(record);
        }
    }

    let mut records: Vec<KeyStoreRecord> = provider
        .key_stores()
        .into_iter()
        .flat_map(|store| provider.entries(store.id))
        .collect();
    debug!(count = records.len(), "searching entries");

    let by_id = records.iter().position(|r| r.id == reference);
    let found = by_id.or_else(|| records.iter().position(|r| r.display_name == reference));
    match found {
        Some(index) => Ok(records.swap_remove(index)),
        None => Err(DomainError::EntryNotFound {
            reference: reference.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake_token::FakeTokenDriver;
    use crate::adapters::ChannelPrompter;
    use crate::error::StoreError;
    use std::sync::Arc;

    fn provider(driver: &FakeTokenDriver) -> TokenProvider {
        let (prompter, _rx) = ChannelPrompter::new();
        TokenProvider::new(Arc::new(driver.clone()), Arc::new(prompter)).0
    }

    #[test]
    fn test_find_by_serialized_reference() {
        let driver = FakeTokenDriver::with_default_token();
        let provider = provider(&driver);
        let leaf = provider.entries(provider.key_stores()[0].id).pop().unwrap();

        let found = find_entry(&provider, &leaf.serialized).unwrap();
        assert_eq!(found.id, leaf.id);
    }

    #[test]
    fn test_find_by_id_and_display_name() {
        let driver = FakeTokenDriver::with_default_token();
        let provider = provider(&driver);
        let leaf = provider.entries(provider.key_stores()[0].id).pop().unwrap();

        assert_eq!(find_entry(&provider, &leaf.id).unwrap().id, leaf.id);
        assert_eq!(
            find_entry(&provider, &leaf.display_name).unwrap().id,
            leaf.id
        );
    }

    #[test]
    fn test_unknown_reference() {
        let driver = FakeTokenDriver::with_default_token();
        let provider = provider(&driver);

        let result = find_entry(&provider, "no-such-entry");
        assert!(matches!(
            result,
            Err(StoreError::Domain(DomainError::EntryNotFound { .. }))
        ));
    }
}
