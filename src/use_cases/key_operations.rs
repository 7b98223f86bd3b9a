//! Sign and decrypt with a key store entry

use crate::error::{KeyError, StoreResult};
use crate::keystore::KeyStoreRecord;
use crate::model::{EncryptionAlgorithm, SignatureAlgorithm};

/// Signs `data` with the entry's token-resident key
///
/// The token may be prompted for and the user asked for a PIN.
///
/// # Errors
///
/// Returns `KeyError::NotPrivate` for certificate-only entries, or the
/// key operator's error when the token refuses.
pub fn sign_with_entry(
    record: &mut KeyStoreRecord,
    algorithm: SignatureAlgorithm,
    data: &[u8],
) -> StoreResult<Vec<u8>> {
    let key = record.key_mut().ok_or(KeyError::NotPrivate)?;
    Ok(key.sign_message(algorithm, data)?)
}

/// Decrypts `ciphertext` with the entry's token-resident key
///
/// # Errors
///
/// Returns `KeyError::NotPrivate` for certificate-only entries, or the
/// key operator's error when the token refuses.
pub fn decrypt_with_entry(
    record: &KeyStoreRecord,
    algorithm: EncryptionAlgorithm,
    ciphertext: &[u8],
) -> StoreResult<Vec<u8>> {
    let key = record.key().ok_or(KeyError::NotPrivate)?;
    Ok(key.decrypt(ciphertext, algorithm)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake_token::FakeTokenDriver;
    use crate::adapters::ChannelPrompter;
    use crate::error::StoreError;
    use crate::provider::TokenProvider;
    use std::sync::Arc;

    fn entries(driver: &FakeTokenDriver) -> (TokenProvider, Vec<KeyStoreRecord>) {
        let (prompter, _rx) = ChannelPrompter::new();
        let (provider, _) = TokenProvider::new(Arc::new(driver.clone()), Arc::new(prompter));
        let entries = provider.entries(provider.key_stores()[0].id);
        (provider, entries)
    }

    #[test]
    fn test_sign_with_leaf() {
        let driver = FakeTokenDriver::with_default_token();
        let (_provider, mut entries) = entries(&driver);
        let mut leaf = entries.pop().unwrap();

        let signature =
            sign_with_entry(&mut leaf, SignatureAlgorithm::Emsa3Sha1, b"payload").unwrap();
        let key = leaf.key_mut().unwrap();
        assert!(key.verify_message(SignatureAlgorithm::Emsa3Sha1, b"payload", &signature));
    }

    #[test]
    fn test_decrypt_with_leaf() {
        let driver = FakeTokenDriver::with_default_token();
        let (_provider, mut entries) = entries(&driver);
        let leaf = entries.pop().unwrap();

        let key = leaf.key().unwrap();
        let ciphertext = key
            .encrypt(b"wrapped", EncryptionAlgorithm::Pkcs1v15)
            .unwrap();
        let plaintext =
            decrypt_with_entry(&leaf, EncryptionAlgorithm::Pkcs1v15, &ciphertext).unwrap();
        assert_eq!(plaintext, b"wrapped");
    }

    #[test]
    fn test_certificate_entry_cannot_sign() {
        let driver = FakeTokenDriver::with_default_token();
        let (_provider, mut entries) = entries(&driver);
        let mut issuer = entries.remove(0);
        assert!(!issuer.has_private());

        let result = sign_with_entry(&mut issuer, SignatureAlgorithm::Emsa3Sha1, b"x");
        assert!(matches!(result, Err(StoreError::Key(KeyError::NotPrivate))));
    }
}
