//! Key store entries

use crate::keystore::PrivateKeyOperator;
use crate::model::{Certificate, CertificateChain};

#[derive(Debug, Clone)]
pub enum RecordKind {
    /// Certificate without a private key on the token
    Certificate(Certificate),
    /// Certificate chain plus the token-resident private key
    KeyBundle {
        chain: CertificateChain,
        key: PrivateKeyOperator,
    },
}

/// One entry in a token's key store
#[derive(Debug, Clone)]
pub struct KeyStoreRecord {
    pub kind: RecordKind,
    /// Content hash of the subject certificate
    pub id: String,
    pub store_id: String,
    /// Token label
    pub label: String,
    pub display_name: String,
    /// Durable reference, accepted back by `KeyCatalog::entry_passive`
    pub serialized: String,
}

impl KeyStoreRecord {
    pub fn has_private(&self) -> bool {
        matches!(self.kind, RecordKind::KeyBundle { .. })
    }

    pub fn certificate(&self) -> &Certificate {
        match &self.kind {
            RecordKind::Certificate(certificate) => certificate,
            RecordKind::KeyBundle { chain, .. } => chain.primary(),
        }
    }

    pub fn chain(&self) -> Option<&CertificateChain> {
        match &self.kind {
            RecordKind::KeyBundle { chain, .. } => Some(chain),
            RecordKind::Certificate(_) => None,
        }
    }

    pub fn key(&self) -> Option<&PrivateKeyOperator> {
        match &self.kind {
            RecordKind::KeyBundle { key, .. } => Some(key),
            RecordKind::Certificate(_) => None,
        }
    }

    pub fn key_mut(&mut self) -> Option<&mut PrivateKeyOperator> {
        match &mut self.kind {
            RecordKind::KeyBundle { key, .. } => Some(key),
            RecordKind::Certificate(_) => None,
        }
    }

    /// Makes the token available for this entry. Certificate-only entries
    /// need no token.
    pub fn ensure_access(&self) -> bool {
        match &self.kind {
            RecordKind::KeyBundle { key, .. } => key.ensure_token_access(),
            RecordKind::Certificate(_) => true,
        }
    }
}
