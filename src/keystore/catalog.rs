//! Key store entries for the tokens in the registry

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{DomainError, StoreError, StoreResult};
use crate::events::EventSink;
use crate::keystore::{
    IdCodec, KeyStoreRecord, PrivateKeyOperator, RecordKind, TokenRegistry,
};
use crate::logic::friendly_names;
use crate::model::{Certificate, CertificateChain, CertificateIdentity};
use crate::ports::{EnumMethod, TokenDriver};

/// Kinds of entries a token store can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    KeyBundle,
    Certificate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    SmartCard,
}

pub struct KeyCatalog {
    driver: Arc<dyn TokenDriver>,
    registry: Arc<TokenRegistry>,
    codec: IdCodec,
    sink: EventSink,
}

impl KeyCatalog {
    pub fn new(driver: Arc<dyn TokenDriver>, registry: Arc<TokenRegistry>, sink: EventSink) -> Self {
        Self {
            codec: IdCodec::new(driver.clone()),
            driver,
            registry,
            sink,
        }
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    pub fn entry_types(&self) -> &'static [EntryType] {
        &[EntryType::KeyBundle, EntryType::Certificate]
    }

    pub fn store_type(&self) -> StoreType {
        StoreType::SmartCard
    }

    pub fn store_id(&self, id: u32) -> Option<String> {
        let token = self.registry.token(id)?;
        match self.codec.store_id(&token) {
            Ok(store_id) => Some(store_id),
            Err(e) => {
                self.sink.report("Cannot serialize store id", &e);
                None
            }
        }
    }

    /// Token label for a registered store
    pub fn store_name(&self, id: u32) -> Option<String> {
        self.registry.token(id).map(|token| token.label)
    }

    /// Lists the records on one registered token.
    ///
    /// Issuers come first, then certificates with a private key. Blobs that do
    /// not parse and records that cannot be built are skipped.
    pub fn list_entries(&self, store: u32) -> Vec<KeyStoreRecord> {
        debug!(store, "list_entries - entry");

        let Some(token) = self.registry.token(store) else {
            debug!(store, "list_entries - unknown store");
            return Vec::new();
        };

        let found = match self
            .driver
            .enum_token_certificates(&token, EnumMethod::Cached, None)
        {
            Ok(found) => found,
            Err(e) => {
                self.sink
                    .report("Enumerating store failed", &StoreError::Driver(e));
                return Vec::new();
            }
        };

        let issuers = parse_all(&found.issuers, false);
        let leaves = parse_all(&found.certificates, true);

        let pool: Vec<Certificate> = issuers
            .iter()
            .chain(&leaves)
            .map(|parsed| parsed.certificate.clone())
            .collect();
        let labelled: Vec<(&[u8], &Certificate)> = issuers
            .iter()
            .chain(&leaves)
            .map(|parsed| (parsed.id.id.as_slice(), &parsed.certificate))
            .collect();
        let names = friendly_names(&labelled);

        let mut records = Vec::with_capacity(issuers.len() + leaves.len());
        for (parsed, name) in issuers.into_iter().chain(leaves).zip(names) {
            match self.build_record(
                parsed.id,
                parsed.certificate,
                parsed.has_private,
                &pool,
                Some(&name),
            ) {
                Ok(record) => records.push(record),
                Err(e) => self.sink.report("Add key store entry", &e),
            }
        }

        debug!(store, count = records.len(), "list_entries - return");
        records
    }

    /// Rebuilds a record from its serialized reference without enumerating
    /// the token.
    pub fn entry_passive(&self, serialized: &str) -> Option<KeyStoreRecord> {
        debug!("entry_passive - entry");

        let result = self
            .codec
            .decode_certificate(serialized)
            .map_err(StoreError::from)
            .and_then(|decoded| {
                self.record_for_certificate(
                    &decoded.certificate_id,
                    decoded.has_private,
                    &decoded.issuers,
                    None,
                )
            });

        match result {
            Ok(record) => Some(record),
            Err(e) => {
                self.sink.report("Entry passive", &e);
                None
            }
        }
    }

    /// Builds the record for a certificate object, completing its chain from
    /// `issuers`.
    pub fn record_for_certificate(
        &self,
        certificate_id: &CertificateIdentity,
        has_private: bool,
        issuers: &[Certificate],
        name: Option<&str>,
    ) -> StoreResult<KeyStoreRecord> {
        if !certificate_id.has_certificate() {
            return Err(DomainError::MissingCertificate.into());
        }
        let certificate = Certificate::from_der(&certificate_id.certificate_blob)?;
        self.build_record(certificate_id.clone(), certificate, has_private, issuers, name)
    }

    fn build_record(
        &self,
        certificate_id: CertificateIdentity,
        certificate: Certificate,
        has_private: bool,
        pool: &[Certificate],
        name: Option<&str>,
    ) -> StoreResult<KeyStoreRecord> {
        let chain = CertificateChain::new(certificate).complete(pool);
        let serialized = self
            .codec
            .encode_certificate(&certificate_id, &chain, has_private)?;

        let token = self.registry.register(&certificate_id.token).token;
        let store_id = self.codec.store_id(&token)?;

        let primary = chain.primary();
        let id = primary.hash();
        let display_name = name
            .map(str::to_string)
            .unwrap_or_else(|| primary.default_display_name());

        let kind = if has_private {
            let public_key = primary.public_key().cloned().ok_or_else(|| {
                DomainError::UnsupportedKeyType {
                    algorithm: primary.public_key_algorithm().to_string(),
                }
            })?;
            let key = PrivateKeyOperator::new(
                self.driver.clone(),
                self.sink.clone(),
                certificate_id,
                public_key,
            )
            .with_prompt_context(serialized.clone());
            RecordKind::KeyBundle { chain, key }
        } else {
            RecordKind::Certificate(primary.clone())
        };

        Ok(KeyStoreRecord {
            kind,
            id,
            store_id,
            label: token.label,
            display_name,
            serialized,
        })
    }
}

struct ParsedCertificate {
    id: CertificateIdentity,
    certificate: Certificate,
    has_private: bool,
}

fn parse_all(ids: &[CertificateIdentity], has_private: bool) -> Vec<ParsedCertificate> {
    ids.iter()
        .filter_map(|id| match Certificate::from_der(&id.certificate_blob) {
            Ok(certificate) => Some(ParsedCertificate {
                id: id.clone(),
                certificate,
                has_private,
            }),
            Err(e) => {
                warn!(id = %hex::encode(&id.id), "skipping certificate: {e}");
                None
            }
        })
        .collect()
}
