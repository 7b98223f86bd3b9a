//! Durable entry references
//!
//! A serialized reference is
//! `qca-pkcs11/0/<cert id>/<0|1>/<b64 subject>/<b64 issuer>/...` where every
//! field is escaped so it cannot contain `/`.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::error::{DecodeError, StoreResult};
use crate::logic::{escape, unescape};
use crate::model::{Certificate, CertificateChain, CertificateIdentity, TokenIdentity};
use crate::ports::TokenDriver;

pub const STORE_PREFIX: &str = "qca-pkcs11";
pub const SERIALIZATION_VERSION: u32 = 0;

const MIN_FIELDS: usize = 5;

/// A reference decoded back into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReference {
    /// Certificate identity, with the subject certificate as its blob
    pub certificate_id: CertificateIdentity,
    pub has_private: bool,
    /// Issuer chain, excluding the subject certificate
    pub issuers: Vec<Certificate>,
}

#[derive(Clone)]
pub struct IdCodec {
    driver: Arc<dyn TokenDriver>,
}

impl IdCodec {
    pub fn new(driver: Arc<dyn TokenDriver>) -> Self {
        Self { driver }
    }

    /// `qca-pkcs11/<escaped token id>`
    pub fn store_id(&self, token: &TokenIdentity) -> StoreResult<String> {
        let serialized = self.driver.serialize_token_id(token)?;
        Ok(format!("{STORE_PREFIX}/{}", escape(&serialized)))
    }

    pub fn encode_certificate(
        &self,
        certificate_id: &CertificateIdentity,
        chain: &CertificateChain,
        has_private: bool,
    ) -> StoreResult<String> {
        let serialized_id = self.driver.serialize_certificate_id(certificate_id)?;

        let mut out = format!(
            "{STORE_PREFIX}/{SERIALIZATION_VERSION}/{}/{}/",
            escape(&serialized_id),
            u8::from(has_private)
        );
        let certificates: Vec<String> = chain
            .iter()
            .map(|cert| escape(&STANDARD.encode(cert.der())))
            .collect();
        out.push_str(&certificates.join("/"));

        Ok(out)
    }

    pub fn decode_certificate(&self, serialized: &str) -> Result<DecodedReference, DecodeError> {
        debug!("decode_certificate - entry");

        let fields: Vec<&str> = serialized.split('/').collect();
        if fields.len() < MIN_FIELDS {
            return Err(DecodeError::TooFewFields {
                found: fields.len(),
            });
        }
        if fields[0] != STORE_PREFIX {
            return Err(DecodeError::Prefix {
                found: fields[0].to_string(),
            });
        }
        if fields[1].parse::<u32>().ok() != Some(SERIALIZATION_VERSION) {
            return Err(DecodeError::Version {
                found: fields[1].to_string(),
            });
        }

        let mut certificate_id = self
            .driver
            .deserialize_certificate_id(&unescape(fields[2])?)
            .map_err(DecodeError::CertificateId)?;

        let has_private = match fields[3] {
            "0" => false,
            "1" => true,
            other => {
                return Err(DecodeError::PrivateFlag {
                    found: other.to_string(),
                })
            }
        };

        let blob = decode_field(fields[4], 4)?;
        if blob.is_empty() {
            return Err(DecodeError::MissingCertificate);
        }
        certificate_id.certificate_blob = blob;

        let mut issuers = Vec::new();
        for (index, field) in fields.iter().enumerate().skip(MIN_FIELDS) {
            if field.is_empty() {
                continue;
            }
            let der = decode_field(field, index)?;
            issuers.push(Certificate::from_der(&der)?);
        }

        debug!(issuers = issuers.len(), "decode_certificate - return");
        Ok(DecodedReference {
            certificate_id,
            has_private,
            issuers,
        })
    }
}

fn decode_field(field: &str, index: usize) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(unescape(field)?)
        .map_err(|source| DecodeError::Base64 {
            field: index,
            source,
        })
}
